//! Dynamic J1939 address claiming state machine.
//!
//! Each machine arbitrates one NAME/address pair. The machine holds no
//! timers and performs no I/O: every call to [`AddressStateMachine::step`]
//! folds one event into the current state and appends the resulting
//! [`ClaimEffect`]s for the caller to execute (send a frame, arm the claim
//! timer, update the directory). The wrapper in
//! [`address_claimer`](crate::protocol::managment::address_claimer) supplies
//! the timers and the bus.
use crate::protocol::managment::name::Name;
use crate::protocol::managment::network::Network;
use crate::protocol::{ADDRESS_GLOBAL, ADDRESS_IDLE};

//==================================================================================STATES_AND_EVENTS

/// Arbitration states for one local NAME.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressState {
    /// Initial state, also entered again after an unusable claim window.
    NoAddress,
    /// A claim was emitted and the 250 ms contention window is running.
    Claiming {
        /// Address currently being claimed.
        candidate: u8,
    },
    /// The contention window passed, the address is ours to defend.
    HasAddress {
        /// Address owned by the local NAME.
        address: u8,
    },
    /// Arbitration was lost and no substitute address exists.
    AddressLost,
}

/// Events driving the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimEvent {
    /// Local command to begin claiming an address.
    StartClaim {
        /// Address the application wants to own.
        preferred: u8,
    },
    /// Address claim received from another controller.
    AddressClaim {
        /// NAME of the remote controller.
        name: Name,
        /// Address the remote controller announced.
        address: u8,
    },
    /// Request for address claims received from the bus.
    AddressRequest {
        /// Destination byte of the request (global or one address).
        destination: u8,
    },
    /// The 250 ms claim window expired.
    Timeout,
    /// The pseudorandom retry delay after a cannot claim expired.
    RandomRetry,
}

/// Outputs produced by a transition, executed by the wrapping claimer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimEffect {
    /// Emit an address claim frame for the given address.
    SendClaim(u8),
    /// Emit a cannot claim frame (after the mandated pseudorandom delay).
    SendCannotClaim,
    /// Emit a global request for address claims to learn the neighbours.
    SendRequest,
    /// A claim window opened: arm the 250 ms timeout.
    BeginClaiming,
    /// The contention window passed: the address is acquired.
    AddressGained(u8),
    /// The owned address is gone (displaced or abandoned).
    AddressLost,
}

//==================================================================================STATE_MACHINE

/// State machine arbitrating one local NAME against the network directory.
pub struct AddressStateMachine {
    name: Name,
    state: AddressState,
}

impl AddressStateMachine {
    /// Create a machine in the no-address state.
    pub fn new(name: Name) -> Self {
        Self {
            name,
            state: AddressState::NoAddress,
        }
    }

    /// NAME this machine claims for.
    pub fn name(&self) -> Name {
        self.name
    }

    /// Current arbitration state.
    pub fn state(&self) -> AddressState {
        self.state
    }

    /// Entry behaviour of the initial state: ask the bus who is out there,
    /// or announce failure straight away when the directory is full.
    pub fn start(&mut self, network: &Network, effects: &mut Vec<ClaimEffect>) {
        self.no_address_entry(network, effects);
    }

    /// Fold one event into the machine. Effects are appended in the order
    /// they must be executed.
    pub fn step(&mut self, event: ClaimEvent, network: &Network, effects: &mut Vec<ClaimEffect>) {
        match (self.state, event) {
            // No Address
            (AddressState::NoAddress, ClaimEvent::StartClaim { preferred }) => {
                if network.full() {
                    effects.push(ClaimEffect::SendCannotClaim);
                } else {
                    self.enter_claiming(preferred, network, effects);
                }
            }
            (AddressState::NoAddress, ClaimEvent::AddressRequest { destination })
                if destination == ADDRESS_GLOBAL =>
            {
                effects.push(ClaimEffect::SendCannotClaim);
            }

            // Claiming
            (AddressState::Claiming { candidate }, ClaimEvent::AddressClaim { name, address }) => {
                if self.conflict(candidate, address) && self.priority_ours(name) {
                    // Contender loses, defend the candidate.
                    effects.push(ClaimEffect::SendClaim(candidate));
                } else if self.change_required(name, address, candidate) {
                    if network.full() {
                        self.enter_address_lost(effects);
                    } else {
                        // Look for a substitute and restart the window.
                        self.enter_claiming(candidate, network, effects);
                    }
                }
            }
            (AddressState::Claiming { candidate }, ClaimEvent::AddressRequest { destination })
                if destination == candidate || destination == ADDRESS_GLOBAL =>
            {
                effects.push(ClaimEffect::SendClaim(candidate));
            }
            (AddressState::Claiming { candidate }, ClaimEvent::Timeout) => {
                if self.valid_address(candidate, network) {
                    self.state = AddressState::HasAddress { address: candidate };
                    effects.push(ClaimEffect::AddressGained(candidate));
                } else {
                    self.state = AddressState::NoAddress;
                    self.no_address_entry(network, effects);
                }
            }

            // Has Address
            (AddressState::HasAddress { address }, ClaimEvent::AddressRequest { destination })
                if destination == address || destination == ADDRESS_GLOBAL =>
            {
                effects.push(ClaimEffect::SendClaim(address));
            }
            (
                AddressState::HasAddress { address },
                ClaimEvent::AddressClaim {
                    name,
                    address: claimed,
                },
            ) => {
                if self.conflict(address, claimed) && self.priority_ours(name) {
                    // Defend the owned address against the contender.
                    effects.push(ClaimEffect::SendClaim(address));
                } else if self.change_required(name, claimed, address) {
                    effects.push(ClaimEffect::AddressLost);
                    if network.full() {
                        self.enter_address_lost(effects);
                    } else {
                        self.enter_claiming(address, network, effects);
                    }
                }
            }

            // Address Lost
            (AddressState::AddressLost, ClaimEvent::AddressRequest { destination })
                if destination == ADDRESS_GLOBAL =>
            {
                effects.push(ClaimEffect::SendCannotClaim);
            }
            (AddressState::AddressLost, ClaimEvent::RandomRetry) => {
                if self.name.self_configurable() && !network.full() {
                    self.enter_claiming(0, network, effects);
                } else {
                    effects.push(ClaimEffect::SendCannotClaim);
                    self.state = AddressState::NoAddress;
                    self.no_address_entry(network, effects);
                }
            }

            // Anything else leaves the state untouched.
            _ => {}
        }
    }

    //==================================================================================GUARDS

    /// Local NAME wins the arbitration against `other`.
    fn priority_ours(&self, other: Name) -> bool {
        self.name < other
    }

    /// Two addresses designate the same slot.
    fn conflict(&self, ours: u8, theirs: u8) -> bool {
        ours == theirs
    }

    /// A contender with priority announced our address.
    fn change_required(&self, other: Name, claimed: u8, ours: u8) -> bool {
        self.conflict(ours, claimed) && !self.priority_ours(other)
    }

    /// The candidate survived the window: it is still claimable, or the
    /// directory already records an address for us.
    fn valid_address(&self, candidate: u8, network: &Network) -> bool {
        network.claimable(candidate, self.name)
            || network
                .get_address(self.name)
                .is_some_and(|address| address < ADDRESS_IDLE)
    }

    //==================================================================================ENTRY_ACTIONS

    fn no_address_entry(&mut self, network: &Network, effects: &mut Vec<ClaimEffect>) {
        if network.full() {
            effects.push(ClaimEffect::SendCannotClaim);
        } else {
            effects.push(ClaimEffect::SendRequest);
        }
    }

    /// Open a claim window: pick the best candidate starting from
    /// `preferred` and announce it. With no candidate left the claim
    /// degrades to the idle address, which is the cannot-claim wire form.
    fn enter_claiming(&mut self, preferred: u8, network: &Network, effects: &mut Vec<ClaimEffect>) {
        effects.push(ClaimEffect::BeginClaiming);
        let candidate = network
            .find_address(self.name, preferred)
            .unwrap_or(ADDRESS_IDLE);
        self.state = AddressState::Claiming { candidate };
        effects.push(ClaimEffect::SendClaim(candidate));
    }

    fn enter_address_lost(&mut self, effects: &mut Vec<ClaimEffect>) {
        self.state = AddressState::AddressLost;
        effects.push(ClaimEffect::SendCannotClaim);
    }
}
