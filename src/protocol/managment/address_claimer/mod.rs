//! Timed wrapper around the address claiming state machine.
//!
//! The claimer owns the two timers the machine itself cannot hold: the
//! 250 ms claim resolution window and the pseudorandom 0..=153 ms delay that
//! precedes every cannot-claim frame. Both are armed deadlines measured
//! against a [`Clock`]; the hosting run loop sleeps until
//! [`AddressClaimer::next_deadline_ms`] and calls [`AddressClaimer::poll`]
//! when it wakes. Outbound frames queue in an outbox drained by the host.
use crate::error::ProtocolError;
use crate::protocol::managment::address_state_machine::{
    AddressState, AddressStateMachine, ClaimEffect, ClaimEvent,
};
use crate::protocol::managment::name::Name;
use crate::protocol::managment::network::{InsertResult, Network};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::traits::clock::Clock;
use crate::protocol::ADDRESS_GLOBAL;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Arc;

/// Time a claim must survive on the bus before the address is owned (ms).
pub const CLAIM_TIMEOUT_MS: u64 = 250;

/// Upper bound of the pseudorandom cannot-claim delay, inclusive (ms).
pub const CANNOT_CLAIM_JITTER_MAX_MS: u64 = 153;

/// Observer for the claimer lifecycle. Implement the methods you care
/// about; the defaults do nothing.
pub trait ClaimObserver {
    /// The local NAME acquired an address.
    fn address_claimed(&mut self, _name: Name, _address: u8) {}
    /// The local NAME lost its address.
    fn address_lost(&mut self, _name: Name) {}
    /// An outbound claim, cannot-claim or request frame was queued.
    fn frame(&mut self, _frame: &CanFrame) {}
    /// A fault occurred while processing bus traffic or timers.
    fn error(&mut self, _what: &str, _error: &ProtocolError) {}
    /// Human-readable trace of state machine activity.
    fn log(&mut self, _line: &str) {}
}

/// Observer that ignores every notification.
pub struct NopClaimObserver;

impl ClaimObserver for NopClaimObserver {}

struct JitterTimer<I> {
    armed_at: I,
    delay_ms: u64,
    /// Post a random retry once the cannot-claim frame is out.
    retry: bool,
}

/// Drives one state machine from CAN frames and timer deadlines.
pub struct AddressClaimer<K: Clock> {
    clock: K,
    network: Arc<Network>,
    machine: AddressStateMachine,
    observer: Box<dyn ClaimObserver + Send>,
    outbox: VecDeque<CanFrame>,
    claim_deadline: Option<K::Instant>,
    jitter: Option<JitterTimer<K::Instant>>,
    rng: SmallRng,
}

impl<K: Clock> AddressClaimer<K> {
    /// Create a claimer for one local NAME. The state machine starts in the
    /// no-address state and immediately asks the bus who is out there.
    pub fn new(clock: K, network: Arc<Network>, name: Name) -> Self {
        let mut claimer = Self {
            clock,
            network,
            machine: AddressStateMachine::new(name),
            observer: Box::new(NopClaimObserver),
            outbox: VecDeque::new(),
            claim_deadline: None,
            jitter: None,
            rng: SmallRng::from_entropy(),
        };
        let mut effects = Vec::new();
        claimer.machine.start(&claimer.network, &mut effects);
        claimer.apply_effects(&effects);
        claimer
    }

    /// Replace the observer.
    pub fn set_observer(&mut self, observer: Box<dyn ClaimObserver + Send>) {
        self.observer = observer;
    }

    /// NAME this claimer arbitrates for.
    pub fn name(&self) -> Name {
        self.machine.name()
    }

    /// Current arbitration state.
    pub fn state(&self) -> AddressState {
        self.machine.state()
    }

    /// Directory this claimer updates.
    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    /// Start the address claiming process. Ignored unless the machine sits
    /// in the no-address state, which makes the call idempotent.
    pub fn start_address_claim(&mut self, preferred_address: u8) {
        if self.machine.state() != AddressState::NoAddress {
            return;
        }
        self.dispatch(ClaimEvent::StartClaim {
            preferred: preferred_address,
        });
    }

    /// Process a J1939 frame containing an address claim or request. Other
    /// frames are ignored.
    pub fn process(&mut self, frame: &CanFrame) {
        if frame.id.is_claim() {
            if frame.len != 8 {
                self.observer.error(
                    "on_frame_address_claim",
                    &ProtocolError::InvalidArgument("claim payload must be 8 bytes"),
                );
                return;
            }
            let name = Name::from_payload(frame.data);
            let source_address = frame.id.source_address();
            if source_address < ADDRESS_GLOBAL
                && self.network.insert(name, source_address) == InsertResult::Rejected
            {
                // The directory kept the prior owner; the machine still sees
                // the event so it can defend, but must not transition.
                self.observer
                    .error("on_frame_address_claim", &ProtocolError::AddressInUse);
            }
            self.address_claim(name, source_address);
        } else if frame.id.is_request() {
            self.address_request(frame.id.pdu_specific());
        }
    }

    /// Feed an address claim event directly (used by the network manager,
    /// which decodes and registers frames once for all claimers).
    pub fn address_claim(&mut self, name: Name, address: u8) {
        self.dispatch(ClaimEvent::AddressClaim { name, address });
    }

    /// Feed an address request event directly.
    pub fn address_request(&mut self, destination: u8) {
        self.dispatch(ClaimEvent::AddressRequest { destination });
    }

    /// Fire any expired deadline. Call whenever the hosting loop wakes.
    pub fn poll(&mut self) {
        if let Some(armed_at) = self.claim_deadline {
            if self.clock.elapsed_ms(armed_at) >= CLAIM_TIMEOUT_MS {
                self.claim_deadline = None;
                self.dispatch(ClaimEvent::Timeout);
            }
        }

        if let Some(jitter) = self.jitter.take() {
            if self.clock.elapsed_ms(jitter.armed_at) < jitter.delay_ms {
                self.jitter = Some(jitter);
                return;
            }
            let frame = CanFrame::cannot_claim(self.machine.name());
            self.observer.frame(&frame);
            self.outbox.push_back(frame);
            if jitter.retry {
                self.dispatch(ClaimEvent::RandomRetry);
            }
        }
    }

    /// Milliseconds until the nearest armed deadline, if any.
    pub fn next_deadline_ms(&self) -> Option<u64> {
        let claim = self
            .claim_deadline
            .map(|armed_at| CLAIM_TIMEOUT_MS.saturating_sub(self.clock.elapsed_ms(armed_at)));
        let jitter = self
            .jitter
            .as_ref()
            .map(|jitter| jitter.delay_ms.saturating_sub(self.clock.elapsed_ms(jitter.armed_at)));
        match (claim, jitter) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Pop the next outbound frame, oldest first.
    pub fn next_frame(&mut self) -> Option<CanFrame> {
        self.outbox.pop_front()
    }

    fn dispatch(&mut self, event: ClaimEvent) {
        let mut effects = Vec::new();
        self.machine.step(event, &self.network, &mut effects);
        let line = format!("process {:?} -> {:?}", event, self.machine.state());
        log::trace!("claimer {}: {line}", self.machine.name());
        self.observer.log(&line);
        self.apply_effects(&effects);
    }

    fn apply_effects(&mut self, effects: &[ClaimEffect]) {
        for effect in effects {
            match *effect {
                ClaimEffect::SendClaim(address) => {
                    let frame = CanFrame::address_claim(self.machine.name(), address);
                    self.observer.frame(&frame);
                    self.outbox.push_back(frame);
                }
                ClaimEffect::SendRequest => {
                    let frame = CanFrame::address_request();
                    self.observer.frame(&frame);
                    self.outbox.push_back(frame);
                }
                ClaimEffect::SendCannotClaim => {
                    let delay_ms = self.rng.gen_range(0..=CANNOT_CLAIM_JITTER_MAX_MS);
                    self.jitter = Some(JitterTimer {
                        armed_at: self.clock.now(),
                        delay_ms,
                        retry: self.machine.name().self_configurable(),
                    });
                }
                ClaimEffect::BeginClaiming => {
                    self.claim_deadline = Some(self.clock.now());
                }
                ClaimEffect::AddressGained(address) => {
                    let name = self.machine.name();
                    self.network.insert(name, address);
                    self.observer.address_claimed(name, address);
                }
                ClaimEffect::AddressLost => {
                    let name = self.machine.name();
                    self.network.release(name);
                    self.observer.address_lost(name);
                }
            }
        }
    }
}
