//! Fan-out for hosts that run several Controller Applications at once.
//!
//! The manager owns one claimer per local NAME. Incoming claim and request
//! frames are decoded and registered once, then routed either to the claimer
//! owning the targeted address or to every claimer for global traffic.
use crate::protocol::managment::address_claimer::AddressClaimer;
use crate::protocol::managment::name::Name;
use crate::protocol::managment::network::{InsertResult, Network};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::traits::clock::Clock;
use crate::protocol::{ADDRESS_GLOBAL, ADDRESS_IDLE};
use std::sync::Arc;

/// Callback fired once per previously-unseen remote NAME.
pub type NewControllerCallback = Box<dyn FnMut(Name, u8) + Send>;

/// NAME to claimer registry with shared frame routing.
pub struct NetworkManager<K: Clock> {
    network: Arc<Network>,
    claimers: Vec<AddressClaimer<K>>,
    on_new_controller: Option<NewControllerCallback>,
}

impl<K: Clock> NetworkManager<K> {
    /// Create an empty manager over a shared directory.
    pub fn new(network: Arc<Network>) -> Self {
        Self {
            network,
            claimers: Vec::new(),
            on_new_controller: None,
        }
    }

    /// Register the new-controller callback.
    pub fn on_new_controller(&mut self, callback: NewControllerCallback) {
        self.on_new_controller = Some(callback);
    }

    /// Directory shared by every managed claimer.
    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    /// Add a claimer. A NAME that is already managed is ignored.
    pub fn register(&mut self, claimer: AddressClaimer<K>) {
        if self.claimer(claimer.name()).is_some() {
            return;
        }
        self.claimers.push(claimer);
    }

    /// Remove the claimer arbitrating for `name`.
    pub fn remove(&mut self, name: Name) {
        self.claimers.retain(|claimer| claimer.name() != name);
    }

    /// Number of managed controllers.
    pub fn len(&self) -> usize {
        self.claimers.len()
    }

    /// Check if any controllers are managed.
    pub fn is_empty(&self) -> bool {
        self.claimers.is_empty()
    }

    /// Claimer arbitrating for `name`, if managed.
    pub fn claimer(&self, name: Name) -> Option<&AddressClaimer<K>> {
        self.claimers.iter().find(|claimer| claimer.name() == name)
    }

    /// Mutable access to the claimer arbitrating for `name`.
    pub fn claimer_mut(&mut self, name: Name) -> Option<&mut AddressClaimer<K>> {
        self.claimers
            .iter_mut()
            .find(|claimer| claimer.name() == name)
    }

    /// Start the claim procedure for one managed NAME.
    pub fn start_address_claim(&mut self, name: Name, preferred_address: u8) {
        if let Some(claimer) = self.claimer_mut(name) {
            claimer.start_address_claim(preferred_address);
        }
    }

    /// Process an address claim or request frame. Other frames are ignored.
    pub fn process(&mut self, frame: &CanFrame) {
        if frame.id.is_claim() {
            if frame.len != 8 {
                return;
            }
            self.on_frame_address_claim(
                Name::from_payload(frame.data),
                frame.id.pdu_specific(),
                frame.id.source_address(),
            );
        } else if frame.id.is_request() {
            self.on_frame_address_request(frame.id.pdu_specific());
        }
    }

    /// Fire any expired claimer deadline.
    pub fn poll(&mut self) {
        for claimer in &mut self.claimers {
            claimer.poll();
        }
    }

    /// Milliseconds until the nearest deadline across all claimers.
    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.claimers
            .iter()
            .filter_map(|claimer| claimer.next_deadline_ms())
            .min()
    }

    /// Pop the next queued outbound frame from any claimer.
    pub fn next_frame(&mut self) -> Option<CanFrame> {
        self.claimers
            .iter_mut()
            .find_map(|claimer| claimer.next_frame())
    }

    /// Register the claim in the directory once, then route the event.
    ///
    /// Claims are almost always addressed to global; the rare claim aimed at
    /// one address only concerns the claimer owning that address.
    fn on_frame_address_claim(&mut self, name: Name, pdu_specific: u8, source_address: u8) {
        if source_address < ADDRESS_GLOBAL {
            let known = self.network.in_network(name);
            let result = self.network.insert(name, source_address);
            if !known && result != InsertResult::Rejected {
                if let Some(on_new_controller) = self.on_new_controller.as_mut() {
                    on_new_controller(name, source_address);
                }
            }
        }

        if pdu_specific < ADDRESS_IDLE {
            if let Some(owner) = self.network.get_name(pdu_specific) {
                if let Some(claimer) = self.claimer_mut(owner) {
                    claimer.address_claim(name, source_address);
                }
            }
            return;
        }

        for claimer in &mut self.claimers {
            claimer.address_claim(name, source_address);
        }
    }

    fn on_frame_address_request(&mut self, destination: u8) {
        if destination < ADDRESS_IDLE {
            if let Some(owner) = self.network.get_name(destination) {
                if let Some(claimer) = self.claimer_mut(owner) {
                    claimer.address_request(destination);
                }
            }
            return;
        }

        for claimer in &mut self.claimers {
            claimer.address_request(destination);
        }
    }
}
