//! Storage for the relation between controller NAMEs and their addresses.
//!
//! The directory is the single piece of state shared between the address
//! claimers and the connection: claim arbitration mutates it, outgoing frame
//! addressing reads it. Readers take a shared lock, writers an exclusive one,
//! so it can be handed to several strands at once.
use crate::protocol::managment::name::Name;
use crate::protocol::{ADDRESS_GLOBAL, ADDRESS_IDLE, ADDRESS_MAX_UNICAST};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Outcome of [`Network::insert`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertResult {
    /// The NAME now owns the requested address.
    Claimed,
    /// The NAME was registered (or moved) to the idle address.
    Idled,
    /// The address belongs to a higher-priority NAME; the claimant was
    /// registered at the idle address instead.
    Rejected,
}

/// Callback fired when a NAME acquires an address. Runs while the exclusive
/// lock is held and must not re-enter the directory.
pub type NewNameCallback = Box<dyn Fn(Name, u8) + Send + Sync>;

#[derive(Default)]
struct Directory {
    name_to_address: HashMap<Name, u8>,
    address_to_name: HashMap<u8, Name>,
    on_new_name: Option<NewNameCallback>,
}

impl Directory {
    /// A slot is claimable by `name` when it is free or its occupant loses
    /// the arbitration (occupant NAME is numerically larger or equal).
    fn claimable(&self, address: u8, name: Name) -> bool {
        match self.address_to_name.get(&address) {
            None => true,
            Some(&occupant) => occupant >= name,
        }
    }

    /// Drop the reverse mapping a NAME currently holds, if any.
    fn clear_reverse(&mut self, name: Name) {
        if let Some(&previous) = self.name_to_address.get(&name) {
            if previous < ADDRESS_IDLE {
                self.address_to_name.remove(&previous);
            }
        }
    }

    fn notify_new_name(&self, name: Name, address: u8) {
        if let Some(on_new_name) = self.on_new_name.as_ref() {
            on_new_name(name, address);
        }
    }
}

/// Thread-safe bidirectional NAME/address map for one CAN interface.
pub struct Network {
    interface_name: String,
    inner: RwLock<Directory>,
}

impl Network {
    /// Create an empty directory bound to a CAN interface name.
    pub fn new(interface_name: impl Into<String>) -> Self {
        Self {
            interface_name: interface_name.into(),
            inner: RwLock::new(Directory::default()),
        }
    }

    /// Name of the CAN interface this directory describes.
    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    /// Register the callback fired when a NAME acquires an address.
    pub fn on_new_name(&self, callback: NewNameCallback) {
        self.inner.write().on_new_name = Some(callback);
    }

    /// ##################### Map access ##################### ///

    /// Add a controller to the network. An idle address registers the NAME
    /// without a slot (or clears the one it had). A unicast address is
    /// granted when the slot is free or the occupant loses the arbitration;
    /// otherwise the claimant is parked at the idle address.
    ///
    /// The global address is an arguments-in-range violation; release builds
    /// treat it as the idle path.
    pub fn insert(&self, name: Name, address: u8) -> InsertResult {
        debug_assert!(
            address != ADDRESS_GLOBAL,
            "cannot insert with the global address"
        );

        let mut directory = self.inner.write();

        if address >= ADDRESS_IDLE {
            directory.clear_reverse(name);
            directory.name_to_address.insert(name, ADDRESS_IDLE);
            log::trace!("network: {name} registered idle");
            return InsertResult::Idled;
        }

        if let Some(&occupant) = directory.address_to_name.get(&address) {
            if occupant == name {
                return InsertResult::Claimed;
            }
            if name < occupant {
                // The claimant wins, the occupant falls back to idle.
                directory.name_to_address.insert(occupant, ADDRESS_IDLE);
                directory.clear_reverse(name);
                directory.address_to_name.insert(address, name);
                directory.name_to_address.insert(name, address);
                log::debug!("network: {name} took address {address} from {occupant}");
                directory.notify_new_name(name, address);
                return InsertResult::Claimed;
            }
            // The occupant wins; remember the claimant without an address.
            directory.name_to_address.entry(name).or_insert(ADDRESS_IDLE);
            return InsertResult::Rejected;
        }

        directory.clear_reverse(name);
        directory.address_to_name.insert(address, name);
        directory.name_to_address.insert(name, address);
        log::debug!("network: {name} claimed address {address}");
        directory.notify_new_name(name, address);
        InsertResult::Claimed
    }

    /// Release the address of the given NAME, keeping it registered idle.
    pub fn release(&self, name: Name) {
        let mut directory = self.inner.write();
        let Some(&address) = directory.name_to_address.get(&name) else {
            return;
        };
        directory.name_to_address.insert(name, ADDRESS_IDLE);
        if address < ADDRESS_IDLE {
            directory.address_to_name.remove(&address);
        }
    }

    /// Remove a NAME and its address entirely.
    pub fn remove(&self, name: Name) {
        let mut directory = self.inner.write();
        let Some(address) = directory.name_to_address.remove(&name) else {
            return;
        };
        if address < ADDRESS_IDLE {
            directory.address_to_name.remove(&address);
        }
    }

    /// Clear all NAMEs and addresses.
    pub fn clear(&self) {
        let mut directory = self.inner.write();
        directory.name_to_address.clear();
        directory.address_to_name.clear();
    }

    /// ##################### Queries ##################### ///

    /// Check whether a unicast address is unoccupied. Idle and global inputs
    /// are never available.
    pub fn available(&self, address: u8) -> bool {
        if address >= ADDRESS_IDLE {
            return false;
        }
        !self.inner.read().address_to_name.contains_key(&address)
    }

    /// Check whether `name` could take `address`: the slot is free, already
    /// its own, or occupied by a NAME that loses the arbitration.
    pub fn claimable(&self, address: u8, name: Name) -> bool {
        if address > ADDRESS_MAX_UNICAST {
            return false;
        }
        self.inner.read().claimable(address, name)
    }

    /// Check if a controller is registered in the network.
    pub fn in_network(&self, name: Name) -> bool {
        self.inner.read().name_to_address.contains_key(&name)
    }

    /// Get the NAME of the controller holding an address.
    pub fn get_name(&self, address: u8) -> Option<Name> {
        self.inner.read().address_to_name.get(&address).copied()
    }

    /// Get the address of a controller. Registered controllers without a
    /// slot report the idle address; unknown controllers report `None`.
    pub fn get_address(&self, name: Name) -> Option<u8> {
        self.inner.read().name_to_address.get(&name).copied()
    }

    /// Number of claimed addresses in the network.
    pub fn address_count(&self) -> usize {
        self.inner.read().address_to_name.len()
    }

    /// Number of controllers registered in the network.
    pub fn controller_count(&self) -> usize {
        self.inner.read().name_to_address.len()
    }

    /// Check if every unicast address is taken.
    pub fn full(&self) -> bool {
        self.inner.read().address_to_name.len() >= ADDRESS_IDLE as usize
    }

    /// Snapshot of every NAME currently registered.
    pub fn names(&self) -> Vec<Name> {
        self.inner.read().name_to_address.keys().copied().collect()
    }

    /// Search for an address `name` could claim, walking `[preferred, 253]`
    /// then `[0, preferred)`. A NAME that is not self-configurable is only
    /// ever offered its preferred address. Returns `None` when nothing is
    /// claimable.
    pub fn find_address(&self, name: Name, preferred: u8) -> Option<u8> {
        let preferred = preferred.min(ADDRESS_MAX_UNICAST);
        let directory = self.inner.read();

        if !name.self_configurable() {
            return directory.claimable(preferred, name).then_some(preferred);
        }

        (preferred..=ADDRESS_MAX_UNICAST)
            .chain(0..preferred)
            .find(|&address| directory.claimable(address, name))
    }
}
