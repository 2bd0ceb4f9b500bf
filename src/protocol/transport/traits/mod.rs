//! Abstraction traits used by the transport layer (CAN bus, timer, and clock).
pub mod can_bus;
pub mod clock;
pub mod timer;
