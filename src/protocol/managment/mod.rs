//! Network management logic: the 64-bit NAME, the NAME/address directory,
//! the address claiming state machine and its timed wrapper, and the
//! multi-controller fan-out.
pub mod address_claimer;
pub mod address_state_machine;
pub mod name;
pub mod network;
pub mod network_manager;
