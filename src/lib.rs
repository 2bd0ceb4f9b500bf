//! `korri-j1939` library: everything a Controller Application needs to join
//! an SAE J1939 network. The crate covers dynamic address claiming with the
//! J1939-81 arbitration rules, a concurrent NAME/address directory, the
//! J1939-21 transport protocol (TP.CM / TP.DT, both BAM and RTS/CTS), and a
//! connection facade that ties them to an abstract CAN bus.
//!
//! Application payloads are not interpreted here; the crate only speaks the
//! identity and framing PGNs (address claim, request, TP control and data).
//==================================================================================
/// Domain errors (CAN identifier construction, directory and transport
/// failures, send-path diagnostics).
pub mod error;
/// J1939 protocol implementation: address management, transport, and the
/// connection facade.
pub mod protocol;
//==================================================================================
