//! J1939 transport layer: CAN frame representation, 29-bit identifier
//! management, the multi-packet transport protocol, kernel filter
//! descriptions, and the bus abstraction traits.
//!
//! ## J1939-21 Timing Constants
//!
//! Timeout values for transport protocol sessions as mandated by the
//! standard. The engine scans sessions roughly every [`TP_TICK_MS`] and
//! aborts those whose inactivity exceeded their bound.

pub mod can_frame;
pub mod can_id;
pub mod filters;
pub mod traits;
pub mod transport_protocol;

/// Wait bound between an RTS and the first CTS answering it (ms).
pub const TP_T1_MS: u64 = 750;

/// Wait bound between a CTS grant and the first data packet (ms).
pub const TP_T2_MS: u64 = 1250;

/// Wait bound between the final data packet and the end-of-message
/// acknowledgement, and between successive CTS grants (ms).
pub const TP_T3_MS: u64 = 1250;

/// Minimum separation time between retransmission attempts (ms).
pub const TP_TR_MS: u64 = 200;

/// Recommended period for the transport protocol expiry scan (ms).
pub const TP_TICK_MS: u64 = 100;

/// Maximum payload a transport protocol session can carry:
/// 255 packets of 7 bytes each.
pub const MAX_TP_PAYLOAD: usize = 1785;

/// Data bytes carried by one TP.DT packet.
pub const TP_PACKET_DATA: usize = 7;
