//! High-level components of the J1939 protocol: address management, CAN
//! transport, and the connection facade, plus the constants shared by all of
//! them.
pub mod connection;
pub mod managment;
pub mod transport;

//==================================================================================ADDRESSES

/// Highest usable unicast address. A network can hold 254 nodes (0 to 253).
pub const ADDRESS_MAX_UNICAST: u8 = 0xFD;

/// Idle or null address, used as source by nodes that own no address.
pub const ADDRESS_IDLE: u8 = 0xFE;

/// Global broadcast address. Never a legitimate source address.
pub const ADDRESS_GLOBAL: u8 = 0xFF;

//==================================================================================PGNS

/// PDU format byte of the address claim PGN.
pub const PF_ADDRESS_CLAIM: u8 = 0xEE;

/// PDU format byte of the request PGN.
pub const PF_REQUEST: u8 = 0xEA;

/// Highest PDU format of an addressable (PDU1) message. Anything above is
/// broadcast (PDU2) and its PS byte is a group extension.
pub const PF_PDU1_MAX: u8 = 0xEF;

/// Address claim PGN (PDU1, PS carries the destination).
pub const PGN_ADDRESS_CLAIM: u32 = 0x0EE00;

/// Request PGN, used to ask other nodes to re-emit their claims.
pub const PGN_REQUEST: u32 = 0x0EA00;

/// Transport protocol connection management PGN (TP.CM).
pub const PGN_TP_CM: u32 = 0x0EC00;

/// Transport protocol data transfer PGN (TP.DT).
pub const PGN_TP_DT: u32 = 0x0EB00;

/// Mask covering the reserved bit, data page and PDU format of a PGN.
/// Applied to an incoming PGN before comparing against a PDU1 PGN constant.
pub const PGN_PDU1_MASK: u32 = 0x3FF00;

/// Largest representable PGN (18 bits).
pub const PGN_MAX: u32 = 0x3FFFF;
