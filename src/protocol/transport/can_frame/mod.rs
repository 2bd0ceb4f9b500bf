//! In-memory representation of an SAE J1939 CAN frame plus the factories for
//! the fixed frames of the address claim procedure.
use crate::protocol::managment::name::Name;
use crate::protocol::transport::can_id::CanId;
use crate::protocol::{ADDRESS_GLOBAL, ADDRESS_IDLE, PF_ADDRESS_CLAIM, PF_REQUEST, PGN_ADDRESS_CLAIM};
use core::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
/// Raw J1939 frame as read from the CAN bus.
pub struct CanFrame {
    /// Full 29-bit CAN identifier stored inside a `u32`.
    pub id: CanId,
    /// Payload buffer. Classic CAN frames always provide eight bytes.
    pub data: [u8; 8],
    /// Number of valid payload bytes (Data Length Code, 0 to 8).
    pub len: usize,
}

impl CanFrame {
    /// Build a frame from an identifier and a payload slice.
    ///
    /// # Panics
    /// Panics when `payload` exceeds eight bytes.
    pub fn new(id: CanId, payload: &[u8]) -> Self {
        assert!(payload.len() <= 8, "CAN payload is at most 8 bytes");
        let mut data = [0u8; 8];
        data[..payload.len()].copy_from_slice(payload);
        Self {
            id,
            data,
            len: payload.len(),
        }
    }

    //==================================================================================FRAME_ARCHETYPES

    /// Build an address claim frame (PGN 60928) for the provided NAME.
    ///
    /// Identifier is `0x18EEFF<sa>`: priority 6, destination global, claimed
    /// address as source. The payload is the NAME in little-endian order.
    pub fn address_claim(name: Name, source_address: u8) -> Self {
        Self {
            id: CanId::from_parts(6, false, PF_ADDRESS_CLAIM, ADDRESS_GLOBAL, source_address),
            data: name.to_payload(),
            len: 8,
        }
    }

    /// Build a cannot claim frame: an address claim whose source is the idle
    /// address, announcing that the NAME failed to acquire an address.
    pub fn cannot_claim(name: Name) -> Self {
        Self::address_claim(name, ADDRESS_IDLE)
    }

    /// Build a global request for address claims (identifier `0x18EAFFFE`).
    /// Used to learn which nodes are on the network.
    pub fn address_request() -> Self {
        Self::address_request_to(ADDRESS_GLOBAL)
    }

    /// Build a request for address claims targeted at one destination.
    pub fn address_request_to(destination: u8) -> Self {
        let mut data = [0u8; 8];
        // Three-byte payload carrying the requested PGN, LSB first.
        data[..3].copy_from_slice(&PGN_ADDRESS_CLAIM.to_le_bytes()[..3]);
        Self {
            id: CanId::from_parts(6, false, PF_REQUEST, destination, ADDRESS_IDLE),
            data,
            len: 3,
        }
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}:", self.id.0)?;
        for byte in &self.data[..self.len] {
            write!(f, "{byte:02X}'")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_request_bit_pattern() {
        let frame = CanFrame::address_request();
        assert_eq!(frame.id.0, 0x18EAFFFE);
        assert_eq!(frame.len, 3);
        assert_eq!(&frame.data[..3], &[0x00, 0xEE, 0x00]);
    }

    #[test]
    fn test_targeted_address_request() {
        let frame = CanFrame::address_request_to(0x2B);
        assert_eq!(frame.id.0, 0x18EA2BFE);
        assert_eq!(&frame.data[..3], &[0x00, 0xEE, 0x00]);
    }

    #[test]
    fn test_address_claim_bit_pattern() {
        let frame = CanFrame::address_claim(Name::from_raw(0), 0xAA);
        assert_eq!(frame.id.0, 0x18EEFF00 | 0xAA);
        assert_eq!(frame.len, 8);
        assert_eq!(frame.data, [0u8; 8]);
    }

    #[test]
    fn test_cannot_claim_bit_pattern() {
        let name = Name::from_raw(0x0102_0304_0506_0708);
        let frame = CanFrame::cannot_claim(name);
        assert_eq!(frame.id.0, 0x18EEFFFE);
        assert_eq!(frame.data, name.to_payload());
    }

    #[test]
    fn test_claim_payload_is_name_little_endian() {
        let name = Name::from_raw(0x8000_0000_0000_00FF);
        let frame = CanFrame::address_claim(name, 0x01);
        assert_eq!(frame.data[0], 0xFF);
        assert_eq!(frame.data[7], 0x80);
    }
}
