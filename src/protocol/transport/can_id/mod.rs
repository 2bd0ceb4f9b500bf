//! Creation and extraction of the 29-bit CAN identifiers used by SAE J1939.
use crate::error::CanIdBuildError;
use crate::protocol::{PF_ADDRESS_CLAIM, PF_PDU1_MAX, PF_REQUEST};

// Define, build, and decompose a J1939 CAN identifier.
//
// Bit layout of the 29-bit identifier:
//   [28:26] priority, [25] reserved, [24] data page,
//   [23:16] PDU format (PF), [15:8] PDU specific (PS), [7:0] source address.
// On a raw socket the identifier is carried with the extended-frame flag set
// and the RTR/ERR flags clear; see [`CanId::eff_id`].

/// Extended frame format flag as used by Linux raw CAN sockets (bit 31).
pub const CAN_EFF_FLAG: u32 = 0x8000_0000;

//==================================================================================CAN_ID
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Encapsulates an extended CAN identifier (29 bits) and exposes accessors
/// for priority, PGN, destination, and source.
pub struct CanId(pub u32);

impl CanId {
    /// Creates a pre-configured `CanIdBuilder` for a PGN and source address.
    pub fn builder(pgn: u32, source_address: u8) -> CanIdBuilder {
        CanIdBuilder::new(pgn, source_address)
    }

    /// Assemble an identifier directly from its raw fields.
    pub const fn from_parts(
        priority: u8,
        data_page: bool,
        pdu_format: u8,
        pdu_specific: u8,
        source_address: u8,
    ) -> Self {
        Self(
            (((priority & 0x07) as u32) << 26)
                | ((data_page as u32) << 24)
                | ((pdu_format as u32) << 16)
                | ((pdu_specific as u32) << 8)
                | (source_address as u32),
        )
    }

    // Getters used to deconstruct the identifier

    /// Returns the priority (3 bits, value 0-7, 0 is highest) encoded in the CAN ID.
    pub const fn priority(&self) -> u8 {
        ((self.0 >> 26) & 0x07) as u8
    }

    /// Returns the data page bit used to extend the PDU number range.
    pub const fn data_page(&self) -> u8 {
        ((self.0 >> 24) & 0x01) as u8
    }

    /// PDU format byte. Below 240 the frame is addressed and PS holds the
    /// destination; from 240 upward the frame is broadcast and PS is a group
    /// extension.
    pub const fn pdu_format(&self) -> u8 {
        ((self.0 >> 16) & 0xFF) as u8
    }

    /// PDU specific byte: destination address (PDU1) or group extension (PDU2).
    pub const fn pdu_specific(&self) -> u8 {
        ((self.0 >> 8) & 0xFF) as u8
    }

    /// Eight-bit source address of the emitting node.
    pub const fn source_address(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// Extracts the 18-bit PGN, handling the PDU1/PDU2 distinction.
    pub const fn pgn(&self) -> u32 {
        let ps = (self.0 >> 8) & 0xFF;
        let pf = (self.0 >> 16) & 0xFF;
        let dp = (self.0 >> 24) & 0x01;
        let r = (self.0 >> 25) & 0x01;

        if pf as u8 > PF_PDU1_MAX {
            // PDU2: implicit destination, PS becomes part of the PGN.
            (r << 17) | (dp << 16) | (pf << 8) | ps
        } else {
            // PDU1: PS stores the explicit destination.
            (r << 17) | (dp << 16) | (pf << 8)
        }
    }

    /// Returns the destination address when the frame is addressed (PDU1).
    pub const fn destination(&self) -> Option<u8> {
        if self.is_broadcast() {
            None
        } else {
            Some(self.pdu_specific())
        }
    }

    /// Check if the frame is broadcast (PDU2) or addressed (PDU1).
    pub const fn is_broadcast(&self) -> bool {
        self.pdu_format() > PF_PDU1_MAX
    }

    /// Check if the identifier carries an address claim (PF 0xEE).
    pub const fn is_claim(&self) -> bool {
        self.pdu_format() == PF_ADDRESS_CLAIM
    }

    /// Check if the identifier carries a request (PF 0xEA).
    pub const fn is_request(&self) -> bool {
        self.pdu_format() == PF_REQUEST
    }

    /// Identifier as written to a raw socket: extended frame flag set,
    /// RTR and error flags clear.
    pub const fn eff_id(&self) -> u32 {
        (self.0 & 0x1FFF_FFFF) | CAN_EFF_FLAG
    }

    /// Copy of the identifier with a different source address.
    pub const fn with_source_address(self, source_address: u8) -> Self {
        Self((self.0 & !0xFF) | source_address as u32)
    }

    /// Copy of the identifier with a different PDU specific byte.
    pub const fn with_pdu_specific(self, pdu_specific: u8) -> Self {
        Self((self.0 & !0xFF00) | ((pdu_specific as u32) << 8))
    }
}

//==================================================================================CAN_ID_BUILDER
#[derive(Debug)]
/// Fluent builder that enforces the PDU1/PDU2 rules.
pub struct CanIdBuilder {
    priority: u8,
    pgn: u32,
    source_address: u8,
    destination: Option<u8>,
}

impl CanIdBuilder {
    /// Initializes the builder for a given PGN and source address.
    pub fn new(pgn: u32, source_address: u8) -> Self {
        Self {
            priority: 6, // Default priority
            pgn,
            source_address,
            destination: None,
        }
    }

    /// Sets the priority (3 bits) to use during construction.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority & 0x07;
        self
    }

    /// Assigns a destination address (PDU1). Implies an addressed message.
    pub fn to_destination(mut self, destination_address: u8) -> Self {
        self.destination = Some(destination_address);
        self
    }

    /// Builds the CAN identifier while applying the J1939 rules:
    /// - PF < 240: addressed message (PDU1), `destination` mandatory and the
    ///   PGN PS byte must be zero
    /// - PF >= 240: broadcast (PDU2), `destination` must not be provided
    /// - R/DP/PF/PS bits are copied from the provided PGN
    ///
    /// Returns a dedicated error when the configuration violates these rules.
    pub fn build(self) -> Result<CanId, CanIdBuildError> {
        let r_from_pgn = (self.pgn >> 17) & 0x01;
        let dp_from_pgn = (self.pgn >> 16) & 0x01;
        let pf_from_pgn = ((self.pgn >> 8) & 0xFF) as u8;
        let ps_from_pgn = (self.pgn & 0xFF) as u8;

        match self.destination {
            None => {
                if pf_from_pgn <= PF_PDU1_MAX {
                    return Err(CanIdBuildError::InvalidForBroadcast);
                }
                let id = ((self.priority as u32) << 26)
                    | (r_from_pgn << 25)
                    | (dp_from_pgn << 24)
                    | ((pf_from_pgn as u32) << 16)
                    | ((ps_from_pgn as u32) << 8)
                    | (self.source_address as u32);
                Ok(CanId(id))
            }

            Some(da) => {
                if pf_from_pgn > PF_PDU1_MAX {
                    return Err(CanIdBuildError::InvalidForAddressed { pf: pf_from_pgn });
                }
                if ps_from_pgn != 0 {
                    return Err(CanIdBuildError::PsMustBeNull);
                }
                let id = ((self.priority as u32) << 26)
                    | (r_from_pgn << 25)
                    | (dp_from_pgn << 24)
                    | ((pf_from_pgn as u32) << 16)
                    | ((da as u32) << 8)
                    | (self.source_address as u32);
                Ok(CanId(id))
            }
        }
    }
}
