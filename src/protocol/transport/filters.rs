//! Kernel filter descriptions for raw CAN sockets.
//!
//! Dynamic addressing makes source-address filtering fragile, so the filters
//! match on the PGN portion of the identifier only; the connection's address
//! check handles the rest in user space.
use crate::protocol::{PGN_ADDRESS_CLAIM, PGN_PDU1_MASK, PGN_REQUEST, PGN_TP_CM, PGN_TP_DT};

/// One identifier/mask pair as understood by raw CAN socket filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CanFilter {
    /// Identifier bits that must match after masking.
    pub id: u32,
    /// Mask applied to the received identifier before comparison.
    pub mask: u32,
}

impl CanFilter {
    /// Check a 29-bit identifier against the filter.
    pub const fn matches(&self, id: u32) -> bool {
        id & self.mask == self.id & self.mask
    }
}

/// Filter set handed to [`CanBus::set_filters`]. The policy mirrors the two
/// socket options a raw CAN implementation typically offers.
///
/// [`CanBus::set_filters`]: crate::protocol::transport::traits::can_bus::CanBus::set_filters
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterPolicy {
    /// Accept a frame when any filter matches.
    MatchAny(Vec<CanFilter>),
    /// Accept a frame only when every filter matches.
    MatchAll(Vec<CanFilter>),
}

impl FilterPolicy {
    /// Evaluate the policy against a 29-bit identifier.
    pub fn accepts(&self, id: u32) -> bool {
        match self {
            FilterPolicy::MatchAny(filters) => filters.iter().any(|f| f.matches(id)),
            FilterPolicy::MatchAll(filters) => filters.iter().all(|f| f.matches(id)),
        }
    }
}

/// Filter accepting address claim frames regardless of source.
pub const fn address_claim_filter() -> CanFilter {
    CanFilter {
        id: PGN_ADDRESS_CLAIM << 8,
        mask: PGN_PDU1_MASK << 8,
    }
}

/// Filter accepting request frames regardless of source and destination.
pub const fn address_request_filter() -> CanFilter {
    CanFilter {
        id: PGN_REQUEST << 8,
        mask: PGN_PDU1_MASK << 8,
    }
}

/// Filters accepting the two transport protocol PGNs (TP.CM and TP.DT).
pub const fn transport_filters() -> [CanFilter; 2] {
    [
        CanFilter {
            id: PGN_TP_CM << 8,
            mask: PGN_PDU1_MASK << 8,
        },
        CanFilter {
            id: PGN_TP_DT << 8,
            mask: PGN_PDU1_MASK << 8,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_filter_matches_any_source() {
        let filter = address_claim_filter();
        assert!(filter.matches(0x18EEFFAA));
        assert!(filter.matches(0x18EEFF01));
        assert!(!filter.matches(0x18EAFFFE));
    }

    #[test]
    fn test_request_filter_ignores_destination() {
        let filter = address_request_filter();
        assert!(filter.matches(0x18EAFFFE));
        assert!(filter.matches(0x18EA2BFE));
        assert!(!filter.matches(0x18EEFFAA));
    }

    #[test]
    fn test_policy_any_vs_all() {
        let any = FilterPolicy::MatchAny(vec![address_claim_filter(), address_request_filter()]);
        assert!(any.accepts(0x18EEFFAA));
        assert!(any.accepts(0x18EAFFFE));
        assert!(!any.accepts(0x18EB1020));

        let all = FilterPolicy::MatchAll(vec![address_claim_filter(), address_request_filter()]);
        assert!(!all.accepts(0x18EEFFAA));
    }
}
