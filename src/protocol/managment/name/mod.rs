//! SAE J1939 NAME field implementation (64 bits). The NAME uniquely
//! identifies a Controller Application on the network and decides every
//! address arbitration: when two nodes contend for one address, the
//! numerically smaller NAME wins. The module provides a typed wrapper around
//! the raw `u64` plus safe accessors/builders.
//!
//! # Bit layout (Little Endian order)
//!
//! ```text
//! Bits  0-20  (21 bits) : Identity number
//! Bits 21-31  (11 bits) : Manufacturer code
//! Bits 32-34  ( 3 bits) : ECU instance
//! Bits 35-39  ( 5 bits) : Function instance
//! Bits 40-47  ( 8 bits) : Function
//! Bit  48     ( 1 bit ) : Reserved
//! Bits 49-55  ( 7 bits) : Vehicle system
//! Bits 56-59  ( 4 bits) : Vehicle system instance
//! Bits 60-62  ( 3 bits) : Industry group
//! Bit  63     ( 1 bit ) : Self-configurable address
//! ```

use core::fmt;

/// Wrapper around the J1939 NAME field (64 bits).
///
/// Ordering is the arbitration ordering: NAMEs compare as unsigned 64-bit
/// integers and a smaller NAME has priority. The 8-byte payload of an
/// address claim frame is the NAME in little-endian byte order.
///
/// # Example
///
/// ```
/// use korri_j1939::protocol::managment::name::Name;
///
/// let name = Name::builder()
///     .identity_number(123456)
///     .manufacturer_code(275)
///     .function(130)
///     .vehicle_system(25)
///     .self_configurable(true)
///     .build();
///
/// assert_eq!(name.identity_number(), 123456);
/// assert_eq!(name.manufacturer_code(), 275);
/// assert!(name.self_configurable());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Name(u64);

impl Name {
    /// Build a `Name` from the raw value.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Return the underlying `u64`.
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Create a builder to construct a `Name`.
    #[inline]
    pub const fn builder() -> NameBuilder {
        NameBuilder::new()
    }

    /// Decode a `Name` from the payload of an address claim frame.
    #[inline]
    pub const fn from_payload(payload: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(payload))
    }

    /// Encode the `Name` as the 8-byte address claim payload, byte 0 least
    /// significant.
    #[inline]
    pub const fn to_payload(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    // Individual accessors for NAME sub-fields.

    /// Identity number (bits 0-20, 21 bits).
    ///
    /// Identifies the product within the manufacturer lineup.
    #[inline]
    pub const fn identity_number(&self) -> u32 {
        (self.0 & 0x1F_FFFF) as u32
    }

    /// Manufacturer code (bits 21-31, 11 bits).
    #[inline]
    pub const fn manufacturer_code(&self) -> u16 {
        ((self.0 >> 21) & 0x7FF) as u16
    }

    /// ECU instance (bits 32-34, 3 bits).
    #[inline]
    pub const fn ecu_instance(&self) -> u8 {
        ((self.0 >> 32) & 0x07) as u8
    }

    /// Function instance (bits 35-39, 5 bits).
    #[inline]
    pub const fn function_instance(&self) -> u8 {
        ((self.0 >> 35) & 0x1F) as u8
    }

    /// Function (bits 40-47, 8 bits).
    #[inline]
    pub const fn function(&self) -> u8 {
        ((self.0 >> 40) & 0xFF) as u8
    }

    /// Reserved bit (bit 48).
    #[inline]
    pub const fn reserved(&self) -> bool {
        ((self.0 >> 48) & 0x01) != 0
    }

    /// Vehicle system, also called device class (bits 49-55, 7 bits).
    #[inline]
    pub const fn vehicle_system(&self) -> u8 {
        ((self.0 >> 49) & 0x7F) as u8
    }

    /// Vehicle system instance (bits 56-59, 4 bits).
    #[inline]
    pub const fn vehicle_system_instance(&self) -> u8 {
        ((self.0 >> 56) & 0x0F) as u8
    }

    /// Industry group (bits 60-62, 3 bits).
    #[inline]
    pub const fn industry_group(&self) -> u8 {
        ((self.0 >> 60) & 0x07) as u8
    }

    /// Self-configurable address bit (bit 63).
    ///
    /// Only nodes with this bit set may search for a substitute address when
    /// their preferred one is taken.
    #[inline]
    pub const fn self_configurable(&self) -> bool {
        ((self.0 >> 63) & 0x01) != 0
    }
}

impl From<u64> for Name {
    #[inline]
    fn from(raw: u64) -> Self {
        Self::from_raw(raw)
    }
}

impl From<Name> for u64 {
    #[inline]
    fn from(name: Name) -> Self {
        name.raw()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Name {{ identity: {}, mfg: {}, func: {}, system: {}, ecu: {}, cfg: {} }}",
            self.identity_number(),
            self.manufacturer_code(),
            self.function(),
            self.vehicle_system(),
            self.ecu_instance(),
            self.self_configurable()
        )
    }
}

/// Fluent builder used to construct a `Name`.
///
/// # Example
///
/// ```
/// use korri_j1939::protocol::managment::name::Name;
///
/// let name = Name::builder()
///     .identity_number(12345)
///     .manufacturer_code(275)
///     .self_configurable(true)
///     .build();
/// ```
#[derive(Debug, Clone, Copy)]
pub struct NameBuilder {
    raw: u64,
}

impl NameBuilder {
    /// Initialize the builder with all fields cleared.
    #[inline]
    pub const fn new() -> Self {
        Self { raw: 0 }
    }

    /// Set the identity number (bits 0-20, 21 bits).
    ///
    /// # Panics
    /// Panics when the value does not fit in 21 bits (> 0x1FFFFF).
    #[inline]
    pub const fn identity_number(mut self, value: u32) -> Self {
        assert!(value <= 0x1F_FFFF, "Identity number must fit in 21 bits");
        self.raw = (self.raw & !0x1F_FFFF) | (value as u64 & 0x1F_FFFF);
        self
    }

    /// Set the manufacturer code (bits 21-31, 11 bits).
    ///
    /// # Panics
    /// Panics when the value exceeds 11 bits (> 0x7FF).
    #[inline]
    pub const fn manufacturer_code(mut self, value: u16) -> Self {
        assert!(value <= 0x7FF, "Manufacturer code must fit in 11 bits");
        self.raw = (self.raw & !(0x7FF << 21)) | ((value as u64 & 0x7FF) << 21);
        self
    }

    /// Set the ECU instance (bits 32-34, 3 bits).
    ///
    /// # Panics
    /// Panics when the value exceeds 3 bits (> 0x07).
    #[inline]
    pub const fn ecu_instance(mut self, value: u8) -> Self {
        assert!(value <= 0x07, "ECU instance must fit in 3 bits");
        self.raw = (self.raw & !(0x07 << 32)) | ((value as u64 & 0x07) << 32);
        self
    }

    /// Set the function instance (bits 35-39, 5 bits).
    ///
    /// # Panics
    /// Panics when the value exceeds 5 bits (> 0x1F).
    #[inline]
    pub const fn function_instance(mut self, value: u8) -> Self {
        assert!(value <= 0x1F, "Function instance must fit in 5 bits");
        self.raw = (self.raw & !(0x1F << 35)) | ((value as u64 & 0x1F) << 35);
        self
    }

    /// Set the function (bits 40-47, 8 bits).
    #[inline]
    pub const fn function(mut self, value: u8) -> Self {
        self.raw = (self.raw & !(0xFF << 40)) | ((value as u64) << 40);
        self
    }

    /// Update the reserved bit (bit 48).
    #[inline]
    pub const fn reserved(mut self, value: bool) -> Self {
        self.raw = (self.raw & !(0x01 << 48)) | ((value as u64) << 48);
        self
    }

    /// Set the vehicle system (bits 49-55, 7 bits).
    ///
    /// # Panics
    /// Panics when the value exceeds 7 bits (> 0x7F).
    #[inline]
    pub const fn vehicle_system(mut self, value: u8) -> Self {
        assert!(value <= 0x7F, "Vehicle system must fit in 7 bits");
        self.raw = (self.raw & !(0x7F << 49)) | ((value as u64 & 0x7F) << 49);
        self
    }

    /// Set the vehicle system instance (bits 56-59, 4 bits).
    ///
    /// # Panics
    /// Panics when the value exceeds 4 bits (> 0x0F).
    #[inline]
    pub const fn vehicle_system_instance(mut self, value: u8) -> Self {
        assert!(value <= 0x0F, "Vehicle system instance must fit in 4 bits");
        self.raw = (self.raw & !(0x0F << 56)) | ((value as u64 & 0x0F) << 56);
        self
    }

    /// Set the industry group (bits 60-62, 3 bits).
    ///
    /// # Panics
    /// Panics when the value exceeds 3 bits (> 0x07).
    #[inline]
    pub const fn industry_group(mut self, value: u8) -> Self {
        assert!(value <= 0x07, "Industry group must fit in 3 bits");
        self.raw = (self.raw & !(0x07 << 60)) | ((value as u64 & 0x07) << 60);
        self
    }

    /// Configure the self-configurable address bit (bit 63).
    #[inline]
    pub const fn self_configurable(mut self, value: bool) -> Self {
        self.raw = (self.raw & !(0x01 << 63)) | ((value as u64) << 63);
        self
    }

    /// Build the final `Name`.
    #[inline]
    pub const fn build(self) -> Name {
        Name(self.raw)
    }
}

impl Default for NameBuilder {
    fn default() -> Self {
        Self::new()
    }
}
