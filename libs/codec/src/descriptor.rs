//! # Session Addressing
//!
//! ## Purpose
//!
//! A CDEF endpoint is addressed by a packed 32-bit descriptor. The value is
//! split into four sub-fields at fixed bit offsets:
//!
//! ```text
//!  31 30 29          18 17       11 10          0
//! ┌─────┬──────────────┬───────────┬─────────────┐
//! │type │ sales loc.   │ addr type │ unique addr │
//! │ 2b  │    12b       │    7b     │    11b      │
//! └─────┴──────────────┴───────────┴─────────────┘
//! ```
//!
//! `0x3FFFFFFF` is reserved for broadcast and is never interpreted per field
//! by routing code.
//!
//! A [`SessionKey`] pairs a destination and source descriptor and identifies
//! one logical session on a connection. Keys order by raw `to` then raw
//! `from`, giving a deterministic iteration order in sorted maps.

use crate::constants::BROADCAST_DESCRIPTOR;
use crate::error::{CodecError, CodecResult};
use std::cmp::Ordering;
use std::fmt;

const DESCRIPTOR_TYPE_SHIFT: u32 = 30;
const SALES_SHIFT: u32 = 18;
const ADDRESS_TYPE_SHIFT: u32 = 11;

pub const DESCRIPTOR_TYPE_MASK: u32 = 0x3;
pub const SALES_MASK: u32 = 0xFFF;
pub const ADDRESS_TYPE_MASK: u32 = 0x7F;
pub const UNIQUE_ADDRESS_MASK: u32 = 0x7FF;

/// Packed 32-bit logical address
#[derive(Debug, Clone, Copy, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionDescriptor(u32);

impl SessionDescriptor {
    /// The broadcast sentinel
    pub const BROADCAST: SessionDescriptor = SessionDescriptor(BROADCAST_DESCRIPTOR);

    /// Wrap a raw wire value
    pub const fn from_raw(raw: u32) -> Self {
        SessionDescriptor(raw)
    }

    /// Pack four sub-fields; out-of-range bits are masked off
    pub const fn pack(descriptor_type: u32, sales_location: u32, address_type: u32, unique_address: u32) -> Self {
        SessionDescriptor(
            ((descriptor_type & DESCRIPTOR_TYPE_MASK) << DESCRIPTOR_TYPE_SHIFT)
                | ((sales_location & SALES_MASK) << SALES_SHIFT)
                | ((address_type & ADDRESS_TYPE_MASK) << ADDRESS_TYPE_SHIFT)
                | (unique_address & UNIQUE_ADDRESS_MASK),
        )
    }

    /// Pack four sub-fields, rejecting values that do not fit their bit range
    pub fn try_pack(
        descriptor_type: u32,
        sales_location: u32,
        address_type: u32,
        unique_address: u32,
    ) -> CodecResult<Self> {
        let checks = [
            ("descriptor type", descriptor_type, DESCRIPTOR_TYPE_MASK),
            ("sales location", sales_location, SALES_MASK),
            ("address type", address_type, ADDRESS_TYPE_MASK),
            ("unique address", unique_address, UNIQUE_ADDRESS_MASK),
        ];
        for (name, value, mask) in checks {
            if value > mask {
                return Err(CodecError::data(
                    format!("{name} out of range"),
                    mask as usize,
                    value as usize,
                ));
            }
        }
        Ok(Self::pack(descriptor_type, sales_location, address_type, unique_address))
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn descriptor_type(self) -> u32 {
        (self.0 >> DESCRIPTOR_TYPE_SHIFT) & DESCRIPTOR_TYPE_MASK
    }

    pub const fn sales_location(self) -> u32 {
        (self.0 >> SALES_SHIFT) & SALES_MASK
    }

    pub const fn address_type(self) -> u32 {
        (self.0 >> ADDRESS_TYPE_SHIFT) & ADDRESS_TYPE_MASK
    }

    pub const fn unique_address(self) -> u32 {
        self.0 & UNIQUE_ADDRESS_MASK
    }

    pub fn set_descriptor_type(&mut self, value: u32) {
        self.0 &= !(DESCRIPTOR_TYPE_MASK << DESCRIPTOR_TYPE_SHIFT);
        self.0 |= (value & DESCRIPTOR_TYPE_MASK) << DESCRIPTOR_TYPE_SHIFT;
    }

    pub fn set_sales_location(&mut self, value: u32) {
        self.0 &= !(SALES_MASK << SALES_SHIFT);
        self.0 |= (value & SALES_MASK) << SALES_SHIFT;
    }

    pub fn set_address_type(&mut self, value: u32) {
        self.0 &= !(ADDRESS_TYPE_MASK << ADDRESS_TYPE_SHIFT);
        self.0 |= (value & ADDRESS_TYPE_MASK) << ADDRESS_TYPE_SHIFT;
    }

    pub fn set_unique_address(&mut self, value: u32) {
        self.0 &= !UNIQUE_ADDRESS_MASK;
        self.0 |= value & UNIQUE_ADDRESS_MASK;
    }

    pub const fn is_broadcast(self) -> bool {
        self.0 == BROADCAST_DESCRIPTOR
    }

    /// Same endpoint regardless of descriptor type
    ///
    /// Sessions match inbound traffic on sales location, address type and
    /// unique address only.
    pub fn same_address(self, other: SessionDescriptor) -> bool {
        self.sales_location() == other.sales_location()
            && self.address_type() == other.address_type()
            && self.unique_address() == other.unique_address()
    }
}

impl PartialEq for SessionDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor_type() == other.descriptor_type() && self.same_address(*other)
    }
}

impl Eq for SessionDescriptor {}

impl From<u32> for SessionDescriptor {
    fn from(raw: u32) -> Self {
        SessionDescriptor(raw)
    }
}

impl From<SessionDescriptor> for u32 {
    fn from(descriptor: SessionDescriptor) -> u32 {
        descriptor.0
    }
}

impl fmt::Display for SessionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            self.sales_location(),
            self.address_type(),
            self.unique_address()
        )
    }
}

/// Identity of one logical session: (destination, source)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionKey {
    pub to: SessionDescriptor,
    pub from: SessionDescriptor,
}

impl SessionKey {
    pub const fn new(to: SessionDescriptor, from: SessionDescriptor) -> Self {
        SessionKey { to, from }
    }
}

impl Ord for SessionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to
            .raw()
            .cmp(&other.to.raw())
            .then_with(|| self.from.raw().cmp(&other.from.raw()))
    }
}

impl PartialOrd for SessionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "To: {} From: {}", self.to, self.from)
    }
}
