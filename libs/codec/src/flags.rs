//! System-flags byte carried in every header

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Per-message flag byte (last header byte)
///
/// A message with no response bit is a request. The error bit replaces the
/// function-specific body with an error list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SystemFlags(u8);

impl SystemFlags {
    pub const REQUEST: SystemFlags = SystemFlags(0x00);
    pub const ERROR: SystemFlags = SystemFlags(0x01);
    pub const TRAINING: SystemFlags = SystemFlags(0x02);
    /// Bit 2; reported by [`SystemFlags::is_internal`]
    pub const NOT_FIRST: SystemFlags = SystemFlags(0x04);
    pub const NOT_LAST: SystemFlags = SystemFlags(0x08);
    pub const ENCRYPTION: SystemFlags = SystemFlags(0x10);
    pub const ENCRYPTED: SystemFlags = SystemFlags(0x20);
    pub const FLOOD_TEST: SystemFlags = SystemFlags(0x40);
    pub const RESPONSE: SystemFlags = SystemFlags(0x80);

    pub const fn from_bits(bits: u8) -> Self {
        SystemFlags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: SystemFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, flag: SystemFlags, on: bool) {
        if on {
            self.0 |= flag.0;
        } else {
            self.0 &= !flag.0;
        }
    }

    pub const fn is_response(self) -> bool {
        self.contains(Self::RESPONSE)
    }

    pub const fn is_error(self) -> bool {
        self.contains(Self::ERROR)
    }

    pub const fn is_training(self) -> bool {
        self.contains(Self::TRAINING)
    }

    pub const fn is_internal(self) -> bool {
        self.contains(Self::NOT_FIRST)
    }
}

impl BitOr for SystemFlags {
    type Output = SystemFlags;

    fn bitor(self, rhs: SystemFlags) -> SystemFlags {
        SystemFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for SystemFlags {
    fn bitor_assign(&mut self, rhs: SystemFlags) {
        self.0 |= rhs.0;
    }
}

impl From<u8> for SystemFlags {
    fn from(bits: u8) -> Self {
        SystemFlags(bits)
    }
}

impl From<SystemFlags> for u8 {
    fn from(flags: SystemFlags) -> u8 {
        flags.0
    }
}

impl fmt::Display for SystemFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_bits() {
        let mut flags = SystemFlags::RESPONSE | SystemFlags::ERROR;
        assert!(flags.is_response());
        assert!(flags.is_error());
        assert!(!flags.is_training());

        flags.set(SystemFlags::ERROR, false);
        assert!(!flags.is_error());
        assert_eq!(flags.bits(), 0x80);

        flags.set(SystemFlags::NOT_FIRST, true);
        assert!(flags.is_internal());
        assert_eq!(u8::from(flags), 0x84);
    }

    #[test]
    fn test_request_is_empty() {
        let flags = SystemFlags::REQUEST;
        assert!(!flags.is_response());
        assert!(flags.contains(SystemFlags::REQUEST));
    }
}
