//! Wire catalogues shared by the header and the session layer
//!
//! Byte values are fixed by the protocol. Unknown values surface as
//! `TryFromPrimitiveError` from the `num_enum` conversions; callers decide
//! whether that is a parse failure or just something to log.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Protocol layer a message belongs to (header byte 12)
///
/// Only `Application` messages carry the per-application sequence byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProtocolKind {
    /// Unset header; rejected on decode
    #[default]
    Unknown = 0,
    Application = 1,
    Session = 2,
    Network = 3,
}

impl ProtocolKind {
    /// Whether the header carries the sequence byte for this protocol
    pub fn has_sequence(self) -> bool {
        self == ProtocolKind::Application
    }
}

/// Descriptor type sub-field (2 bits)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DescriptorType {
    #[default]
    Wagering = 0,
    Undefined1 = 1,
    Undefined2 = 2,
    Undefined3 = 3,
}

/// Address-type sub-field (7 bits) of a session descriptor
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AddressType {
    // Host systems
    Bravo = 1,
    BravoAdmin = 2,
    BravoInformation = 5,
    SoftwareDownloadHost = 10,
    Wis = 12,
    TrackSide = 14,
    Sportsbet = 16,
    Cosmos = 18,

    // Gateways
    OutletGateway = 20,
    HostGateway = 21,
    InternetBettingSystemGateway = 23,
    ForeignHostGateway = 24,

    // Terminals
    GenericSellingTerminal = 25,
    GenericDisplayTerminal = 26,
    GenericAdminTerminal = 27,
}

/// Device type announced in a session Connect request
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceType {
    Reserved = 0x00,
    BravoAdmin = 0x01,
    BravoWagering = 0x02,
    BravoDownload = 0x03,
    Wis = 0x04,
    BravoSlaveAdmin = 0x05,
    BravoSlaveWagering = 0x06,
    BravoSlaveDownload = 0x07,
    Adc = 0x41,
    Cit = 0x43,
    Ebt = 0x45,
    Fepc = 0x46,
    GenericTerminal = 0x47,
    RetailGateway = 0x48,
    Ibi = 0x49,
    Fhg = 0x4E,
    Odc = 0x4F,
    Pwt = 0x50,
    #[default]
    Rwt = 0x52,
    T2290 = 0x54,
    OutletGateway = 0x59,
    InternetBettingSystem = 0x69,
    AnyDevice = 0xFF,
}
