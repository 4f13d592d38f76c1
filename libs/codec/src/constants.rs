//! Protocol-level constants for the CDEF wire format
//!
//! These values are part of the wire format and MUST remain consistent with
//! every terminal and host on the network.

/// Size of the leading body-length field
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Largest body length a peer may declare (1MB - 1)
///
/// A declared length above this is a framing violation and terminates the
/// connection.
pub const CDEF_MAX_SIZE: usize = 0xFFFFF;

/// Descriptor value addressing every terminal on the network
pub const BROADCAST_DESCRIPTOR: u32 = 0x3FFF_FFFF;

/// Offset of the protocol-kind byte
pub const OFFSET_PROTOCOL: usize = 12;

/// Offset of the per-application sequence byte (application messages only)
pub const OFFSET_SEQUENCE: usize = 13;

/// Offset of the function code when the sequence byte is present
pub const OFFSET_FUNCTION_CODE: usize = 14;

/// Offset of the destination descriptor
pub const OFFSET_TO_DESCRIPTOR: usize = 4;

/// Offset of the source descriptor
pub const OFFSET_FROM_DESCRIPTOR: usize = 8;

/// Header length of an application message, up to and including the system flags
pub const APPLICATION_HEADER_SIZE: usize = 18;

/// Header length of a session/network message (no sequence byte)
pub const SESSION_HEADER_SIZE: usize = 17;

/// Upper bound on entries in an error list or any other byte-counted list
pub const MAX_LIST_ITEMS: usize = 255;

/// Connect code carried by a session Disconnect request
pub const DISCONNECT_CONNECT_CODE: u32 = 0x42;
