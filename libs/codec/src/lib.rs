//! # CDEF Protocol Codec
//!
//! ## Purpose
//!
//! The "rules" layer of the CDEF stack: everything needed to turn a CDEF
//! frame into typed fields and back, with no knowledge of sockets.
//! - Header codec and the error-list body ([`header`])
//! - Generic message envelope over per-function bodies ([`message`])
//! - Packed session addressing ([`descriptor`])
//! - Function-code registry for inbound decoding ([`registry`])
//! - Raw-byte peeks used for routing ([`peek`])
//! - Session-layer bodies: heartbeat, connect, disconnect ([`session_messages`])
//!
//! ## Architecture Role
//!
//! ```text
//!   codec  →  network (framer, connection, session)  →  services
//!     ↑                  ↑
//!  wire rules       dispatcher (event ordering)
//! ```
//!
//! ## Failure Model
//!
//! Codec failures are per message. A [`CodecError`] maps onto a
//! [`CdefStatus`]; nothing in this crate can take a connection down.

pub mod constants;
pub mod descriptor;
pub mod error;
pub mod flags;
pub mod function_code;
pub mod header;
pub mod message;
pub mod peek;
pub mod registry;
pub mod session_messages;
pub mod types;
pub mod wire;

pub use constants::*;
pub use descriptor::{SessionDescriptor, SessionKey};
pub use error::{CdefStatus, CodecError, CodecResult};
pub use flags::SystemFlags;
pub use function_code::FunctionCode;
pub use header::{ErrorDetail, MessageHeader};
pub use message::{to_hex_string, CdefMessage, Message, MessageBody, Payload};
pub use registry::{Lookup, MessageRegistry};
pub use session_messages::{Heartbeat, SessionConnect, SessionConnectResponse, SessionDisconnect};
pub use types::{AddressType, DescriptorType, DeviceType, ProtocolKind};
pub use wire::{WireReader, WireWriter};
