//! # Message Registry
//!
//! ## Purpose
//!
//! Maps a function code to the decoder for its body type so inbound frames
//! can be turned into typed messages. The registry is an explicit value
//! built at start-up and shared (usually behind an `Arc`) by whoever decodes;
//! there is no process-wide table.
//!
//! Lookup peeks the function code straight from the raw bytes, so an
//! unregistered code is reported as [`Lookup::Unknown`] without running any
//! decoder. Callers treat that as a normal, non-fatal outcome.

use crate::error::{CodecError, CodecResult};
use crate::function_code::{describe, FunctionCode};
use crate::message::{CdefMessage, Message, MessageBody};
use crate::peek::peek_function_code;
use crate::session_messages::{decode_session_connect, Heartbeat, SessionDisconnect};
use std::collections::HashMap;
use tracing::debug;

/// Decoder for one function code
pub type DecodeFn = fn(&[u8]) -> CodecResult<Box<dyn CdefMessage>>;

/// Result of looking up a raw frame
#[derive(Debug)]
pub enum Lookup {
    Decoded(Box<dyn CdefMessage>),
    /// No decoder registered for this function code
    Unknown(u16),
    /// Too short to peek, or the registered decoder rejected the bytes
    Failed(CodecError),
}

impl Lookup {
    pub fn into_message(self) -> Option<Box<dyn CdefMessage>> {
        match self {
            Lookup::Decoded(message) => Some(message),
            _ => None,
        }
    }
}

fn decode_as<B: MessageBody>(bytes: &[u8]) -> CodecResult<Box<dyn CdefMessage>> {
    Ok(Box::new(Message::<B>::decode(bytes)?))
}

/// Function code to decoder table
#[derive(Debug, Clone, Default)]
pub struct MessageRegistry {
    decoders: HashMap<u16, DecodeFn>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the session-layer messages
    pub fn with_session_messages() -> Self {
        let mut registry = Self::new();
        registry.register_body::<Heartbeat>();
        registry.register(
            FunctionCode::SessionEstablishmentConnect.code(),
            decode_session_connect,
        );
        registry.register_body::<SessionDisconnect>();
        registry
    }

    /// Register a decoder; returns `false` if the code was already registered
    ///
    /// Registering the same code again keeps the first decoder.
    pub fn register(&mut self, function_code: u16, decoder: DecodeFn) -> bool {
        if self.decoders.contains_key(&function_code) {
            return false;
        }
        debug!(function_code = %describe(function_code), "registered decoder");
        self.decoders.insert(function_code, decoder);
        true
    }

    /// Register the plain decoder for a body type
    pub fn register_body<B: MessageBody>(&mut self) -> bool {
        self.register(B::FUNCTION_CODE, decode_as::<B>)
    }

    pub fn is_registered(&self, function_code: u16) -> bool {
        self.decoders.contains_key(&function_code)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decode a raw frame through its registered decoder
    pub fn lookup(&self, bytes: &[u8]) -> Lookup {
        let Some(function_code) = peek_function_code(bytes) else {
            return Lookup::Failed(CodecError::truncated(0, bytes.len(), "function code peek"));
        };
        match self.decoders.get(&function_code) {
            Some(decode) => match decode(bytes) {
                Ok(message) => Lookup::Decoded(message),
                Err(e) => Lookup::Failed(e),
            },
            None => Lookup::Unknown(function_code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_messages::{SessionConnect, SessionConnectResponse};

    #[test]
    fn test_registration_is_idempotent() {
        let mut registry = MessageRegistry::new();
        assert!(registry.register_body::<Heartbeat>());
        assert!(!registry.register_body::<Heartbeat>());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_code() {
        let registry = MessageRegistry::with_session_messages();
        let mut bytes = Message::new(Heartbeat::default()).encode().unwrap();
        // session header: function code at 13..15
        bytes[13] = 0xEF;
        bytes[14] = 0xBE;
        match registry.lookup(&bytes) {
            Lookup::Unknown(code) => assert_eq!(code, 0xBEEF),
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_connect_request_and_response_share_entry() {
        let registry = MessageRegistry::with_session_messages();

        let request = Message::new(SessionConnect::default()).encode().unwrap();
        let decoded = registry.lookup(&request).into_message().unwrap();
        assert!(decoded.downcast_ref::<SessionConnect>().is_some());

        let response = Message::response(SessionConnectResponse::accepted())
            .encode()
            .unwrap();
        let decoded = registry.lookup(&response).into_message().unwrap();
        assert!(decoded.downcast_ref::<SessionConnectResponse>().is_some());
    }

    #[test]
    fn test_failed_decode_is_reported() {
        let registry = MessageRegistry::with_session_messages();
        let mut bytes = Message::new(SessionDisconnect::with_reason("bye"))
            .encode()
            .unwrap();
        bytes.truncate(bytes.len() - 2);
        let len = (bytes.len() - 4) as u32;
        bytes[..4].copy_from_slice(&len.to_le_bytes());
        assert!(matches!(registry.lookup(&bytes), Lookup::Failed(_)));
        assert!(matches!(registry.lookup(&[1, 2]), Lookup::Failed(_)));
    }
}
