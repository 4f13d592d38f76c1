//! # Message Envelope
//!
//! ## Purpose
//!
//! Generic envelope that runs the header codec around a function-specific
//! body. A body type implements [`MessageBody`] (its function code, protocol
//! layer and field layout); [`Message<B>`] owns the header and either the body
//! or an error list.
//!
//! ## Encoding
//!
//! Encoding is two-pass: the header is written with a zero length, the body
//! or error list follows, and the length field is then patched in place to
//! `total - 4`. The error bit on the wire always follows the payload kind.
//! [`Message::finalize`] also writes both back into the header.
//!
//! The header length is derived from the payload, so message equality
//! ignores it: a freshly built message equals its own decoded encoding.
//!
//! ## Decoding
//!
//! Decoding reads the header first. If the error bit is set only the error
//! list is read and the body decoder is never called; otherwise the body
//! decoder continues from the first byte after the header.
//!
//! [`CdefMessage`] erases the body type so the registry can hand back any
//! decoded message behind one trait object.

use crate::constants::{CDEF_MAX_SIZE, LENGTH_FIELD_SIZE};
use crate::descriptor::SessionDescriptor;
use crate::error::{CodecError, CodecResult};
use crate::flags::SystemFlags;
use crate::header::{
    decode_error_list, decode_header, encode_error_list, encode_header, ErrorDetail, MessageHeader,
};
use crate::types::ProtocolKind;
use crate::wire::{WireReader, WireWriter};
use std::any::Any;
use std::fmt;

/// Function-specific payload layout
pub trait MessageBody: fmt::Debug + Clone + PartialEq + Send + Sync + Sized + 'static {
    /// Function code stamped on new messages of this type
    const FUNCTION_CODE: u16;

    /// Protocol layer stamped on new messages of this type
    const PROTOCOL: ProtocolKind;

    /// Read the body fields; the header has already been consumed
    fn decode_body(header: &MessageHeader, reader: &mut WireReader<'_>) -> CodecResult<Self>;

    /// Append the body fields
    fn encode_body(&self, writer: &mut WireWriter) -> CodecResult<()>;
}

/// Body or error list following the header
#[derive(Debug, Clone, PartialEq)]
pub enum Payload<B> {
    Body(B),
    Errors(Vec<ErrorDetail>),
}

/// Header plus typed payload
#[derive(Debug, Clone)]
pub struct Message<B> {
    pub header: MessageHeader,
    pub payload: Payload<B>,
}

impl<B: PartialEq> PartialEq for Message<B> {
    fn eq(&self, other: &Self) -> bool {
        let without_length = |header: &MessageHeader| MessageHeader {
            length: 0,
            ..header.clone()
        };
        without_length(&self.header) == without_length(&other.header) && self.payload == other.payload
    }
}

impl<B: MessageBody> Message<B> {
    /// New request carrying `body`
    pub fn new(body: B) -> Self {
        Self {
            header: MessageHeader::new(B::FUNCTION_CODE, B::PROTOCOL),
            payload: Payload::Body(body),
        }
    }

    /// New response carrying `body`
    pub fn response(body: B) -> Self {
        let mut message = Self::new(body);
        message.header.set_response(true);
        message
    }

    /// Error response with no body
    pub fn error_response(errors: Vec<ErrorDetail>) -> Self {
        let mut header = MessageHeader::new(B::FUNCTION_CODE, B::PROTOCOL);
        header.system_flags = SystemFlags::RESPONSE | SystemFlags::ERROR;
        Self {
            header,
            payload: Payload::Errors(errors),
        }
    }

    pub fn addressed(mut self, to: SessionDescriptor, from: SessionDescriptor) -> Self {
        self.header.to = to;
        self.header.from = from;
        self
    }

    pub fn body(&self) -> Option<&B> {
        match &self.payload {
            Payload::Body(body) => Some(body),
            Payload::Errors(_) => None,
        }
    }

    pub fn body_mut(&mut self) -> Option<&mut B> {
        match &mut self.payload {
            Payload::Body(body) => Some(body),
            Payload::Errors(_) => None,
        }
    }

    pub fn errors(&self) -> &[ErrorDetail] {
        match &self.payload {
            Payload::Body(_) => &[],
            Payload::Errors(errors) => errors,
        }
    }

    /// Replace the payload with an error list and set the error bit
    pub fn set_errors(&mut self, errors: Vec<ErrorDetail>) {
        self.header.system_flags |= SystemFlags::ERROR;
        self.payload = Payload::Errors(errors);
    }

    /// Decode one complete message
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let bytes = check_size(bytes)?;
        let mut reader = WireReader::new(bytes);
        let header = decode_header(&mut reader)?;
        let payload = if header.is_error() {
            Payload::Errors(decode_error_list(&mut reader)?)
        } else {
            Payload::Body(B::decode_body(&header, &mut reader)?)
        };
        Ok(Self { header, payload })
    }

    /// Encode, patching the length field to `total - 4`
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut writer = WireWriter::with_capacity(64);
        let mut header = self.header.clone();
        header.length = 0;
        header
            .system_flags
            .set(SystemFlags::ERROR, matches!(self.payload, Payload::Errors(_)));
        encode_header(&header, &mut writer);
        match &self.payload {
            Payload::Body(body) => body.encode_body(&mut writer)?,
            Payload::Errors(errors) => encode_error_list(errors, &mut writer)?,
        }

        let body_length = writer.len() - LENGTH_FIELD_SIZE;
        if body_length > CDEF_MAX_SIZE {
            return Err(CodecError::build(
                "message",
                format!("encoded length {body_length} exceeds maximum {CDEF_MAX_SIZE}"),
            ));
        }
        writer.patch_u32(0, body_length as u32)?;
        Ok(writer.into_inner())
    }

    /// Encode and store the wire length and error bit back into the header
    pub fn finalize(&mut self) -> CodecResult<Vec<u8>> {
        let bytes = self.encode()?;
        self.header.length = (bytes.len() - LENGTH_FIELD_SIZE) as u32;
        self.header
            .system_flags
            .set(SystemFlags::ERROR, matches!(self.payload, Payload::Errors(_)));
        Ok(bytes)
    }
}

/// Reject empty or oversized input, trimming to the declared length
fn check_size(bytes: &[u8]) -> CodecResult<&[u8]> {
    let max = CDEF_MAX_SIZE + LENGTH_FIELD_SIZE;
    if bytes.is_empty() || bytes.len() > max {
        return Err(CodecError::Init {
            size: bytes.len(),
            max,
        });
    }
    if bytes.len() < LENGTH_FIELD_SIZE {
        return Err(CodecError::truncated(0, bytes.len(), "length"));
    }
    let declared = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let total = declared.saturating_add(LENGTH_FIELD_SIZE);
    if total > bytes.len() {
        return Err(CodecError::parse(
            0,
            format!("declared length {declared} exceeds received {} bytes", bytes.len()),
            bytes.len(),
            "length",
        ));
    }
    Ok(&bytes[..total])
}

/// Any decoded message, body type erased
pub trait CdefMessage: fmt::Debug + Send + Sync {
    fn header(&self) -> &MessageHeader;

    fn header_mut(&mut self) -> &mut MessageHeader;

    /// Error list when this is an error response, otherwise empty
    fn errors(&self) -> &[ErrorDetail];

    fn encode(&self) -> CodecResult<Vec<u8>>;

    /// Encode, updating the header to match the bytes produced
    fn finalize(&mut self) -> CodecResult<Vec<u8>>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<B: MessageBody> CdefMessage for Message<B> {
    fn header(&self) -> &MessageHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    fn errors(&self) -> &[ErrorDetail] {
        Message::errors(self)
    }

    fn encode(&self) -> CodecResult<Vec<u8>> {
        Message::encode(self)
    }

    fn finalize(&mut self) -> CodecResult<Vec<u8>> {
        Message::finalize(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl dyn CdefMessage {
    /// Borrow as a concrete message type
    pub fn downcast_ref<B: MessageBody>(&self) -> Option<&Message<B>> {
        self.as_any().downcast_ref::<Message<B>>()
    }

    /// Take ownership as a concrete message type
    pub fn downcast<B: MessageBody>(self: Box<Self>) -> Option<Message<B>> {
        self.into_any().downcast::<Message<B>>().ok().map(|m| *m)
    }
}

/// `0x` followed by upper-case hex of the encoded bytes
pub fn to_hex_string(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode_upper(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CdefStatus;

    #[derive(Debug, Clone, PartialEq)]
    struct Sample {
        value: u32,
        label: String,
    }

    impl MessageBody for Sample {
        const FUNCTION_CODE: u16 = 0x0603;
        const PROTOCOL: ProtocolKind = ProtocolKind::Application;

        fn decode_body(_header: &MessageHeader, reader: &mut WireReader<'_>) -> CodecResult<Self> {
            Ok(Self {
                value: reader.read_u32("value")?,
                label: reader.read_ascii8("label")?,
            })
        }

        fn encode_body(&self, writer: &mut WireWriter) -> CodecResult<()> {
            writer.write_u32(self.value);
            writer.write_ascii8(&self.label, "label")
        }
    }

    fn sample() -> Message<Sample> {
        Message::new(Sample {
            value: 42,
            label: "hello".into(),
        })
        .addressed(SessionDescriptor::pack(0, 1, 1, 1), SessionDescriptor::pack(0, 2, 2, 2))
    }

    #[test]
    fn test_encode_patches_length() {
        let bytes = sample().encode().unwrap();
        let declared = u32::from_le_bytes(bytes[..4].try_into().unwrap()) as usize;
        assert_eq!(declared, bytes.len() - 4);
        assert_eq!(bytes.len(), 18 + 4 + 1 + 5);
    }

    #[test]
    fn test_decode_round_trip() {
        let original = sample();
        let bytes = original.encode().unwrap();
        let decoded = Message::<Sample>::decode(&bytes).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.header.length as usize, bytes.len() - 4);
        assert_eq!(decoded.header.function_code, 0x0603);
    }

    #[test]
    fn test_finalize_stores_wire_length() {
        let mut message = sample();
        assert_eq!(message.header.length, 0);
        let bytes = message.finalize().unwrap();
        assert_eq!(message.header.length as usize, bytes.len() - 4);

        let decoded = Message::<Sample>::decode(&bytes).unwrap();
        assert_eq!(decoded.header, message.header);
    }

    #[test]
    fn test_stale_error_bit_cleared_for_body() {
        let mut message = sample();
        message.header.system_flags = SystemFlags::RESPONSE | SystemFlags::ERROR;
        let bytes = message.encode().unwrap();
        assert_eq!(bytes[17], 0x80);

        let decoded = Message::<Sample>::decode(&bytes).unwrap();
        assert_eq!(decoded.body(), message.body());
        assert!(!decoded.header.is_error());

        message.finalize().unwrap();
        assert_eq!(message.header.system_flags, SystemFlags::RESPONSE);
    }

    #[test]
    fn test_truncated_body_is_parse_error() {
        let bytes = sample().encode().unwrap();
        let mut cut = bytes[..bytes.len() - 2].to_vec();
        let len = (cut.len() - 4) as u32;
        cut[..4].copy_from_slice(&len.to_le_bytes());
        let err = Message::<Sample>::decode(&cut).unwrap_err();
        assert_eq!(err.status(), CdefStatus::ParseError);
    }

    #[test]
    fn test_empty_and_oversized_input_is_init_error() {
        assert_eq!(
            Message::<Sample>::decode(&[]).unwrap_err().status(),
            CdefStatus::InitError
        );
        let huge = vec![0u8; CDEF_MAX_SIZE + 5];
        assert_eq!(
            Message::<Sample>::decode(&huge).unwrap_err().status(),
            CdefStatus::InitError
        );
    }

    #[test]
    fn test_string_too_long_is_build_error() {
        let message = Message::new(Sample {
            value: 1,
            label: "x".repeat(300),
        });
        assert_eq!(message.encode().unwrap_err().status(), CdefStatus::BuildError);
    }

    #[test]
    fn test_error_response_skips_body() {
        let mut message = sample();
        message.set_errors(vec![ErrorDetail::new(1, 1001, "bad")]);
        assert!(message.header.is_error());

        let bytes = message.encode().unwrap();
        let decoded = Message::<Sample>::decode(&bytes).unwrap();
        assert!(decoded.body().is_none());
        assert_eq!(decoded.errors(), &[ErrorDetail::new(1, 1001, "bad")]);
    }

    #[test]
    fn test_erased_downcast() {
        let boxed: Box<dyn CdefMessage> = Box::new(sample());
        assert_eq!(boxed.header().function_code, 0x0603);
        assert!(boxed.downcast_ref::<Sample>().is_some());
        let owned = boxed.downcast::<Sample>().unwrap();
        assert_eq!(owned.body().unwrap().value, 42);
    }

    #[test]
    fn test_hex_string() {
        assert_eq!(to_hex_string(&[0x0a, 0xff]), "0x0AFF");
    }
}
