//! CDEF message header and error list
//!
//! ```text
//! [u32 length][u32 to][u32 from][u8 protocol][u8 seq if Application]
//! [u16 function code][u8 transaction][u8 system flags]
//! ```
//!
//! When the error bit is set the body is replaced by
//! `[u8 reserved][u8 count]{[u8 nr][i32 code][varint string text]} x count`.

use crate::constants::{APPLICATION_HEADER_SIZE, CDEF_MAX_SIZE, MAX_LIST_ITEMS, SESSION_HEADER_SIZE};
use crate::descriptor::{SessionDescriptor, SessionKey};
use crate::error::{CodecError, CodecResult};
use crate::flags::SystemFlags;
use crate::types::ProtocolKind;
use crate::wire::{WireReader, WireWriter};
use std::fmt;

/// Fixed header fields shared by every message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MessageHeader {
    /// Byte count following the length field; recomputed on every encode
    pub length: u32,
    pub to: SessionDescriptor,
    pub from: SessionDescriptor,
    pub protocol: ProtocolKind,
    /// Per-application sequence number, on the wire only for `Application`
    pub sequence: u8,
    pub function_code: u16,
    pub transaction_number: u8,
    pub system_flags: SystemFlags,
}

impl MessageHeader {
    pub fn new(function_code: u16, protocol: ProtocolKind) -> Self {
        Self {
            function_code,
            protocol,
            ..Default::default()
        }
    }

    /// Session this message travels on, from the sender's point of view
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.to, self.from)
    }

    /// Encoded size of the header alone
    pub fn encoded_len(&self) -> usize {
        if self.protocol.has_sequence() {
            APPLICATION_HEADER_SIZE
        } else {
            SESSION_HEADER_SIZE
        }
    }

    pub fn is_response(&self) -> bool {
        self.system_flags.is_response()
    }

    pub fn is_error(&self) -> bool {
        self.system_flags.is_error()
    }

    pub fn is_training(&self) -> bool {
        self.system_flags.is_training()
    }

    pub fn is_internal(&self) -> bool {
        self.system_flags.is_internal()
    }

    pub fn set_response(&mut self, on: bool) {
        self.system_flags.set(SystemFlags::RESPONSE, on);
    }

    pub fn set_training(&mut self, on: bool) {
        self.system_flags.set(SystemFlags::TRAINING, on);
    }
}

impl fmt::Display for MessageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FC=0x{:04X}, TN={}, SF={}",
            self.function_code, self.transaction_number, self.system_flags
        )
    }
}

/// One entry of an error response
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorDetail {
    pub number: u8,
    pub code: i32,
    pub text: String,
}

impl ErrorDetail {
    pub fn new(number: u8, code: i32, text: impl Into<String>) -> Self {
        Self {
            number,
            code,
            text: text.into(),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} code={} {}", self.number, self.code, self.text)
    }
}

/// Read the header, leaving the reader at the first body byte
pub fn decode_header(reader: &mut WireReader<'_>) -> CodecResult<MessageHeader> {
    let length = reader.read_u32("length")?;
    if length as usize > CDEF_MAX_SIZE {
        return Err(CodecError::parse(
            0,
            format!("declared length {length} exceeds maximum {CDEF_MAX_SIZE}"),
            reader.len(),
            "length",
        ));
    }
    let to = SessionDescriptor::from_raw(reader.read_u32("to descriptor")?);
    let from = SessionDescriptor::from_raw(reader.read_u32("from descriptor")?);

    let protocol_offset = reader.position();
    let protocol_byte = reader.read_u8("protocol")?;
    let protocol = match ProtocolKind::try_from(protocol_byte) {
        Ok(ProtocolKind::Unknown) | Err(_) => {
            return Err(CodecError::parse(
                protocol_offset,
                format!("unknown protocol kind {protocol_byte}"),
                reader.len(),
                "protocol",
            ))
        }
        Ok(protocol) => protocol,
    };

    let sequence = if protocol.has_sequence() {
        reader.read_u8("sequence")?
    } else {
        0
    };
    let function_code = reader.read_u16("function code")?;
    let transaction_number = reader.read_u8("transaction number")?;
    let system_flags = SystemFlags::from_bits(reader.read_u8("system flags")?);

    Ok(MessageHeader {
        length,
        to,
        from,
        protocol,
        sequence,
        function_code,
        transaction_number,
        system_flags,
    })
}

/// Write the header with whatever `length` currently holds
pub fn encode_header(header: &MessageHeader, writer: &mut WireWriter) {
    writer.write_u32(header.length);
    writer.write_u32(header.to.raw());
    writer.write_u32(header.from.raw());
    writer.write_u8(header.protocol.into());
    if header.protocol.has_sequence() {
        writer.write_u8(header.sequence);
    }
    writer.write_u16(header.function_code);
    writer.write_u8(header.transaction_number);
    writer.write_u8(header.system_flags.bits());
}

/// Read an error list body
pub fn decode_error_list(reader: &mut WireReader<'_>) -> CodecResult<Vec<ErrorDetail>> {
    let _reserved = reader.read_u8("error list reserved")?;
    let count = reader.read_u8("error count")?;
    let mut errors = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let number = reader.read_u8("error number")?;
        let code = reader.read_i32("error code")?;
        let text = reader.read_varint_string("error text")?;
        errors.push(ErrorDetail { number, code, text });
    }
    Ok(errors)
}

/// Write an error list body
///
/// More than 255 entries cannot be counted in one byte and is a data error.
pub fn encode_error_list(errors: &[ErrorDetail], writer: &mut WireWriter) -> CodecResult<()> {
    if errors.len() > MAX_LIST_ITEMS {
        return Err(CodecError::data(
            "too many error entries",
            MAX_LIST_ITEMS,
            errors.len(),
        ));
    }
    writer.write_u8(0);
    writer.write_u8(errors.len() as u8);
    for error in errors {
        writer.write_u8(error.number);
        writer.write_i32(error.code);
        writer.write_varint_string(&error.text, "error text")?;
    }
    Ok(())
}
