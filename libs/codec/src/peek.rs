//! Header peeks over raw bytes
//!
//! Routing decisions (which session wants a frame, is it a heartbeat, is it a
//! response) are made on the raw frame without running the full decoder.
//! Every peek returns `None` when the buffer is too short for the field.
//!
//! Offsets after the protocol byte shift by one because only `Application`
//! messages carry the sequence byte.

use crate::constants::{
    OFFSET_FROM_DESCRIPTOR, OFFSET_FUNCTION_CODE, OFFSET_PROTOCOL, OFFSET_SEQUENCE,
    OFFSET_TO_DESCRIPTOR,
};
use crate::descriptor::SessionDescriptor;
use crate::flags::SystemFlags;
use crate::function_code::FunctionCode;
use crate::types::ProtocolKind;

fn u32_at(bytes: &[u8], offset: usize) -> Option<u32> {
    let slice = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

/// Shift applied to offsets after the protocol byte
fn sequence_shift(bytes: &[u8]) -> Option<usize> {
    let protocol = *bytes.get(OFFSET_PROTOCOL)?;
    Some(if protocol == u8::from(ProtocolKind::Application) {
        0
    } else {
        1
    })
}

/// Declared body length (first four bytes)
pub fn peek_length(bytes: &[u8]) -> Option<u32> {
    u32_at(bytes, 0)
}

pub fn peek_to_descriptor(bytes: &[u8]) -> Option<SessionDescriptor> {
    u32_at(bytes, OFFSET_TO_DESCRIPTOR).map(SessionDescriptor::from_raw)
}

pub fn peek_from_descriptor(bytes: &[u8]) -> Option<SessionDescriptor> {
    u32_at(bytes, OFFSET_FROM_DESCRIPTOR).map(SessionDescriptor::from_raw)
}

/// Raw protocol byte
pub fn peek_protocol(bytes: &[u8]) -> Option<u8> {
    bytes.get(OFFSET_PROTOCOL).copied()
}

/// Sequence byte of an application message, `None` for other protocols
pub fn peek_sequence(bytes: &[u8]) -> Option<u8> {
    match sequence_shift(bytes)? {
        0 => bytes.get(OFFSET_SEQUENCE).copied(),
        _ => None,
    }
}

pub fn peek_function_code(bytes: &[u8]) -> Option<u16> {
    let offset = OFFSET_FUNCTION_CODE - sequence_shift(bytes)?;
    let slice = bytes.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([slice[0], slice[1]]))
}

pub fn peek_system_flags(bytes: &[u8]) -> Option<SystemFlags> {
    let offset = OFFSET_FUNCTION_CODE + 3 - sequence_shift(bytes)?;
    bytes.get(offset).copied().map(SystemFlags::from_bits)
}

pub fn is_response(bytes: &[u8]) -> bool {
    peek_system_flags(bytes).is_some_and(SystemFlags::is_response)
}

pub fn is_error(bytes: &[u8]) -> bool {
    peek_system_flags(bytes).is_some_and(SystemFlags::is_error)
}

/// Session-protocol heartbeat frame
pub fn is_heartbeat(bytes: &[u8]) -> bool {
    peek_protocol(bytes) == Some(ProtocolKind::Session.into())
        && peek_function_code(bytes) == Some(FunctionCode::Heartbeat.code())
}
