//! Little-endian field readers and writers
//!
//! Thin wrappers over `byteorder` that turn I/O failures into [`CodecError`]s
//! carrying the offset and the field being processed. Three ASCII string
//! encodings with 8/16/32-bit length prefixes are provided, plus the
//! varint-prefixed UTF-8 string used for error text.

use crate::error::{CodecError, CodecResult};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

/// Cursor over a received message
pub struct WireReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remaining(&self) -> usize {
        self.len().saturating_sub(self.position())
    }

    fn truncated(&self, context: &str) -> CodecError {
        CodecError::truncated(self.position(), self.len(), context)
    }

    pub fn read_u8(&mut self, context: &str) -> CodecResult<u8> {
        self.cursor.read_u8().map_err(|_| self.truncated(context))
    }

    pub fn read_u16(&mut self, context: &str) -> CodecResult<u16> {
        self.cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| self.truncated(context))
    }

    pub fn read_i16(&mut self, context: &str) -> CodecResult<i16> {
        self.cursor
            .read_i16::<LittleEndian>()
            .map_err(|_| self.truncated(context))
    }

    pub fn read_u32(&mut self, context: &str) -> CodecResult<u32> {
        self.cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| self.truncated(context))
    }

    pub fn read_i32(&mut self, context: &str) -> CodecResult<i32> {
        self.cursor
            .read_i32::<LittleEndian>()
            .map_err(|_| self.truncated(context))
    }

    pub fn read_bytes(&mut self, count: usize, context: &str) -> CodecResult<Vec<u8>> {
        if count > self.remaining() {
            return Err(self.truncated(context));
        }
        let mut out = vec![0u8; count];
        self.cursor
            .read_exact(&mut out)
            .map_err(|_| self.truncated(context))?;
        Ok(out)
    }

    /// ASCII string with an 8-bit length prefix
    pub fn read_ascii8(&mut self, context: &str) -> CodecResult<String> {
        let len = self.read_u8(context)? as usize;
        self.read_ascii(len, context)
    }

    /// ASCII string with a 16-bit length prefix
    pub fn read_ascii16(&mut self, context: &str) -> CodecResult<String> {
        let len = self.read_u16(context)? as usize;
        self.read_ascii(len, context)
    }

    /// ASCII string with a 32-bit length prefix
    pub fn read_ascii32(&mut self, context: &str) -> CodecResult<String> {
        let len = self.read_u32(context)? as usize;
        self.read_ascii(len, context)
    }

    fn read_ascii(&mut self, len: usize, context: &str) -> CodecResult<String> {
        let bytes = self.read_bytes(len, context)?;
        Ok(bytes
            .into_iter()
            .map(|b| if b.is_ascii() { b as char } else { '?' })
            .collect())
    }

    /// UTF-8 string prefixed by a 7-bit variable-length byte count
    pub fn read_varint_string(&mut self, context: &str) -> CodecResult<String> {
        let start = self.position();
        let mut len: u32 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8(context)?;
            len |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift > 28 {
                return Err(CodecError::parse(
                    start,
                    "string length prefix too long",
                    self.len(),
                    context,
                ));
            }
        }
        let bytes = self.read_bytes(len as usize, context)?;
        String::from_utf8(bytes)
            .map_err(|_| CodecError::parse(start, "string is not valid UTF-8", self.len(), context))
    }
}

/// Growable output buffer for an outbound message
#[derive(Debug, Default)]
pub struct WireWriter {
    buffer: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Overwrite a u32 already written at `offset`
    pub fn patch_u32(&mut self, offset: usize, value: u32) -> CodecResult<()> {
        let slot = self
            .buffer
            .get_mut(offset..offset + 4)
            .ok_or_else(|| CodecError::build("length patch", "offset beyond written data"))?;
        slot.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// ASCII string with an 8-bit length prefix
    pub fn write_ascii8(&mut self, value: &str, context: &str) -> CodecResult<()> {
        let bytes = to_ascii(value);
        let len = u8::try_from(bytes.len()).map_err(|_| too_long(context, bytes.len(), u8::MAX as usize))?;
        self.write_u8(len);
        self.write_bytes(&bytes);
        Ok(())
    }

    /// ASCII string with a 16-bit length prefix
    pub fn write_ascii16(&mut self, value: &str, context: &str) -> CodecResult<()> {
        let bytes = to_ascii(value);
        let len =
            u16::try_from(bytes.len()).map_err(|_| too_long(context, bytes.len(), u16::MAX as usize))?;
        self.write_u16(len);
        self.write_bytes(&bytes);
        Ok(())
    }

    /// ASCII string with a 32-bit length prefix
    pub fn write_ascii32(&mut self, value: &str, context: &str) -> CodecResult<()> {
        let bytes = to_ascii(value);
        let len =
            u32::try_from(bytes.len()).map_err(|_| too_long(context, bytes.len(), u32::MAX as usize))?;
        self.write_u32(len);
        self.write_bytes(&bytes);
        Ok(())
    }

    /// UTF-8 string prefixed by a 7-bit variable-length byte count
    pub fn write_varint_string(&mut self, value: &str, context: &str) -> CodecResult<()> {
        let bytes = value.as_bytes();
        let mut len = u32::try_from(bytes.len())
            .map_err(|_| too_long(context, bytes.len(), u32::MAX as usize))?;
        while len >= 0x80 {
            self.write_u8((len as u8) | 0x80);
            len >>= 7;
        }
        self.write_u8(len as u8);
        self.write_bytes(bytes);
        Ok(())
    }
}

/// Non-ASCII characters are replaced with `?`
fn to_ascii(value: &str) -> Vec<u8> {
    value
        .chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .collect()
}

fn too_long(context: &str, len: usize, max: usize) -> CodecError {
    CodecError::build(
        context,
        format!("string of {len} bytes exceeds length field maximum {max}"),
    )
}
