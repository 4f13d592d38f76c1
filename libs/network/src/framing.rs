//! # Stream Framing
//!
//! ## Purpose
//!
//! Cuts complete CDEF frames out of the byte stream a socket delivers in
//! arbitrary pieces. A frame is the 4-byte little-endian body length
//! followed by that many bytes.
//!
//! ## Buffer Hygiene
//!
//! [`FrameBuffer`] has a fixed capacity of one maximum-size frame plus its
//! length field, so a hostile length can never grow it. Bytes are consumed
//! from a read offset; before each receive, leftovers are moved back to the
//! start only when they reach past half the capacity (or when the pending
//! frame would not fit behind them). Otherwise filling continues where the
//! data ends.

use crate::error::{NetworkError, Result};
use bytes::Bytes;
use codec::LENGTH_FIELD_SIZE;

/// Try to take one frame from the front of `window`
///
/// Returns the number of bytes the frame occupies, or 0 when more bytes are
/// needed. A declared body length above `max_message_size` is a
/// [`NetworkError::FramingViolation`]; the caller must drop the connection.
pub fn try_extract_one(window: &[u8], max_message_size: usize) -> Result<usize> {
    if window.len() <= LENGTH_FIELD_SIZE {
        return Ok(0);
    }

    let mut declared = 0usize;
    for &byte in window[..LENGTH_FIELD_SIZE].iter().rev() {
        declared = (declared << 8) | byte as usize;
    }
    if declared > max_message_size {
        return Err(NetworkError::framing_violation(declared, max_message_size));
    }

    let total = declared + LENGTH_FIELD_SIZE;
    Ok(if window.len() >= total { total } else { 0 })
}

/// Fixed-capacity receive buffer for one connection
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: Box<[u8]>,
    read_offset: usize,
    remaining: usize,
    max_message_size: usize,
}

impl FrameBuffer {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: vec![0u8; max_message_size + LENGTH_FIELD_SIZE].into_boxed_slice(),
            read_offset: 0,
            remaining: 0,
            max_message_size,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn read_offset(&self) -> usize {
        self.read_offset
    }

    /// Bytes received and not yet consumed
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Compact if needed before the next receive; returns whether bytes moved
    pub fn prepare_fill(&mut self) -> bool {
        if self.remaining == 0 {
            self.read_offset = 0;
            return false;
        }

        let capacity = self.capacity();
        let pending = self.pending_frame_len().min(capacity);
        if self.read_offset + self.remaining > capacity / 2 || self.read_offset + pending > capacity {
            let end = self.read_offset + self.remaining;
            self.buffer.copy_within(self.read_offset..end, 0);
            self.read_offset = 0;
            return true;
        }
        false
    }

    /// Free space after the unconsumed bytes; the next receive writes here
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let start = self.read_offset + self.remaining;
        &mut self.buffer[start..]
    }

    /// Record `count` bytes written into [`FrameBuffer::spare_mut`]
    pub fn commit(&mut self, count: usize) {
        let spare = self.capacity() - self.read_offset - self.remaining;
        self.remaining += count.min(spare);
    }

    /// Next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        let window = &self.buffer[self.read_offset..self.read_offset + self.remaining];
        let used = try_extract_one(window, self.max_message_size)?;
        if used == 0 {
            return Ok(None);
        }

        let frame = Bytes::copy_from_slice(&window[..used]);
        self.read_offset += used;
        self.remaining -= used;
        Ok(Some(frame))
    }

    /// Everything unconsumed, for raw receive mode
    pub fn take_all(&mut self) -> Bytes {
        let chunk =
            Bytes::copy_from_slice(&self.buffer[self.read_offset..self.read_offset + self.remaining]);
        self.clear();
        chunk
    }

    pub fn clear(&mut self) {
        self.read_offset = 0;
        self.remaining = 0;
    }

    /// Total size of the frame at the read offset, as far as it is known
    fn pending_frame_len(&self) -> usize {
        if self.remaining < LENGTH_FIELD_SIZE {
            return LENGTH_FIELD_SIZE;
        }
        let start = self.read_offset;
        let declared = u32::from_le_bytes([
            self.buffer[start],
            self.buffer[start + 1],
            self.buffer[start + 2],
            self.buffer[start + 3],
        ]) as usize;
        declared.saturating_add(LENGTH_FIELD_SIZE)
    }
}
