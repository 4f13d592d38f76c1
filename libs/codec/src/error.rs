//! Protocol-level errors for CDEF message processing
//!
//! Every failure carries enough context to locate the problem in the byte
//! stream. Each variant maps onto the [`CdefStatus`] value that peers and logs
//! use to describe the outcome of a parse or build.

use std::fmt;
use thiserror::Error;

/// Outcome of decoding or encoding a single message
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CdefStatus {
    #[default]
    Ok = 0,
    ParseError = 1,
    BuildError = 2,
    InitError = 3,
    DataError = 4,
}

impl fmt::Display for CdefStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CdefStatus::Ok => "OK",
            CdefStatus::ParseError => "ParseError",
            CdefStatus::BuildError => "BuildError",
            CdefStatus::InitError => "InitError",
            CdefStatus::DataError => "DataError",
        };
        f.write_str(name)
    }
}

/// Codec errors with diagnostic context
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// Malformed or truncated bytes while decoding
    #[error("Parse error at byte {offset}: {description} (buffer: {buffer_size} bytes, context: {context})")]
    Parse {
        offset: usize,
        description: String,
        buffer_size: usize,
        context: String,
    },

    /// A field could not be written, e.g. a string longer than its length prefix allows
    #[error("Build error in {context}: {description}")]
    Build {
        context: String,
        description: String,
    },

    /// Caller misuse, e.g. more list items than a byte counter can carry
    #[error("Data error: {description} (limit: {limit}, got: {got})")]
    Data {
        description: String,
        limit: usize,
        got: usize,
    },

    /// Raw input was empty or larger than the protocol maximum
    #[error("Init error: message of {size} bytes outside 1..={max}")]
    Init { size: usize, max: usize },
}

impl CodecError {
    /// Create a parse error with buffer context
    pub fn parse(
        offset: usize,
        description: impl Into<String>,
        buffer_size: usize,
        context: impl Into<String>,
    ) -> Self {
        Self::Parse {
            offset,
            description: description.into(),
            buffer_size,
            context: context.into(),
        }
    }

    /// Create a parse error for a read that ran off the end of the buffer
    pub fn truncated(offset: usize, buffer_size: usize, context: impl Into<String>) -> Self {
        Self::parse(offset, "unexpected end of message", buffer_size, context)
    }

    /// Create a build error
    pub fn build(context: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Build {
            context: context.into(),
            description: description.into(),
        }
    }

    /// Create a data error for an exceeded limit
    pub fn data(description: impl Into<String>, limit: usize, got: usize) -> Self {
        Self::Data {
            description: description.into(),
            limit,
            got,
        }
    }

    /// The status value reported for this error
    pub fn status(&self) -> CdefStatus {
        match self {
            CodecError::Parse { .. } => CdefStatus::ParseError,
            CodecError::Build { .. } => CdefStatus::BuildError,
            CodecError::Data { .. } => CdefStatus::DataError,
            CodecError::Init { .. } => CdefStatus::InitError,
        }
    }
}

/// Result type for codec operations
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Status of a codec result without the value
pub fn status_of<T>(result: &CodecResult<T>) -> CdefStatus {
    match result {
        Ok(_) => CdefStatus::Ok,
        Err(e) => e.status(),
    }
}
