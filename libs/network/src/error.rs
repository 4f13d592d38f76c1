//! Network Error Types
//!
//! Failures of the connection, session and listener layers. Codec failures
//! on a single message convert in through [`NetworkError::Codec`]; they
//! never take the connection down on their own.

use codec::CodecError;
use std::net::SocketAddr;
use thiserror::Error;

/// Main network error type
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Operation not valid in the connection's current state
    #[error("Invalid state: {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Not connected: {operation}")]
    NotConnected { operation: &'static str },

    /// TCP connect failed or the peer rejected the session
    #[error("Connect failed: {message} (remote: {remote:?})")]
    ConnectFailed {
        message: String,
        remote: Option<String>,
        source: Option<std::io::Error>,
    },

    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },

    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Declared frame length above the configured maximum; fatal for the connection
    #[error("Framing violation: declared length {declared} exceeds maximum {max}")]
    FramingViolation { declared: usize, max: usize },

    /// Nothing received within the liveness window
    #[error("Receive timeout: no data for {timeout_ms}ms (peer: {peer:?})")]
    ReceiveTimeout {
        timeout_ms: u64,
        peer: Option<SocketAddr>,
    },

    #[error("Session {key} already registered on connection {connection}")]
    SessionExists { key: String, connection: String },

    #[error("Session {key} is not attached to a connection")]
    SessionUnattached { key: String },

    /// Application message on a session whose handshake has not completed
    #[error("Session {key} not established")]
    NotEstablished { key: String },

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Result type alias for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;

impl NetworkError {
    pub fn invalid_state(operation: &'static str, state: &'static str) -> Self {
        Self::InvalidState { operation, state }
    }

    pub fn not_connected(operation: &'static str) -> Self {
        Self::NotConnected { operation }
    }

    /// Create a connect failure
    pub fn connect_failed(message: impl Into<String>, remote: Option<&str>) -> Self {
        Self::ConnectFailed {
            message: message.into(),
            remote: remote.map(|r| r.to_string()),
            source: None,
        }
    }

    /// Create a connect failure with source
    pub fn connect_failed_with_source(
        message: impl Into<String>,
        remote: Option<&str>,
        source: std::io::Error,
    ) -> Self {
        Self::ConnectFailed {
            message: message.into(),
            remote: remote.map(|r| r.to_string()),
            source: Some(source),
        }
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn framing_violation(declared: usize, max: usize) -> Self {
        Self::FramingViolation { declared, max }
    }

    pub fn receive_timeout(timeout_ms: u64, peer: Option<SocketAddr>) -> Self {
        Self::ReceiveTimeout { timeout_ms, peer }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Check if a retry may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetworkError::ConnectFailed { .. }
                | NetworkError::Io { .. }
                | NetworkError::Timeout { .. }
                | NetworkError::ReceiveTimeout { .. }
                | NetworkError::NotConnected { .. }
        )
    }

    /// Errors after which the connection must be torn down
    pub fn is_fatal_for_connection(&self) -> bool {
        matches!(
            self,
            NetworkError::FramingViolation { .. }
                | NetworkError::ReceiveTimeout { .. }
                | NetworkError::Io { .. }
        )
    }

    /// Get error category for log fields
    pub fn category(&self) -> &'static str {
        match self {
            NetworkError::InvalidState { .. } => "invalid_state",
            NetworkError::NotConnected { .. } => "not_connected",
            NetworkError::ConnectFailed { .. } => "connect_failed",
            NetworkError::Io { .. } => "io",
            NetworkError::Timeout { .. } => "timeout",
            NetworkError::FramingViolation { .. } => "framing",
            NetworkError::ReceiveTimeout { .. } => "receive_timeout",
            NetworkError::SessionExists { .. } => "session_exists",
            NetworkError::SessionUnattached { .. } => "session_unattached",
            NetworkError::NotEstablished { .. } => "not_established",
            NetworkError::Configuration { .. } => "configuration",
            NetworkError::Codec(_) => "codec",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = NetworkError::framing_violation(0x200000, 0xFFFFF);
        assert_eq!(err.category(), "framing");
        assert!(err.is_fatal_for_connection());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("2097152"));

        let err = NetworkError::timeout("TCP connect", 10_000);
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Timeout error: TCP connect exceeded 10000ms");
    }

    #[test]
    fn test_codec_conversion() {
        let err: NetworkError = CodecError::build("connection text", "too long").into();
        assert_eq!(err.category(), "codec");
        assert!(!err.is_fatal_for_connection());
    }

    #[test]
    fn test_configuration_error() {
        let err = NetworkError::configuration("no runtime", Some("runtime"));
        match err {
            NetworkError::Configuration { field, .. } => assert_eq!(field.as_deref(), Some("runtime")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
