//! # CDEF Comms Configuration
//!
//! Typed configuration for a CDEF node: which hosts to dial, which logical
//! sessions to run over each connection, heartbeat and liveness timers, and
//! an optional inbound listener.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cdef_config::CommsConfig;
//! use std::path::Path;
//!
//! let config = CommsConfig::load(Path::new("config/comms.toml")).unwrap();
//! for connection in &config.connections {
//!     println!("{} -> {}", connection.id, connection.address());
//! }
//! ```

pub mod comms_config;

pub use comms_config::{
    CommsConfig, ConnectionConfig, DescriptorConfig, DispatcherConfig, ListenerConfig,
    LoggingConfig, SessionConfig,
};
