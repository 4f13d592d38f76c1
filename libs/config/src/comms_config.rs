//! Comms Configuration Module
//!
//! Loads the connection, session and listener layout for a CDEF node from a
//! TOML file with `CDEF_`-prefixed environment overrides, then validates it
//! against the protocol's limits.

use anyhow::{bail, Context, Result};
use codec::{SessionDescriptor, CDEF_MAX_SIZE};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Complete node configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CommsConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Outbound TCP connections
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,

    /// Logical sessions multiplexed over the connections
    #[serde(default)]
    pub sessions: Vec<SessionConfig>,

    /// Optional inbound listener
    pub listener: Option<ListenerConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DispatcherConfig {
    /// Grace period for handlers to wind down after a stop request
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl DispatcherConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// One outbound TCP connection
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConnectionConfig {
    pub id: String,
    pub host: String,
    pub port: u16,

    /// Heartbeat send interval; 0 disables heartbeats
    #[serde(default)]
    pub heartbeat_ms: u64,

    /// Silence after which the peer is considered dead; 0 disables
    #[serde(default)]
    pub receive_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Delay before re-dialling a dropped connection
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Deliver raw chunks to the owner instead of framing them
    #[serde(default)]
    pub raw_receive: bool,

    /// Heartbeat addressing; broadcast when not set
    pub heartbeat_to: Option<DescriptorConfig>,
    pub heartbeat_from: Option<DescriptorConfig>,
}

impl ConnectionConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        non_zero_ms(self.heartbeat_ms)
    }

    pub fn receive_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.receive_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Descriptor written as its four sub-fields
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescriptorConfig {
    #[serde(default)]
    pub descriptor_type: u32,
    pub sales_location: u32,
    pub address_type: u32,
    pub unique_address: u32,
}

impl DescriptorConfig {
    /// Pack into a descriptor, rejecting sub-fields outside their bit range
    pub fn descriptor(&self) -> Result<SessionDescriptor> {
        SessionDescriptor::try_pack(
            self.descriptor_type,
            self.sales_location,
            self.address_type,
            self.unique_address,
        )
        .map_err(anyhow::Error::from)
    }
}

/// One logical session
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    pub connection_id: String,
    pub to: DescriptorConfig,
    pub from: DescriptorConfig,

    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    /// No handshake; the session is usable as soon as the connection is up
    #[serde(default)]
    pub permanently_connected: bool,

    /// Retry delay after the peer disconnects the session
    #[serde(default = "default_disconnect_retry_ms")]
    pub disconnect_retry_ms: u64,

    #[serde(default = "default_device_type")]
    pub device_type: u8,

    #[serde(default)]
    pub terminal_number: u16,
}

impl SessionConfig {
    pub fn disconnect_retry(&self) -> Duration {
        Duration::from_millis(self.disconnect_retry_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ListenerConfig {
    pub bind: String,
}

fn default_stop_timeout_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_max_message_size() -> usize {
    CDEF_MAX_SIZE
}

fn default_disconnect_retry_ms() -> u64 {
    20_000
}

fn default_device_type() -> u8 {
    codec::DeviceType::Rwt.into()
}

fn default_true() -> bool {
    true
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl CommsConfig {
    /// Load from a TOML file with `CDEF_` environment overrides
    ///
    /// Nested keys use a double underscore, e.g. `CDEF_LOGGING__LEVEL=debug`.
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading comms config: {:?}", path);
        let config = Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(
                Environment::with_prefix("CDEF")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let comms: CommsConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        comms.validate()?;
        Ok(comms)
    }

    /// Parse TOML text without file or environment layers
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let comms: CommsConfig = toml::from_str(text).context("Failed to parse TOML configuration")?;
        comms.validate()?;
        Ok(comms)
    }

    pub fn connection(&self, id: &str) -> Option<&ConnectionConfig> {
        self.connections.iter().find(|c| c.id == id)
    }

    /// Sessions configured on one connection
    pub fn sessions_for<'a>(&'a self, connection_id: &'a str) -> impl Iterator<Item = &'a SessionConfig> + 'a {
        self.sessions
            .iter()
            .filter(move |s| s.connection_id == connection_id)
    }

    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for connection in &self.connections {
            if !ids.insert(connection.id.as_str()) {
                bail!("duplicate connection id '{}'", connection.id);
            }
            if connection.max_message_size > CDEF_MAX_SIZE {
                bail!(
                    "connection '{}': max_message_size {} exceeds protocol maximum {}",
                    connection.id,
                    connection.max_message_size,
                    CDEF_MAX_SIZE
                );
            }
            for (name, descriptor) in [
                ("heartbeat_to", connection.heartbeat_to),
                ("heartbeat_from", connection.heartbeat_from),
            ] {
                if let Some(descriptor) = descriptor {
                    descriptor
                        .descriptor()
                        .with_context(|| format!("connection '{}': {name}", connection.id))?;
                }
            }
        }

        for (index, session) in self.sessions.iter().enumerate() {
            if !ids.contains(session.connection_id.as_str()) {
                bail!(
                    "session {index} references unknown connection '{}'",
                    session.connection_id
                );
            }
            session
                .to
                .descriptor()
                .with_context(|| format!("session {index}: to descriptor"))?;
            session
                .from
                .descriptor()
                .with_context(|| format!("session {index}: from descriptor"))?;
        }

        debug!(
            connections = self.connections.len(),
            sessions = self.sessions.len(),
            "configuration validated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
[logging]
level = "debug"

[[connections]]
id = "host-a"
host = "127.0.0.1"
port = 7001
heartbeat_ms = 1500
receive_timeout_ms = 6000

[[sessions]]
connection_id = "host-a"
to = { sales_location = 0, address_type = 1, unique_address = 1 }
from = { sales_location = 12, address_type = 25, unique_address = 301 }

[listener]
bind = "0.0.0.0:7100"
"#;

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("comms.toml");
        fs::write(&path, SAMPLE).unwrap();

        let config = CommsConfig::load(&path).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.connections.len(), 1);

        let connection = config.connection("host-a").unwrap();
        assert_eq!(connection.address(), "127.0.0.1:7001");
        assert_eq!(connection.heartbeat_interval(), Some(Duration::from_millis(1500)));
        assert_eq!(connection.receive_timeout(), Some(Duration::from_secs(6)));
        assert_eq!(connection.max_message_size, CDEF_MAX_SIZE);
        assert!(!connection.raw_receive);

        let session = config.sessions_for("host-a").next().unwrap();
        assert!(session.auto_reconnect);
        assert!(!session.permanently_connected);
        assert_eq!(session.device_type, 0x52);
        assert_eq!(session.disconnect_retry(), Duration::from_secs(20));
        assert_eq!(session.from.descriptor().unwrap().unique_address(), 301);

        assert_eq!(config.listener.unwrap().bind, "0.0.0.0:7100");
    }

    #[test]
    fn test_zero_disables_timers() {
        let config = CommsConfig::from_toml_str(
            r#"
[[connections]]
id = "c"
host = "localhost"
port = 1
"#,
        )
        .unwrap();
        let connection = &config.connections[0];
        assert_eq!(connection.heartbeat_interval(), None);
        assert_eq!(connection.receive_timeout(), None);
        assert_eq!(connection.reconnect_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_duplicate_connection() {
        let text = r#"
[[connections]]
id = "dup"
host = "a"
port = 1

[[connections]]
id = "dup"
host = "b"
port = 2
"#;
        let err = CommsConfig::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_rejects_unknown_connection_reference() {
        let text = r#"
[[sessions]]
connection_id = "missing"
to = { sales_location = 0, address_type = 1, unique_address = 1 }
from = { sales_location = 0, address_type = 1, unique_address = 2 }
"#;
        assert!(CommsConfig::from_toml_str(text).is_err());
    }

    #[test]
    fn test_rejects_descriptor_out_of_range() {
        let text = r#"
[[connections]]
id = "c"
host = "a"
port = 1

[[sessions]]
connection_id = "c"
to = { sales_location = 4096, address_type = 1, unique_address = 1 }
from = { sales_location = 0, address_type = 1, unique_address = 2 }
"#;
        assert!(CommsConfig::from_toml_str(text).is_err());
    }

    #[test]
    fn test_rejects_oversized_max_message() {
        let text = format!(
            r#"
[[connections]]
id = "c"
host = "a"
port = 1
max_message_size = {}
"#,
            CDEF_MAX_SIZE + 1
        );
        assert!(CommsConfig::from_toml_str(&text).is_err());
    }
}
