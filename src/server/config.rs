use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::common::config::load_config;
use crate::common::framing::FramingMode;

/// Complete relay configuration loaded from TOML.
///
/// Every field has a default, so an empty file (or none at all) is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ListenConfig,
    pub relay: RelaySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Interface to bind, all interfaces by default
    pub host: String,
    pub port: u16,
    /// Connections accepted beyond this are dropped immediately
    pub max_connections: usize,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5500,
            max_connections: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub framing: FramingMode,
    pub read_buffer_bytes: usize,
    pub max_message_bytes: usize,
    /// Seconds without inbound data before a connection is dropped; 0 disables
    pub idle_timeout_secs: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            framing: FramingMode::Chunk,
            read_buffer_bytes: 4096,
            max_message_bytes: 64 * 1024,
            idle_timeout_secs: 0,
        }
    }
}

impl RelaySettings {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

impl RelayConfig {
    /// Load relay configuration from a TOML file.
    ///
    /// # Example
    /// ```ignore
    /// let config = RelayConfig::from_file("config/relay.toml")?;
    /// ```
    pub fn from_file(path: &str) -> Result<Self> {
        load_config(path)
    }

    /// `host:port` string to bind the listener on.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
