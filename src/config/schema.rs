//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files and
//! every field has a default, so an empty file is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::buffer_pool::{BufferPoolConfig, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_POOLED};

/// Root configuration for the tunnel.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct TunnelConfig {
    /// Deployment environment name (dev, test, prod).
    pub env: Environment,

    /// Listener configuration (bind address, drain timeout).
    pub listener: ListenerConfig,

    /// Relay configuration (upstream, buffers).
    pub relay: RelayConfig,

    /// Log output settings.
    pub log: LogConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Test,
    Prod,
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "test" => Ok(Environment::Test),
            "prod" => Ok(Environment::Prod),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// How long a graceful stop waits for handlers to return.
    pub shutdown_timeout_secs: u64,
}

impl ListenerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            shutdown_timeout_secs: 30,
        }
    }
}

/// Relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Upstream every accepted connection is piped to (e.g., "127.0.0.1:3000").
    pub upstream_address: Option<String>,

    /// Upstream dial timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Size of each pooled copy buffer in bytes.
    pub buffer_size: usize,

    /// Maximum idle buffers kept for reuse.
    pub max_pooled_buffers: usize,
}

impl RelayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn buffer_pool(&self) -> BufferPoolConfig {
        BufferPoolConfig {
            buffer_size: self.buffer_size,
            max_pooled: self.max_pooled_buffers,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream_address: None,
            connect_timeout_ms: 5_000,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_pooled_buffers: DEFAULT_MAX_POOLED,
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Level filter: trace, debug, info, warn, error.
    pub level: String,

    /// Output format.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unsupported log format: {}", other)),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Prometheus scrape address; metrics are disabled when unset.
    pub metrics_address: Option<String>,
}
