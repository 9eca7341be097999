//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses are `host:port` and value ranges are sane
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TunnelConfig → Result<(), Vec<ValidationError>>

use std::fmt;

use crate::config::schema::TunnelConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending key.
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &TunnelConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(message) = check_host_port(&config.listener.bind_address) {
        errors.push(ValidationError {
            field: "listener.bind_address",
            message,
        });
    }

    if let Some(upstream) = &config.relay.upstream_address {
        if let Err(message) = check_host_port(upstream) {
            errors.push(ValidationError {
                field: "relay.upstream_address",
                message,
            });
        }
    }

    if config.relay.buffer_size == 0 {
        errors.push(ValidationError {
            field: "relay.buffer_size",
            message: "must be greater than 0".to_string(),
        });
    }

    if config.relay.connect_timeout_ms == 0 {
        errors.push(ValidationError {
            field: "relay.connect_timeout_ms",
            message: "must be greater than 0".to_string(),
        });
    }

    // An unknown `log.level` is not an error: logging init falls back to
    // info and warns once a subscriber exists to report it.

    if let Some(metrics) = &config.observability.metrics_address {
        if metrics.parse::<std::net::SocketAddr>().is_err() {
            errors.push(ValidationError {
                field: "observability.metrics_address",
                message: format!("'{}' is not an ip:port socket address", metrics),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Accepts `host:port` and `[v6]:port`; the host is not resolved here.
fn check_host_port(address: &str) -> Result<(), String> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| format!("'{}' is missing a port", address))?;

    if host.is_empty() {
        return Err(format!("'{}' is missing a host", address));
    }
    port.parse::<u16>()
        .map(|_| ())
        .map_err(|_| format!("'{}' has an invalid port", address))
}
