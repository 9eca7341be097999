//! Structured logging.
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, text format for development
//! - `RUST_LOG` wins over the configured level when set

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogConfig, LogFormat};

/// Parse a configured level, falling back to `info` for unknown values.
///
/// Returns the level and whether the fallback was used.
pub fn parse_level(level: &str) -> (LevelFilter, bool) {
    match level.parse::<LevelFilter>() {
        Ok(parsed) => (parsed, false),
        Err(_) => (LevelFilter::INFO, true),
    }
}

/// Build the filter: `RUST_LOG` if present, otherwise the configured level.
pub fn build_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Install the global subscriber. Must be called once, early in `main`.
pub fn init_logging(config: &LogConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let (level, fell_back) = parse_level(&config.level);
    let filter = build_filter(level);

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()?,
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?,
    }

    if fell_back {
        tracing::warn!(level = %config.level, "Invalid log level, using info level");
    }
    tracing::info!(level = %level, format = ?config.format, "Logger initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_levels_parse() {
        assert_eq!(parse_level("debug"), (LevelFilter::DEBUG, false));
        assert_eq!(parse_level("WARN"), (LevelFilter::WARN, false));
        assert_eq!(parse_level("off"), (LevelFilter::OFF, false));
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        assert_eq!(parse_level("chatty"), (LevelFilter::INFO, true));
    }
}
