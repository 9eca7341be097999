//! Configuration loading from disk and the environment.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::TunnelConfig;
use crate::config::validation::ValidationError;

/// Environment variables consulted by [`apply_env_overrides`].
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";
pub const ENV_ENVIRONMENT: &str = "ENV";
pub const ENV_BIND_ADDRESS: &str = "TUNNEL_LISTENER_BIND_ADDRESS";
pub const ENV_SHUTDOWN_TIMEOUT: &str = "TUNNEL_LISTENER_SHUTDOWN_TIMEOUT_SECS";
pub const ENV_UPSTREAM_ADDRESS: &str = "TUNNEL_RELAY_UPSTREAM_ADDRESS";
pub const ENV_METRICS_ADDRESS: &str = "TUNNEL_METRICS_ADDRESS";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: {message}")]
    Env { var: &'static str, message: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Where [`read_config_or_default`] took its values from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// The file existed and was parsed.
    File,
    /// The file was missing; built-in defaults were used.
    Defaults,
}

/// Read a TOML file without validating it.
///
/// A missing file is not an error: defaults are returned so environment
/// variables and flags can still configure things. Nothing is logged here
/// because this runs before the subscriber is installed; the caller reports
/// the returned [`ConfigSource`] once logging is up.
pub fn read_config_or_default(
    path: &Path,
) -> Result<(TunnelConfig, ConfigSource), ConfigError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok((toml::from_str(&content)?, ConfigSource::File)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Ok((TunnelConfig::default(), ConfigSource::Defaults))
        }
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Overlay environment variables onto `config`.
///
/// `lookup` abstracts `std::env::var` so callers and tests can supply their
/// own source. Empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut TunnelConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |var: &str| lookup(var).filter(|value| !value.is_empty());

    if let Some(level) = get(ENV_LOG_LEVEL) {
        config.log.level = level;
    }
    if let Some(format) = get(ENV_LOG_FORMAT) {
        config.log.format = format.parse().map_err(|message| ConfigError::Env {
            var: ENV_LOG_FORMAT,
            message,
        })?;
    }
    if let Some(env) = get(ENV_ENVIRONMENT) {
        config.env = env.parse().map_err(|message| ConfigError::Env {
            var: ENV_ENVIRONMENT,
            message,
        })?;
    }
    if let Some(address) = get(ENV_BIND_ADDRESS) {
        config.listener.bind_address = address;
    }
    if let Some(secs) = get(ENV_SHUTDOWN_TIMEOUT) {
        config.listener.shutdown_timeout_secs =
            secs.parse().map_err(|e| ConfigError::Env {
                var: ENV_SHUTDOWN_TIMEOUT,
                message: format!("{}", e),
            })?;
    }
    if let Some(upstream) = get(ENV_UPSTREAM_ADDRESS) {
        config.relay.upstream_address = Some(upstream);
    }
    if let Some(metrics) = get(ENV_METRICS_ADDRESS) {
        config.observability.metrics_address = Some(metrics);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{Environment, LogFormat};
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn reads_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[listener]\nbind_address = \"127.0.0.1:7000\"\nshutdown_timeout_secs = 5"
        )
        .unwrap();

        let (config, source) = read_config_or_default(file.path()).unwrap();
        assert_eq!(source, ConfigSource::File);
        assert_eq!(config.listener.bind_address, "127.0.0.1:7000");
        assert_eq!(config.listener.shutdown_timeout_secs, 5);
    }

    #[test]
    fn reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[listener\nbind_address = 1").unwrap();

        assert!(matches!(
            read_config_or_default(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (config, source) = read_config_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(source, ConfigSource::Defaults);
        assert_eq!(config, TunnelConfig::default());
    }

    #[test]
    fn unreadable_path_is_io_error() {
        // A directory exists but cannot be read as a file.
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_config_or_default(dir.path()),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = TunnelConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                (ENV_LOG_LEVEL, "debug"),
                (ENV_LOG_FORMAT, "json"),
                (ENV_ENVIRONMENT, "prod"),
                (ENV_BIND_ADDRESS, "127.0.0.1:1234"),
                (ENV_SHUTDOWN_TIMEOUT, "3"),
                (ENV_UPSTREAM_ADDRESS, "db:5432"),
                (ENV_METRICS_ADDRESS, ""),
            ]),
        )
        .unwrap();

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.env, Environment::Prod);
        assert_eq!(config.listener.bind_address, "127.0.0.1:1234");
        assert_eq!(config.listener.shutdown_timeout_secs, 3);
        assert_eq!(config.relay.upstream_address.as_deref(), Some("db:5432"));
        // Empty values are ignored.
        assert_eq!(config.observability.metrics_address, None);
    }

    #[test]
    fn bad_env_value_names_the_variable() {
        let mut config = TunnelConfig::default();
        let err = apply_env_overrides(&mut config, env(&[(ENV_SHUTDOWN_TIMEOUT, "soon")]))
            .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Env { var: ENV_SHUTDOWN_TIMEOUT, .. }
        ));
    }
}
