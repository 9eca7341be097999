//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize, missing file = defaults)
//!     → loader.rs (environment overrides)
//!     → CLI flags (applied by the binary)
//!     → validation.rs (semantic checks)
//!     → TunnelConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Precedence: flag > environment > file > default
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::ConfigError;
pub use schema::{ListenerConfig, LogConfig, LogFormat, RelayConfig, TunnelConfig};
