//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! listener, connection supervisor, relay produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout (text or JSON)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Every connection task runs inside a span carrying its id and peer
//! - Metrics are cheap and no-ops until an exporter is installed

pub mod logging;
pub mod metrics;
