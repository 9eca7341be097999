//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     stop requested → QuitSignal fires → accept loop exits → drain
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT/SIGHUP/SIGQUIT → caller starts graceful shutdown
//! ```
//!
//! # Design Decisions
//! - The quit signal is raised before the listening socket closes, so the
//!   accept loop can tell a deliberate close from a real accept failure
//! - Shutdown has a timeout: lingering handlers are reported, not killed

pub mod shutdown;
pub mod signals;

pub use shutdown::QuitSignal;
