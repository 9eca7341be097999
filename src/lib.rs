//! Supervised TCP listener and bidirectional stream relay.

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod tunnel;

pub use config::TunnelConfig;
pub use lifecycle::QuitSignal;
pub use net::{close, BufferPool, Listener, ListenerError, ListenerState, StreamRelay};
pub use tunnel::Tunnel;
