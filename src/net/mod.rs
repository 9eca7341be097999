//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, quit-signal aware)
//!     → connection.rs (tracking guard, panic boundary, per-connection span)
//!     → caller's handler
//!         → relay.rs (optional: pipe to an upstream using buffer_pool.rs)
//! ```
//!
//! # Design Decisions
//! - Each connection is counted before its task is spawned, so a drain
//!   never misses one
//! - A failing or panicking connection never affects the listener
//! - Buffers are pooled per relay direction and returned on every exit path

pub mod buffer_pool;
pub mod connection;
pub mod listener;
pub mod relay;

pub use buffer_pool::{BufferPool, BufferPoolConfig, PooledBuffer};
pub use listener::{close, Listener, ListenerError, ListenerState};
pub use relay::{RelayError, StreamRelay};
