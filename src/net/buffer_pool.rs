//! Fixed-size buffer pool shared by relay directions.
//!
//! # Design Decisions
//! - Every buffer handed out has exactly `buffer_size` bytes of length;
//!   contents are whatever the previous borrower left behind
//! - The pool is bounded ("leaky"): returns beyond `max_pooled` are dropped
//! - Buffers of the wrong length are rejected on return, never resized

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

/// Default buffer size, a little above a typical Ethernet MTU.
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Default upper bound on idle buffers kept for reuse.
pub const DEFAULT_MAX_POOLED: usize = 2048;

/// Configuration for a [`BufferPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolConfig {
    /// Length of every buffer handed out.
    pub buffer_size: usize,
    /// Maximum number of idle buffers kept in the pool.
    pub max_pooled: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_pooled: DEFAULT_MAX_POOLED,
        }
    }
}

/// A thread-safe pool of reusable fixed-size byte buffers.
///
/// Cloning is cheap and clones share the same free list.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    config: BufferPoolConfig,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Create a pool with the given configuration.
    pub fn new(config: BufferPoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                free: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Length of every buffer this pool hands out.
    pub fn buffer_size(&self) -> usize {
        self.inner.config.buffer_size
    }

    /// Borrow a buffer. It goes back to the pool when the guard drops.
    pub fn get(&self) -> PooledBuffer {
        let reused = self.free_list().pop();
        let buf = reused.unwrap_or_else(|| vec![0u8; self.inner.config.buffer_size]);
        PooledBuffer {
            buf: Some(buf),
            pool: self.clone(),
        }
    }

    /// Return a buffer for reuse.
    ///
    /// Buffers whose length differs from the configured size are dropped,
    /// as are returns that would exceed `max_pooled`.
    pub fn put(&self, buf: Vec<u8>) {
        if buf.len() != self.inner.config.buffer_size {
            tracing::trace!(
                len = buf.len(),
                expected = self.inner.config.buffer_size,
                "Rejected buffer of wrong size"
            );
            return;
        }

        let mut free = self.free_list();
        if free.len() < self.inner.config.max_pooled {
            free.push(buf);
        }
    }

    /// Number of idle buffers currently held.
    pub fn available(&self) -> usize {
        self.free_list().len()
    }

    fn free_list(&self) -> std::sync::MutexGuard<'_, Vec<Vec<u8>>> {
        // A panic while holding the lock cannot leave the Vec half-updated.
        self.inner.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(BufferPoolConfig::default())
    }
}

/// A buffer borrowed from a [`BufferPool`].
///
/// Dereferences to the full fixed-size slice. Returned to the pool on drop,
/// including during unwinding.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: BufferPool,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put(buf);
        }
    }
}
