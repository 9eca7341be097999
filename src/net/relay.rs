//! Bidirectional byte relay between two duplex streams.
//!
//! # Data Flow
//! ```text
//!  a ──read──▶ [pooled buf] ──write──▶ b     (a_to_b)
//!  a ◀──write── [pooled buf] ◀──read── b     (b_to_a)
//! ```
//!
//! # Design Decisions
//! - The first direction to finish decides the result; the other one is
//!   dropped when `bind` returns and the caller closes both streams
//! - End-of-stream on a source shuts down the destination's write half
//! - Each direction has its own panic boundary

use std::io;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::net::buffer_pool::BufferPool;
use crate::net::connection::panic_message;
use crate::observability::metrics;

/// Errors reported by [`StreamRelay::bind`]. End-of-stream is not an error.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay {direction} failed: {source}")]
    Io {
        direction: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("relay {direction} crashed: {message}")]
    Panicked {
        direction: &'static str,
        message: String,
    },
}

/// Pipes two duplex streams into each other using pooled buffers.
#[derive(Debug, Clone, Default)]
pub struct StreamRelay {
    pool: BufferPool,
}

impl StreamRelay {
    pub fn new(pool: BufferPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Copy `a → b` and `b → a` concurrently until either direction ends.
    ///
    /// Returns `Ok(())` if the finishing direction hit end-of-stream and the
    /// error otherwise. Both streams stay owned by the caller, who is
    /// expected to close them afterwards.
    pub async fn bind<A, B>(&self, a: &mut A, b: &mut B) -> Result<(), RelayError>
    where
        A: AsyncRead + AsyncWrite + Unpin + ?Sized,
        B: AsyncRead + AsyncWrite + Unpin + ?Sized,
    {
        let (mut a_read, mut a_write) = tokio::io::split(a);
        let (mut b_read, mut b_write) = tokio::io::split(b);

        let a_to_b = self.direction("a_to_b", &mut a_read, &mut b_write);
        let b_to_a = self.direction("b_to_a", &mut b_read, &mut a_write);
        tokio::pin!(a_to_b, b_to_a);

        tokio::select! {
            result = &mut a_to_b => result,
            result = &mut b_to_a => result,
        }
    }

    async fn direction<R, W>(
        &self,
        direction: &'static str,
        src: &mut R,
        dst: &mut W,
    ) -> Result<(), RelayError>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut copied = 0u64;
        let outcome = AssertUnwindSafe(copy_until_eof(&self.pool, src, dst, &mut copied))
            .catch_unwind()
            .await;

        metrics::record_relay_bytes(direction, copied);

        match outcome {
            Ok(Ok(())) => {
                tracing::debug!(direction, bytes = copied, "Relay direction reached end of stream");
                Ok(())
            }
            Ok(Err(source)) => {
                tracing::debug!(direction, bytes = copied, error = %source, "Relay direction failed");
                Err(RelayError::Io { direction, source })
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(direction, panic = %message, "Relay direction crashed");
                Err(RelayError::Panicked { direction, message })
            }
        }
    }
}

/// Copy until `src` reports end-of-stream, then half-close `dst`.
///
/// The pooled buffer is returned when this future completes, fails, is
/// dropped, or unwinds.
async fn copy_until_eof<R, W>(
    pool: &BufferPool,
    src: &mut R,
    dst: &mut W,
    copied: &mut u64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = pool.get();

    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        dst.write_all(&buf[..n]).await?;
        dst.flush().await?;
        *copied += n as u64;
    }

    // The peer may already be gone; end-of-stream still counts as success.
    if let Err(e) = dst.shutdown().await {
        tracing::debug!(error = %e, "Half-close after end of stream failed");
    }

    Ok(())
}
