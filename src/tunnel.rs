//! Connection handler that pipes each accepted stream to a fixed upstream.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::net::{close, StreamRelay};

/// Forwards accepted connections to one upstream address.
#[derive(Debug, Clone)]
pub struct Tunnel {
    upstream: Arc<str>,
    connect_timeout: Duration,
    relay: StreamRelay,
}

impl Tunnel {
    pub fn new(upstream: impl Into<Arc<str>>, connect_timeout: Duration, relay: StreamRelay) -> Self {
        Self {
            upstream: upstream.into(),
            connect_timeout,
            relay,
        }
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// Dial the upstream and relay until either side finishes, then close
    /// both sockets.
    pub async fn handle(&self, mut inbound: TcpStream) {
        let dial = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&*self.upstream));
        let mut outbound = match dial.await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::warn!(upstream = %self.upstream, error = %e, "Upstream connect failed");
                close(&inbound);
                return;
            }
            Err(_) => {
                tracing::warn!(
                    upstream = %self.upstream,
                    timeout = ?self.connect_timeout,
                    "Upstream connect timed out"
                );
                close(&inbound);
                return;
            }
        };

        if let Err(e) = outbound.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY on upstream");
        }

        match self.relay.bind(&mut inbound, &mut outbound).await {
            Ok(()) => tracing::debug!("Relay finished"),
            Err(e) => tracing::debug!(error = %e, "Relay ended with error"),
        }

        close(&inbound);
        close(&outbound);
    }
}
