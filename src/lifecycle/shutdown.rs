//! Shutdown coordination for listeners and long-running handlers.

use std::sync::Arc;
use tokio::sync::watch;

/// One-shot quit signal.
///
/// Backed by a watch channel so that observers subscribing after the signal
/// fired still see it. Signaling is idempotent: only the first call flips
/// the flag, later calls are no-ops.
#[derive(Debug, Clone)]
pub struct QuitSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl QuitSignal {
    /// Create a new, unsignaled quit signal.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Trigger the signal. Returns `true` only for the call that actually
    /// flipped it.
    pub fn signal(&self) -> bool {
        self.tx.send_if_modified(|quit| {
            if *quit {
                false
            } else {
                *quit = true;
                true
            }
        })
    }

    /// Whether the signal has fired.
    pub fn is_signaled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal fires. Returns immediately if it already has.
    pub async fn signaled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|quit| *quit).await;
    }
}

impl Default for QuitSignal {
    fn default() -> Self {
        Self::new()
    }
}
