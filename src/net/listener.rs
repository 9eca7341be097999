//! Supervised TCP listener with graceful shutdown.
//!
//! # Responsibilities
//! - Bind to the configured address and report bind failures synchronously
//! - Run the accept loop in the background and dispatch each connection
//!   to a supervised handler task
//! - Drain in-flight handlers on shutdown, bounded by a timeout
//!
//! # State Machine
//! ```text
//! Created ──start_listen──▶ Listening ──stop_gracefully──▶ Draining ──drained──▶ Stopped
//! ```

use std::backtrace::Backtrace;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use socket2::SockRef;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::config::ListenerConfig;
use crate::lifecycle::QuitSignal;
use crate::net::connection::{supervise, ConnectionTracker};
use crate::observability::metrics;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// `start_listen` was called on a listener that is not in `Created`.
    #[error("listener cannot start from state {0:?}")]
    AlreadyStarted(ListenerState),

    /// Handlers were still running when the drain deadline passed.
    #[error("close tcp wait timeout after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Lifecycle state of a [`Listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Constructed, socket not bound yet.
    Created,
    /// Socket bound and accept loop running.
    Listening,
    /// Shutdown started, waiting for handlers to return.
    Draining,
    /// Accept loop exited and every handler returned.
    Stopped,
}

struct ListenerInner {
    state: ListenerState,
    local_addr: Option<SocketAddr>,
}

/// Source of inbound connections for the accept loop.
pub(crate) trait Acceptor: Send + 'static {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Flips the loop-exit flag when the accept loop ends, however it ends.
struct LoopExit(Arc<watch::Sender<bool>>);

impl Drop for LoopExit {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

/// A TCP listener that supervises one handler task per accepted connection.
///
/// The listener exclusively owns its socket: only its accept loop closes it,
/// which happens once the quit signal fires.
pub struct Listener {
    local: String,
    inner: Mutex<ListenerInner>,
    quit: QuitSignal,
    tracker: ConnectionTracker,
    loop_exited: Arc<watch::Sender<bool>>,
}

impl Listener {
    /// Create a listener for a `host:port` address. Nothing is bound yet.
    pub fn new(local: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            inner: Mutex::new(ListenerInner {
                state: ListenerState::Created,
                local_addr: None,
            }),
            quit: QuitSignal::new(),
            tracker: ConnectionTracker::new(),
            loop_exited: Arc::new(watch::channel(false).0),
        }
    }

    /// Create a listener from configuration.
    pub fn from_config(config: &ListenerConfig) -> Self {
        Self::new(config.bind_address.clone())
    }

    /// Bind the socket and start accepting in the background.
    ///
    /// Returns once the accept loop has been spawned. `handler` is invoked
    /// once per accepted connection on its own task.
    pub async fn start_listen<F, Fut>(&self, handler: F) -> Result<(), ListenerError>
    where
        F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let state = self.state();
        if state != ListenerState::Created {
            return Err(ListenerError::AlreadyStarted(state));
        }

        let socket = TcpListener::bind(&self.local)
            .await
            .map_err(|source| ListenerError::Bind {
                address: self.local.clone(),
                source,
            })?;
        let local_addr = socket.local_addr().map_err(|source| ListenerError::Bind {
            address: self.local.clone(),
            source,
        })?;

        self.launch(socket, local_addr, handler)
    }

    /// Move to `Listening` and spawn the accept loop over `acceptor`.
    pub(crate) fn launch<A, F, Fut>(
        &self,
        acceptor: A,
        local_addr: SocketAddr,
        handler: F,
    ) -> Result<(), ListenerError>
    where
        A: Acceptor,
        F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.lock();
        // A concurrent start or stop may have won while we were binding.
        if inner.state != ListenerState::Created {
            return Err(ListenerError::AlreadyStarted(inner.state));
        }

        tracing::info!(address = %local_addr, "Listener bound");

        inner.state = ListenerState::Listening;
        inner.local_addr = Some(local_addr);

        let exit = LoopExit(Arc::clone(&self.loop_exited));
        let quit = self.quit.clone();
        let tracker = self.tracker.clone();
        let handler = Arc::new(handler);
        tokio::spawn(async move {
            let _exit = exit;
            accept_loop(acceptor, handler, quit, tracker).await;
        });

        Ok(())
    }

    /// Stop accepting and wait up to `wait` for every handler to return.
    ///
    /// Handlers still running at the deadline are left alone; the call then
    /// returns [`ListenerError::ShutdownTimeout`] and may be repeated later.
    pub async fn stop_gracefully(&self, wait: Duration) -> Result<(), ListenerError> {
        // Raised before the socket closes so the accept loop treats the
        // resulting wake-up as intentional.
        if self.quit.signal() {
            tracing::info!(address = %self.local, "Stopping listener");
        }

        {
            let mut inner = self.lock();
            match inner.state {
                ListenerState::Created => {
                    inner.state = ListenerState::Stopped;
                    return Ok(());
                }
                ListenerState::Listening => inner.state = ListenerState::Draining,
                ListenerState::Draining | ListenerState::Stopped => {}
            }
        }

        // Every caller waits on the shared exit flag, so concurrent stops
        // all observe the loop ending before reporting `Stopped`.
        let mut loop_exited = self.loop_exited.subscribe();
        let drained = tokio::time::timeout(wait, async {
            // The sender lives in `self`; the channel stays open.
            let _ = loop_exited.wait_for(|exited| *exited).await;
            self.tracker.wait_for_idle().await;
        })
        .await
        .is_ok();

        if drained {
            self.lock().state = ListenerState::Stopped;
            tracing::info!(address = %self.local, "Listener stopped");
            Ok(())
        } else {
            tracing::warn!(
                address = %self.local,
                active_connections = self.tracker.active_count(),
                timeout = ?wait,
                "Timed out waiting for connections to drain"
            );
            Err(ListenerError::ShutdownTimeout(wait))
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ListenerState {
        self.lock().state
    }

    /// Address the socket is bound to, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().local_addr
    }

    /// Whether the accept loop is still running.
    pub fn is_accepting(&self) -> bool {
        let started = matches!(
            self.state(),
            ListenerState::Listening | ListenerState::Draining
        );
        started && !*self.loop_exited.borrow()
    }

    /// Number of handler invocations currently in flight.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Quit signal handlers can observe to notice shutdown.
    pub fn quit_signal(&self) -> QuitSignal {
        self.quit.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ListenerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn accept_loop<A, F, Fut>(
    mut socket: A,
    handler: Arc<F>,
    quit: QuitSignal,
    tracker: ConnectionTracker,
) where
    A: Acceptor,
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let quit_requested = quit.signaled();
    tokio::pin!(quit_requested);

    loop {
        let accepted = tokio::select! {
            biased;
            _ = &mut quit_requested => break,
            accepted = socket.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                metrics::record_connection_accepted();
                tracing::debug!(peer_addr = %peer_addr, "Connection accepted");

                let guard = tracker.track();
                supervise(guard, stream, peer_addr, Arc::clone(&handler));
            }
            Err(_) if quit.is_signaled() => break,
            Err(e) => {
                metrics::record_accept_error();
                tracing::error!(error = %e, "TcpListener accept error");
                break;
            }
        }
    }

    drop(socket);
    tracing::debug!("Accept loop exited");
}

/// Forcefully terminate one connection.
///
/// Shuts down both directions of the socket so any task blocked reading or
/// writing it (including through split halves) wakes immediately. The file
/// descriptor itself is released when its last owner drops it. Failures are
/// logged, never returned.
pub fn close(conn: &TcpStream) {
    if let Err(e) = SockRef::from(conn).shutdown(std::net::Shutdown::Both) {
        tracing::warn!(
            error = %e,
            backtrace = %Backtrace::force_capture(),
            "Connection close error"
        );
    }
}
