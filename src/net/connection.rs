//! Connection supervision and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count in-flight handler invocations for graceful shutdown
//! - Run each handler on its own task behind a panic boundary

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

static PANIC_HOOK: Once = Once::new();

thread_local! {
    /// Backtrace of the most recent panic on this thread, taken at the panic site.
    static PANIC_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Chain a panic hook that records where each panic happened.
///
/// By the time `catch_unwind` returns the stack has already unwound, so the
/// backtrace has to be taken inside the hook. The previous hook still runs.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
            previous(info);
        }));
    });
}

/// Take the backtrace recorded by the last panic on this thread.
fn take_panic_backtrace() -> Option<Backtrace> {
    PANIC_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks in-flight handler invocations.
///
/// The count lives in a watch channel so shutdown can wait for it to reach
/// zero without polling.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<watch::Sender<u64>>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { active: Arc::new(tx) }
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        let mut now = 0;
        self.active.send_modify(|count| {
            *count += 1;
            now = *count;
        });
        metrics::record_active_connections(now);

        ConnectionGuard {
            active: Arc::clone(&self.active),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        *self.active.borrow()
    }

    /// Wait until no connections are active.
    pub async fn wait_for_idle(&self) {
        let mut rx = self.active.subscribe();
        // The sender is owned by `self`; the channel stays open.
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Wait until no connections are active, giving up after `limit`.
    ///
    /// Returns `true` if the tracker went idle in time.
    pub async fn wait_for_idle_timeout(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.wait_for_idle()).await.is_ok()
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<watch::Sender<u64>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let mut now = 0;
        self.active.send_modify(|count| {
            *count = count.saturating_sub(1);
            now = *count;
        });
        metrics::record_active_connections(now);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Run `handler` for an accepted connection on a dedicated task.
///
/// The guard must be taken before calling this so the connection is counted
/// before the task exists. A panic inside the handler is logged with a
/// backtrace and ends the task like a normal return; the guard is released
/// either way.
pub fn supervise<F, Fut>(
    guard: ConnectionGuard,
    stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<F>,
) -> JoinHandle<()>
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    install_panic_hook();
    let span = tracing::info_span!("connection", id = %guard.id(), peer = %peer_addr);

    tokio::spawn(
        async move {
            let _guard = guard;
            let outcome = AssertUnwindSafe(async move { handler(stream).await })
                .catch_unwind()
                .await;

            if let Err(panic) = outcome {
                // Same poll as the panic, so still on the thread that recorded it.
                let backtrace = take_panic_backtrace().unwrap_or_else(Backtrace::force_capture);
                metrics::record_handler_panic();
                tracing::error!(
                    panic = %panic_message(panic.as_ref()),
                    backtrace = %backtrace,
                    "Connection handler crashed"
                );
            }
        }
        .instrument(span),
    )
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        assert_eq!(tracker.active_count(), 1);

        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn wait_for_idle_returns_when_guards_drop() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();

        let released = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        assert!(tracker.wait_for_idle_timeout(Duration::from_secs(2)).await);
        released.await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_idle_times_out() {
        let tracker = ConnectionTracker::new();
        let _guard = tracker.track();

        assert!(!tracker.wait_for_idle_timeout(Duration::from_millis(50)).await);
        assert_eq!(tracker.active_count(), 1);
    }

    async fn connected_pair() -> (TcpStream, SocketAddr, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (server, peer, client)
    }

    #[tokio::test]
    async fn supervised_panic_releases_guard() {
        let tracker = ConnectionTracker::new();
        let (server, peer, _client) = connected_pair().await;

        let handler = Arc::new(|_stream: TcpStream| async move {
            panic!("handler exploded");
        });

        let task = supervise(tracker.track(), server, peer, handler);
        // The panic is contained inside the task.
        task.await.expect("task must not report a panic");
        assert_eq!(tracker.active_count(), 0);
    }

    /// Collects everything a fmt subscriber writes.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[inline(never)]
    fn blow_up_inside_handler() {
        panic!("handler exploded");
    }

    #[tokio::test]
    async fn logged_backtrace_names_panic_site() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        // Current-thread runtime: the spawned task runs on this thread and
        // sees the scoped subscriber.
        let _default = tracing::subscriber::set_default(subscriber);

        let tracker = ConnectionTracker::new();
        let (server, peer, _client) = connected_pair().await;
        let handler = Arc::new(|_stream: TcpStream| async move {
            blow_up_inside_handler();
        });

        supervise(tracker.track(), server, peer, handler)
            .await
            .unwrap();

        let logged = logs.contents();
        assert!(logged.contains("Connection handler crashed"), "{logged}");
        assert!(logged.contains("blow_up_inside_handler"), "{logged}");
    }

    #[test]
    fn panic_message_extracts_text() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
