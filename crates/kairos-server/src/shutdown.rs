//! Graceful shutdown primitives.
//!
//! - [`ShutdownSignal`] is the process-wide, write-once stop flag every
//!   listener waits on.
//! - [`shutdown_with_timeout`] races a graceful drain against a deadline and
//!   falls back to a forceful action when the deadline wins.
//! - [`ConnectionTracker`] counts live connections so a listener can tell
//!   when its drain is complete.
//!
//! # Example
//!
//! ```rust
//! use kairos_server::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! let observer = shutdown.clone();
//!
//! shutdown.trigger();
//! assert!(observer.is_shutdown());
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;

/// Error reported when a graceful action misses its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("graceful shutdown did not finish before the deadline")]
pub struct DeadlineExceeded;

/// A signal that can be used to trigger and await shutdown.
///
/// Clones share state. The signal is written at most once; the instant of
/// the first [`trigger`](Self::trigger) is kept so every listener derives
/// the same shutdown deadline from it.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    triggered_at: Arc<OnceLock<Instant>>,
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            triggered_at: Arc::new(OnceLock::new()),
            sender,
        }
    }

    /// Triggers shutdown. Later calls are no-ops.
    pub fn trigger(&self) {
        if self.triggered_at.set(Instant::now()).is_ok() {
            // No receivers is fine: late subscribers see the flag.
            let _ = self.sender.send(());
        }
    }

    /// Returns `true` once shutdown has been triggered.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.triggered_at.get().is_some()
    }

    /// Instant of the first trigger.
    #[must_use]
    pub fn triggered_at(&self) -> Option<Instant> {
        self.triggered_at.get().copied()
    }

    /// Deadline for draining: trigger instant plus `grace`.
    ///
    /// Before the signal fires this is measured from now.
    #[must_use]
    pub fn deadline(&self, grace: Duration) -> Instant {
        self.triggered_at().unwrap_or_else(Instant::now) + grace
    }

    /// Returns a future that completes when shutdown is triggered.
    ///
    /// Completes immediately if the signal already fired.
    pub fn recv(&self) -> ShutdownReceiver {
        ShutdownReceiver {
            triggered_at: Arc::clone(&self.triggered_at),
            receiver: self.sender.subscribe(),
        }
    }

    /// Spawns a task that triggers this signal on SIGINT or SIGTERM.
    ///
    /// Must be called from within a Tokio runtime. The task ends when the
    /// signal fires for any reason.
    pub fn listen_os_signals(&self) {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = wait_for_os_signal() => signal.trigger(),
                () = signal.recv() => {}
            }
        });
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A future that completes when the shutdown signal is triggered.
///
/// Created by [`ShutdownSignal::recv()`].
pub struct ShutdownReceiver {
    triggered_at: Arc<OnceLock<Instant>>,
    receiver: broadcast::Receiver<()>,
}

impl Future for ShutdownReceiver {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.triggered_at.get().is_some() {
            return Poll::Ready(());
        }

        match Pin::new(&mut self.receiver).poll_recv(cx) {
            Poll::Ready(_) => Poll::Ready(()),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Waits for SIGTERM or SIGINT (Ctrl+C outside unix).
///
/// If handlers cannot be installed the error is logged and this never
/// completes; shutdown then has to be triggered programmatically.
async fn wait_for_os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let handlers = signal(SignalKind::terminate())
            .and_then(|term| Ok((term, signal(SignalKind::interrupt())?)));
        let (mut sigterm, mut sigint) = match handlers {
            Ok(handlers) => handlers,
            Err(err) => {
                tracing::error!(error = %err, "failed to install signal handlers");
                return std::future::pending().await;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("received SIGINT, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            return std::future::pending().await;
        }
        tracing::info!("received Ctrl+C, initiating graceful shutdown");
    }
}

/// Runs `graceful` until `deadline`, then falls back to `forceful`.
///
/// - `graceful` finishing first: its own result is returned and `forceful`
///   is dropped without being called.
/// - the deadline passing first: `graceful` is dropped, `forceful` is
///   called exactly once and [`DeadlineExceeded`] is returned.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use kairos_server::shutdown::{shutdown_with_timeout, DeadlineExceeded};
/// use tokio::time::Instant;
///
/// # tokio_test::block_on(async {
/// let deadline = Instant::now() + Duration::from_secs(1);
/// let result: Result<(), DeadlineExceeded> =
///     shutdown_with_timeout(deadline, async { Ok(()) }, || {}).await;
/// assert!(result.is_ok());
/// # });
/// ```
pub async fn shutdown_with_timeout<G, F, E>(deadline: Instant, graceful: G, forceful: F) -> Result<(), E>
where
    G: Future<Output = Result<(), E>>,
    F: FnOnce(),
    E: From<DeadlineExceeded>,
{
    match tokio::time::timeout_at(deadline, graceful).await {
        Ok(result) => result,
        Err(_) => {
            forceful();
            Err(DeadlineExceeded.into())
        }
    }
}

/// Counts active connections.
///
/// Every connection holds a [`ConnectionToken`]; dropping the last one wakes
/// [`wait_for_shutdown`](Self::wait_for_shutdown).
///
/// ```rust
/// use kairos_server::shutdown::ConnectionTracker;
///
/// let tracker = ConnectionTracker::new();
/// let token = tracker.acquire();
/// assert_eq!(tracker.active_connections(), 1);
///
/// drop(token);
/// assert_eq!(tracker.active_connections(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl ConnectionTracker {
    /// Creates a tracker with no connections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection for as long as the token lives.
    #[must_use]
    pub fn acquire(&self) -> ConnectionToken {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionToken {
            active: Arc::clone(&self.active),
            notify: Arc::clone(&self.notify),
        }
    }

    /// Number of live connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits until every token has been dropped.
    pub async fn wait_for_shutdown(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// A live connection. Dropping it decrements the tracker.
#[derive(Debug)]
pub struct ConnectionToken {
    active: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl Drop for ConnectionToken {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_shutdown_signal_new() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_shutdown());
        assert!(signal.triggered_at().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_signal_trigger_idempotent() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        let first = signal.triggered_at().unwrap();
        signal.trigger();
        signal.trigger();
        assert!(signal.is_shutdown());
        assert_eq!(signal.triggered_at(), Some(first));
    }

    #[tokio::test]
    async fn test_shutdown_signal_clone_shares_state() {
        let a = ShutdownSignal::new();
        let b = a.clone();
        a.trigger();
        assert!(b.is_shutdown());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_shared() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        let a = signal.deadline(Duration::from_secs(30));
        tokio::time::advance(Duration::from_secs(5)).await;
        let b = signal.clone().deadline(Duration::from_secs(30));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_recv_completes_when_triggered() {
        let signal = ShutdownSignal::new();
        let trigger = signal.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.trigger();
        });

        tokio::time::timeout(Duration::from_secs(1), signal.recv())
            .await
            .expect("recv should complete");
    }

    #[tokio::test]
    async fn test_recv_completes_immediately_if_triggered() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        tokio::time::timeout(Duration::from_millis(10), signal.recv())
            .await
            .expect("recv should complete immediately");
    }

    #[tokio::test]
    async fn test_recv_created_before_trigger() {
        let signal = ShutdownSignal::new();
        let receiver = signal.recv();
        signal.trigger();
        tokio_test::assert_ready!(tokio_test::task::spawn(receiver).poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_never_completing_graceful() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let start = Instant::now();
        let deadline = start + Duration::from_secs(30);

        let result: Result<(), DeadlineExceeded> = shutdown_with_timeout(
            deadline,
            std::future::pending(),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert_eq!(result, Err(DeadlineExceeded));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let elapsed = Instant::now() - start;
        assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_success_before_deadline() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let start = Instant::now();

        let result: Result<(), DeadlineExceeded> = shutdown_with_timeout(
            start + Duration::from_secs(30),
            async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(())
            },
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let elapsed = Instant::now() - start;
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    }

    #[derive(Debug, PartialEq)]
    enum DrainError {
        Failed,
        Timeout,
    }

    impl From<DeadlineExceeded> for DrainError {
        fn from(_: DeadlineExceeded) -> Self {
            Self::Timeout
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_error_is_returned() {
        let result = shutdown_with_timeout(
            Instant::now() + Duration::from_secs(1),
            async { Err(DrainError::Failed) },
            || panic!("forceful must not run"),
        )
        .await;
        assert_eq!(result, Err(DrainError::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_error_from_deadline() {
        let result: Result<(), DrainError> = shutdown_with_timeout(
            Instant::now() + Duration::from_millis(100),
            std::future::pending(),
            || {},
        )
        .await;
        assert_eq!(result, Err(DrainError::Timeout));
    }

    #[test]
    fn test_connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        let a = tracker.acquire();
        let b = tracker.acquire();
        assert_eq!(tracker.active_connections(), 2);

        drop(a);
        assert_eq!(tracker.active_connections(), 1);
        drop(b);
        assert_eq!(tracker.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_connection_tracker_wait_immediate() {
        let tracker = ConnectionTracker::new();
        tokio::time::timeout(Duration::from_millis(10), tracker.wait_for_shutdown())
            .await
            .expect("no connections means nothing to wait for");
    }

    #[tokio::test]
    async fn test_connection_tracker_wait_delayed() {
        let tracker = ConnectionTracker::new();
        let token = tracker.acquire();

        let waiter = tracker.clone();
        let wait = tokio::spawn(async move { waiter.wait_for_shutdown().await });

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(token);
        });

        tokio::time::timeout(Duration::from_secs(1), wait)
            .await
            .expect("wait should complete")
            .expect("task should not panic");
    }
}
