//! Listener abstraction and lifecycle state.
//!
//! Every protocol (HTTP, HTTPS, gRPC, metrics) implements the same two-step
//! contract so the [`Supervisor`](crate::Supervisor) can drive them all
//! through one state machine:
//!
//! ```text
//! Unstarted --bind ok--> Running --signal--> ShuttingDown --drained/forced--> Stopped
//!     |                                                                          ^
//!     +------------------------------bind failed--------------------------------+
//! ```
//!
//! [`Listener::bind`] moves a listener out of `Unstarted`. The returned
//! [`BoundListener`] accepts traffic until the shutdown signal fires and then
//! hands back a [`Drain`]: a graceful action plus a forceful fallback, which
//! the supervisor runs under the shared deadline.

use std::fmt;
use std::net::SocketAddr;

use kairos_core::BoxFuture;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{ServerError, ServerResult};
use crate::shutdown::{shutdown_with_timeout, ShutdownSignal};

/// Protocol served by a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    Https,
    /// gRPC.
    Grpc,
    /// Dedicated Prometheus metrics port.
    Metrics,
}

impl ListenerKind {
    /// Lowercase name used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Grpc => "grpc",
            Self::Metrics => "metrics",
        }
    }
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of one listener. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ListenerState {
    /// Not bound yet.
    Unstarted,
    /// Bound and accepting.
    Running,
    /// No longer accepting; draining in-flight work.
    ShuttingDown,
    /// Finished, gracefully or not.
    Stopped,
}

/// Snapshot published on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerStatus {
    /// Current state.
    pub state: ListenerState,
    /// Bound address, known from `Running` on.
    pub local_addr: Option<SocketAddr>,
}

/// Write side of a listener's state.
#[derive(Debug)]
pub struct ListenerControl {
    kind: ListenerKind,
    tx: watch::Sender<ListenerStatus>,
}

impl ListenerControl {
    /// Creates a control in the `Unstarted` state.
    #[must_use]
    pub fn new(kind: ListenerKind) -> Self {
        let (tx, _) = watch::channel(ListenerStatus {
            state: ListenerState::Unstarted,
            local_addr: None,
        });
        Self { kind, tx }
    }

    /// Listener protocol.
    #[must_use]
    pub const fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ListenerState {
        self.tx.borrow().state
    }

    /// Read side for observers.
    #[must_use]
    pub fn handle(&self) -> ListenerHandle {
        ListenerHandle {
            kind: self.kind,
            rx: self.tx.subscribe(),
        }
    }

    /// Moves to `Running` and records the bound address.
    pub fn running(&self, addr: SocketAddr) -> bool {
        self.tx.send_if_modified(|status| {
            if status.state >= ListenerState::Running {
                return false;
            }
            status.state = ListenerState::Running;
            status.local_addr = Some(addr);
            true
        })
    }

    /// Moves forward to `next`. Returns `false` if that would go backwards
    /// or skip `Running` on the way to `ShuttingDown`.
    pub fn advance(&self, next: ListenerState) -> bool {
        self.tx.send_if_modified(|status| {
            let allowed = match (status.state, next) {
                (current, next) if next <= current => false,
                (ListenerState::Unstarted, ListenerState::ShuttingDown) => false,
                (_, ListenerState::Running) => false,
                _ => true,
            };
            if allowed {
                status.state = next;
            }
            allowed
        })
    }
}

/// Read side of a listener's state.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    kind: ListenerKind,
    rx: watch::Receiver<ListenerStatus>,
}

impl ListenerHandle {
    /// Listener protocol.
    #[must_use]
    pub const fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ListenerState {
        self.rx.borrow().state
    }

    /// Bound address, once running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.rx.borrow().local_addr
    }

    /// Waits until the listener reaches `state` or a later one.
    pub async fn wait_for(&mut self, state: ListenerState) -> ListenerStatus {
        let result = self
            .rx
            .wait_for(|status| status.state >= state)
            .await
            .map(|status| *status);
        match result {
            Ok(status) => status,
            // Control dropped: whatever was last published is final.
            Err(_) => *self.rx.borrow(),
        }
    }

    /// Waits for startup to resolve.
    ///
    /// Returns the bound address, or `None` if the listener stopped
    /// without ever accepting.
    pub async fn ready(&mut self) -> Option<SocketAddr> {
        self.wait_for(ListenerState::Running).await.local_addr
    }
}

/// A listener that has not bound its socket yet.
pub trait Listener: Send + 'static {
    /// Protocol served.
    fn kind(&self) -> ListenerKind;

    /// Binds the socket and loads anything needed to accept traffic.
    fn bind(self: Box<Self>) -> BoxFuture<'static, ServerResult<Box<dyn BoundListener>>>;
}

/// A bound listener.
pub trait BoundListener: Send + 'static {
    /// Address actually bound.
    fn local_addr(&self) -> SocketAddr;

    /// Accepts until `shutdown` fires, then returns how to drain.
    ///
    /// An error here means the listener failed while running.
    fn serve(self: Box<Self>, shutdown: ShutdownSignal) -> BoxFuture<'static, ServerResult<Drain>>;
}

/// Graceful and forceful ways to finish a listener.
pub struct Drain {
    graceful: BoxFuture<'static, ServerResult<()>>,
    forceful: Box<dyn FnOnce() + Send>,
}

impl Drain {
    /// Pairs a graceful drain with its forceful fallback.
    pub fn new<G, F>(graceful: G, forceful: F) -> Self
    where
        G: std::future::Future<Output = ServerResult<()>> + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        Self {
            graceful: Box::pin(graceful),
            forceful: Box::new(forceful),
        }
    }

    /// Nothing left to drain.
    #[must_use]
    pub fn done() -> Self {
        Self::new(async { Ok(()) }, || {})
    }

    /// Runs the graceful action, forcing at `deadline`.
    pub async fn run(self, deadline: Instant) -> ServerResult<()> {
        shutdown_with_timeout::<_, _, ServerError>(deadline, self.graceful, self.forceful).await
    }
}

impl fmt::Debug for Drain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drain").finish_non_exhaustive()
    }
}
