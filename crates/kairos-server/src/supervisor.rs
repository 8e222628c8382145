//! Listener supervisor.
//!
//! Runs every listener on its own task and drives it through the shared
//! lifecycle. The supervisor itself serves nothing: it waits for the
//! shutdown signal, then collects each listener's outcome.
//!
//! Shutdown is all-or-nothing. A fatal failure in one listener (a bind
//! error, or a crash while serving) triggers the global signal, and every
//! listener drains against the same deadline: the trigger instant plus the
//! grace period.

use std::time::Duration;

use futures_util::future::join_all;

use crate::error::{ServerError, ServerResult};
use crate::listener::{Listener, ListenerControl, ListenerHandle, ListenerKind, ListenerState};
use crate::shutdown::ShutdownSignal;

/// Owns the listeners of one process and their shared shutdown.
pub struct Supervisor {
    shutdown: ShutdownSignal,
    grace: Duration,
    os_signals: bool,
    listeners: Vec<(ListenerControl, Box<dyn Listener>)>,
}

impl Supervisor {
    /// Creates a supervisor with a fresh shutdown signal.
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self::with_signal(ShutdownSignal::new(), grace)
    }

    /// Creates a supervisor driven by an existing signal.
    #[must_use]
    pub fn with_signal(shutdown: ShutdownSignal, grace: Duration) -> Self {
        Self {
            shutdown,
            grace,
            os_signals: false,
            listeners: Vec::new(),
        }
    }

    /// Also trigger shutdown on SIGINT and SIGTERM.
    #[must_use]
    pub fn os_signals(mut self, enabled: bool) -> Self {
        self.os_signals = enabled;
        self
    }

    /// Adds a listener. Must be called before [`run`](Self::run).
    pub fn add<L: Listener>(&mut self, listener: L) -> ListenerHandle {
        self.add_boxed(Box::new(listener))
    }

    /// Adds a boxed listener.
    pub fn add_boxed(&mut self, listener: Box<dyn Listener>) -> ListenerHandle {
        let control = ListenerControl::new(listener.kind());
        let handle = control.handle();
        self.listeners.push((control, listener));
        handle
    }

    /// First listener of `kind`.
    #[must_use]
    pub fn handle(&self, kind: ListenerKind) -> Option<ListenerHandle> {
        self.listeners
            .iter()
            .find(|(control, _)| control.kind() == kind)
            .map(|(control, _)| control.handle())
    }

    /// Handles of every listener, in registration order.
    #[must_use]
    pub fn handles(&self) -> Vec<ListenerHandle> {
        self.listeners.iter().map(|(control, _)| control.handle()).collect()
    }

    /// The signal that stops this supervisor.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Grace period shared by all listeners.
    #[must_use]
    pub const fn grace(&self) -> Duration {
        self.grace
    }

    /// Starts every listener and waits until all of them have stopped.
    ///
    /// Returns `Ok(())` only if every listener started and drained in time.
    /// Otherwise the most significant failure is returned: a bind error
    /// first, then a TLS setup error, then [`ServerError::ShutdownTimeout`].
    pub async fn run(self) -> ServerResult<()> {
        let Self {
            shutdown,
            grace,
            os_signals,
            listeners,
        } = self;

        if os_signals {
            shutdown.listen_os_signals();
        }

        let mut kinds = Vec::with_capacity(listeners.len());
        let mut handles = Vec::with_capacity(listeners.len());
        let mut tasks = Vec::with_capacity(listeners.len());
        for (control, listener) in listeners {
            kinds.push(control.kind());
            handles.push(control.handle());
            tasks.push(tokio::spawn(drive(control, listener, shutdown.clone(), grace)));
        }

        tokio::select! {
            () = shutdown.recv() => {
                tracing::info!(grace_period = ?grace, "shutting down listeners");
            }
            () = all_stopped(handles) => {
                tracing::warn!("every listener stopped without a shutdown signal");
                shutdown.trigger();
            }
        }

        let mut failure: Option<ServerError> = None;
        for (kind, joined) in kinds.into_iter().zip(join_all(tasks).await) {
            let err = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(join) => ServerError::Serve {
                    listener: kind,
                    message: format!("listener task failed: {join}"),
                },
            };
            failure = match failure {
                Some(current) if current.rank() <= err.rank() => Some(current),
                _ => Some(err),
            };
        }

        match failure {
            Some(err) => Err(err),
            None => {
                tracing::info!("all listeners stopped gracefully");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<_> = self.listeners.iter().map(|(c, _)| c.kind()).collect();
        f.debug_struct("Supervisor")
            .field("grace", &self.grace)
            .field("listeners", &kinds)
            .finish_non_exhaustive()
    }
}

async fn all_stopped(handles: Vec<ListenerHandle>) {
    for mut handle in handles {
        handle.wait_for(ListenerState::Stopped).await;
    }
}

/// Moves one listener through its lifecycle.
async fn drive(
    control: ListenerControl,
    listener: Box<dyn Listener>,
    shutdown: ShutdownSignal,
    grace: Duration,
) -> ServerResult<()> {
    let kind = control.kind();

    let bound = match listener.bind().await {
        Ok(bound) => bound,
        Err(err) => {
            control.advance(ListenerState::Stopped);
            tracing::error!(listener = %kind, error = %err, "listener failed to start");
            if err.is_fatal() {
                shutdown.trigger();
            }
            return Err(err);
        }
    };

    let addr = bound.local_addr();
    control.running(addr);
    tracing::info!(listener = %kind, %addr, "listener started");

    let served = bound.serve(shutdown.clone()).await;
    control.advance(ListenerState::ShuttingDown);

    let result = match served {
        Ok(drain) => drain.run(shutdown.deadline(grace)).await,
        Err(err) => {
            tracing::error!(listener = %kind, error = %err, "listener failed while serving");
            shutdown.trigger();
            Err(err)
        }
    };
    control.advance(ListenerState::Stopped);

    match &result {
        Ok(()) => tracing::info!(listener = %kind, "listener stopped"),
        Err(ServerError::ShutdownTimeout(_)) => {
            tracing::warn!(listener = %kind, grace_period = ?grace, "listener forced to stop");
        }
        Err(_) => {}
    }
    result
}
