//! Server error types.

use std::io;
use std::net::SocketAddr;

use kairos_config::ConfigError;
use kairos_router::RouteError;
use thiserror::Error;

use crate::listener::ListenerKind;
use crate::shutdown::DeadlineExceeded;

/// Result alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors surfaced by listeners and the supervisor.
///
/// Only listener-level failures appear here. Handler errors and panics are
/// contained by the pipeline and never reach the supervisor.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not bind its socket. Never retried.
    #[error("{listener} listener failed to bind {addr}: {source}")]
    Bind {
        /// Listener that failed.
        listener: ListenerKind,
        /// Address it tried to bind.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// TLS material was missing or unusable. Fatal for that listener only.
    #[error("{listener} listener TLS setup failed: {message}")]
    Tls {
        /// Listener that failed.
        listener: ListenerKind,
        /// What went wrong.
        message: String,
    },

    /// A listener did not drain before the shutdown deadline.
    #[error(transparent)]
    ShutdownTimeout(#[from] DeadlineExceeded),

    /// A serving listener failed after startup.
    #[error("{listener} listener failed: {message}")]
    Serve {
        /// Listener that failed.
        listener: ListenerKind,
        /// What went wrong.
        message: String,
    },

    /// I/O error outside of binding.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A route could not be registered.
    #[error(transparent)]
    Route(#[from] RouteError),
}

impl ServerError {
    /// Returns `true` for failures that should bring every listener down.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Bind { .. } | Self::Serve { .. } | Self::Io(_))
    }

    /// Reporting precedence used when several listeners fail.
    pub(crate) const fn rank(&self) -> u8 {
        match self {
            Self::Bind { .. } => 0,
            Self::Tls { .. } => 1,
            Self::ShutdownTimeout(_) => 2,
            _ => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_display() {
        let err = ServerError::Bind {
            listener: ListenerKind::Http,
            addr: "127.0.0.1:8000".parse().unwrap(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
        };
        let text = err.to_string();
        assert!(text.contains("http"));
        assert!(text.contains("127.0.0.1:8000"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_deadline_converts() {
        let err: ServerError = DeadlineExceeded.into();
        assert!(matches!(err, ServerError::ShutdownTimeout(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_tls_is_listener_local() {
        let err = ServerError::Tls {
            listener: ListenerKind::Https,
            message: "no certificate".into(),
        };
        assert!(!err.is_fatal());
        assert!(err.rank() > 0);
    }
}
