//! # Kairos Server
//!
//! Listeners and lifecycle for the Kairos runtime.
//!
//! - HTTP/1.1 and HTTP/2 on one port via Hyper, optionally over TLS
//! - A dedicated or shared Prometheus `/metrics` endpoint
//! - Reserved health, heartbeat and documentation routes
//! - A [`Supervisor`] that starts every listener, propagates failures and
//!   drains all of them against one shutdown deadline
//!
//! ## Example
//!
//! ```rust,no_run
//! use http::StatusCode;
//! use kairos_core::response;
//! use kairos_server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), kairos_server::ServerError> {
//!     let mut server = Server::new(ServerConfig::default());
//!     server.get("/ping", |_ctx, _req| async {
//!         Ok(response::text(StatusCode::OK, "pong"))
//!     })?;
//!     server.run().await
//! }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod http_listener;
pub mod listener;
pub mod reserved;
pub mod server;
pub mod shutdown;
pub mod supervisor;
pub mod tls;

pub use config::{MetricsPlacement, ServerConfig, ServerConfigBuilder, TlsSettings};
pub use dispatch::Dispatcher;
pub use error::{ServerError, ServerResult};
pub use health::{HealthCheck, HealthStatus, Heartbeat};
pub use http_listener::{HttpListener, HttpService};
pub use listener::{
    BoundListener, Drain, Listener, ListenerHandle, ListenerKind, ListenerState, ListenerStatus,
};
pub use server::Server;
pub use shutdown::{
    shutdown_with_timeout, ConnectionToken, ConnectionTracker, DeadlineExceeded, ShutdownSignal,
};
pub use supervisor::Supervisor;
