//! # Kairos
//!
//! **Multi-protocol application server runtime**
//!
//! One process serves plain HTTP, optional HTTPS, an optional dedicated
//! Prometheus port and optional gRPC. Every listener starts, fails and drains
//! under a single supervisor:
//!
//! - 🚦 **One lifecycle**: a bind failure stops everything, a TLS failure only
//!   its own listener, and shutdown shares one grace deadline
//! - 🧱 **Fixed middleware order**: tracing, CORS, logging, metrics and panic
//!   recovery always run before user stages
//! - 🌲 **Radix routing**: `{name}` parameters, 404 vs 405 with `Allow`
//! - ♻️ **Pooled request contexts** reset between requests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kairos::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut app = App::load("./configs")?;
//!     app.http().get("/users/{id}", |ctx, _req| async move {
//!         let id = ctx.param("id").unwrap_or_default().to_string();
//!         Ok(response::text(StatusCode::OK, id))
//!     })?;
//!     app.run().await
//! }
//! ```
//!
//! ## Request path
//!
//! ```text
//! listener → upgrade → capabilities → propagation → trace_label → tracing
//!          → cors → logging → metrics → [header_validation] → recovery
//!          → user stages → injection → router → handler
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod app;

pub use app::App;

pub use kairos_config as config;
pub use kairos_core as core;
pub use kairos_grpc as grpc;
pub use kairos_middleware as middleware;
pub use kairos_router as router;
pub use kairos_server as server;
pub use kairos_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// ```rust
/// use kairos::prelude::*;
/// ```
pub mod prelude {
    pub use crate::App;

    pub use http::{Method, StatusCode};

    pub use kairos_config::{Config, ConfigExt, ConfigLoader, MapConfig};

    pub use kairos_core::{
        handler_fn, response, Container, Context, CorrelationId, ErrorCategory, HandlerError,
        HandlerResult, InjectContainer, InjectionError, Request, Response,
    };

    pub use kairos_middleware::{from_fn, Middleware, Next};

    pub use kairos_grpc::{GrpcConfig, GrpcError, GrpcServer};

    pub use kairos_server::{
        ListenerKind, ListenerState, Server, ServerConfig, ServerError, ShutdownSignal, Supervisor,
    };

    pub use kairos_telemetry::TelemetryConfig;
}
