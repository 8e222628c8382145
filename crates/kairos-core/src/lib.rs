//! # Kairos Core
//!
//! Request-scoped building blocks shared by every Kairos crate:
//!
//! - [`RequestContext`] - mutable per-request record written by middleware
//! - [`ContextPool`] - allocation-amortizing pool of request contexts
//! - [`Context`] - read-only view handed to handlers
//! - [`Handler`] - the handler trait, implemented for async closures
//! - [`Container`] - type-keyed dependency container
//! - [`HandlerError`] / [`ErrorCategory`] - request-level error taxonomy

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod di;
pub mod error;
pub mod handler;
pub mod pool;
pub mod response;

pub use context::{
    Capabilities, Context, CorrelationId, RemoteAddr, RequestContext, RequestDeadline, TraceInfo,
    Upgrade,
};
pub use di::{Container, InjectContainer, InjectionError};
pub use error::{ErrorCategory, HandlerError, HandlerResult};
pub use handler::{handler_fn, BoxFuture, BoxedHandler, Handler, Request, Response};
pub use kairos_router::Params;
pub use pool::{ContextPool, PoolStats, PooledContext};
