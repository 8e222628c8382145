//! # Kairos Middleware
//!
//! Ordered request pipeline for the Kairos runtime.
//!
//! A [`Pipeline`] is an ordered list of [`Middleware`] stages composed around
//! an [`Endpoint`] (normally the router dispatcher). [`Pipeline::use_middleware`]
//! appends a stage; [`Pipeline::wrap`] consumes the pipeline and returns the
//! composed handler, so the order is fixed before any request is served.
//!
//! ## Standard order
//!
//! [`standard_pipeline`] registers the built-in [`stages`] outer to inner:
//!
//! ```text
//! upgrade → capabilities → propagation → trace_label → tracing → cors
//!   → logging → metrics → [header_validation] → recovery → user… → injection
//!                                                                   ↓
//!                                                               endpoint
//! ```
//!
//! Each request runs on a [`RequestContext`](kairos_core::RequestContext)
//! taken from a [`ContextPool`](kairos_core::ContextPool) and returned on
//! every exit path.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod middleware;
pub mod pipeline;
pub mod stack;
pub mod stages;

pub use middleware::{from_fn, BoxedMiddleware, Endpoint, FnMiddleware, Middleware, Next};
pub use pipeline::{Pipeline, Wrapped};
pub use stack::{standard_pipeline, StackConfig};
pub use stages::{
    catch_panic, is_reserved_path, AllowedOrigins, CapabilitiesMiddleware, CorsBuilder, CorsConfig,
    CorsMiddleware, HeaderValidationMiddleware, InjectionMiddleware, LoggingMiddleware,
    MetricsMiddleware, PanicReport, PropagationMiddleware, RecoveryMiddleware, TraceLabelMiddleware,
    TraceLabeler, TracingMiddleware, UpgradeMiddleware,
};
