//! Built-in stages.
//!
//! [`crate::stack::standard_pipeline`] registers them in this order:
//!
//! 1. [`upgrade`] - connection upgrade detection
//! 2. [`capabilities`] - flush/push detection
//! 3. [`propagation`] - correlation id and header propagation
//! 4. [`trace_label`] - path normalization for labels
//! 5. [`tracing`] - server span
//! 6. [`cors`] - preflight and response headers
//! 7. [`logging`] - request log
//! 8. [`metrics`] - request counters and latency
//! 9. [`validation`] - required headers (optional)
//! 10. [`recovery`] - panic containment
//! 11. user middleware
//! 12. [`injection`] - handler context construction

pub mod capabilities;
pub mod cors;
pub mod injection;
pub mod logging;
pub mod metrics;
pub mod propagation;
pub mod recovery;
pub mod trace_label;
pub mod tracing;
pub mod upgrade;
pub mod validation;

pub use capabilities::CapabilitiesMiddleware;
pub use cors::{AllowedOrigins, CorsBuilder, CorsConfig, CorsMiddleware};
pub use injection::InjectionMiddleware;
pub use logging::LoggingMiddleware;
pub use metrics::MetricsMiddleware;
pub use propagation::PropagationMiddleware;
pub use recovery::{catch_panic, PanicReport, RecoveryMiddleware};
pub use trace_label::{TraceLabelMiddleware, TraceLabeler};
pub use tracing::TracingMiddleware;
pub use upgrade::UpgradeMiddleware;
pub use validation::HeaderValidationMiddleware;

/// Paths served by the runtime itself.
///
/// They never become trace-label candidates and are exempt from header
/// validation.
#[must_use]
pub fn is_reserved_path(path: &str) -> bool {
    path == "/metrics" || path.starts_with("/.well-known/")
}

#[cfg(test)]
pub(crate) mod test_support {
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Full;
    use kairos_core::{response, BoxFuture, Request, RequestContext, Response};

    use crate::middleware::{Middleware, Next};

    pub fn request(method: http::Method, path: &str) -> http::request::Builder {
        http::Request::builder().method(method).uri(path)
    }

    pub fn build(builder: http::request::Builder) -> Request {
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    pub fn ok(_ctx: &mut RequestContext, _req: Request) -> BoxFuture<'static, Response> {
        Box::pin(async { response::text(StatusCode::OK, "ok") })
    }

    /// Runs one stage in front of `endpoint` on a fresh context.
    pub async fn run<M, E>(stage: &M, endpoint: E, request: Request) -> (Response, RequestContext)
    where
        M: Middleware,
        E: crate::middleware::Endpoint,
    {
        let mut ctx = RequestContext::new();
        ctx.begin(&request);
        let response = stage.process(&mut ctx, request, Next::endpoint(&endpoint)).await;
        (response, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_paths() {
        assert!(is_reserved_path("/.well-known/health"));
        assert!(is_reserved_path("/.well-known/alive"));
        assert!(is_reserved_path("/metrics"));
        assert!(!is_reserved_path("/metrics/extra"));
        assert!(!is_reserved_path("/users/1"));
        assert!(!is_reserved_path("/.well-known"));
    }
}
