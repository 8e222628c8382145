//! Correlation id assignment and header propagation.
//!
//! The correlation id comes from `X-Correlation-ID` when the caller sent a
//! usable one and is generated otherwise. It is echoed on every response.
//! Configured headers are copied onto the context so handlers can forward
//! them on outbound calls.

use http::{HeaderName, HeaderValue};
use kairos_core::{BoxFuture, CorrelationId, Request, RequestContext, Response};

use crate::middleware::{Middleware, Next};

/// Correlation id header.
pub const CORRELATION_ID_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

/// Default set of propagated headers.
pub const DEFAULT_PROPAGATE_HEADERS: &[&str] = &[
    "x-correlation-id",
    "traceparent",
    "tracestate",
    "x-b3-traceid",
];

/// Assigns the correlation id and captures propagated headers.
#[derive(Debug, Clone)]
pub struct PropagationMiddleware {
    headers: Vec<HeaderName>,
}

impl Default for PropagationMiddleware {
    fn default() -> Self {
        Self::new(
            DEFAULT_PROPAGATE_HEADERS
                .iter()
                .copied()
                .map(HeaderName::from_static)
                .collect(),
        )
    }
}

impl PropagationMiddleware {
    /// Propagates the given headers.
    #[must_use]
    pub const fn new(headers: Vec<HeaderName>) -> Self {
        Self { headers }
    }

    /// Headers copied onto each context.
    #[must_use]
    pub fn headers(&self) -> &[HeaderName] {
        &self.headers
    }
}

impl Middleware for PropagationMiddleware {
    fn name(&self) -> &'static str {
        "propagation"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        let incoming = request
            .headers()
            .get(&CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(CorrelationId::parse);
        let correlation_id = incoming.unwrap_or_else(CorrelationId::generate);

        for name in &self.headers {
            for value in request.headers().get_all(name) {
                ctx.propagated_headers_mut().append(name.clone(), value.clone());
            }
        }
        // The forwarded id is the effective one, generated or not.
        if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
            ctx.propagated_headers_mut()
                .insert(CORRELATION_ID_HEADER, value);
        }
        ctx.set_correlation_id(correlation_id.clone());

        Box::pin(async move {
            let mut response = next.run(ctx, request).await;
            if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
                response.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{build, ok, request, run};
    use http::Method;

    #[tokio::test]
    async fn test_incoming_id_is_kept_and_echoed() {
        let req = build(request(Method::GET, "/").header("x-correlation-id", "abc-123"));
        let (response, ctx) = run(&PropagationMiddleware::default(), ok, req).await;

        assert_eq!(ctx.correlation_id().unwrap().as_str(), "abc-123");
        assert_eq!(response.headers()["x-correlation-id"], "abc-123");
    }

    #[tokio::test]
    async fn test_missing_id_is_generated() {
        let req = build(request(Method::GET, "/"));
        let (response, ctx) = run(&PropagationMiddleware::default(), ok, req).await;

        let id = ctx.correlation_id().unwrap().as_str().to_string();
        assert!(uuid_like(&id));
        assert_eq!(response.headers()["x-correlation-id"], id.as_str());
        assert_eq!(ctx.propagated_headers()["x-correlation-id"], id.as_str());
    }

    #[tokio::test]
    async fn test_oversized_id_is_replaced() {
        let long = "a".repeat(129);
        let req = build(request(Method::GET, "/").header("x-correlation-id", long.as_str()));
        let (_, ctx) = run(&PropagationMiddleware::default(), ok, req).await;
        assert_ne!(ctx.correlation_id().unwrap().as_str(), long);
    }

    #[tokio::test]
    async fn test_configured_headers_are_captured() {
        let stage = PropagationMiddleware::new(vec![HeaderName::from_static("x-tenant")]);
        let req = build(
            request(Method::GET, "/")
                .header("x-tenant", "acme")
                .header("x-other", "ignored"),
        );
        let (_, ctx) = run(&stage, ok, req).await;

        assert_eq!(ctx.propagated_headers()["x-tenant"], "acme");
        assert!(ctx.propagated_headers().get("x-other").is_none());
    }

    fn uuid_like(value: &str) -> bool {
        value.len() == 36 && value.chars().filter(|c| *c == '-').count() == 4
    }
}
