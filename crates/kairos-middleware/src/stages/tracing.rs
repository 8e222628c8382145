//! Server span stage.
//!
//! Joins the caller's W3C trace (`traceparent`/`tracestate`) or starts a new
//! one, opens the request-scoped `http.request` span that handlers log
//! through, and returns `traceparent` on the response. The span is exported
//! over OTLP only when export is enabled.

use kairos_core::{BoxFuture, Request, RequestContext, Response, TraceInfo};
use kairos_telemetry::ServerSpan;
use opentelemetry::KeyValue;
use tracing::Instrument;

use crate::middleware::{Middleware, Next};

/// Opens the server span for each request.
#[derive(Debug, Clone)]
pub struct TracingMiddleware {
    service_name: String,
}

impl Default for TracingMiddleware {
    fn default() -> Self {
        Self::new("kairos")
    }
}

impl TracingMiddleware {
    /// Creates the stage for `service_name`.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

impl Middleware for TracingMiddleware {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        let method = request.method().clone();
        let route = ctx.trace_label().to_string();

        let server_span = ServerSpan::start(
            format!("{method} {route}"),
            request.headers(),
            vec![
                KeyValue::new("service.name", self.service_name.clone()),
                KeyValue::new("http.request.method", method.to_string()),
                KeyValue::new("url.path", request.uri().path().to_string()),
                KeyValue::new("http.route", route.clone()),
            ],
        );
        let identity = server_span.identity().clone();
        let trace_id = identity.trace_id.to_string();

        ctx.set_trace(TraceInfo {
            trace_id: trace_id.clone(),
            span_id: identity.span_id.to_string(),
            parent_span_id: identity.parent_span_id.map(|id| id.to_string()),
            sampled: identity.sampled,
        });

        let correlation_id = ctx
            .correlation_id()
            .map(ToString::to_string)
            .unwrap_or_default();
        let span = tracing::info_span!(
            "http.request",
            correlation_id = %correlation_id,
            trace_id = %trace_id,
            http.method = %method,
            http.route = %route,
            http.status_code = tracing::field::Empty,
        );
        ctx.set_span(span.clone());

        Box::pin(
            async move {
                let mut response = next.run(ctx, request).await;
                let status = response.status();
                tracing::Span::current().record("http.status_code", status.as_u16());

                identity.inject(response.headers_mut());
                let error = status
                    .is_server_error()
                    .then(|| status.canonical_reason().unwrap_or("server error").to_string());
                server_span.finish(
                    vec![KeyValue::new(
                        "http.response.status_code",
                        i64::from(status.as_u16()),
                    )],
                    error,
                );
                response
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{build, ok, request, run};
    use http::{Method, StatusCode};

    const PARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[tokio::test]
    async fn test_joins_incoming_trace() {
        let req = build(request(Method::GET, "/").header("traceparent", PARENT));
        let (response, ctx) = run(&TracingMiddleware::default(), ok, req).await;

        let trace = ctx.trace().unwrap();
        assert_eq!(trace.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(trace.parent_span_id.as_deref(), Some("00f067aa0ba902b7"));
        assert_ne!(trace.span_id, "00f067aa0ba902b7");
        assert_eq!(response.headers()["traceparent"], trace.traceparent().as_str());
    }

    #[tokio::test]
    async fn test_starts_new_trace_without_header() {
        let req = build(request(Method::GET, "/"));
        let (response, ctx) = run(&TracingMiddleware::default(), ok, req).await;

        let trace = ctx.trace().unwrap();
        assert_eq!(trace.trace_id.len(), 32);
        assert_eq!(trace.span_id.len(), 16);
        assert!(trace.parent_span_id.is_none());
        assert!(response.headers().contains_key("traceparent"));
    }

    #[tokio::test]
    async fn test_invalid_parent_starts_new_trace() {
        let req = build(request(Method::GET, "/").header("traceparent", "00-zz-zz-01"));
        let (_, ctx) = run(&TracingMiddleware::default(), ok, req).await;
        assert!(ctx.trace().unwrap().parent_span_id.is_none());
    }

    #[tokio::test]
    async fn test_response_passes_through() {
        let req = build(request(Method::GET, "/"));
        let (response, _) = run(&TracingMiddleware::default(), ok, req).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
