//! Request logging stage.
//!
//! Emits one event per request once the response is known: `info` below
//! 400, `warn` for 4xx and `error` for 5xx. Request headers are logged at
//! `debug`, except the omitted ones.

use std::collections::HashSet;

use http::{HeaderMap, HeaderName, StatusCode};
use kairos_core::{BoxFuture, Request, RequestContext, Response};

use crate::middleware::{Middleware, Next};

/// Headers never written by the request log by default.
pub const DEFAULT_OMIT_HEADERS: &[&str] = &["authorization", "cookie", "proxy-authorization"];

/// Logs every request with its route, status and duration.
#[derive(Debug, Clone)]
pub struct LoggingMiddleware {
    omit: HashSet<HeaderName>,
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new(
            DEFAULT_OMIT_HEADERS
                .iter()
                .copied()
                .map(HeaderName::from_static),
        )
    }
}

impl LoggingMiddleware {
    /// Creates the stage, never logging the `omit` headers.
    pub fn new(omit: impl IntoIterator<Item = HeaderName>) -> Self {
        Self {
            omit: omit.into_iter().collect(),
        }
    }

    fn visible_headers(&self, headers: &HeaderMap) -> Vec<String> {
        headers
            .iter()
            .filter(|(name, _)| !self.omit.contains(*name))
            .map(|(name, value)| format!("{name}: {}", value.to_str().unwrap_or("<binary>")))
            .collect()
    }
}

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                parent: ctx.span(),
                method = %request.method(),
                path = %request.uri().path(),
                headers = ?self.visible_headers(request.headers()),
                "request received"
            );
        }

        Box::pin(async move {
            let response = next.run(ctx, request).await;
            log_completion(ctx, response.status());
            response
        })
    }
}

fn log_completion(ctx: &RequestContext, status: StatusCode) {
    let duration_ms = ctx.elapsed().as_secs_f64() * 1000.0;
    let correlation_id = ctx.correlation_id().map(ToString::to_string);
    let span = ctx.span();

    macro_rules! emit {
        ($level:ident) => {
            tracing::$level!(
                parent: span,
                correlation_id = correlation_id.as_deref().unwrap_or_default(),
                method = %ctx.method(),
                route = ctx.trace_label(),
                status = status.as_u16(),
                duration_ms,
                "request completed"
            )
        };
    }

    if status.is_server_error() {
        emit!(error);
    } else if status.is_client_error() {
        emit!(warn);
    } else {
        emit!(info);
    }
}
