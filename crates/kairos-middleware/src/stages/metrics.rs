//! Request metrics stage.

use kairos_core::{BoxFuture, Request, RequestContext, Response};
use kairos_telemetry::metrics::record_http_request;
use kairos_telemetry::InFlightGuard;

use crate::middleware::{Middleware, Next};

/// Counts requests and records latency, labelled by the trace label.
///
/// The in-flight gauge is held by a guard, so it is decremented even when
/// the request future is dropped or unwinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsMiddleware;

impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let _in_flight = InFlightGuard::new();
            let response = next.run(ctx, request).await;
            record_http_request(
                ctx.method().as_str(),
                ctx.trace_label(),
                response.status().as_u16(),
                ctx.elapsed(),
            );
            response
        })
    }
}
