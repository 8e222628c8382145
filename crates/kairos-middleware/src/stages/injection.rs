//! Handler context construction. Always the innermost stage.

use std::sync::Arc;

use kairos_core::{BoxFuture, Container, Request, RequestContext, Response};

use crate::middleware::{Middleware, Next};

/// Builds the handler-facing [`kairos_core::Context`] from everything the
/// earlier stages recorded.
#[derive(Debug, Clone, Default)]
pub struct InjectionMiddleware {
    container: Arc<Container>,
}

impl InjectionMiddleware {
    /// Injects `container` into every request.
    #[must_use]
    pub const fn new(container: Arc<Container>) -> Self {
        Self { container }
    }
}

impl Middleware for InjectionMiddleware {
    fn name(&self) -> &'static str {
        "injection"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        ctx.inject(Arc::clone(&self.container));
        next.run(ctx, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{build, request, run};
    use http::{Method, StatusCode};
    use kairos_core::{response, CorrelationId};

    struct Greeting(&'static str);

    fn endpoint(ctx: &mut RequestContext, _req: Request) -> BoxFuture<'static, Response> {
        let context = ctx.context().cloned();
        Box::pin(async move {
            let Some(context) = context else {
                return response::empty(StatusCode::INTERNAL_SERVER_ERROR);
            };
            let greeting = context.resolve::<Greeting>().unwrap();
            response::text(
                StatusCode::OK,
                format!("{} {}", greeting.0, context.correlation_id()),
            )
        })
    }

    #[tokio::test]
    async fn test_context_available_to_endpoint() {
        let container = Container::new();
        container.register(Arc::new(Greeting("hello")));
        let stage = InjectionMiddleware::new(Arc::new(container));

        let req = build(request(Method::GET, "/"));
        let mut ctx = RequestContext::new();
        ctx.begin(&req);
        ctx.set_correlation_id(CorrelationId::parse("req-1").unwrap());
        let response = stage
            .process(&mut ctx, req, Next::endpoint(&endpoint))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(&body[..], b"hello req-1");
    }

    #[tokio::test]
    async fn test_correlation_id_generated_when_missing() {
        let (_, ctx) = run(
            &InjectionMiddleware::default(),
            endpoint_ignoring,
            build(request(Method::GET, "/")),
        )
        .await;
        assert!(ctx.correlation_id().is_some());
        assert!(ctx.context().is_some());
    }

    fn endpoint_ignoring(_: &mut RequestContext, _: Request) -> BoxFuture<'static, Response> {
        Box::pin(async { response::empty(StatusCode::NO_CONTENT) })
    }
}
