//! Flush and server-push capability detection.

use kairos_core::{BoxFuture, Capabilities, Request, RequestContext, Response};

use crate::middleware::{Middleware, Next};

/// Records which streaming capabilities the negotiated protocol offers.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilitiesMiddleware;

impl Middleware for CapabilitiesMiddleware {
    fn name(&self) -> &'static str {
        "capabilities"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        ctx.set_capabilities(Capabilities::for_version(request.version()));
        next.run(ctx, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{build, ok, request, run};
    use http::{Method, Version};

    #[tokio::test]
    async fn test_http2_can_push() {
        let req = build(request(Method::GET, "/").version(Version::HTTP_2));
        let (_, ctx) = run(&CapabilitiesMiddleware, ok, req).await;
        assert!(ctx.capabilities().flush);
        assert!(ctx.capabilities().push);
    }

    #[tokio::test]
    async fn test_http11_flush_only() {
        let req = build(request(Method::GET, "/").version(Version::HTTP_11));
        let (_, ctx) = run(&CapabilitiesMiddleware, ok, req).await;
        assert!(ctx.capabilities().flush);
        assert!(!ctx.capabilities().push);
    }

    #[tokio::test]
    async fn test_http10_has_neither() {
        let req = build(request(Method::GET, "/").version(Version::HTTP_10));
        let (_, ctx) = run(&CapabilitiesMiddleware, ok, req).await;
        assert_eq!(ctx.capabilities(), Capabilities::default());
    }
}
