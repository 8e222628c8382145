//! Connection upgrade detection.
//!
//! Records what the client asked to upgrade to. The hyper upgrade handle
//! stays in the request extensions, so a handler that accepts the upgrade
//! can still complete it.

use http::header::{CONNECTION, SEC_WEBSOCKET_KEY, UPGRADE};
use http::{HeaderMap, Method};
use kairos_core::{BoxFuture, Request, RequestContext, Response, Upgrade};

use crate::middleware::{Middleware, Next};

/// Detects `Connection: upgrade` requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpgradeMiddleware;

impl UpgradeMiddleware {
    /// Creates the stage.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Classifies an upgrade request, if it is one.
#[must_use]
pub fn detect(method: &Method, headers: &HeaderMap) -> Option<Upgrade> {
    let wants_upgrade = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if !wants_upgrade {
        return None;
    }

    let protocol = headers.get(UPGRADE)?.to_str().ok()?.trim();
    if protocol.is_empty() {
        return None;
    }

    if protocol.eq_ignore_ascii_case("websocket")
        && method == Method::GET
        && headers.contains_key(SEC_WEBSOCKET_KEY)
    {
        Some(Upgrade::WebSocket)
    } else {
        Some(Upgrade::Other(protocol.to_ascii_lowercase()))
    }
}

impl Middleware for UpgradeMiddleware {
    fn name(&self) -> &'static str {
        "upgrade"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        if let Some(upgrade) = detect(request.method(), request.headers()) {
            tracing::debug!(?upgrade, "upgrade requested");
            ctx.set_upgrade(upgrade);
        }
        next.run(ctx, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{build, ok, request, run};

    fn websocket_request() -> http::request::Builder {
        request(Method::GET, "/chat")
            .header(CONNECTION, "keep-alive, Upgrade")
            .header(UPGRADE, "websocket")
            .header(SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
    }

    #[tokio::test]
    async fn test_websocket_upgrade_detected() {
        let (_, ctx) = run(&UpgradeMiddleware, ok, build(websocket_request())).await;
        assert_eq!(ctx.upgrade(), Some(&Upgrade::WebSocket));
    }

    #[tokio::test]
    async fn test_plain_request_has_no_upgrade() {
        let (_, ctx) = run(&UpgradeMiddleware, ok, build(request(Method::GET, "/chat"))).await;
        assert!(ctx.upgrade().is_none());
    }

    #[test]
    fn test_websocket_without_key_is_other() {
        let req = build(
            request(Method::GET, "/chat")
                .header(CONNECTION, "upgrade")
                .header(UPGRADE, "WebSocket"),
        );
        assert_eq!(
            detect(req.method(), req.headers()),
            Some(Upgrade::Other("websocket".to_string()))
        );
    }

    #[test]
    fn test_other_protocol() {
        let req = build(
            request(Method::GET, "/")
                .header(CONNECTION, "Upgrade")
                .header(UPGRADE, "h2c"),
        );
        assert_eq!(
            detect(req.method(), req.headers()),
            Some(Upgrade::Other("h2c".to_string()))
        );
    }

    #[test]
    fn test_upgrade_header_without_connection_token() {
        let req = build(
            request(Method::GET, "/")
                .header(CONNECTION, "keep-alive")
                .header(UPGRADE, "websocket"),
        );
        assert_eq!(detect(req.method(), req.headers()), None);
    }
}
