//! Router dispatch: the terminal of the HTTP pipeline.

use std::sync::Arc;

use http::header::ALLOW;
use http::{HeaderValue, Method};
use kairos_core::{
    response, BoxFuture, BoxedHandler, Container, ErrorCategory, Request, RequestContext, Response,
};
use kairos_middleware::Endpoint;
use kairos_router::{Resolution, Router};

/// Resolves the request against the route table and runs the handler.
///
/// Unresolved requests get the JSON error envelope: 405 with an `Allow`
/// header when another method matches the path, 404 otherwise. Handler
/// errors are rendered with their category's status.
pub struct Dispatcher {
    router: Arc<Router<BoxedHandler>>,
    container: Arc<Container>,
}

impl Dispatcher {
    /// Creates a dispatcher.
    ///
    /// `container` backs the handler context when no injection stage ran.
    #[must_use]
    pub fn new(router: Arc<Router<BoxedHandler>>, container: Arc<Container>) -> Self {
        Self { router, container }
    }

    /// Route table being served.
    #[must_use]
    pub fn router(&self) -> &Router<BoxedHandler> {
        &self.router
    }
}

impl Endpoint for Dispatcher {
    fn call(&self, ctx: &mut RequestContext, request: Request) -> BoxFuture<'static, Response> {
        let context = match ctx.context() {
            Some(context) => context.clone(),
            None => ctx.inject(Arc::clone(&self.container)),
        };

        match self.router.resolve(request.method(), request.uri().path()) {
            Resolution::Matched(found) => {
                let handler = Arc::clone(found.value);
                let context = context.with_params(found.params);
                Box::pin(async move {
                    match handler.call(context.clone(), request).await {
                        Ok(response) => response,
                        Err(err) => {
                            let status = err.status_code();
                            if status.is_server_error() {
                                tracing::error!(
                                    parent: context.span(),
                                    correlation_id = %context.correlation_id(),
                                    error = ?err,
                                    "handler failed"
                                );
                            } else {
                                tracing::debug!(
                                    parent: context.span(),
                                    correlation_id = %context.correlation_id(),
                                    error = %err,
                                    "handler rejected request"
                                );
                            }
                            response::from_error(&err)
                        }
                    }
                })
            }
            Resolution::WrongMethod { allowed } => {
                let response = method_not_allowed(request.method(), &allowed);
                Box::pin(async move { response })
            }
            Resolution::NotFound => {
                let message = format!("no route for {}", request.uri().path());
                let response = response::category_error(ErrorCategory::NotFound, &message);
                Box::pin(async move { response })
            }
        }
    }
}

fn method_not_allowed(method: &Method, allowed: &[Method]) -> Response {
    let list = allowed
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let message = format!("method {method} not allowed");
    let mut response = response::category_error(ErrorCategory::MethodNotAllowed, &message);
    if let Ok(value) = HeaderValue::from_str(&list) {
        response.headers_mut().insert(ALLOW, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::{BodyExt, Full};
    use kairos_core::{handler_fn, HandlerError};

    fn dispatcher() -> Dispatcher {
        let mut router: Router<BoxedHandler> = Router::new();
        router
            .route(
                Method::GET,
                "/dummy",
                handler_fn(|_ctx, _req| async move { Ok(response::text(StatusCode::OK, "dummy")) }),
            )
            .unwrap();
        router
            .route(
                Method::GET,
                "/users/{id}",
                handler_fn(|ctx, _req| async move {
                    let id = ctx.param("id").unwrap_or_default().to_string();
                    Ok(response::text(StatusCode::OK, id))
                }),
            )
            .unwrap();
        router
            .route(
                Method::DELETE,
                "/users/{id}",
                handler_fn(|_ctx, _req| async move {
                    Err(HandlerError::Forbidden("read only".into()))
                }),
            )
            .unwrap();
        Dispatcher::new(Arc::new(router), Arc::new(Container::new()))
    }

    async fn call(dispatcher: &Dispatcher, method: Method, path: &str) -> Response {
        let request = http::Request::builder()
            .method(method)
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap();
        let mut ctx = RequestContext::new();
        ctx.begin(&request);
        dispatcher.call(&mut ctx, request).await
    }

    async fn body(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_not_found_vs_method_not_allowed() {
        let dispatcher = dispatcher();

        let missing = call(&dispatcher, Method::GET, "/dummy1").await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert!(body(missing).await.contains("\"code\":\"not_found\""));

        let wrong = call(&dispatcher, Method::POST, "/dummy").await;
        assert_eq!(wrong.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(wrong.headers()[ALLOW], "GET");

        let ok = call(&dispatcher, Method::GET, "/dummy").await;
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(body(ok).await, "dummy");
    }

    #[tokio::test]
    async fn test_params_reach_handler() {
        let response = call(&dispatcher(), Method::GET, "/users/123").await;
        assert_eq!(body(response).await, "123");
    }

    #[tokio::test]
    async fn test_allow_lists_every_method() {
        let response = call(&dispatcher(), Method::PUT, "/users/7").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let allow = response.headers()[ALLOW].to_str().unwrap().to_string();
        assert!(allow.contains("GET"));
        assert!(allow.contains("DELETE"));
    }

    #[tokio::test]
    async fn test_handler_error_rendered() {
        let response = call(&dispatcher(), Method::DELETE, "/users/7").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(body(response).await.contains("read only"));
    }
}
