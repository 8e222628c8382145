//! Pipeline composition.
//!
//! Stages run in registration order on the way in and in reverse order on
//! the way out. Registration happens on an owned [`Pipeline`] before
//! [`Pipeline::wrap`] consumes it, so the chain cannot change once a
//! listener holds the wrapped handler.

use std::sync::Arc;

use kairos_core::{BoxFuture, ContextPool, Request, Response};
use kairos_telemetry::metrics::record_pool_acquire;

use crate::middleware::{BoxedMiddleware, Endpoint, Middleware, Next};

/// Ordered list of middleware under construction.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<BoxedMiddleware>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage after every stage registered so far.
    pub fn use_middleware<M: Middleware>(&mut self, middleware: M) -> &mut Self {
        self.stages.push(Arc::new(middleware));
        self
    }

    /// Appends an already shared stage.
    pub fn use_boxed(&mut self, middleware: BoxedMiddleware) -> &mut Self {
        self.stages.push(middleware);
        self
    }

    /// Names of the registered stages, outermost first.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Number of registered stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if no stage is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Composes the stages around `endpoint`.
    ///
    /// Every request handled by the result runs on its own context taken
    /// from `pool`, released when the response future completes or is
    /// dropped.
    #[must_use]
    pub fn wrap<E: Endpoint>(self, endpoint: E, pool: Arc<ContextPool>) -> Wrapped {
        Wrapped {
            inner: Arc::new(Inner {
                stages: self.stages,
                endpoint: Box::new(endpoint),
                pool,
            }),
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

struct Inner {
    stages: Vec<BoxedMiddleware>,
    endpoint: Box<dyn Endpoint>,
    pool: Arc<ContextPool>,
}

/// Fully composed request handler.
#[derive(Clone)]
pub struct Wrapped {
    inner: Arc<Inner>,
}

impl Wrapped {
    /// Runs one request through the chain.
    pub fn handle(&self, request: Request) -> BoxFuture<'static, Response> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let mut ctx = inner.pool.acquire();
            record_pool_acquire(ctx.was_reused());
            ctx.begin(&request);

            Next::new(&inner.stages, inner.endpoint.as_ref())
                .run(&mut ctx, request)
                .await
        })
    }

    /// Names of the composed stages, outermost first.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.inner.stages.iter().map(|s| s.name()).collect()
    }

    /// Pool backing this handler.
    #[must_use]
    pub fn pool(&self) -> &Arc<ContextPool> {
        &self.inner.pool
    }
}

impl std::fmt::Debug for Wrapped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wrapped")
            .field("stages", &self.stage_names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::from_fn;
    use http::{HeaderValue, StatusCode};
    use kairos_core::{response, RequestContext};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl Log {
        fn push(&self, entry: String) {
            self.0.lock().unwrap().push(entry);
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    fn recording(name: &'static str, log: Log) -> impl Middleware {
        from_fn(name, move |ctx: &mut RequestContext, req: Request, next: Next<'_>| {
            let log = log.clone();
            Box::pin(async move {
                log.push(format!("{name}:in"));
                let response = next.run(ctx, req).await;
                log.push(format!("{name}:out"));
                response
            })
        })
    }

    fn ok_endpoint(ctx: &mut RequestContext, _req: Request) -> BoxFuture<'static, Response> {
        let label = ctx.trace_label().to_string();
        Box::pin(async move { response::text(StatusCode::OK, label) })
    }

    fn request(path: &str) -> Request {
        http::Request::builder()
            .uri(path)
            .body(Default::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_stages_run_in_registration_order() {
        let log = Log::default();
        let mut pipeline = Pipeline::new();
        pipeline
            .use_middleware(recording("first", log.clone()))
            .use_middleware(recording("second", log.clone()))
            .use_middleware(recording("third", log.clone()));

        let wrapped = pipeline.wrap(ok_endpoint, Arc::new(ContextPool::default()));
        let response = wrapped.handle(request("/")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            log.entries(),
            [
                "first:in",
                "second:in",
                "third:in",
                "third:out",
                "second:out",
                "first:out"
            ]
        );
    }

    #[tokio::test]
    async fn test_later_stage_observes_earlier_effects() {
        let mut pipeline = Pipeline::new();
        pipeline
            .use_middleware(from_fn(
                "label",
                |ctx: &mut RequestContext, req: Request, next: Next<'_>| {
                    ctx.set_trace_label("/labelled");
                    next.run(ctx, req)
                },
            ))
            .use_middleware(from_fn(
                "check",
                |ctx: &mut RequestContext, req: Request, next: Next<'_>| {
                    assert_eq!(ctx.trace_label(), "/labelled");
                    next.run(ctx, req)
                },
            ));

        let wrapped = pipeline.wrap(ok_endpoint, Arc::new(ContextPool::default()));
        let response = wrapped.handle(request("/raw")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_inner_stages() {
        let log = Log::default();
        let mut pipeline = Pipeline::new();
        pipeline
            .use_middleware(from_fn(
                "deny",
                |_ctx: &mut RequestContext, _req: Request, _next: Next<'_>| {
                    Box::pin(async { response::empty(StatusCode::FORBIDDEN) })
                },
            ))
            .use_middleware(recording("inner", log.clone()));

        let wrapped = pipeline.wrap(ok_endpoint, Arc::new(ContextPool::default()));
        let response = wrapped.handle(request("/")).await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_response_post_processing() {
        let mut pipeline = Pipeline::new();
        pipeline.use_middleware(from_fn(
            "stamp",
            |ctx: &mut RequestContext, req: Request, next: Next<'_>| {
                Box::pin(async move {
                    let mut response = next.run(ctx, req).await;
                    response
                        .headers_mut()
                        .insert("x-stamp", HeaderValue::from_static("1"));
                    response
                })
            },
        ));

        let wrapped = pipeline.wrap(ok_endpoint, Arc::new(ContextPool::default()));
        let response = wrapped.handle(request("/")).await;
        assert_eq!(response.headers()["x-stamp"], "1");
    }

    #[tokio::test]
    async fn test_context_returned_to_pool() {
        let pool = Arc::new(ContextPool::default());
        let wrapped = Pipeline::new().wrap(ok_endpoint, Arc::clone(&pool));

        for _ in 0..3 {
            wrapped.handle(request("/a")).await;
        }

        let stats = pool.stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.reused, 2);
        assert_eq!(stats.idle, 1);
    }

    #[test]
    fn test_stage_names() {
        let mut pipeline = Pipeline::new();
        pipeline
            .use_middleware(recording("a", Log::default()))
            .use_middleware(recording("b", Log::default()));
        assert_eq!(pipeline.stage_names(), ["a", "b"]);
        assert_eq!(pipeline.len(), 2);
    }
}
