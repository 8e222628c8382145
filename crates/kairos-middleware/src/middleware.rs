//! Core middleware trait and types.
//!
//! A [`Middleware`] receives the pooled [`RequestContext`], the request and
//! a [`Next`] continuation. It may short-circuit by returning its own
//! response, or call [`Next::run`] exactly once and post-process the result.
//!
//! ```rust
//! use kairos_core::{Request, RequestContext, Response};
//! use kairos_middleware::{from_fn, Next};
//!
//! let timing = from_fn("timing", |ctx: &mut RequestContext, req: Request, next: Next<'_>| {
//!     Box::pin(async move {
//!         let response = next.run(ctx, req).await;
//!         tracing::debug!(elapsed = ?ctx.elapsed(), "done");
//!         response
//!     })
//! });
//! # let _ = timing;
//! ```

use std::sync::Arc;

use kairos_core::{BoxFuture, Request, RequestContext, Response};

/// A stage of the request pipeline.
///
/// # Invariants
///
/// - `next.run()` is called at most once
/// - a stage never reorders the pipeline
pub trait Middleware: Send + Sync + 'static {
    /// Stage name used in logs and introspection.
    fn name(&self) -> &'static str;

    /// Processes one request.
    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response>;
}

/// Shared, type-erased middleware.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Terminal of a pipeline, usually the router dispatcher.
pub trait Endpoint: Send + Sync + 'static {
    /// Produces the response for a request that passed every stage.
    fn call(&self, ctx: &mut RequestContext, request: Request) -> BoxFuture<'static, Response>;
}

/// Continuation to the remaining stages.
pub struct Next<'a> {
    stages: &'a [BoxedMiddleware],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub(crate) fn new(stages: &'a [BoxedMiddleware], endpoint: &'a dyn Endpoint) -> Self {
        Self { stages, endpoint }
    }

    /// Continuation that goes straight to `endpoint`.
    ///
    /// Useful for driving a single stage in isolation.
    #[must_use]
    pub fn endpoint(endpoint: &'a dyn Endpoint) -> Self {
        Self::new(&[], endpoint)
    }

    /// Invokes the next stage, or the endpoint after the last one.
    ///
    /// Consumes `self`, so the remainder of the chain runs at most once.
    pub fn run<'c>(self, ctx: &'c mut RequestContext, request: Request) -> BoxFuture<'c, Response>
    where
        'a: 'c,
    {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.process(ctx, request, Next::new(rest, self.endpoint)),
            None => self.endpoint.call(ctx, request),
        }
    }

    /// Number of stages still ahead, excluding the endpoint.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.stages.len()
    }
}

/// Middleware built from a closure.
pub struct FnMiddleware<F> {
    name: &'static str,
    func: F,
}

/// Wraps a closure as a [`Middleware`].
pub fn from_fn<F>(name: &'static str, func: F) -> FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut RequestContext, Request, Next<'a>) -> BoxFuture<'a, Response>
        + Send
        + Sync
        + 'static,
{
    FnMiddleware { name, func }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut RequestContext, Request, Next<'a>) -> BoxFuture<'a, Response>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        (self.func)(ctx, request, next)
    }
}

impl<F> std::fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnMiddleware").field("name", &self.name).finish()
    }
}

impl<F> Endpoint for F
where
    F: Fn(&mut RequestContext, Request) -> BoxFuture<'static, Response> + Send + Sync + 'static,
{
    fn call(&self, ctx: &mut RequestContext, request: Request) -> BoxFuture<'static, Response> {
        (self)(ctx, request)
    }
}
