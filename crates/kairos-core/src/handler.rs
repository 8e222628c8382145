//! Handler abstraction.
//!
//! A handler receives the per-request [`Context`] produced by the pipeline
//! and the buffered request, and returns a response or a [`HandlerError`].
//! Any `Fn(Context, Request) -> impl Future<Output = HandlerResult<Response>>`
//! closure is a handler.
//!
//! ```rust
//! use kairos_core::{handler_fn, response};
//!
//! let hello = handler_fn(|ctx, _req| async move {
//!     let name = ctx.param("name").unwrap_or("world").to_string();
//!     Ok(response::text(http::StatusCode::OK, format!("hello {name}")))
//! });
//! # let _ = hello;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;

use crate::context::Context;
use crate::error::HandlerResult;

/// Buffered HTTP request.
pub type Request = http::Request<Full<Bytes>>;

/// Buffered HTTP response.
pub type Response = http::Response<Full<Bytes>>;

/// Boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A request handler bound to a route.
pub trait Handler: Send + Sync + 'static {
    /// Handles one request.
    fn call(&self, ctx: Context, request: Request) -> BoxFuture<'static, HandlerResult<Response>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<Response>> + Send + 'static,
{
    fn call(&self, ctx: Context, request: Request) -> BoxFuture<'static, HandlerResult<Response>> {
        Box::pin((self)(ctx, request))
    }
}

/// Shared, type-erased handler.
pub type BoxedHandler = Arc<dyn Handler>;

/// Boxes a closure as a [`BoxedHandler`].
///
/// Taking the closure through an `Fn` bound lets the compiler infer its
/// argument and error types.
pub fn handler_fn<F, Fut>(func: F) -> BoxedHandler
where
    F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<Response>> + Send + 'static,
{
    Arc::new(func)
}
