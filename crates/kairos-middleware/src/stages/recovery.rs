//! Panic recovery.
//!
//! [`catch_panic`] turns a panic raised while polling a future into a
//! [`PanicReport`]: the panic message, where it was raised and a backtrace.
//! The failure stays scoped to that one future, so the connection task and
//! the accept loop above it keep running.
//!
//! A process-wide panic hook, installed on first use, captures the location
//! and backtrace for panics raised inside a recovery scope and suppresses
//! the default stderr report for them. Panics anywhere else still reach the
//! previously installed hook.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Once;

use futures_util::FutureExt;
use http::StatusCode;
use kairos_core::{response, BoxFuture, Request, RequestContext, Response};
use kairos_telemetry::metrics::record_panic;

use crate::middleware::{Middleware, Next};

/// Message returned to clients for a recovered panic.
pub const PANIC_RESPONSE_MESSAGE: &str = "internal server error";

thread_local! {
    static SCOPE_DEPTH: Cell<usize> = const { Cell::new(0) };
    static CAPTURED: RefCell<Option<Captured>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

struct Captured {
    location: Option<String>,
    backtrace: Backtrace,
}

fn install_hook() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if SCOPE_DEPTH.with(Cell::get) > 0 {
                let captured = Captured {
                    location: info.location().map(ToString::to_string),
                    backtrace: Backtrace::force_capture(),
                };
                CAPTURED.with(|slot| *slot.borrow_mut() = Some(captured));
            } else {
                previous(info);
            }
        }));
    });
}

/// Marks the current thread as polling inside a recovery scope.
struct Scope;

impl Scope {
    fn enter() -> Self {
        SCOPE_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        SCOPE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// A panic caught by [`catch_panic`].
pub struct PanicReport {
    message: String,
    location: Option<String>,
    backtrace: Option<Backtrace>,
}

impl PanicReport {
    fn new(payload: &(dyn Any + Send)) -> Self {
        let captured = CAPTURED.with(|slot| slot.borrow_mut().take());
        let (location, backtrace) = match captured {
            Some(c) => (c.location, Some(c.backtrace)),
            None => (None, None),
        };
        Self {
            message: panic_message(payload),
            location,
            backtrace,
        }
    }

    /// Panic payload rendered as text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// `file:line:column` where the panic was raised, when known.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Backtrace captured at the panic site, when known.
    #[must_use]
    pub const fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_ref()
    }
}

impl fmt::Debug for PanicReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicReport")
            .field("message", &self.message)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for PanicReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {location}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Polls `future` to completion, converting a panic into a [`PanicReport`].
pub async fn catch_panic<F: Future>(future: F) -> Result<F::Output, PanicReport> {
    install_hook();
    let mut future = std::pin::pin!(future);
    let scoped = std::future::poll_fn(move |cx| {
        let _scope = Scope::enter();
        future.as_mut().poll(cx)
    });
    AssertUnwindSafe(scoped)
        .catch_unwind()
        .await
        .map_err(|payload| PanicReport::new(payload.as_ref()))
}

/// Converts panics in downstream stages and handlers into a 500 response.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryMiddleware;

impl Middleware for RecoveryMiddleware {
    fn name(&self) -> &'static str {
        "recovery"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        let span = ctx.span().clone();
        let route = ctx.trace_label().to_string();
        Box::pin(async move {
            // `next.run` starts the inner stages synchronously; call it inside the scope.
            match catch_panic(async move { next.run(ctx, request).await }).await {
                Ok(response) => response,
                Err(report) => {
                    record_panic("http");
                    let backtrace = report
                        .backtrace()
                        .map(ToString::to_string)
                        .unwrap_or_default();
                    tracing::error!(
                        parent: &span,
                        route = %route,
                        panic = report.message(),
                        location = report.location().unwrap_or("unknown"),
                        backtrace = %backtrace,
                        "handler panicked"
                    );
                    response::error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal",
                        PANIC_RESPONSE_MESSAGE,
                    )
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{build, ok, request, run};
    use http::Method;
    use http_body_util::BodyExt;

    fn panicking(_: &mut RequestContext, _: Request) -> BoxFuture<'static, Response> {
        Box::pin(async { panic!("handler exploded") })
    }

    fn panicking_before_future(_: &mut RequestContext, _: Request) -> BoxFuture<'static, Response> {
        panic!("failed before returning a future")
    }

    #[tokio::test]
    async fn test_catch_panic_passes_output_through() {
        assert_eq!(catch_panic(async { 7 }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_catch_panic_reports_message_and_location() {
        let report = catch_panic(async { panic!("boom {}", 42) }).await.unwrap_err();
        assert_eq!(report.message(), "boom 42");
        assert!(report.location().unwrap().contains("recovery.rs"));
        assert!(report.backtrace().is_some());
    }

    #[tokio::test]
    async fn test_catch_panic_across_await_points() {
        let report = catch_panic(async {
            tokio::task::yield_now().await;
            panic!("after yield");
        })
        .await
        .unwrap_err();
        assert_eq!(report.message(), "after yield");
    }

    #[tokio::test]
    async fn test_panic_becomes_500_envelope() {
        let (response, _) = run(
            &RecoveryMiddleware,
            panicking,
            build(request(Method::GET, "/boom")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "internal");
        assert_eq!(json["error"]["message"], PANIC_RESPONSE_MESSAGE);
    }

    #[tokio::test]
    async fn test_panic_while_starting_inner_stage() {
        let (response, _) = run(
            &RecoveryMiddleware,
            panicking_before_future,
            build(request(Method::GET, "/boom")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "internal");
    }

    #[tokio::test]
    async fn test_repeated_panics_then_success() {
        for _ in 0..5 {
            let (response, _) = run(
                &RecoveryMiddleware,
                panicking,
                build(request(Method::GET, "/boom")),
            )
            .await;
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }

        let (response, _) = run(&RecoveryMiddleware, ok, build(request(Method::GET, "/"))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_panic_message_payloads() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&17_u32), "unknown panic");
    }
}
