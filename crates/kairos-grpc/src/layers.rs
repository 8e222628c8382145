//! Tower layers wrapped around every gRPC call.
//!
//! The listener stacks them outer to inner as
//! `ObservabilityLayer → RecoveryLayer → routes`, so a recovered panic is
//! still logged and counted as an `INTERNAL` call. Both layers apply to
//! unary and streaming methods alike.

use std::task::{Context, Poll};
use std::time::Instant;

use http::header::{HeaderValue, CONTENT_TYPE};
use kairos_core::{BoxFuture, CorrelationId};
use kairos_middleware::catch_panic;
use kairos_telemetry::metrics::{record_grpc_request, record_panic};
use tonic::body::BoxBody;
use tonic::{Code, Status};
use tower::{Layer, Service};

/// Message sent to clients for a recovered panic.
pub const PANIC_STATUS_MESSAGE: &str = "internal server error";

const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Builds the trailers-only response tonic uses for an immediate error.
pub fn status_response(status: &Status) -> http::Response<BoxBody> {
    let mut response = http::Response::new(tonic::body::empty_body());
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
    if let Err(err) = status.add_header(headers) {
        tracing::warn!(error = %err, "failed to encode grpc status headers");
    }
    response
}

/// Converts panics in downstream services into `INTERNAL` statuses.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryLayer;

impl<S> Layer<S> for RecoveryLayer {
    type Service = Recovery<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Recovery { inner }
    }
}

/// Service produced by [`RecoveryLayer`].
#[derive(Debug, Clone)]
pub struct Recovery<S> {
    inner: S,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for Recovery<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<BoxBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        // The clone is not ready; keep the one that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let method = request.uri().path().to_string();

        Box::pin(async move {
            match catch_panic(async move { inner.call(request).await }).await {
                Ok(result) => result,
                Err(report) => {
                    record_panic("grpc");
                    let backtrace = report
                        .backtrace()
                        .map(ToString::to_string)
                        .unwrap_or_default();
                    tracing::error!(
                        grpc.method = %method,
                        panic = report.message(),
                        location = report.location().unwrap_or("unknown"),
                        backtrace = %backtrace,
                        "grpc handler panicked"
                    );
                    Ok(status_response(&Status::internal(PANIC_STATUS_MESSAGE)))
                }
            }
        })
    }
}

/// Logs and measures every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObservabilityLayer;

impl<S> Layer<S> for ObservabilityLayer {
    type Service = Observability<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Observability { inner }
    }
}

/// Service produced by [`ObservabilityLayer`].
#[derive(Debug, Clone)]
pub struct Observability<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for Observability<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::fmt::Display + Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = http::Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let method = request.uri().path().to_string();
        let correlation_id = request
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(CorrelationId::parse)
            .unwrap_or_else(CorrelationId::generate);
        let span = tracing::info_span!(
            "grpc.request",
            grpc.method = %method,
            correlation_id = %correlation_id.as_str(),
        );

        Box::pin(async move {
            let start = Instant::now();
            let result = inner.call(request).await;
            let elapsed = start.elapsed();

            match &result {
                Ok(response) => {
                    // Streaming calls report their final status in trailers,
                    // which are not visible here.
                    let code = Status::from_header_map(response.headers())
                        .map_or(Code::Ok, |status| status.code());
                    record_grpc_request(&method, i32::from(code), elapsed);
                    if code == Code::Ok {
                        tracing::info!(
                            parent: &span,
                            grpc.code = i32::from(code),
                            duration_ms = elapsed.as_millis(),
                            "grpc request completed"
                        );
                    } else {
                        tracing::warn!(
                            parent: &span,
                            grpc.code = i32::from(code),
                            grpc.status = %code,
                            duration_ms = elapsed.as_millis(),
                            "grpc request failed"
                        );
                    }
                }
                Err(err) => {
                    record_grpc_request(&method, i32::from(Code::Unknown), elapsed);
                    tracing::error!(
                        parent: &span,
                        error = %err,
                        duration_ms = elapsed.as_millis(),
                        "grpc transport error"
                    );
                }
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tower::{service_fn, ServiceBuilder, ServiceExt};

    fn request(path: &str) -> http::Request<()> {
        http::Request::builder().uri(path).body(()).unwrap()
    }

    fn code_of(response: &http::Response<BoxBody>) -> Code {
        Status::from_header_map(response.headers()).map_or(Code::Ok, |s| s.code())
    }

    #[tokio::test]
    async fn test_recovery_converts_panic() {
        let service = ServiceBuilder::new().layer(RecoveryLayer).service(service_fn(
            |_req: http::Request<()>| async move {
                if true {
                    panic!("boom");
                }
                Ok::<_, Infallible>(http::Response::new(tonic::body::empty_body()))
            },
        ));

        let response = service.oneshot(request("/pkg.Svc/Call")).await.unwrap();
        assert_eq!(code_of(&response), Code::Internal);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/grpc");
        let status = Status::from_header_map(response.headers()).unwrap();
        assert_eq!(status.message(), PANIC_STATUS_MESSAGE);
    }

    #[tokio::test]
    async fn test_recovery_passes_through() {
        let service = ServiceBuilder::new()
            .layer(RecoveryLayer)
            .service(service_fn(|_req: http::Request<()>| async {
                Ok::<_, Infallible>(status_response(&Status::not_found("missing")))
            }));

        let response = service.oneshot(request("/pkg.Svc/Call")).await.unwrap();
        assert_eq!(code_of(&response), Code::NotFound);
    }

    #[tokio::test]
    async fn test_observability_keeps_response() {
        let service = ServiceBuilder::new()
            .layer(ObservabilityLayer)
            .layer(RecoveryLayer)
            .service(service_fn(|_req: http::Request<()>| async {
                Ok::<_, Infallible>(http::Response::new(tonic::body::empty_body()))
            }));

        let response = service.oneshot(request("/pkg.Svc/Call")).await.unwrap();
        assert_eq!(code_of(&response), Code::Ok);
    }

    #[test]
    fn test_status_response_headers() {
        let response = status_response(&Status::unavailable("draining"));
        assert_eq!(response.headers()["grpc-status"], "14");
        assert_eq!(response.headers()["grpc-message"], "draining");
    }
}
