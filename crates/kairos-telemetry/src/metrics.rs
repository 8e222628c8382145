//! Prometheus metrics.
//!
//! # Series
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `app_http_requests_total` | Counter | `method`, `path`, `status` |
//! | `app_http_response_seconds` | Histogram | `method`, `path`, `status` |
//! | `app_http_in_flight` | Gauge | - |
//! | `app_grpc_requests_total` | Counter | `method`, `code` |
//! | `app_grpc_response_seconds` | Histogram | `method`, `code` |
//! | `app_panics_recovered_total` | Counter | `protocol` |
//! | `app_request_context_pool` | Counter | `outcome` |
//!
//! `path` is always the normalized route label, never a raw path with ids.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// HTTP request counter.
pub const HTTP_REQUESTS_TOTAL: &str = "app_http_requests_total";
/// HTTP latency histogram.
pub const HTTP_RESPONSE_SECONDS: &str = "app_http_response_seconds";
/// HTTP requests in progress.
pub const HTTP_IN_FLIGHT: &str = "app_http_in_flight";
/// gRPC call counter.
pub const GRPC_REQUESTS_TOTAL: &str = "app_grpc_requests_total";
/// gRPC latency histogram.
pub const GRPC_RESPONSE_SECONDS: &str = "app_grpc_response_seconds";
/// Recovered panics.
pub const PANICS_RECOVERED_TOTAL: &str = "app_panics_recovered_total";
/// Context pool acquisitions.
pub const REQUEST_CONTEXT_POOL: &str = "app_request_context_pool";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INIT_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether a recorder is installed.
    pub enabled: bool,

    /// Histogram buckets in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

/// Installs the process-wide Prometheus recorder.
///
/// Idempotent: later calls return the handle installed by the first one.
/// Returns `None` when metrics are disabled.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<Option<PrometheusHandle>> {
    if !config.enabled {
        return Ok(None);
    }
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(Some(handle.clone()));
    }

    let _guard = INIT_LOCK.lock();
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(Some(handle.clone()));
    }

    let recorder = PrometheusBuilder::new()
        .set_buckets(&config.duration_buckets)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .build_recorder();
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    describe_metrics();

    let _ = METRICS_HANDLE.set(handle.clone());
    Ok(Some(handle))
}

/// Handle installed by [`init_metrics`], if any.
#[must_use]
pub fn metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Renders the Prometheus text exposition.
#[must_use]
pub fn render(handle: &PrometheusHandle) -> String {
    handle.run_upkeep();
    handle.render()
}

fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "HTTP requests served");
    describe_histogram!(
        HTTP_RESPONSE_SECONDS,
        metrics::Unit::Seconds,
        "HTTP response latency"
    );
    describe_gauge!(HTTP_IN_FLIGHT, "HTTP requests currently being handled");
    describe_counter!(GRPC_REQUESTS_TOTAL, "gRPC calls served");
    describe_histogram!(
        GRPC_RESPONSE_SECONDS,
        metrics::Unit::Seconds,
        "gRPC call latency"
    );
    describe_counter!(
        PANICS_RECOVERED_TOTAL,
        "Handler panics converted into error responses"
    );
    describe_counter!(
        REQUEST_CONTEXT_POOL,
        "Request context acquisitions by outcome"
    );
}

/// Records one completed HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, elapsed: Duration) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];
    counter!(HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(HTTP_RESPONSE_SECONDS, &labels).record(elapsed.as_secs_f64());
}

/// Records one completed gRPC call.
pub fn record_grpc_request(method: &str, code: i32, elapsed: Duration) {
    let labels = [("method", method.to_string()), ("code", code.to_string())];
    counter!(GRPC_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(GRPC_RESPONSE_SECONDS, &labels).record(elapsed.as_secs_f64());
}

/// Records a recovered panic for `protocol` (`http` or `grpc`).
pub fn record_panic(protocol: &'static str) {
    counter!(PANICS_RECOVERED_TOTAL, "protocol" => protocol).increment(1);
}

/// Records whether a request context was reused or freshly allocated.
pub fn record_pool_acquire(reused: bool) {
    let outcome = if reused { "reused" } else { "allocated" };
    counter!(REQUEST_CONTEXT_POOL, "outcome" => outcome).increment(1);
}

/// Keeps `app_http_in_flight` raised while alive.
///
/// Dropping the guard lowers the gauge, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Raises the gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!(HTTP_IN_FLIGHT).increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(HTTP_IN_FLIGHT).decrement(1.0);
    }
}
