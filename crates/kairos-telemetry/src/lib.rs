//! Observability for Kairos services.
//!
//! - **Logging**: `tracing` + `tracing-subscriber`, JSON or pretty
//! - **Metrics**: the `metrics` facade with a Prometheus recorder
//! - **Tracing**: W3C trace context and optional OTLP export
//!
//! ```text
//!   handlers / middleware / listeners
//!        │            │            │
//!   tracing::info!  counter!   SpanIdentity
//!        │            │            │
//!        ▼            ▼            ▼
//!     stdout      /metrics    traceparent, OTLP collector
//! ```
//!
//! ```rust,ignore
//! use kairos_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::builder().service_name("orders").build())?;
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod tracing;

use metrics_exporter_prometheus::PrometheusHandle;
use opentelemetry_sdk::trace::TracerProvider;

pub use crate::config::{TelemetryConfig, TelemetryConfigBuilder};
pub use crate::error::TelemetryError;
pub use crate::logging::{init_logging, LogConfig};
pub use crate::metrics::{init_metrics, InFlightGuard, MetricsConfig};
pub use crate::tracing::{init_tracing, ServerSpan, SpanIdentity, TracingConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Keeps telemetry alive; flushes exported spans on drop.
#[derive(Debug)]
pub struct TelemetryGuard {
    tracer_provider: Option<TracerProvider>,
    metrics: Option<PrometheusHandle>,
}

impl TelemetryGuard {
    /// Creates a guard.
    #[must_use]
    pub fn new(tracer_provider: Option<TracerProvider>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            tracer_provider,
            metrics,
        }
    }

    /// Prometheus handle, when metrics are enabled.
    #[must_use]
    pub const fn metrics(&self) -> Option<&PrometheusHandle> {
        self.metrics.as_ref()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            crate::tracing::shutdown_tracing(&provider);
        }
    }
}

/// Initializes logging, then metrics, then tracing.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<TelemetryGuard> {
    init_logging(&config.logging)?;
    let metrics = init_metrics(&config.metrics)?;
    let tracer_provider = init_tracing(&config.tracing)?;
    Ok(TelemetryGuard::new(tracer_provider, metrics))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_without_providers() {
        let guard = TelemetryGuard::new(None, None);
        assert!(guard.metrics().is_none());
        drop(guard);
    }
}
