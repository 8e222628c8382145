//! Telemetry error types.

use kairos_config::ConfigError;
use thiserror::Error;

/// Errors raised while setting up telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to install the metrics recorder.
    #[error("failed to initialize metrics: {0}")]
    MetricsInit(String),

    /// Failed to build the trace exporter.
    #[error("failed to initialize tracing: {0}")]
    TracingInit(String),

    /// Failed to install the log subscriber.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),

    /// A telemetry setting could not be read.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
