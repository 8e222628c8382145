//! Structured logging.
//!
//! Output goes through `tracing-subscriber`: JSON lines in production,
//! pretty multi-line output in development. Every request runs inside an
//! `http.request` (or `grpc.request`) span carrying the correlation
//! identifier, so plain `tracing::info!` calls from handlers are correlated.
//!
//! ```rust,ignore
//! use kairos_telemetry::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::production())?;
//! tracing::info!(route = "/users/{id}", "serving");
//! ```

use kairos_config::{Config, ConfigExt};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether to install a subscriber at all.
    pub enabled: bool,

    /// Filter directive, e.g. `info` or `kairos_server=debug,info`.
    pub level: String,

    /// JSON lines when `true`, pretty output otherwise.
    pub json_format: bool,

    /// Emit span open/close events.
    pub span_events: bool,

    /// Include file and line.
    pub file_line_info: bool,

    /// Include the module path.
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Human-readable output at `debug`.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            level: "debug".to_string(),
            json_format: false,
            span_events: true,
            file_line_info: true,
            include_target: true,
        }
    }

    /// JSON output at `info`.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            json_format: true,
            span_events: false,
            file_line_info: false,
            include_target: true,
        }
    }

    /// Reads `LOG_LEVEL` and `LOG_FORMAT` (`json` or `pretty`).
    pub fn from_config(config: &impl Config) -> TelemetryResult<Self> {
        let format = config.get_or_default("LOG_FORMAT", "json");
        let json_format = match format.trim().to_ascii_lowercase().as_str() {
            "json" => true,
            "pretty" | "text" => false,
            _ => {
                return Err(kairos_config::ConfigError::invalid_value(
                    "LOG_FORMAT",
                    format,
                    "expected json or pretty",
                )
                .into())
            }
        };
        let base = if json_format {
            Self::production()
        } else {
            Self::development()
        };

        Ok(Self {
            enabled: config.get_bool("LOG_ENABLED", true)?,
            level: config.get_or_default("LOG_LEVEL", "info"),
            ..base
        })
    }
}

/// Installs the global subscriber.
///
/// Calling this again after a subscriber exists is not an error; the first
/// subscriber stays in place.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.level)?;
    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = if config.json_format {
        tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .boxed()
    };

    if tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .is_err()
    {
        tracing::debug!("log subscriber already installed");
    }
    Ok(())
}

/// Parses a filter directive.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("invalid log level {filter:?}: {e}")))
}

/// Field names used across Kairos log lines and spans.
pub mod fields {
    /// Correlation identifier.
    pub const CORRELATION_ID: &str = "correlation_id";

    /// W3C trace id.
    pub const TRACE_ID: &str = "trace_id";

    /// HTTP method.
    pub const HTTP_METHOD: &str = "http.method";

    /// Normalized route.
    pub const HTTP_ROUTE: &str = "http.route";

    /// Response status.
    pub const HTTP_STATUS: &str = "http.status_code";

    /// Full gRPC method path.
    pub const GRPC_METHOD: &str = "grpc.method";

    /// gRPC status code.
    pub const GRPC_CODE: &str = "grpc.code";

    /// Elapsed time in milliseconds.
    pub const DURATION_MS: &str = "duration_ms";

    /// Listener kind.
    pub const LISTENER: &str = "listener";
}

#[cfg(test)]
mod tests {
    use super::*;
    use kairos_config::MapConfig;

    #[test]
    fn test_presets() {
        let dev = LogConfig::development();
        assert!(!dev.json_format);
        assert_eq!(dev.level, "debug");

        let prod = LogConfig::production();
        assert!(prod.json_format);
        assert!(!prod.span_events);
        assert_eq!(prod.level, "info");
    }

    #[test]
    fn test_from_config() {
        let config = MapConfig::new()
            .with("LOG_LEVEL", "warn")
            .with("LOG_FORMAT", "pretty");
        let log = LogConfig::from_config(&config).unwrap();

        assert_eq!(log.level, "warn");
        assert!(!log.json_format);
    }

    #[test]
    fn test_from_config_rejects_unknown_format() {
        let config = MapConfig::new().with("LOG_FORMAT", "xml");
        assert!(LogConfig::from_config(&config).is_err());
    }

    #[test]
    fn test_create_env_filter() {
        assert!(create_env_filter("kairos_server=debug,info").is_ok());
        assert!(create_env_filter("kairos=notalevel").is_err());
    }

    #[test]
    fn test_init_logging_twice() {
        let config = LogConfig {
            level: "warn".to_string(),
            ..LogConfig::production()
        };
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }

    #[test]
    fn test_disabled_logging() {
        let config = LogConfig {
            enabled: false,
            ..LogConfig::default()
        };
        assert!(init_logging(&config).is_ok());
    }
}
