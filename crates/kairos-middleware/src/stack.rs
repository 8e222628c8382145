//! The standard stage order.
//!
//! Outer to inner: upgrade detection, capability detection, header
//! propagation, trace labelling, tracing, CORS, request logging, metrics,
//! header validation (when enabled), panic recovery, user middleware and
//! finally context injection. Each stage observes the effects of every stage
//! registered before it.

use std::sync::Arc;

use http::HeaderName;
use kairos_config::{Config, ConfigError, ConfigExt};
use kairos_core::Container;

use crate::middleware::BoxedMiddleware;
use crate::pipeline::Pipeline;
use crate::stages::logging::DEFAULT_OMIT_HEADERS;
use crate::stages::propagation::DEFAULT_PROPAGATE_HEADERS;
use crate::stages::{
    CapabilitiesMiddleware, CorsConfig, CorsMiddleware, HeaderValidationMiddleware,
    InjectionMiddleware, LoggingMiddleware, MetricsMiddleware, PropagationMiddleware,
    RecoveryMiddleware, TraceLabelMiddleware, TraceLabeler, TracingMiddleware, UpgradeMiddleware,
};

const DEFAULT_REQUIRED_HEADERS: &[&str] = &["X-Correlation-ID"];

/// Settings for the built-in stages.
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Service name recorded on server spans.
    pub service_name: String,
    /// Headers copied onto the context for outbound propagation.
    pub propagate_headers: Vec<HeaderName>,
    /// Headers the request log never writes.
    pub omit_headers: Vec<HeaderName>,
    /// CORS policy.
    pub cors: CorsConfig,
    /// Required headers; `None` leaves header validation out of the chain.
    pub required_headers: Option<Vec<HeaderName>>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            service_name: "kairos".to_string(),
            propagate_headers: static_names(DEFAULT_PROPAGATE_HEADERS),
            omit_headers: static_names(DEFAULT_OMIT_HEADERS),
            cors: CorsConfig::default(),
            required_headers: None,
        }
    }
}

impl StackConfig {
    /// Reads stage settings.
    ///
    /// Keys: `APP_NAME`, `PROPAGATE_HEADERS`, `LOG_OMIT_HEADERS`,
    /// `HEADER_VALIDATION_ENABLED`, `REQUIRED_HEADERS` and the CORS keys.
    pub fn from_config(config: &impl Config) -> Result<Self, ConfigError> {
        let required_headers = if config.get_bool("HEADER_VALIDATION_ENABLED", false)? {
            Some(header_names(
                "REQUIRED_HEADERS",
                config.get_list("REQUIRED_HEADERS", DEFAULT_REQUIRED_HEADERS),
            )?)
        } else {
            None
        };

        Ok(Self {
            service_name: config.get_or_default("APP_NAME", "kairos"),
            propagate_headers: header_names(
                "PROPAGATE_HEADERS",
                config.get_list("PROPAGATE_HEADERS", DEFAULT_PROPAGATE_HEADERS),
            )?,
            omit_headers: header_names(
                "LOG_OMIT_HEADERS",
                config.get_list("LOG_OMIT_HEADERS", DEFAULT_OMIT_HEADERS),
            )?,
            cors: CorsConfig::from_config(config)?,
            required_headers,
        })
    }
}

fn static_names(names: &[&'static str]) -> Vec<HeaderName> {
    names.iter().copied().map(HeaderName::from_static).collect()
}

fn header_names(key: &str, values: Vec<String>) -> Result<Vec<HeaderName>, ConfigError> {
    values
        .into_iter()
        .map(|value| {
            HeaderName::from_bytes(value.to_ascii_lowercase().as_bytes())
                .map_err(|_| ConfigError::invalid_value(key, &value, "not a valid header name"))
        })
        .collect()
}

/// Builds the pipeline in the standard order.
///
/// `user` stages run after panic recovery and before context injection, in
/// the order given.
#[must_use]
pub fn standard_pipeline(
    config: &StackConfig,
    labeler: Arc<TraceLabeler>,
    user: Vec<BoxedMiddleware>,
    container: Arc<Container>,
) -> Pipeline {
    let mut pipeline = Pipeline::new();
    pipeline
        .use_middleware(UpgradeMiddleware::new())
        .use_middleware(CapabilitiesMiddleware)
        .use_middleware(PropagationMiddleware::new(config.propagate_headers.clone()))
        .use_middleware(TraceLabelMiddleware::new(labeler))
        .use_middleware(TracingMiddleware::new(config.service_name.clone()))
        .use_middleware(CorsMiddleware::new(config.cors.clone()))
        .use_middleware(LoggingMiddleware::new(config.omit_headers.iter().cloned()))
        .use_middleware(MetricsMiddleware);

    if let Some(required) = &config.required_headers {
        pipeline.use_middleware(HeaderValidationMiddleware::new(required.clone()));
    }

    pipeline.use_middleware(RecoveryMiddleware);
    for stage in user {
        pipeline.use_boxed(stage);
    }
    pipeline.use_middleware(InjectionMiddleware::new(container));
    pipeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::from_fn;
    use kairos_config::MapConfig;

    #[test]
    fn test_default_order() {
        let pipeline = standard_pipeline(
            &StackConfig::default(),
            Arc::default(),
            Vec::new(),
            Arc::default(),
        );
        assert_eq!(
            pipeline.stage_names(),
            [
                "upgrade",
                "capabilities",
                "propagation",
                "trace_label",
                "tracing",
                "cors",
                "logging",
                "metrics",
                "recovery",
                "injection"
            ]
        );
    }

    #[test]
    fn test_validation_and_user_stages_placement() {
        let config = StackConfig {
            required_headers: Some(vec![HeaderName::from_static("x-tenant")]),
            ..StackConfig::default()
        };
        let user: Vec<BoxedMiddleware> = vec![
            Arc::new(from_fn("auth", |ctx, req, next| next.run(ctx, req))),
            Arc::new(from_fn("audit", |ctx, req, next| next.run(ctx, req))),
        ];
        let names = standard_pipeline(&config, Arc::default(), user, Arc::default()).stage_names();

        let position = |name: &str| names.iter().position(|n| *n == name).unwrap();
        assert!(position("metrics") < position("header_validation"));
        assert!(position("header_validation") < position("recovery"));
        assert!(position("recovery") < position("auth"));
        assert!(position("auth") < position("audit"));
        assert_eq!(names.last(), Some(&"injection"));
    }

    #[test]
    fn test_from_config_defaults() {
        let config = StackConfig::from_config(&MapConfig::new()).unwrap();
        assert_eq!(config.service_name, "kairos");
        assert!(config.required_headers.is_none());
        assert!(config
            .propagate_headers
            .contains(&HeaderName::from_static("traceparent")));
        assert!(config
            .omit_headers
            .contains(&HeaderName::from_static("authorization")));
    }

    #[test]
    fn test_from_config_validation_enabled() {
        let config = MapConfig::new()
            .with("HEADER_VALIDATION_ENABLED", "true")
            .with("REQUIRED_HEADERS", "X-Tenant, X-Correlation-ID");
        let stack = StackConfig::from_config(&config).unwrap();
        assert_eq!(
            stack.required_headers.unwrap(),
            [
                HeaderName::from_static("x-tenant"),
                HeaderName::from_static("x-correlation-id")
            ]
        );
    }

    #[test]
    fn test_from_config_rejects_bad_header() {
        let config = MapConfig::new().with("PROPAGATE_HEADERS", "bad header");
        assert!(StackConfig::from_config(&config).is_err());
    }
}
