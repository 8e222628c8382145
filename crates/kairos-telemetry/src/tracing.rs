//! W3C trace context and optional OTLP export.
//!
//! Incoming `traceparent`/`tracestate` headers are parsed with the
//! OpenTelemetry [`TraceContextPropagator`]. A request with a valid parent
//! joins that trace; anything else starts a new one. When OTLP export is
//! enabled, every [`ServerSpan`] is also reported to the collector.

use std::sync::atomic::{AtomicBool, Ordering};

use http::HeaderMap;
use kairos_config::{Config, ConfigExt};
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{
    Span as _, SpanContext, SpanId, SpanKind, Status, TraceContextExt, TraceFlags, TraceId,
    TraceState, Tracer as _,
};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// W3C trace parent header.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// W3C trace state header.
pub const TRACESTATE_HEADER: &str = "tracestate";

static EXPORT_ENABLED: AtomicBool = AtomicBool::new(false);

/// Trace export configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Export spans over OTLP.
    pub enabled: bool,

    /// Collector endpoint.
    pub otlp_endpoint: String,

    /// `service.name` resource attribute.
    pub service_name: String,

    /// `service.version` resource attribute.
    pub service_version: String,

    /// Fraction of new traces to sample, 0.0 to 1.0.
    pub sample_ratio: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            service_name: "kairos".to_string(),
            service_version: "dev".to_string(),
            sample_ratio: 1.0,
        }
    }
}

impl TracingConfig {
    /// Reads `TRACE_EXPORTER`, `TRACER_URL` and `TRACER_RATIO`.
    pub fn from_config(config: &impl Config) -> TelemetryResult<Self> {
        let defaults = Self::default();
        let exporter = config.get_or_default("TRACE_EXPORTER", "none");

        Ok(Self {
            enabled: exporter.trim().eq_ignore_ascii_case("otlp"),
            otlp_endpoint: config.get_or_default("TRACER_URL", &defaults.otlp_endpoint),
            service_name: config.get_or_default("APP_NAME", &defaults.service_name),
            service_version: config.get_or_default("APP_VERSION", &defaults.service_version),
            sample_ratio: config
                .get_parsed_or("TRACER_RATIO", defaults.sample_ratio)?
                .clamp(0.0, 1.0),
        })
    }
}

/// Installs the W3C propagator and, if enabled, the OTLP exporter.
///
/// Returns the provider so it can be flushed at shutdown.
pub fn init_tracing(config: &TracingConfig) -> TelemetryResult<Option<TracerProvider>> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    if !config.enabled {
        return Ok(None);
    }

    let resource = Resource::new([
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_NAME,
            config.service_name.clone(),
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_VERSION,
            config.service_version.clone(),
        ),
    ]);

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .map_err(|e| TelemetryError::TracingInit(e.to_string()))?;

    let sampler = if config.sample_ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if config.sample_ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(config.sample_ratio)
    };

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_sampler(Sampler::ParentBased(Box::new(sampler)))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    global::set_tracer_provider(provider.clone());
    EXPORT_ENABLED.store(true, Ordering::Release);
    Ok(Some(provider))
}

/// Returns `true` once OTLP export is active.
#[must_use]
pub fn export_enabled() -> bool {
    EXPORT_ENABLED.load(Ordering::Acquire)
}

/// Stops exporting and flushes buffered spans.
pub fn shutdown_tracing(provider: &TracerProvider) {
    EXPORT_ENABLED.store(false, Ordering::Release);
    for result in provider.force_flush() {
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to flush spans");
        }
    }
    if let Err(e) = provider.shutdown() {
        tracing::warn!(error = %e, "failed to shut down tracer provider");
    }
}

/// Reads propagation headers from an [`http::HeaderMap`].
pub struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(http::HeaderName::as_str).collect()
    }
}

/// Writes propagation headers into an [`http::HeaderMap`].
pub struct HeaderInjector<'a>(pub &'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(val)) = (
            http::header::HeaderName::try_from(key),
            http::header::HeaderValue::try_from(value),
        ) {
            self.0.insert(name, val);
        }
    }
}

/// Trace identity of one server-side span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanIdentity {
    /// Trace the span belongs to.
    pub trace_id: TraceId,
    /// This span.
    pub span_id: SpanId,
    /// Remote parent, when the caller sent a valid `traceparent`.
    pub parent_span_id: Option<SpanId>,
    /// Sampling decision.
    pub sampled: bool,
    /// Vendor state carried through unchanged.
    pub trace_state: TraceState,
}

impl SpanIdentity {
    /// Joins the caller's trace, or starts a new one.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let propagator = TraceContextPropagator::new();
        let parent = propagator.extract(&HeaderExtractor(headers));
        let remote = parent.span().span_context().clone();
        let ids = RandomIdGenerator::default();

        if remote.is_valid() {
            Self {
                trace_id: remote.trace_id(),
                span_id: ids.new_span_id(),
                parent_span_id: Some(remote.span_id()),
                sampled: remote.is_sampled(),
                trace_state: remote.trace_state().clone(),
            }
        } else {
            Self {
                trace_id: ids.new_trace_id(),
                span_id: ids.new_span_id(),
                parent_span_id: None,
                sampled: true,
                trace_state: TraceState::default(),
            }
        }
    }

    fn span_context(&self) -> SpanContext {
        let flags = if self.sampled {
            TraceFlags::SAMPLED
        } else {
            TraceFlags::default()
        };
        SpanContext::new(
            self.trace_id,
            self.span_id,
            flags,
            false,
            self.trace_state.clone(),
        )
    }

    /// Writes `traceparent` (and `tracestate`, if any) for this span.
    pub fn inject(&self, headers: &mut HeaderMap) {
        let cx = opentelemetry::Context::new().with_remote_span_context(self.span_context());
        TraceContextPropagator::new().inject_context(&cx, &mut HeaderInjector(headers));
    }

    /// `traceparent` value for this span.
    #[must_use]
    pub fn traceparent(&self) -> String {
        let mut headers = HeaderMap::new();
        self.inject(&mut headers);
        headers
            .get(TRACEPARENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }
}

/// A server span, exported over OTLP when export is enabled.
pub struct ServerSpan {
    identity: SpanIdentity,
    exported: Option<global::BoxedSpan>,
}

impl std::fmt::Debug for ServerSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSpan")
            .field("identity", &self.identity)
            .field("exported", &self.exported.is_some())
            .finish()
    }
}

impl ServerSpan {
    /// Starts a span named `name` as a child of whatever `headers` carry.
    #[must_use]
    pub fn start(name: String, headers: &HeaderMap, attributes: Vec<KeyValue>) -> Self {
        let identity = SpanIdentity::from_headers(headers);
        let exported = export_enabled().then(|| {
            let parent = match identity.parent_span_id {
                Some(parent_span_id) => opentelemetry::Context::new().with_remote_span_context(
                    SpanContext::new(
                        identity.trace_id,
                        parent_span_id,
                        if identity.sampled {
                            TraceFlags::SAMPLED
                        } else {
                            TraceFlags::default()
                        },
                        true,
                        identity.trace_state.clone(),
                    ),
                ),
                None => opentelemetry::Context::new(),
            };
            global::tracer("kairos").build_with_context(
                opentelemetry::trace::SpanBuilder::from_name(name)
                    .with_kind(SpanKind::Server)
                    .with_trace_id(identity.trace_id)
                    .with_span_id(identity.span_id)
                    .with_attributes(attributes),
                &parent,
            )
        });

        Self { identity, exported }
    }

    /// Trace identity of this span.
    #[must_use]
    pub const fn identity(&self) -> &SpanIdentity {
        &self.identity
    }

    /// Ends the span, marking it failed when `error` is set.
    pub fn finish(mut self, attributes: Vec<KeyValue>, error: Option<String>) {
        if let Some(mut span) = self.exported.take() {
            span.set_attributes(attributes);
            if let Some(description) = error {
                span.set_status(Status::error(description));
            }
            span.end();
        }
    }
}
