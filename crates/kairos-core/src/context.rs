//! Per-request state.
//!
//! Two types carry request state:
//!
//! - [`RequestContext`] is the mutable, pooled record that every middleware
//!   stage writes into. It is reset between requests and never outlives the
//!   request that acquired it.
//! - [`Context`] is the cheap, cloneable, read-only view handed to user
//!   handlers. The context-injection stage builds it from the
//!   [`RequestContext`] once every other stage has run.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::{Extensions, HeaderMap, Method, Version};
use kairos_router::Params;
use tokio::time::Instant;
use tracing::Span;
use uuid::Uuid;

use crate::di::Container;
use crate::error::{HandlerError, HandlerResult};

/// Longest correlation identifier accepted from a client.
pub const MAX_CORRELATION_ID_LEN: usize = 128;

/// Identifier that links every log line and span of one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Generates a fresh, time-ordered identifier (UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string().into())
    }

    /// Accepts a client-supplied identifier.
    ///
    /// Returns `None` unless the value is 1 to 128 bytes of printable,
    /// non-space ASCII.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let valid = !value.is_empty()
            && value.len() <= MAX_CORRELATION_ID_LEN
            && value.bytes().all(|b| b.is_ascii_graphic());
        valid.then(|| Self(value.into()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection upgrade requested by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upgrade {
    /// A well-formed WebSocket handshake.
    WebSocket,
    /// Any other `Upgrade` protocol, lowercased.
    Other(String),
}

impl Upgrade {
    /// Returns `true` for a WebSocket handshake.
    #[must_use]
    pub const fn is_websocket(&self) -> bool {
        matches!(self, Self::WebSocket)
    }
}

/// What the underlying connection lets a handler do with the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Partial responses can be flushed before the handler returns.
    pub flush: bool,
    /// Server push is available.
    pub push: bool,
}

impl Capabilities {
    /// Derives capabilities from the negotiated protocol version.
    #[must_use]
    pub fn for_version(version: Version) -> Self {
        Self {
            flush: version == Version::HTTP_11 || version == Version::HTTP_2,
            push: version == Version::HTTP_2,
        }
    }
}

/// W3C trace identity of the server span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceInfo {
    /// 32 lowercase hex characters.
    pub trace_id: String,
    /// 16 lowercase hex characters.
    pub span_id: String,
    /// Span id of the remote caller, if a valid `traceparent` arrived.
    pub parent_span_id: Option<String>,
    /// Sampling decision.
    pub sampled: bool,
}

impl TraceInfo {
    /// Renders the `traceparent` header value for this span.
    #[must_use]
    pub fn traceparent(&self) -> String {
        format!(
            "00-{}-{}-{:02x}",
            self.trace_id,
            self.span_id,
            u8::from(self.sampled)
        )
    }
}

/// Peer address, inserted into request extensions by the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

/// Request deadline, inserted into request extensions by the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDeadline(pub Instant);

/// Mutable per-request record written by the middleware stages.
///
/// Instances are recycled through [`ContextPool`](crate::pool::ContextPool).
/// [`reset`](Self::reset) drops everything tied to the previous request.
#[derive(Debug)]
pub struct RequestContext {
    method: Method,
    path: String,
    version: Version,
    remote_addr: Option<SocketAddr>,
    started_at: Option<Instant>,
    correlation_id: Option<CorrelationId>,
    trace_label: Option<String>,
    trace: Option<TraceInfo>,
    span: Span,
    upgrade: Option<Upgrade>,
    capabilities: Capabilities,
    propagated: HeaderMap,
    deadline: Option<Instant>,
    extensions: Extensions,
    injected: Option<Context>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            method: Method::GET,
            path: String::new(),
            version: Version::HTTP_11,
            remote_addr: None,
            started_at: None,
            correlation_id: None,
            trace_label: None,
            trace: None,
            span: Span::none(),
            upgrade: None,
            capabilities: Capabilities::default(),
            propagated: HeaderMap::new(),
            deadline: None,
            extensions: Extensions::new(),
            injected: None,
        }
    }
}

impl RequestContext {
    /// Creates a blank context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all request-specific state.
    ///
    /// Buffers keep their capacity; nothing that refers to the previous
    /// request survives.
    pub fn reset(&mut self) {
        self.method = Method::GET;
        self.path.clear();
        self.version = Version::HTTP_11;
        self.remote_addr = None;
        self.started_at = None;
        self.correlation_id = None;
        self.trace_label = None;
        self.trace = None;
        self.span = Span::none();
        self.upgrade = None;
        self.capabilities = Capabilities::default();
        self.propagated.clear();
        self.deadline = None;
        self.extensions.clear();
        self.injected = None;
    }

    /// Returns `true` if the context holds no request state.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.path.is_empty()
            && self.remote_addr.is_none()
            && self.started_at.is_none()
            && self.correlation_id.is_none()
            && self.trace_label.is_none()
            && self.trace.is_none()
            && self.span.is_none()
            && self.upgrade.is_none()
            && self.capabilities == Capabilities::default()
            && self.propagated.is_empty()
            && self.deadline.is_none()
            && self.extensions.is_empty()
            && self.injected.is_none()
    }

    /// Records the request line, peer address and deadline.
    pub fn begin<B>(&mut self, request: &http::Request<B>) {
        self.method = request.method().clone();
        self.path.push_str(request.uri().path());
        self.version = request.version();
        self.remote_addr = request.extensions().get::<RemoteAddr>().map(|a| a.0);
        self.deadline = request.extensions().get::<RequestDeadline>().map(|d| d.0);
        self.started_at = Some(Instant::now());
    }

    /// Request method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Raw request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Negotiated HTTP version.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Peer address, when the listener recorded one.
    #[must_use]
    pub const fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Time since [`begin`](Self::begin).
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Correlation identifier, once assigned.
    #[must_use]
    pub const fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }

    /// Assigns the correlation identifier.
    pub fn set_correlation_id(&mut self, id: CorrelationId) {
        self.correlation_id = Some(id);
    }

    /// Low-cardinality label for traces and metrics.
    ///
    /// Falls back to the raw path until a pattern has been matched.
    #[must_use]
    pub fn trace_label(&self) -> &str {
        self.trace_label.as_deref().unwrap_or(&self.path)
    }

    /// Sets the normalized trace label.
    pub fn set_trace_label(&mut self, label: impl Into<String>) {
        self.trace_label = Some(label.into());
    }

    /// Trace identity of the server span.
    #[must_use]
    pub const fn trace(&self) -> Option<&TraceInfo> {
        self.trace.as_ref()
    }

    /// Records the trace identity.
    pub fn set_trace(&mut self, trace: TraceInfo) {
        self.trace = Some(trace);
    }

    /// Request span; log inside it to carry the correlation identifier.
    #[must_use]
    pub const fn span(&self) -> &Span {
        &self.span
    }

    /// Installs the request span.
    pub fn set_span(&mut self, span: Span) {
        self.span = span;
    }

    /// Requested connection upgrade.
    #[must_use]
    pub const fn upgrade(&self) -> Option<&Upgrade> {
        self.upgrade.as_ref()
    }

    /// Records a requested connection upgrade.
    pub fn set_upgrade(&mut self, upgrade: Upgrade) {
        self.upgrade = Some(upgrade);
    }

    /// Response capabilities of the connection.
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Records response capabilities.
    pub fn set_capabilities(&mut self, capabilities: Capabilities) {
        self.capabilities = capabilities;
    }

    /// Headers to forward on downstream calls.
    #[must_use]
    pub const fn propagated_headers(&self) -> &HeaderMap {
        &self.propagated
    }

    /// Mutable access to the propagated headers.
    pub fn propagated_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.propagated
    }

    /// Point after which the handler should give up.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Sets the request deadline.
    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// Values stashed by middleware for handlers.
    #[must_use]
    pub const fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Mutable access to the extension map.
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Handler view built by the injection stage, if it has run.
    #[must_use]
    pub const fn context(&self) -> Option<&Context> {
        self.injected.as_ref()
    }

    /// Builds the handler-facing [`Context`] and keeps a handle to it.
    ///
    /// Extensions move into the new context. A correlation identifier is
    /// generated if no earlier stage assigned one.
    pub fn inject(&mut self, container: Arc<Container>) -> Context {
        let correlation_id = self
            .correlation_id
            .get_or_insert_with(CorrelationId::generate)
            .clone();

        let context = Context {
            shared: Arc::new(Shared {
                correlation_id,
                method: self.method.clone(),
                path: self.path.clone(),
                trace_label: self.trace_label().to_string(),
                trace: self.trace.clone(),
                span: self.span.clone(),
                upgrade: self.upgrade.clone(),
                capabilities: self.capabilities,
                propagated: self.propagated.clone(),
                deadline: self.deadline,
                remote_addr: self.remote_addr,
                container,
                extensions: std::mem::take(&mut self.extensions),
            }),
            params: Params::new(),
        };
        self.injected = Some(context.clone());
        context
    }
}

#[derive(Debug)]
struct Shared {
    correlation_id: CorrelationId,
    method: Method,
    path: String,
    trace_label: String,
    trace: Option<TraceInfo>,
    span: Span,
    upgrade: Option<Upgrade>,
    capabilities: Capabilities,
    propagated: HeaderMap,
    deadline: Option<Instant>,
    remote_addr: Option<SocketAddr>,
    container: Arc<Container>,
    extensions: Extensions,
}

/// Read-only request view passed to handlers.
///
/// Cloning is cheap; clones may be moved into spawned tasks and outlive the
/// request without touching pooled state.
#[derive(Debug, Clone)]
pub struct Context {
    shared: Arc<Shared>,
    params: Params,
}

impl Context {
    /// Context not tied to an HTTP request, e.g. for gRPC services or tests.
    #[must_use]
    pub fn detached(container: Arc<Container>) -> Self {
        let mut ctx = RequestContext::new();
        ctx.inject(container)
    }

    /// Returns a copy bound to the given path parameters.
    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Correlation identifier of the request.
    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.shared.correlation_id
    }

    /// Request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.shared.method
    }

    /// Raw request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.shared.path
    }

    /// Value of path parameter `name`.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// All path parameters.
    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// Normalized route label.
    #[must_use]
    pub fn trace_label(&self) -> &str {
        &self.shared.trace_label
    }

    /// Trace identity of the server span.
    #[must_use]
    pub fn trace(&self) -> Option<&TraceInfo> {
        self.shared.trace.as_ref()
    }

    /// Request span.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.shared.span
    }

    /// Requested connection upgrade.
    #[must_use]
    pub fn upgrade(&self) -> Option<&Upgrade> {
        self.shared.upgrade.as_ref()
    }

    /// Response capabilities of the connection.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.shared.capabilities
    }

    /// Headers to forward on downstream calls.
    #[must_use]
    pub fn propagated_headers(&self) -> &HeaderMap {
        &self.shared.propagated
    }

    /// Peer address.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.remote_addr
    }

    /// Values stashed by middleware.
    #[must_use]
    pub fn extensions(&self) -> &Extensions {
        &self.shared.extensions
    }

    /// Shared dependency container.
    #[must_use]
    pub fn container(&self) -> &Arc<Container> {
        &self.shared.container
    }

    /// Resolves a service from the container.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> HandlerResult<Arc<T>> {
        Ok(self.shared.container.resolve_required::<T>()?)
    }

    /// Request deadline.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.shared.deadline
    }

    /// Time left before the deadline; `None` without a deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.shared
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns `true` once the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.shared.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Runs `fut`, giving up with [`HandlerError::Timeout`] at the deadline.
    pub async fn with_deadline<F, T>(&self, fut: F) -> HandlerResult<T>
    where
        F: Future<Output = T>,
    {
        match self.shared.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| HandlerError::Timeout),
            None => Ok(fut.await),
        }
    }
}
