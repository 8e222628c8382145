//! CORS (Cross-Origin Resource Sharing) stage.
//!
//! Preflight requests (`OPTIONS` with `Origin` and
//! `Access-Control-Request-Method`) are answered here with 204 and never
//! reach the router. Other requests carrying an allowed `Origin` get
//! `Access-Control-Allow-Origin` (plus credentials and expose headers when
//! configured) on the way out.
//!
//! ## Configuration keys
//!
//! | Key | Default |
//! |---|---|
//! | `ACCESS_CONTROL_ALLOW_ORIGIN` | `*` |
//! | `ACCESS_CONTROL_ALLOW_METHODS` | `GET,HEAD,POST,PUT,PATCH,DELETE,OPTIONS` |
//! | `ACCESS_CONTROL_ALLOW_HEADERS` | `Authorization,Content-Type,X-Correlation-ID,traceparent,tracestate` |
//! | `ACCESS_CONTROL_EXPOSE_HEADERS` | none |
//! | `ACCESS_CONTROL_ALLOW_CREDENTIALS` | `false` |
//! | `ACCESS_CONTROL_MAX_AGE` | `86400` |

use std::time::Duration;

use http::{HeaderValue, Method, StatusCode};
use kairos_config::{Config, ConfigError, ConfigExt};
use kairos_core::{response, BoxFuture, Request, RequestContext, Response};

use crate::middleware::{Middleware, Next};

/// CORS header names.
pub mod headers {
    /// `Access-Control-Allow-Origin` header.
    pub const ALLOW_ORIGIN: &str = "access-control-allow-origin";
    /// `Access-Control-Allow-Methods` header.
    pub const ALLOW_METHODS: &str = "access-control-allow-methods";
    /// `Access-Control-Allow-Headers` header.
    pub const ALLOW_HEADERS: &str = "access-control-allow-headers";
    /// `Access-Control-Allow-Credentials` header.
    pub const ALLOW_CREDENTIALS: &str = "access-control-allow-credentials";
    /// `Access-Control-Max-Age` header.
    pub const MAX_AGE: &str = "access-control-max-age";
    /// `Access-Control-Expose-Headers` header.
    pub const EXPOSE_HEADERS: &str = "access-control-expose-headers";
    /// `Access-Control-Request-Method` header (preflight).
    pub const REQUEST_METHOD: &str = "access-control-request-method";
    /// `Access-Control-Request-Headers` header (preflight).
    pub const REQUEST_HEADERS: &str = "access-control-request-headers";
    /// `Origin` header.
    pub const ORIGIN: &str = "origin";
    /// `Vary` header.
    pub const VARY: &str = "vary";
}

const DEFAULT_METHODS: &[&str] = &["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"];
const DEFAULT_HEADERS: &[&str] = &[
    "Authorization",
    "Content-Type",
    "X-Correlation-ID",
    "traceparent",
    "tracestate",
];
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(86_400);

/// Represents the set of allowed origins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// Allow any origin (wildcard `*`).
    Any,
    /// Allow specific origins.
    List(Vec<String>),
}

impl AllowedOrigins {
    /// Checks if an origin is allowed.
    #[must_use]
    pub fn is_allowed(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(origins) => origins.iter().any(|o| o == origin),
        }
    }
}

/// CORS policy.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    allowed_origins: AllowedOrigins,
    allowed_methods: Vec<Method>,
    allowed_headers: Vec<String>,
    expose_headers: Vec<String>,
    allow_credentials: bool,
    max_age: Option<Duration>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: AllowedOrigins::Any,
            allowed_methods: DEFAULT_METHODS
                .iter()
                .filter_map(|m| m.parse().ok())
                .collect(),
            allowed_headers: DEFAULT_HEADERS.iter().map(|h| h.to_lowercase()).collect(),
            expose_headers: Vec::new(),
            allow_credentials: false,
            max_age: Some(DEFAULT_MAX_AGE),
        }
    }
}

impl CorsConfig {
    /// Creates a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> CorsBuilder {
        CorsBuilder::default()
    }

    /// Reads the `ACCESS_CONTROL_*` keys.
    pub fn from_config(config: &impl Config) -> Result<Self, ConfigError> {
        let origins = config.get_list("ACCESS_CONTROL_ALLOW_ORIGIN", &["*"]);
        let allowed_origins = if origins.iter().any(|o| o == "*") {
            AllowedOrigins::Any
        } else {
            AllowedOrigins::List(origins)
        };

        let allowed_methods = config
            .get_list("ACCESS_CONTROL_ALLOW_METHODS", DEFAULT_METHODS)
            .into_iter()
            .map(|m| {
                m.to_ascii_uppercase().parse::<Method>().map_err(|_| {
                    ConfigError::invalid_value("ACCESS_CONTROL_ALLOW_METHODS", &m, "not an HTTP method")
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let max_age = config.get_duration("ACCESS_CONTROL_MAX_AGE", DEFAULT_MAX_AGE)?;

        Ok(Self {
            allowed_origins,
            allowed_methods,
            allowed_headers: lowercase(config.get_list("ACCESS_CONTROL_ALLOW_HEADERS", DEFAULT_HEADERS)),
            expose_headers: lowercase(config.get_list("ACCESS_CONTROL_EXPOSE_HEADERS", &[])),
            allow_credentials: config.get_bool("ACCESS_CONTROL_ALLOW_CREDENTIALS", false)?,
            max_age: (!max_age.is_zero()).then_some(max_age),
        })
    }

    /// Allowed origins.
    #[must_use]
    pub const fn allowed_origins(&self) -> &AllowedOrigins {
        &self.allowed_origins
    }

    /// Whether credentials are allowed.
    #[must_use]
    pub const fn allow_credentials(&self) -> bool {
        self.allow_credentials
    }

    /// Value for `Access-Control-Allow-Origin` in reply to `origin`.
    ///
    /// With credentials enabled a wildcard policy echoes the origin, since
    /// browsers reject `*` on credentialed responses.
    fn origin_value(&self, origin: &str) -> Option<HeaderValue> {
        match &self.allowed_origins {
            AllowedOrigins::Any if !self.allow_credentials => Some(HeaderValue::from_static("*")),
            allowed if allowed.is_allowed(origin) => HeaderValue::from_str(origin).ok(),
            _ => None,
        }
    }

    fn allows_header(&self, header: &str) -> bool {
        self.allowed_headers.iter().any(|h| h == "*" || h == header)
    }
}

fn lowercase(values: Vec<String>) -> Vec<String> {
    values.into_iter().map(|v| v.to_lowercase()).collect()
}

/// Builder for [`CorsConfig`].
#[derive(Debug, Clone, Default)]
pub struct CorsBuilder {
    config: CorsConfig,
}

impl CorsBuilder {
    /// Allows any origin (wildcard `*`).
    #[must_use]
    pub fn allow_any_origin(mut self) -> Self {
        self.config.allowed_origins = AllowedOrigins::Any;
        self
    }

    /// Adds an allowed origin, replacing a wildcard policy.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        match &mut self.config.allowed_origins {
            AllowedOrigins::Any => {
                self.config.allowed_origins = AllowedOrigins::List(vec![origin.into()]);
            }
            AllowedOrigins::List(origins) => origins.push(origin.into()),
        }
        self
    }

    /// Sets the allowed HTTP methods.
    #[must_use]
    pub fn allow_methods<I>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = Method>,
    {
        self.config.allowed_methods = methods.into_iter().collect();
        self
    }

    /// Sets the allowed request headers. `*` allows any.
    #[must_use]
    pub fn allow_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_headers = headers.into_iter().map(|h| h.into().to_lowercase()).collect();
        self
    }

    /// Sets headers exposed to scripts.
    #[must_use]
    pub fn expose_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.expose_headers = headers.into_iter().map(|h| h.into().to_lowercase()).collect();
        self
    }

    /// Sets whether to allow credentials.
    #[must_use]
    pub const fn allow_credentials(mut self, allow: bool) -> Self {
        self.config.allow_credentials = allow;
        self
    }

    /// Sets the preflight cache duration.
    #[must_use]
    pub const fn max_age(mut self, duration: Duration) -> Self {
        self.config.max_age = Some(duration);
        self
    }

    /// Disables preflight caching.
    #[must_use]
    pub const fn no_max_age(mut self) -> Self {
        self.config.max_age = None;
        self
    }

    /// Finishes the policy.
    #[must_use]
    pub fn build(self) -> CorsConfig {
        self.config
    }
}

/// Applies a [`CorsConfig`] to every request.
#[derive(Debug, Clone, Default)]
pub struct CorsMiddleware {
    config: CorsConfig,
}

impl CorsMiddleware {
    /// Creates the stage.
    #[must_use]
    pub const fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    fn is_preflight(request: &Request) -> bool {
        request.method() == Method::OPTIONS
            && request.headers().contains_key(headers::ORIGIN)
            && request.headers().contains_key(headers::REQUEST_METHOD)
    }

    fn origin(request: &Request) -> Option<&str> {
        request
            .headers()
            .get(headers::ORIGIN)
            .and_then(|v| v.to_str().ok())
    }

    fn handle_preflight(&self, request: &Request) -> Response {
        let Some(origin) = Self::origin(request) else {
            return forbidden("missing origin");
        };
        let Some(allow_origin) = self.config.origin_value(origin) else {
            return forbidden("origin not allowed");
        };

        let requested_method = request
            .headers()
            .get(headers::REQUEST_METHOD)
            .and_then(|v| v.to_str().ok())
            .and_then(|m| m.parse::<Method>().ok());
        match requested_method {
            Some(method) if self.config.allowed_methods.contains(&method) => {}
            _ => return forbidden("method not allowed"),
        }

        if let Some(requested) = request
            .headers()
            .get(headers::REQUEST_HEADERS)
            .and_then(|v| v.to_str().ok())
        {
            let denied = requested
                .split(',')
                .map(|h| h.trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .find(|h| !self.config.allows_header(h));
            if let Some(header) = denied {
                return forbidden(&format!("header '{header}' not allowed"));
            }
        }

        let mut response = response::empty(StatusCode::NO_CONTENT);
        let out = response.headers_mut();
        out.insert(headers::ALLOW_ORIGIN, allow_origin);

        let methods: Vec<&str> = self.config.allowed_methods.iter().map(Method::as_str).collect();
        if let Ok(value) = HeaderValue::from_str(&methods.join(", ")) {
            out.insert(headers::ALLOW_METHODS, value);
        }
        if !self.config.allowed_headers.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.config.allowed_headers.join(", ")) {
                out.insert(headers::ALLOW_HEADERS, value);
            }
        }
        if self.config.allow_credentials {
            out.insert(headers::ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        if let Some(max_age) = self.config.max_age {
            out.insert(headers::MAX_AGE, HeaderValue::from(max_age.as_secs()));
        }
        out.insert(
            headers::VARY,
            HeaderValue::from_static(
                "Origin, Access-Control-Request-Method, Access-Control-Request-Headers",
            ),
        );
        response
    }

    fn decorate(&self, response: &mut Response, allow_origin: HeaderValue) {
        let out = response.headers_mut();
        out.insert(headers::ALLOW_ORIGIN, allow_origin);
        if self.config.allow_credentials {
            out.insert(headers::ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        if !self.config.expose_headers.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.config.expose_headers.join(", ")) {
                out.insert(headers::EXPOSE_HEADERS, value);
            }
        }
        out.append(headers::VARY, HeaderValue::from_static("Origin"));
    }
}

fn forbidden(message: &str) -> Response {
    response::error(StatusCode::FORBIDDEN, "forbidden", message)
}

impl Middleware for CorsMiddleware {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        if Self::is_preflight(&request) {
            let response = self.handle_preflight(&request);
            return Box::pin(async move { response });
        }

        let allow_origin = Self::origin(&request).and_then(|o| self.config.origin_value(o));
        Box::pin(async move {
            let mut response = next.run(ctx, request).await;
            if let Some(value) = allow_origin {
                self.decorate(&mut response, value);
            }
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{build, ok, request, run};
    use kairos_config::MapConfig;

    fn preflight(origin: &str, method: &str, headers_list: Option<&str>) -> Request {
        let mut builder = request(Method::OPTIONS, "/test")
            .header(headers::ORIGIN, origin)
            .header(headers::REQUEST_METHOD, method);
        if let Some(h) = headers_list {
            builder = builder.header(headers::REQUEST_HEADERS, h);
        }
        build(builder)
    }

    fn restricted() -> CorsMiddleware {
        CorsMiddleware::new(
            CorsConfig::builder()
                .allow_origin("https://example.com")
                .allow_methods([Method::GET, Method::POST])
                .build(),
        )
    }

    #[test]
    fn test_default_allows_any_origin() {
        let config = CorsConfig::default();
        assert_eq!(config.allowed_origins(), &AllowedOrigins::Any);
        assert!(!config.allow_credentials());
    }

    #[test]
    fn test_from_config() {
        let config = MapConfig::new()
            .with("ACCESS_CONTROL_ALLOW_ORIGIN", "https://a.com, https://b.com")
            .with("ACCESS_CONTROL_ALLOW_METHODS", "get,post")
            .with("ACCESS_CONTROL_ALLOW_CREDENTIALS", "true")
            .with("ACCESS_CONTROL_MAX_AGE", "0");
        let cors = CorsConfig::from_config(&config).unwrap();

        assert_eq!(
            cors.allowed_origins(),
            &AllowedOrigins::List(vec!["https://a.com".into(), "https://b.com".into()])
        );
        assert_eq!(cors.allowed_methods, [Method::GET, Method::POST]);
        assert!(cors.allow_credentials());
        assert!(cors.max_age.is_none());
    }

    #[test]
    fn test_from_config_rejects_bad_method() {
        let config = MapConfig::new().with("ACCESS_CONTROL_ALLOW_METHODS", "GET,NOT A METHOD");
        assert!(CorsConfig::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_preflight_allowed_origin() {
        let (response, _) = run(&restricted(), ok, preflight("https://example.com", "POST", None)).await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[headers::ALLOW_ORIGIN], "https://example.com");
        assert_eq!(response.headers()[headers::ALLOW_METHODS], "GET, POST");
        assert_eq!(response.headers()[headers::MAX_AGE], "86400");
    }

    #[tokio::test]
    async fn test_preflight_disallowed_origin() {
        let (response, _) = run(&restricted(), ok, preflight("https://evil.com", "POST", None)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_preflight_disallowed_method() {
        let (response, _) =
            run(&restricted(), ok, preflight("https://example.com", "DELETE", None)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_preflight_disallowed_header() {
        let (response, _) = run(
            &restricted(),
            ok,
            preflight("https://example.com", "GET", Some("X-Secret")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_preflight_never_reaches_endpoint() {
        fn unreachable(_: &mut RequestContext, _: Request) -> BoxFuture<'static, Response> {
            panic!("preflight reached the endpoint")
        }
        let (response, _) = run(
            &CorsMiddleware::default(),
            unreachable,
            preflight("https://any.com", "GET", Some("content-type")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[headers::ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn test_simple_request_gets_headers() {
        let cors = CorsMiddleware::new(
            CorsConfig::builder()
                .allow_origin("https://example.com")
                .allow_credentials(true)
                .expose_headers(["X-Correlation-ID"])
                .build(),
        );
        let req = build(request(Method::GET, "/").header(headers::ORIGIN, "https://example.com"));
        let (response, _) = run(&cors, ok, req).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[headers::ALLOW_ORIGIN], "https://example.com");
        assert_eq!(response.headers()[headers::ALLOW_CREDENTIALS], "true");
        assert_eq!(response.headers()[headers::EXPOSE_HEADERS], "x-correlation-id");
    }

    #[tokio::test]
    async fn test_wildcard_with_credentials_echoes_origin() {
        let cors = CorsMiddleware::new(CorsConfig::builder().allow_credentials(true).build());
        let req = build(request(Method::GET, "/").header(headers::ORIGIN, "https://x.com"));
        let (response, _) = run(&cors, ok, req).await;
        assert_eq!(response.headers()[headers::ALLOW_ORIGIN], "https://x.com");
    }

    #[tokio::test]
    async fn test_disallowed_origin_gets_no_headers() {
        let req = build(request(Method::GET, "/").header(headers::ORIGIN, "https://evil.com"));
        let (response, _) = run(&restricted(), ok, req).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(headers::ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_request_without_origin_untouched() {
        let (response, _) = run(&restricted(), ok, build(request(Method::GET, "/"))).await;
        assert!(response.headers().get(headers::ALLOW_ORIGIN).is_none());
    }
}
