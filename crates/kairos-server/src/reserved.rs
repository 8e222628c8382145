//! Routes the server registers on its own.
//!
//! | Path | Methods | Registered when |
//! |---|---|---|
//! | `/.well-known/health` | GET, HEAD | always |
//! | `/.well-known/alive` | GET, HEAD | always |
//! | `/.well-known/openapi.json` | GET | the OpenAPI file exists at startup |
//! | `/.well-known/swagger` | GET | the OpenAPI file exists at startup |
//! | `/metrics` | GET | metrics share the HTTP port |

use std::io;
use std::path::Path;

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, StatusCode};
use kairos_core::{handler_fn, response, BoxedHandler, HandlerError};
use kairos_router::{RouteError, Router};

use crate::health::{HealthCheck, Heartbeat};

/// Health check path.
pub const HEALTH_PATH: &str = "/.well-known/health";

/// Heartbeat path.
pub const ALIVE_PATH: &str = "/.well-known/alive";

/// OpenAPI document path.
pub const OPENAPI_PATH: &str = "/.well-known/openapi.json";

/// Swagger UI path.
pub const SWAGGER_PATH: &str = "/.well-known/swagger";

/// Prometheus exposition path.
pub const METRICS_PATH: &str = "/metrics";

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

const SWAGGER_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <title>API documentation</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js" crossorigin></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: "/.well-known/openapi.json", dom_id: "#swagger-ui" });
    };
  </script>
</body>
</html>
"##;

/// The reserved route set for one server.
#[derive(Debug, Clone)]
pub struct ReservedRoutes {
    health: HealthCheck,
    openapi: Option<Bytes>,
    metrics: bool,
}

impl ReservedRoutes {
    /// Health and heartbeat only.
    #[must_use]
    pub fn new(health: HealthCheck) -> Self {
        Self {
            health,
            openapi: None,
            metrics: false,
        }
    }

    /// Serves `document` and the Swagger UI.
    #[must_use]
    pub fn openapi_document(mut self, document: impl Into<Bytes>) -> Self {
        self.openapi = Some(document.into());
        self
    }

    /// Loads the OpenAPI document from `path` if it exists.
    ///
    /// A missing file leaves the documentation routes out. An unreadable
    /// one is logged and treated the same way.
    #[must_use]
    pub fn load_openapi(mut self, path: &Path) -> Self {
        match std::fs::read(path) {
            Ok(document) => self.openapi = Some(Bytes::from(document)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no OpenAPI document, documentation routes disabled");
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read OpenAPI document");
            }
        }
        self
    }

    /// Serves `/metrics` alongside the other reserved routes.
    #[must_use]
    pub fn metrics(mut self, enabled: bool) -> Self {
        self.metrics = enabled;
        self
    }

    /// Returns `true` when the documentation routes will be registered.
    #[must_use]
    pub fn has_openapi(&self) -> bool {
        self.openapi.is_some()
    }

    /// Adds the reserved routes to `router`.
    pub fn register(&self, router: &mut Router<BoxedHandler>) -> Result<(), RouteError> {
        let health = self.health.clone();
        let health_handler = handler_fn(move |_ctx, _req| {
            let status = health.status();
            async move { response::json(StatusCode::OK, &status) }
        });
        let alive_handler = handler_fn(|_ctx, _req| async {
            response::json(StatusCode::OK, &Heartbeat::default())
        });

        for method in [Method::GET, Method::HEAD] {
            router.route(method.clone(), HEALTH_PATH, health_handler.clone())?;
            router.route(method, ALIVE_PATH, alive_handler.clone())?;
        }

        if let Some(document) = &self.openapi {
            let document = document.clone();
            router.route(
                Method::GET,
                OPENAPI_PATH,
                handler_fn(move |_ctx, _req| {
                    let document = document.clone();
                    async move { Ok(response::raw_json(StatusCode::OK, document)) }
                }),
            )?;
            router.route(
                Method::GET,
                SWAGGER_PATH,
                handler_fn(|_ctx, _req| async {
                    let mut response = response::text(StatusCode::OK, SWAGGER_HTML);
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
                    Ok(response)
                }),
            )?;
        }

        if self.metrics {
            router.route(Method::GET, METRICS_PATH, metrics_handler())?;
        }
        Ok(())
    }
}

/// Renders the process Prometheus recorder.
///
/// Answers 503 when no recorder was installed.
#[must_use]
pub fn metrics_handler() -> BoxedHandler {
    handler_fn(|_ctx, _req| async {
        let handle = kairos_telemetry::metrics::metrics_handle()
            .ok_or_else(|| HandlerError::Unavailable("metrics recorder not installed".into()))?;
        let mut response = response::text(StatusCode::OK, kairos_telemetry::metrics::render(handle));
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE));
        Ok(response)
    })
}
