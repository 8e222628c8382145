//! Server configuration.
//!
//! Values come from the [`Config`] collaborator via
//! [`ServerConfig::from_config`], or are set directly with the builder.
//!
//! ```rust
//! use kairos_server::ServerConfig;
//! use std::time::Duration;
//!
//! let config = ServerConfig::builder()
//!     .host("127.0.0.1".parse().unwrap())
//!     .http_port(0)
//!     .shutdown_grace(Duration::from_secs(5))
//!     .build();
//!
//! assert_eq!(config.http_addr().port(), 0);
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use kairos_config::{Config, ConfigError, ConfigExt};
use kairos_core::pool::DEFAULT_MAX_IDLE;

/// Default HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Default HTTPS port.
pub const DEFAULT_HTTPS_PORT: u16 = 8443;

/// Default dedicated metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 2121;

/// Default shutdown grace period.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request body limit (10 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Default OpenAPI document location.
pub const DEFAULT_OPENAPI_FILE: &str = "static/openapi.json";

/// HTTPS listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    /// Port to bind.
    pub port: u16,
    /// PEM certificate chain.
    pub cert_file: PathBuf,
    /// PEM private key.
    pub key_file: PathBuf,
}

/// Where `/metrics` is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsPlacement {
    /// Not served.
    Disabled,
    /// On the HTTP listener.
    Shared,
    /// On its own listener and port.
    Dedicated(u16),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    app_name: String,
    app_version: String,
    host: IpAddr,
    http_port: u16,
    tls: Option<TlsSettings>,
    metrics_enabled: bool,
    metrics_port: u16,
    shutdown_grace: Duration,
    request_timeout: Duration,
    max_body_bytes: usize,
    openapi_file: PathBuf,
    os_signals: bool,
    pool_max_idle: usize,
}

impl ServerConfig {
    /// Creates a builder with default values.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Reads the server keys.
    ///
    /// HTTPS is enabled only when both `CERT_FILE` and `KEY_FILE` are set.
    pub fn from_config(config: &impl Config) -> Result<Self, ConfigError> {
        let cert = config.get("CERT_FILE").filter(|v| !v.trim().is_empty());
        let key = config.get("KEY_FILE").filter(|v| !v.trim().is_empty());
        let tls = match (cert, key) {
            (Some(cert), Some(key)) => Some(TlsSettings {
                port: config.get_parsed_or("HTTPS_PORT", DEFAULT_HTTPS_PORT)?,
                cert_file: PathBuf::from(cert.trim()),
                key_file: PathBuf::from(key.trim()),
            }),
            _ => None,
        };

        Ok(Self {
            app_name: config.get_or_default("APP_NAME", "kairos"),
            app_version: config.get_or_default("APP_VERSION", "dev"),
            host: config.get_parsed_or("HTTP_HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?,
            http_port: config.get_parsed_or("HTTP_PORT", DEFAULT_HTTP_PORT)?,
            tls,
            metrics_enabled: config.get_bool("METRICS_ENABLED", true)?,
            metrics_port: config.get_parsed_or("METRICS_PORT", DEFAULT_METRICS_PORT)?,
            shutdown_grace: config.get_duration("SHUTDOWN_GRACE_PERIOD", DEFAULT_SHUTDOWN_GRACE)?,
            request_timeout: config.get_duration("REQUEST_TIMEOUT", DEFAULT_REQUEST_TIMEOUT)?,
            max_body_bytes: config.get_parsed_or("MAX_REQUEST_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)?,
            openapi_file: PathBuf::from(config.get_or_default("OPENAPI_FILE", DEFAULT_OPENAPI_FILE)),
            os_signals: config.get_bool("HANDLE_OS_SIGNALS", true)?,
            pool_max_idle: config.get_parsed_or("CONTEXT_POOL_MAX_IDLE", DEFAULT_MAX_IDLE)?,
        })
    }

    /// Service name.
    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Service version.
    #[must_use]
    pub fn app_version(&self) -> &str {
        &self.app_version
    }

    /// Address the HTTP listener binds.
    #[must_use]
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.http_port)
    }

    /// HTTPS settings, if enabled.
    #[must_use]
    pub fn tls(&self) -> Option<&TlsSettings> {
        self.tls.as_ref()
    }

    /// Address the HTTPS listener binds.
    #[must_use]
    pub fn https_addr(&self) -> Option<SocketAddr> {
        self.tls.as_ref().map(|tls| SocketAddr::new(self.host, tls.port))
    }

    /// Where `/metrics` lives.
    ///
    /// Shares the HTTP listener when both ports are equal and non-zero.
    #[must_use]
    pub fn metrics_placement(&self) -> MetricsPlacement {
        if !self.metrics_enabled {
            MetricsPlacement::Disabled
        } else if self.metrics_port == self.http_port && self.http_port != 0 {
            MetricsPlacement::Shared
        } else {
            MetricsPlacement::Dedicated(self.metrics_port)
        }
    }

    /// Address of the dedicated metrics listener, if any.
    #[must_use]
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        match self.metrics_placement() {
            MetricsPlacement::Dedicated(port) => Some(SocketAddr::new(self.host, port)),
            _ => None,
        }
    }

    /// Bind host shared by every listener.
    #[must_use]
    pub fn host(&self) -> IpAddr {
        self.host
    }

    /// Shutdown deadline shared by all listeners.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    /// Per-request deadline.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Largest accepted request body.
    #[must_use]
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// OpenAPI document path.
    #[must_use]
    pub fn openapi_file(&self) -> &Path {
        &self.openapi_file
    }

    /// Whether SIGINT/SIGTERM trigger shutdown.
    #[must_use]
    pub fn os_signals(&self) -> bool {
        self.os_signals
    }

    /// Idle contexts kept by the request context pool.
    #[must_use]
    pub fn pool_max_idle(&self) -> usize {
        self.pool_max_idle
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self {
            config: ServerConfig {
                app_name: "kairos".to_string(),
                app_version: "dev".to_string(),
                host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                http_port: DEFAULT_HTTP_PORT,
                tls: None,
                metrics_enabled: true,
                metrics_port: DEFAULT_METRICS_PORT,
                shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
                max_body_bytes: DEFAULT_MAX_BODY_BYTES,
                openapi_file: PathBuf::from(DEFAULT_OPENAPI_FILE),
                os_signals: true,
                pool_max_idle: DEFAULT_MAX_IDLE,
            },
        }
    }
}

impl ServerConfigBuilder {
    /// Sets the service name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.config.app_name = name.into();
        self
    }

    /// Sets the service version.
    #[must_use]
    pub fn app_version(mut self, version: impl Into<String>) -> Self {
        self.config.app_version = version.into();
        self
    }

    /// Sets the bind host.
    #[must_use]
    pub fn host(mut self, host: IpAddr) -> Self {
        self.config.host = host;
        self
    }

    /// Sets the HTTP port; `0` picks an ephemeral port.
    #[must_use]
    pub fn http_port(mut self, port: u16) -> Self {
        self.config.http_port = port;
        self
    }

    /// Enables HTTPS.
    #[must_use]
    pub fn tls(mut self, tls: TlsSettings) -> Self {
        self.config.tls = Some(tls);
        self
    }

    /// Enables or disables `/metrics`.
    #[must_use]
    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.config.metrics_enabled = enabled;
        self
    }

    /// Sets the metrics port.
    #[must_use]
    pub fn metrics_port(mut self, port: u16) -> Self {
        self.config.metrics_port = port;
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// Sets the per-request deadline.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Sets the request body limit.
    #[must_use]
    pub fn max_body_bytes(mut self, bytes: usize) -> Self {
        self.config.max_body_bytes = bytes;
        self
    }

    /// Sets the OpenAPI document path.
    #[must_use]
    pub fn openapi_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.openapi_file = path.into();
        self
    }

    /// Enables or disables OS signal handling.
    #[must_use]
    pub fn os_signals(mut self, enabled: bool) -> Self {
        self.config.os_signals = enabled;
        self
    }

    /// Sets how many idle request contexts are kept.
    #[must_use]
    pub fn pool_max_idle(mut self, max_idle: usize) -> Self {
        self.config.pool_max_idle = max_idle;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        self.config
    }
}
