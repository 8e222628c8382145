//! gRPC listener settings.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use kairos_config::{Config, ConfigError, ConfigExt};

/// Default gRPC port.
pub const DEFAULT_GRPC_PORT: u16 = 9000;

/// gRPC listener configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcConfig {
    host: IpAddr,
    port: u16,
    reflection: bool,
    strict_injection: bool,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_GRPC_PORT,
            reflection: false,
            strict_injection: false,
        }
    }
}

impl GrpcConfig {
    /// Reads `HTTP_HOST`, `GRPC_PORT`, `GRPC_ENABLE_REFLECTION` and
    /// `GRPC_STRICT_INJECTION`.
    pub fn from_config(config: &impl Config) -> Result<Self, ConfigError> {
        Ok(Self {
            host: config.get_parsed_or("HTTP_HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?,
            port: config.get_parsed_or("GRPC_PORT", DEFAULT_GRPC_PORT)?,
            reflection: config.get_bool("GRPC_ENABLE_REFLECTION", false)?,
            strict_injection: config.get_bool("GRPC_STRICT_INJECTION", false)?,
        })
    }

    /// Sets the bind host.
    #[must_use]
    pub fn host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Sets the port. `0` picks an ephemeral port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Registers the reflection service.
    #[must_use]
    pub fn reflection(mut self, enabled: bool) -> Self {
        self.reflection = enabled;
        self
    }

    /// Makes injection failures abort the registration.
    #[must_use]
    pub fn strict_injection(mut self, strict: bool) -> Self {
        self.strict_injection = strict;
        self
    }

    /// Address the listener binds.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether reflection is served.
    #[must_use]
    pub const fn reflection_enabled(&self) -> bool {
        self.reflection
    }

    /// Whether injection failures are fatal to a registration.
    #[must_use]
    pub const fn is_strict(&self) -> bool {
        self.strict_injection
    }
}
