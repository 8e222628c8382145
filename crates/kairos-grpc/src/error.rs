//! gRPC listener errors.

use std::net::SocketAddr;

use kairos_config::ConfigError;
use kairos_core::InjectionError;
use kairos_server::{ListenerKind, ServerError};
use thiserror::Error;

/// Result alias for gRPC setup.
pub type GrpcResult<T> = Result<T, GrpcError>;

/// Errors raised while building or running the gRPC listener.
#[derive(Debug, Error)]
pub enum GrpcError {
    /// The socket could not be bound.
    #[error("failed to bind grpc listener on {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Tonic failed while serving.
    #[error("grpc transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A service rejected the container under strict injection.
    #[error("injection into {service} failed: {source}")]
    Injection {
        /// Fully qualified service name.
        service: &'static str,
        /// Why injection failed.
        #[source]
        source: InjectionError,
    },

    /// The same service name was registered twice.
    #[error("grpc service {0} is already registered")]
    DuplicateService(&'static str),

    /// The reflection service could not be built.
    #[error("failed to build reflection service: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),

    /// Invalid settings.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<GrpcError> for ServerError {
    fn from(err: GrpcError) -> Self {
        match err {
            GrpcError::Bind { addr, source } => Self::Bind {
                listener: ListenerKind::Grpc,
                addr,
                source,
            },
            GrpcError::Config(err) => Self::Config(err),
            other => Self::Serve {
                listener: ListenerKind::Grpc,
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_maps_to_server_bind() {
        let err = GrpcError::Bind {
            addr: "127.0.0.1:9000".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        let err: ServerError = err.into();
        assert!(matches!(err, ServerError::Bind { listener: ListenerKind::Grpc, .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_injection_message() {
        let err = GrpcError::Injection {
            service: "orders.v1.Orders",
            source: InjectionError::rejected("orders", "container already set"),
        };
        assert_eq!(
            err.to_string(),
            "injection into orders.v1.Orders failed: cannot inject container into orders: container already set"
        );
    }

    #[test]
    fn test_duplicate_maps_to_serve() {
        let err: ServerError = GrpcError::DuplicateService("grpc.health.v1.Health").into();
        assert!(matches!(err, ServerError::Serve { listener: ListenerKind::Grpc, .. }));
    }
}
