//! gRPC service registration and the tonic-backed listener.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kairos_core::Container;
//! use kairos_grpc::{GrpcConfig, GrpcServer};
//! use kairos_server::Supervisor;
//! use std::time::Duration;
//!
//! # fn build() -> Result<(), kairos_grpc::GrpcError> {
//! let grpc = GrpcServer::new(GrpcConfig::default().reflection(true), Arc::new(Container::new()));
//! // Generated services are added with `grpc.add_service(GreeterServer::new(greeter))?`.
//! let mut supervisor = Supervisor::new(Duration::from_secs(30));
//! supervisor.add(grpc.into_listener()?);
//! # Ok(())
//! # }
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use kairos_core::{BoxFuture, Container, InjectContainer};
use kairos_server::{
    BoundListener, Drain, Listener, ListenerKind, ServerError, ServerResult, ShutdownSignal,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::body::BoxBody;
use tonic::server::NamedService;
use tonic::service::{Routes, RoutesBuilder};
use tower::{Service, ServiceBuilder};

use crate::config::GrpcConfig;
use crate::error::{GrpcError, GrpcResult};
use crate::layers::{ObservabilityLayer, RecoveryLayer};

/// Name of the reflection service once registered.
pub const REFLECTION_SERVICE: &str = "grpc.reflection.v1.ServerReflection";

/// Collects gRPC services before the listener is built.
pub struct GrpcServer {
    config: GrpcConfig,
    container: Arc<Container>,
    routes: RoutesBuilder,
    services: Vec<&'static str>,
    descriptors: Vec<&'static [u8]>,
}

impl GrpcServer {
    /// Creates an empty server that injects `container` into opted-in services.
    #[must_use]
    pub fn new(config: GrpcConfig, container: Arc<Container>) -> Self {
        Self {
            config,
            container,
            routes: RoutesBuilder::default(),
            services: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    /// Settings.
    #[must_use]
    pub fn config(&self) -> &GrpcConfig {
        &self.config
    }

    /// Adds a generated service.
    pub fn add_service<S>(&mut self, service: S) -> GrpcResult<&mut Self>
    where
        S: Service<http::Request<BoxBody>, Response = http::Response<BoxBody>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        if self.services.contains(&S::NAME) {
            return Err(GrpcError::DuplicateService(S::NAME));
        }
        self.routes.add_service(service);
        self.services.push(S::NAME);
        tracing::debug!(service = S::NAME, "grpc service registered");
        Ok(self)
    }

    /// Injects the container into `implementation`, wraps it with `wrap`
    /// (usually the generated `XxxServer::new`) and adds the result.
    ///
    /// When the implementation rejects the container, strict injection
    /// aborts the registration. Otherwise the failure is logged and the
    /// service is registered without it.
    pub fn add_injected<T, S, F>(&mut self, mut implementation: T, wrap: F) -> GrpcResult<&mut Self>
    where
        T: InjectContainer,
        F: FnOnce(T) -> S,
        S: Service<http::Request<BoxBody>, Response = http::Response<BoxBody>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        if let Err(source) = implementation.set_container(Arc::clone(&self.container)) {
            if self.config.is_strict() {
                return Err(GrpcError::Injection {
                    service: S::NAME,
                    source,
                });
            }
            tracing::warn!(
                service = S::NAME,
                error = %source,
                "container injection failed, registering without it"
            );
        }
        self.add_service(wrap(implementation))
    }

    /// Adds an encoded `FileDescriptorSet` for the reflection service.
    pub fn register_file_descriptor_set(&mut self, encoded: &'static [u8]) -> &mut Self {
        self.descriptors.push(encoded);
        self
    }

    /// Names of the registered services.
    #[must_use]
    pub fn services(&self) -> &[&'static str] {
        &self.services
    }

    /// Returns `true` once at least one service is registered.
    #[must_use]
    pub fn has_services(&self) -> bool {
        !self.services.is_empty()
    }

    /// Builds the listener, adding reflection when enabled.
    pub fn into_listener(mut self) -> GrpcResult<GrpcListener> {
        if self.config.reflection_enabled() {
            let mut builder = tonic_reflection::server::Builder::configure();
            for descriptor in self.descriptors.iter().copied() {
                builder = builder.register_encoded_file_descriptor_set(descriptor);
            }
            let reflection = builder.build_v1()?;
            self.add_service(reflection)?;
        }

        for service in &self.services {
            tracing::info!(service, "grpc service registered");
        }

        Ok(GrpcListener {
            addr: self.config.addr(),
            routes: self.routes.routes(),
            services: self.services,
        })
    }
}

impl std::fmt::Debug for GrpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcServer")
            .field("config", &self.config)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

/// gRPC listener ready to be handed to a supervisor.
pub struct GrpcListener {
    addr: SocketAddr,
    routes: Routes,
    services: Vec<&'static str>,
}

impl GrpcListener {
    /// Address the listener will bind.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Names of the services it serves.
    #[must_use]
    pub fn services(&self) -> &[&'static str] {
        &self.services
    }
}

impl std::fmt::Debug for GrpcListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcListener")
            .field("addr", &self.addr)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

impl Listener for GrpcListener {
    fn kind(&self) -> ListenerKind {
        ListenerKind::Grpc
    }

    fn bind(self: Box<Self>) -> BoxFuture<'static, ServerResult<Box<dyn BoundListener>>> {
        Box::pin(async move {
            let Self { addr, routes, .. } = *self;
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| GrpcError::Bind { addr, source })?;
            let local_addr = listener.local_addr()?;
            Ok(Box::new(BoundGrpc {
                listener,
                local_addr,
                routes,
            }) as Box<dyn BoundListener>)
        })
    }
}

struct BoundGrpc {
    listener: TcpListener,
    local_addr: SocketAddr,
    routes: Routes,
}

impl BoundListener for BoundGrpc {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn serve(self: Box<Self>, shutdown: ShutdownSignal) -> BoxFuture<'static, ServerResult<Drain>> {
        Box::pin(async move {
            let Self { listener, routes, .. } = *self;
            let layers = ServiceBuilder::new()
                .layer(ObservabilityLayer)
                .layer(RecoveryLayer)
                .into_inner();

            let stop = shutdown.clone();
            let mut task: JoinHandle<Result<(), tonic::transport::Error>> = tokio::spawn(
                tonic::transport::Server::builder()
                    .layer(layers)
                    .add_routes(routes)
                    .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                        stop.recv().await;
                    }),
            );

            tokio::select! {
                () = shutdown.recv() => {}
                joined = &mut task => {
                    return Err(serve_error(match joined {
                        Ok(Ok(())) => "server exited before shutdown".to_string(),
                        Ok(Err(err)) => err.to_string(),
                        Err(join) => join.to_string(),
                    }));
                }
            }

            let abort = task.abort_handle();
            Ok(Drain::new(
                async move {
                    match task.await {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(err)) => Err(serve_error(err.to_string())),
                        Err(join) if join.is_cancelled() => Ok(()),
                        Err(join) => Err(serve_error(join.to_string())),
                    }
                },
                move || abort.abort(),
            ))
        })
    }
}

fn serve_error(message: String) -> ServerError {
    ServerError::Serve {
        listener: ListenerKind::Grpc,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(config: GrpcConfig) -> GrpcServer {
        GrpcServer::new(config, Arc::new(Container::new()))
    }

    #[tokio::test]
    async fn test_duplicate_service_rejected() {
        let mut grpc = server(GrpcConfig::default());
        let (_, first) = tonic_health::server::health_reporter();
        let (_, second) = tonic_health::server::health_reporter();

        grpc.add_service(first).unwrap();
        let err = grpc.add_service(second).unwrap_err();
        assert!(matches!(err, GrpcError::DuplicateService("grpc.health.v1.Health")));
        assert_eq!(grpc.services(), ["grpc.health.v1.Health"]);
    }

    #[tokio::test]
    async fn test_reflection_gated_by_config() {
        let (_, health) = tonic_health::server::health_reporter();
        let mut plain = server(GrpcConfig::default());
        plain.add_service(health.clone()).unwrap();
        let listener = plain.into_listener().unwrap();
        assert!(!listener.services().contains(&REFLECTION_SERVICE));

        let mut reflected = server(GrpcConfig::default().reflection(true));
        reflected
            .add_service(health)
            .unwrap()
            .register_file_descriptor_set(tonic_health::pb::FILE_DESCRIPTOR_SET);
        let listener = reflected.into_listener().unwrap();
        assert_eq!(
            listener.services(),
            ["grpc.health.v1.Health", REFLECTION_SERVICE]
        );
    }

    #[test]
    fn test_listener_kind_and_addr() {
        let grpc = server(GrpcConfig::default().port(50051));
        assert!(!grpc.has_services());
        let listener = grpc.into_listener().unwrap();
        assert_eq!(listener.kind(), ListenerKind::Grpc);
        assert_eq!(listener.addr().port(), 50051);
    }
}
