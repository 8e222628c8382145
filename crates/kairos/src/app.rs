//! Application wiring: configuration, telemetry, HTTP and gRPC.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use kairos_config::{Config, ConfigLoader};
use kairos_core::Container;
use kairos_grpc::{GrpcConfig, GrpcServer};
use kairos_server::{Server, ServerConfig, ShutdownSignal, Supervisor};
use kairos_middleware::StackConfig;
use kairos_telemetry::{init_telemetry, TelemetryConfig};

/// A complete application: the HTTP server, the gRPC server and the
/// telemetry they report through.
///
/// Both servers share one service [`Container`], so a service registered
/// through either is visible to HTTP handlers and injected gRPC services
/// alike. The gRPC listener only starts when at least one service is
/// registered.
pub struct App {
    server: Server,
    grpc: GrpcServer,
    telemetry: TelemetryConfig,
}

impl App {
    /// Builds an app from explicit settings.
    #[must_use]
    pub fn new(server: ServerConfig, grpc: GrpcConfig) -> Self {
        let telemetry = TelemetryConfig::builder()
            .service_name(server.app_name())
            .service_version(server.app_version())
            .build();
        let stack = StackConfig {
            service_name: server.app_name().to_string(),
            ..StackConfig::default()
        };
        Self::assemble(server, stack, grpc, telemetry)
    }

    /// Builds an app from configuration keys.
    pub fn from_config(config: &impl Config) -> anyhow::Result<Self> {
        let server = ServerConfig::from_config(config).context("invalid server configuration")?;
        let stack = StackConfig::from_config(config).context("invalid middleware configuration")?;
        let grpc = GrpcConfig::from_config(config).context("invalid grpc configuration")?;
        let telemetry =
            TelemetryConfig::from_config(config).context("invalid telemetry configuration")?;
        Ok(Self::assemble(server, stack, grpc, telemetry))
    }

    /// Loads dotenv files from `dir` plus the process environment, then
    /// builds the app from them.
    pub fn load(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        let config = ConfigLoader::new(&dir)
            .load()
            .with_context(|| format!("failed to load configuration from {}", dir.display()))?;
        Self::from_config(&config)
    }

    fn assemble(
        server: ServerConfig,
        stack: StackConfig,
        grpc: GrpcConfig,
        telemetry: TelemetryConfig,
    ) -> Self {
        let container = Arc::new(Container::new());
        Self {
            server: Server::with_stack(server, stack).with_container(Arc::clone(&container)),
            grpc: GrpcServer::new(grpc, container),
            telemetry,
        }
    }

    /// Replaces the telemetry settings used by [`run`](Self::run).
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// The HTTP server, for routes and middleware.
    pub fn http(&mut self) -> &mut Server {
        &mut self.server
    }

    /// The gRPC server, for services.
    pub fn grpc(&mut self) -> &mut GrpcServer {
        &mut self.grpc
    }

    /// The container shared by both servers.
    #[must_use]
    pub fn container(&self) -> &Arc<Container> {
        self.server.container()
    }

    /// Registers a service with the shared container.
    pub fn register<T: Send + Sync + 'static>(&self, service: Arc<T>) -> &Self {
        self.container().register(service);
        self
    }

    /// Signal that stops every listener once the app runs.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.server.shutdown_signal()
    }

    /// Builds every listener without starting any.
    pub fn into_supervisor(self) -> anyhow::Result<Supervisor> {
        let Self { server, grpc, .. } = self;
        let mut supervisor = server
            .into_supervisor()
            .context("failed to build http listeners")?;

        if grpc.has_services() {
            let listener = grpc.into_listener().context("failed to build grpc listener")?;
            supervisor.add(listener);
        } else {
            tracing::debug!("no grpc services registered, grpc listener disabled");
        }
        Ok(supervisor)
    }

    /// Initializes telemetry, then serves until shutdown completes.
    pub async fn run(self) -> anyhow::Result<()> {
        let _telemetry =
            init_telemetry(&self.telemetry).context("failed to initialize telemetry")?;
        tracing::info!(
            app = %self.server.config().app_name(),
            version = %self.server.config().app_version(),
            "starting application"
        );

        self.into_supervisor()?.run().await?;
        tracing::info!("application stopped");
        Ok(())
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("server", &self.server)
            .field("grpc", &self.grpc)
            .finish_non_exhaustive()
    }
}
