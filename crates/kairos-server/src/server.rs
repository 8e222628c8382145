//! HTTP server assembly.
//!
//! [`Server`] collects routes, user middleware and services, then builds the
//! listeners and hands them to a [`Supervisor`]. Nothing is bound until
//! [`Server::run`] (or [`Supervisor::run`]) is awaited.
//!
//! ```rust,no_run
//! use http::StatusCode;
//! use kairos_core::response;
//! use kairos_server::{Server, ServerConfig};
//!
//! # async fn run() -> Result<(), kairos_server::ServerError> {
//! let mut server = Server::new(ServerConfig::builder().app_name("orders").build());
//! server.get("/orders/{id}", |ctx, _req| async move {
//!     let id = ctx.param("id").unwrap_or_default().to_string();
//!     Ok(response::text(StatusCode::OK, id))
//! })?;
//! server.run().await
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;

use http::Method;
use kairos_config::Config;
use kairos_core::{
    handler_fn, BoxedHandler, Container, Context, ContextPool, HandlerResult, Request, Response,
};
use kairos_middleware::{
    standard_pipeline, Middleware, Pipeline, PropagationMiddleware, RecoveryMiddleware,
    StackConfig, TraceLabeler,
};
use kairos_router::{RouteInfo, Router};

use crate::config::{MetricsPlacement, ServerConfig};
use crate::dispatch::Dispatcher;
use crate::error::ServerResult;
use crate::health::HealthCheck;
use crate::http_listener::{HttpListener, HttpService};
use crate::reserved::{metrics_handler, ReservedRoutes, METRICS_PATH};
use crate::shutdown::ShutdownSignal;
use crate::supervisor::Supervisor;

/// Routes, middleware and services for the HTTP side of an application.
pub struct Server {
    config: ServerConfig,
    stack: StackConfig,
    router: Router<BoxedHandler>,
    middleware: Vec<Arc<dyn Middleware>>,
    container: Arc<Container>,
    pool: Arc<ContextPool>,
    shutdown: ShutdownSignal,
}

impl Server {
    /// Creates a server with the default middleware settings.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let stack = StackConfig {
            service_name: config.app_name().to_string(),
            ..StackConfig::default()
        };
        Self::with_stack(config, stack)
    }

    /// Creates a server with explicit middleware settings.
    #[must_use]
    pub fn with_stack(config: ServerConfig, stack: StackConfig) -> Self {
        let pool = Arc::new(ContextPool::new(config.pool_max_idle()));
        Self {
            config,
            stack,
            router: Router::new(),
            middleware: Vec::new(),
            container: Arc::new(Container::new()),
            pool,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Reads server and middleware settings from `config`.
    pub fn from_config(config: &impl Config) -> ServerResult<Self> {
        let server = ServerConfig::from_config(config)?;
        let stack = StackConfig::from_config(config)?;
        Ok(Self::with_stack(server, stack))
    }

    /// Server settings.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Middleware settings.
    #[must_use]
    pub fn stack(&self) -> &StackConfig {
        &self.stack
    }

    /// Binds `handler` to `(method, pattern)`.
    ///
    /// Registering the same pair twice keeps the later handler.
    pub fn route<F, Fut>(&mut self, method: Method, pattern: &str, handler: F) -> ServerResult<&mut Self>
    where
        F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Response>> + Send + 'static,
    {
        self.route_boxed(method, pattern, handler_fn(handler))
    }

    /// Binds an already boxed handler.
    pub fn route_boxed(
        &mut self,
        method: Method,
        pattern: &str,
        handler: BoxedHandler,
    ) -> ServerResult<&mut Self> {
        if self.router.route(method.clone(), pattern, handler)?.is_some() {
            tracing::warn!(%method, pattern, "route registered twice, keeping the latest handler");
        }
        Ok(self)
    }

    /// Binds a GET handler.
    pub fn get<F, Fut>(&mut self, pattern: &str, handler: F) -> ServerResult<&mut Self>
    where
        F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Response>> + Send + 'static,
    {
        self.route(Method::GET, pattern, handler)
    }

    /// Binds a POST handler.
    pub fn post<F, Fut>(&mut self, pattern: &str, handler: F) -> ServerResult<&mut Self>
    where
        F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Response>> + Send + 'static,
    {
        self.route(Method::POST, pattern, handler)
    }

    /// Binds a PUT handler.
    pub fn put<F, Fut>(&mut self, pattern: &str, handler: F) -> ServerResult<&mut Self>
    where
        F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Response>> + Send + 'static,
    {
        self.route(Method::PUT, pattern, handler)
    }

    /// Binds a PATCH handler.
    pub fn patch<F, Fut>(&mut self, pattern: &str, handler: F) -> ServerResult<&mut Self>
    where
        F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Response>> + Send + 'static,
    {
        self.route(Method::PATCH, pattern, handler)
    }

    /// Binds a DELETE handler.
    pub fn delete<F, Fut>(&mut self, pattern: &str, handler: F) -> ServerResult<&mut Self>
    where
        F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Response>> + Send + 'static,
    {
        self.route(Method::DELETE, pattern, handler)
    }

    /// Appends a user stage. User stages run after panic recovery, in the
    /// order added.
    pub fn use_middleware<M: Middleware>(&mut self, middleware: M) -> &mut Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Registers a service handlers can resolve from their context.
    pub fn register<T: Send + Sync + 'static>(&mut self, service: Arc<T>) -> &mut Self {
        self.container.register(service);
        self
    }

    /// Replaces the service container, typically with one shared with the
    /// gRPC listener.
    #[must_use]
    pub fn with_container(mut self, container: Arc<Container>) -> Self {
        self.container = container;
        self
    }

    /// The service container.
    #[must_use]
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// User routes registered so far.
    #[must_use]
    pub fn routes(&self) -> &[RouteInfo] {
        self.router.routes()
    }

    /// Request context pool shared by every HTTP listener.
    #[must_use]
    pub fn context_pool(&self) -> Arc<ContextPool> {
        Arc::clone(&self.pool)
    }

    /// Signal that stops this server once it runs.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Adds the reserved routes and builds the listeners.
    ///
    /// More listeners (gRPC, for one) can be added to the returned
    /// supervisor before it runs.
    pub fn into_supervisor(self) -> ServerResult<Supervisor> {
        let Self {
            config,
            stack,
            mut router,
            middleware,
            container,
            pool,
            shutdown,
        } = self;

        let placement = config.metrics_placement();
        ReservedRoutes::new(HealthCheck::new(config.app_name(), config.app_version()))
            .load_openapi(config.openapi_file())
            .metrics(placement == MetricsPlacement::Shared)
            .register(&mut router)?;

        for route in router.routes() {
            tracing::info!(method = %route.method, pattern = %route.pattern, "route registered");
        }

        let labeler = Arc::new(TraceLabeler::from_routes(
            router.routes().iter().map(|r| (&r.method, r.pattern.as_str())),
        ));
        let dispatcher = Dispatcher::new(Arc::new(router), Arc::clone(&container));
        let wrapped = standard_pipeline(&stack, labeler, middleware, Arc::clone(&container))
            .wrap(dispatcher, Arc::clone(&pool));
        let service = HttpService::new(wrapped, config.max_body_bytes(), config.request_timeout());

        let mut supervisor = Supervisor::with_signal(shutdown, config.shutdown_grace())
            .os_signals(config.os_signals());
        supervisor.add(HttpListener::http(config.http_addr(), service.clone()));

        if let (Some(tls), Some(addr)) = (config.tls(), config.https_addr()) {
            supervisor.add(HttpListener::https(addr, tls.clone(), service));
        }

        if let Some(addr) = config.metrics_addr() {
            let mut metrics = Router::new();
            metrics.route(Method::GET, METRICS_PATH, metrics_handler())?;
            let endpoint = Dispatcher::new(Arc::new(metrics), container);
            let wrapped = metrics_pipeline(&stack).wrap(endpoint, pool);
            let service = HttpService::new(wrapped, config.max_body_bytes(), config.request_timeout());
            supervisor.add(HttpListener::metrics(addr, service));
        }

        Ok(supervisor)
    }

    /// Serves until shutdown.
    pub async fn run(self) -> ServerResult<()> {
        self.into_supervisor()?.run().await
    }
}

/// Stages in front of the dedicated metrics endpoint.
///
/// Scrapes get a correlation id and panics become 500 responses. Logging
/// and request metrics are left out so scrapes do not count themselves.
fn metrics_pipeline(stack: &StackConfig) -> Pipeline {
    let mut pipeline = Pipeline::new();
    pipeline
        .use_middleware(PropagationMiddleware::new(stack.propagate_headers.clone()))
        .use_middleware(RecoveryMiddleware);
    pipeline
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("routes", &self.router.len())
            .field("middleware", &self.middleware.len())
            .finish_non_exhaustive()
    }
}
