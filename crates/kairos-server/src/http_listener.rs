//! HTTP and HTTPS listeners.
//!
//! Connections are served by `hyper-util`'s auto builder, so HTTP/1.1 (with
//! upgrades) and HTTP/2 share one socket. Each connection runs on its own
//! task and HTTP/2 streams run on tasks of their own. When the shutdown
//! signal fires the accept loop stops and every connection is asked to
//! finish its in-flight requests and close. The forceful fallback aborts
//! connections and streams that are still running.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto;
use kairos_core::{response, BoxFuture, ErrorCategory, RemoteAddr, RequestDeadline, Response};
use kairos_middleware::Wrapped;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsSettings;
use crate::error::{ServerError, ServerResult};
use crate::listener::{BoundListener, Drain, Listener, ListenerKind};
use crate::shutdown::{ConnectionToken, ConnectionTracker, ShutdownSignal};
use crate::tls;

const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Turns raw hyper requests into pipeline requests.
///
/// Attaches the peer address and the request deadline as extensions, then
/// buffers the body: bodies over the limit get 413 and bodies that do not
/// arrive before the deadline get 408. Hyper's upgrade handle stays in the
/// extensions.
#[derive(Clone)]
pub struct HttpService {
    handler: Wrapped,
    max_body_bytes: usize,
    request_timeout: Duration,
}

impl HttpService {
    /// Creates a service over a wrapped pipeline.
    #[must_use]
    pub fn new(handler: Wrapped, max_body_bytes: usize, request_timeout: Duration) -> Self {
        Self {
            handler,
            max_body_bytes,
            request_timeout,
        }
    }

    /// Handles one request from `remote`.
    pub async fn handle<B>(&self, request: http::Request<B>, remote: SocketAddr) -> Response
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<BoxError>,
    {
        let deadline = Instant::now() + self.request_timeout;
        let (mut parts, body) = request.into_parts();
        parts.extensions.insert(RemoteAddr(remote));
        parts.extensions.insert(RequestDeadline(deadline));

        let collected =
            tokio::time::timeout_at(deadline, Limited::new(body, self.max_body_bytes).collect()).await;
        let body = match collected {
            Ok(Ok(collected)) => collected.to_bytes(),
            Ok(Err(err)) if err.downcast_ref::<LengthLimitError>().is_some() => {
                return response::category_error(
                    ErrorCategory::PayloadTooLarge,
                    "request body exceeds the configured limit",
                );
            }
            Ok(Err(err)) => {
                tracing::debug!(%remote, error = %err, "failed to read request body");
                return response::category_error(ErrorCategory::Validation, "malformed request body");
            }
            Err(_) => {
                return response::category_error(
                    ErrorCategory::Timeout,
                    "request body not received in time",
                );
            }
        };

        self.handler
            .handle(http::Request::from_parts(parts, Full::new(body)))
            .await
    }
}

impl std::fmt::Debug for HttpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpService")
            .field("max_body_bytes", &self.max_body_bytes)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// Executor for HTTP/2 stream tasks.
///
/// Streams land in one set per listener so the forceful drain can abort
/// them along with their connections.
#[derive(Clone, Default)]
struct StreamExecutor {
    streams: Arc<Mutex<JoinSet<()>>>,
}

impl StreamExecutor {
    fn abort_all(&self) {
        self.streams.lock().abort_all();
    }
}

impl<F> hyper::rt::Executor<F> for StreamExecutor
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        let mut streams = self.streams.lock();
        // Reap finished streams so the set tracks only live ones.
        while streams.try_join_next().is_some() {}
        streams.spawn(async move {
            fut.await;
        });
    }
}

/// An HTTP, HTTPS or metrics listener that has not bound yet.
#[derive(Debug)]
pub struct HttpListener {
    kind: ListenerKind,
    addr: SocketAddr,
    tls: Option<TlsSettings>,
    service: HttpService,
}

impl HttpListener {
    /// Plain HTTP listener.
    #[must_use]
    pub fn http(addr: SocketAddr, service: HttpService) -> Self {
        Self {
            kind: ListenerKind::Http,
            addr,
            tls: None,
            service,
        }
    }

    /// HTTPS listener. Certificate problems surface from `bind`.
    #[must_use]
    pub fn https(addr: SocketAddr, tls: TlsSettings, service: HttpService) -> Self {
        Self {
            kind: ListenerKind::Https,
            addr,
            tls: Some(tls),
            service,
        }
    }

    /// Dedicated metrics listener.
    #[must_use]
    pub fn metrics(addr: SocketAddr, service: HttpService) -> Self {
        Self {
            kind: ListenerKind::Metrics,
            addr,
            tls: None,
            service,
        }
    }
}

impl Listener for HttpListener {
    fn kind(&self) -> ListenerKind {
        self.kind
    }

    fn bind(self: Box<Self>) -> BoxFuture<'static, ServerResult<Box<dyn BoundListener>>> {
        Box::pin(async move {
            let Self {
                kind,
                addr,
                tls: settings,
                service,
            } = *self;

            let acceptor = settings.as_ref().map(tls::load_acceptor).transpose()?;
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| ServerError::Bind {
                    listener: kind,
                    addr,
                    source,
                })?;
            let local_addr = listener.local_addr()?;

            Ok(Box::new(BoundHttp {
                kind,
                listener,
                local_addr,
                acceptor,
                service,
            }) as Box<dyn BoundListener>)
        })
    }
}

struct BoundHttp {
    kind: ListenerKind,
    listener: TcpListener,
    local_addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    service: HttpService,
}

impl BoundListener for BoundHttp {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn serve(self: Box<Self>, shutdown: ShutdownSignal) -> BoxFuture<'static, ServerResult<Drain>> {
        Box::pin(async move {
            let Self {
                kind,
                listener,
                acceptor,
                service,
                ..
            } = *self;

            let tracker = ConnectionTracker::new();
            let executor = StreamExecutor::default();
            let mut connections = JoinSet::new();
            let stop = shutdown.recv();
            tokio::pin!(stop);

            loop {
                tokio::select! {
                    () = &mut stop => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote)) => {
                            connections.spawn(serve_connection(
                                stream,
                                remote,
                                acceptor.clone(),
                                service.clone(),
                                executor.clone(),
                                shutdown.clone(),
                                tracker.acquire(),
                            ));
                        }
                        Err(err) => {
                            tracing::warn!(listener = %kind, error = %err, "accept failed");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    },
                    Some(_) = connections.join_next(), if !connections.is_empty() => {}
                }
            }

            drop(listener);
            tracing::info!(
                listener = %kind,
                active_connections = tracker.active_connections(),
                "stopped accepting, draining connections"
            );

            Ok(Drain::new(
                async move {
                    tracker.wait_for_shutdown().await;
                    Ok(())
                },
                move || {
                    connections.abort_all();
                    executor.abort_all();
                },
            ))
        })
    }
}

async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    service: HttpService,
    executor: StreamExecutor,
    shutdown: ShutdownSignal,
    _token: ConnectionToken,
) {
    let Some(acceptor) = acceptor else {
        drive(TokioIo::new(stream), remote, service, executor, shutdown).await;
        return;
    };

    match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
        Ok(Ok(tls)) => drive(TokioIo::new(tls), remote, service, executor, shutdown).await,
        Ok(Err(err)) => tracing::debug!(%remote, error = %err, "TLS handshake failed"),
        Err(_) => tracing::debug!(%remote, "TLS handshake timed out"),
    }
}

async fn drive<I>(
    io: I,
    remote: SocketAddr,
    service: HttpService,
    executor: StreamExecutor,
    shutdown: ShutdownSignal,
) where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let svc = service_fn(move |request: http::Request<Incoming>| {
        let service = service.clone();
        async move { Ok::<_, Infallible>(service.handle(request, remote).await) }
    });

    let builder = auto::Builder::new(executor);
    let connection = builder.serve_connection_with_upgrades(io, svc);
    tokio::pin!(connection);

    let stop = shutdown.recv();
    tokio::pin!(stop);
    let mut draining = false;

    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(err) = result {
                    tracing::debug!(%remote, error = %err, "connection closed with error");
                }
                break;
            }
            () = &mut stop, if !draining => {
                draining = true;
                connection.as_mut().graceful_shutdown();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use http::StatusCode;
    use http_body_util::StreamBody;
    use hyper::body::Frame;
    use kairos_core::{ContextPool, Request, RequestContext};
    use hyper_util::client::legacy::Client;
    use hyper_util::rt::TokioExecutor;
    use kairos_middleware::Pipeline;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    fn echo() -> HttpService {
        let endpoint = |ctx: &mut RequestContext, request: Request| -> BoxFuture<'static, Response> {
            let remote = ctx.remote_addr().map(|a| a.to_string()).unwrap_or_default();
            let has_deadline = ctx.deadline().is_some();
            Box::pin(async move {
                let body = request.into_body().collect().await.unwrap().to_bytes();
                let text = format!("{remote}|{has_deadline}|{}", body.len());
                response::text(StatusCode::OK, text)
            })
        };
        let handler = Pipeline::new().wrap(endpoint, Arc::new(ContextPool::default()));
        HttpService::new(handler, 16, Duration::from_secs(5))
    }

    fn remote() -> SocketAddr {
        "10.0.0.7:41000".parse().unwrap()
    }

    async fn text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_extensions_and_body_reach_pipeline() {
        let request = http::Request::new(Full::new(Bytes::from_static(b"hello")));
        let response = echo().handle(request, remote()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(text(response).await, "10.0.0.7:41000|true|5");
    }

    #[tokio::test]
    async fn test_body_over_limit() {
        let request = http::Request::new(Full::new(Bytes::from(vec![b'x'; 17])));
        let response = echo().handle(request, remote()).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_body_times_out() {
        let body = StreamBody::new(stream::pending::<Result<Frame<Bytes>, Infallible>>());
        let request = http::Request::new(body);
        let response = echo().handle(request, remote()).await;
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[test]
    fn test_listener_kinds() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        assert_eq!(HttpListener::http(addr, echo()).kind(), ListenerKind::Http);
        assert_eq!(HttpListener::metrics(addr, echo()).kind(), ListenerKind::Metrics);

        let tls = TlsSettings {
            port: 0,
            cert_file: "missing.crt".into(),
            key_file: "missing.key".into(),
        };
        assert_eq!(HttpListener::https(addr, tls, echo()).kind(), ListenerKind::Https);
    }

    #[tokio::test]
    async fn test_https_bind_reports_tls_error() {
        let tls = TlsSettings {
            port: 0,
            cert_file: "definitely-missing.crt".into(),
            key_file: "definitely-missing.key".into(),
        };
        let listener = Box::new(HttpListener::https("127.0.0.1:0".parse().unwrap(), tls, echo()));
        let err = listener.bind().await.err().unwrap();
        assert!(matches!(err, ServerError::Tls { .. }));
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_forced_drain_aborts_http2_streams() {
        let entered = Arc::new(Notify::new());
        let dropped = Arc::new(AtomicBool::new(false));
        let endpoint = {
            let entered = Arc::clone(&entered);
            let dropped = Arc::clone(&dropped);
            move |_: &mut RequestContext, _: Request| -> BoxFuture<'static, Response> {
                let entered = Arc::clone(&entered);
                let flag = DropFlag(Arc::clone(&dropped));
                Box::pin(async move {
                    let _flag = flag;
                    entered.notify_one();
                    std::future::pending().await
                })
            }
        };
        let handler = Pipeline::new().wrap(endpoint, Arc::new(ContextPool::default()));
        let service = HttpService::new(handler, 1024, Duration::from_secs(60));

        let bound = Box::new(HttpListener::http("127.0.0.1:0".parse().unwrap(), service))
            .bind()
            .await
            .unwrap();
        let addr = bound.local_addr();
        let shutdown = ShutdownSignal::new();
        let serving = tokio::spawn(bound.serve(shutdown.clone()));

        let client = Client::builder(TokioExecutor::new())
            .http2_only(true)
            .build_http::<Full<Bytes>>();
        let uri: http::Uri = format!("http://{addr}/stuck").parse().unwrap();
        let request = tokio::spawn(client.get(uri));
        entered.notified().await;

        shutdown.trigger();
        let drain = serving.await.unwrap().unwrap();
        let result = drain.run(Instant::now() + Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ServerError::ShutdownTimeout(_))));

        tokio::time::timeout(Duration::from_secs(2), async {
            while !dropped.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("stream task still running after forced drain");
        request.abort();
    }

    #[tokio::test]
    async fn test_bind_conflict_reports_bind_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let err = Box::new(HttpListener::http(addr, echo())).bind().await.err().unwrap();
        assert!(matches!(err, ServerError::Bind { listener: ListenerKind::Http, .. }));
    }
}
