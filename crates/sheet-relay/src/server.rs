//! Relay HTTP server.

use std::convert::Infallible;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::ORIGIN;
use http::{HeaderMap, Request, Response};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use sheet_relay_telemetry::metrics::record_request;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::dispatch::Dispatcher;
use crate::error::{RelayError, RelayResult};
use crate::normalize::REQUEST_ID_HEADER;
use crate::request::RequestDescriptor;
use crate::upstream::{HttpUpstream, Upstream};

/// How long in-flight connections may drain after shutdown is requested.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest inbound `x-request-id` that is reused as-is.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Relay server.
pub struct RelayServer {
    config: Arc<RelayConfig>,
    dispatcher: Arc<Dispatcher>,
}

impl RelayServer {
    /// Create a server forwarding over HTTP.
    pub fn new(config: RelayConfig) -> RelayResult<Self> {
        let upstream = Arc::new(HttpUpstream::new(&config.upstream)?);
        Ok(Self::with_upstream(config, upstream))
    }

    /// Create a server over a custom upstream transport.
    pub fn with_upstream(config: RelayConfig, upstream: Arc<dyn Upstream>) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(&config, upstream));
        Self {
            config: Arc::new(config),
            dispatcher,
        }
    }

    /// Address the server binds to.
    pub fn socket_addr(&self) -> RelayResult<SocketAddr> {
        let ip: IpAddr = self
            .config
            .server
            .listen_addr
            .parse()
            .map_err(|e| RelayError::config(format!("invalid listen address: {e}")))?;
        Ok(SocketAddr::new(ip, self.config.server.listen_port))
    }

    /// Bind the listener without accepting connections yet.
    pub async fn bind(self) -> RelayResult<BoundRelay> {
        let addr = self.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::server(format!("failed to bind {addr}: {e}")))?;
        let local_addr = listener.local_addr()?;

        Ok(BoundRelay {
            listener,
            local_addr,
            config: self.config,
            dispatcher: self.dispatcher,
        })
    }

    /// Run until SIGTERM or Ctrl+C.
    pub async fn run(self) -> RelayResult<()> {
        self.bind().await?.serve(shutdown_signal()).await
    }
}

/// A server with a bound listener.
pub struct BoundRelay {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Arc<RelayConfig>,
    dispatcher: Arc<Dispatcher>,
}

impl BoundRelay {
    /// Address actually bound (useful with port `0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` completes, then drain.
    pub async fn serve<F>(self, shutdown: F) -> RelayResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        info!(addr = %self.local_addr, "sheet-relay listening");
        info!(upstream = %self.config.upstream.base_url, "forwarding to upstream");
        if !self.dispatcher.sessions().is_signed() {
            warn!("session.secret is not set; session cookies are unsigned and can be forged");
        }

        let body_limit = self.config.server.max_request_body_size;
        let graceful = GracefulShutdown::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };

                    let dispatcher = self.dispatcher.clone();
                    let service = service_fn(move |req| {
                        let dispatcher = dispatcher.clone();
                        async move {
                            Ok::<_, Infallible>(handle_request(req, &dispatcher, body_limit, peer).await)
                        }
                    });

                    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
                    let conn = graceful.watch(conn);
                    tokio::spawn(async move {
                        if let Err(e) = conn.await {
                            debug!(%peer, error = %e, "connection error");
                        }
                    });
                }

                () = &mut shutdown => {
                    info!("shutdown requested, no longer accepting connections");
                    break;
                }
            }
        }

        drop(self.listener);

        tokio::select! {
            () = graceful.shutdown() => info!("all connections closed"),
            () = tokio::time::sleep(SHUTDOWN_TIMEOUT) => {
                warn!(timeout_secs = SHUTDOWN_TIMEOUT.as_secs(), "shutdown timeout reached, dropping connections");
            }
        }

        info!("sheet-relay stopped");
        Ok(())
    }
}

async fn handle_request(
    req: Request<Incoming>,
    dispatcher: &Dispatcher,
    body_limit: usize,
    peer: SocketAddr,
) -> Response<Full<Bytes>> {
    let start = Instant::now();
    let request_id = request_id(req.headers());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
        peer = %peer,
    );

    async move {
        let (parts, body) = req.into_parts();

        let body = match Limited::new(body, body_limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let err = if e.downcast_ref::<LengthLimitError>().is_some() {
                    RelayError::PayloadTooLarge { limit: body_limit }
                } else {
                    warn!(error = %e, "failed to read request body");
                    RelayError::BadJson
                };
                let origin = parts.headers.get(ORIGIN).and_then(|v| v.to_str().ok());
                let response = dispatcher.reject(origin, &err, &request_id);
                complete("rejected", &response, start);
                return response;
            }
        };

        let descriptor = RequestDescriptor::new(
            parts.method,
            parts.uri.path(),
            parts.uri.query(),
            &parts.headers,
            body,
        );
        let route = descriptor.route();

        let response = dispatcher.handle(descriptor, &request_id).await;
        complete(&route, &response, start);
        response
    }
    .instrument(span)
    .await
}

fn complete(route: &str, response: &Response<Full<Bytes>>, start: Instant) {
    let duration = start.elapsed();
    let status = response.status().as_u16();
    info!(
        route,
        status,
        duration_ms = %duration.as_millis(),
        "request completed"
    );
    record_request(route, status, duration);
}

/// Reuse a sane inbound correlation ID, otherwise mint a UUID v7.
fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
        .map_or_else(|| Uuid::now_v7().to_string(), String::from)
}

/// Completes on Ctrl+C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C"),
        () = terminate => info!("received SIGTERM"),
    }
}
