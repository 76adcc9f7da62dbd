//! HTTP front end for the archive handler.
//!
//! A single accept loop hands each connection to the [`TaskPool`]. A failing
//! connection never stops the loop: its result is sent to a reporter task over
//! a channel and logged there.

pub mod logging;

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderValue, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tracing::{debug, error, info, warn};

use crate::cache::ArchiveCache;
use crate::config::Config;
use crate::error::{Result, ZipServeError};
use crate::handler::{BUILD_FAILED, NO_FILES_FOUND, NO_FILES_REQUESTED, Outcome, RequestHandler, html_body};
use crate::pool::TaskPool;
use logging::RequestLoggerLayer;

/// Content type of archive responses.
pub const ZIP_CONTENT_TYPE: &str = "application/zip";

/// Content-Disposition of archive responses.
pub const ARCHIVE_DISPOSITION: &str = "attachment; filename=\"archive.zip\"";

/// Content type of informational responses.
const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Result of serving one connection, sent to the reporter task.
#[derive(Debug)]
pub struct ConnectionReport {
    /// Remote address.
    pub peer: SocketAddr,
    /// How long the connection was open.
    pub duration: Duration,
    /// Error text if the connection failed.
    pub error: Option<String>,
}

/// Stops a running [`ArchiveServer`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Ask the accept loop to stop. Open connections finish on their own.
    pub fn shutdown(&self) {
        // No receiver means the server already stopped.
        let _ = self.tx.send(());
    }
}

/// Accepts connections and serves archives.
#[derive(Debug)]
pub struct ArchiveServer {
    handler: Arc<RequestHandler>,
    pool: Arc<dyn TaskPool>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ArchiveServer {
    /// Create a server that dispatches connections onto `pool`.
    pub fn new(handler: RequestHandler, pool: Arc<dyn TaskPool>) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        Self { handler: Arc::new(handler), pool, shutdown_tx, shutdown_rx }
    }

    /// Bind the listening socket.
    pub async fn bind(address: SocketAddr) -> Result<TcpListener> {
        TcpListener::bind(address).await.map_err(|source| ZipServeError::Bind { address, source })
    }

    /// Handle for stopping the server from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { tx: self.shutdown_tx.clone() }
    }

    /// Run the accept loop until shutdown is requested.
    pub async fn serve(mut self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "Listening for archive requests");

        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        tokio::spawn(report_connections(reports_rx));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!(%peer, "New connection");
                            let handler = Arc::clone(&self.handler);
                            let reports = reports_tx.clone();
                            self.pool.spawn(Box::pin(async move {
                                let started = Instant::now();
                                let error = serve_connection(stream, handler).await.err().map(|e| e.to_string());
                                let _ = reports.send(ConnectionReport { peer, duration: started.elapsed(), error });
                            }));
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Serve archives per `config` until `signal` resolves.
///
/// The cache lives exactly as long as this call.
pub async fn run<F>(config: &Config, pool: Arc<dyn TaskPool>, signal: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let cache = Arc::new(ArchiveCache::new());
    let handler = RequestHandler::from_config(&config.archive, Arc::clone(&pool), cache);
    let listener = ArchiveServer::bind(config.server.address).await?;

    info!(
        address = %config.server.address,
        root = %config.archive.root.display(),
        cache_ttl_secs = config.archive.cache_ttl_secs,
        "Starting archive server"
    );

    let server = ArchiveServer::new(handler, pool);
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        signal.await;
        shutdown.shutdown();
    });

    server.serve(listener).await
}

async fn serve_connection(
    stream: TcpStream,
    handler: Arc<RequestHandler>,
) -> std::result::Result<(), hyper::Error> {
    let io = TokioIo::new(stream);
    let service = ServiceBuilder::new().layer(RequestLoggerLayer).service_fn(
        move |req: Request<Incoming>| {
            let handler = Arc::clone(&handler);
            async move { Ok::<_, Infallible>(respond(&handler, req).await) }
        },
    );

    http1::Builder::new().serve_connection(io, TowerToHyperService::new(service)).await
}

async fn respond(handler: &RequestHandler, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let target = req.uri().path_and_query().map(|pq| pq.as_str().to_string()).unwrap_or_default();
    into_response(handler.handle(&target).await)
}

/// Map a handler outcome onto an HTTP response.
pub fn into_response(outcome: Outcome) -> Response<Full<Bytes>> {
    match outcome {
        Outcome::NoFilesRequested => text_response(StatusCode::OK, NO_FILES_REQUESTED),
        Outcome::NoFilesFound => text_response(StatusCode::OK, NO_FILES_FOUND),
        Outcome::ServerError(_) => text_response(StatusCode::INTERNAL_SERVER_ERROR, BUILD_FAILED),
        Outcome::Ignored => {
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::NO_CONTENT;
            response
        }
        Outcome::Archive { bytes, .. } => {
            debug!(size = bytes.len(), "Sending archive");
            let length = HeaderValue::from(bytes.len());
            let mut response = Response::new(Full::new(bytes));
            let headers = response.headers_mut();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(ZIP_CONTENT_TYPE));
            headers.insert(CONTENT_DISPOSITION, HeaderValue::from_static(ARCHIVE_DISPOSITION));
            headers.insert(CONTENT_LENGTH, length);
            response
        }
    }
}

fn text_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = Bytes::from(html_body(message));
    let length = HeaderValue::from(body.len());
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE));
    response.headers_mut().insert(CONTENT_LENGTH, length);
    response
}

async fn report_connections(mut reports: mpsc::UnboundedReceiver<ConnectionReport>) {
    let mut served = 0u64;
    let mut failed = 0u64;

    while let Some(report) = reports.recv().await {
        served += 1;
        let duration_ms = report.duration.as_millis();
        match report.error {
            Some(error) => {
                failed += 1;
                warn!(peer = %report.peer, duration_ms, error = %error, "Connection failed");
            }
            None => debug!(peer = %report.peer, duration_ms, "Connection closed"),
        }
    }

    info!(served, failed, "Connection reporter stopped");
}
