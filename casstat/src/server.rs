//! The HTTP surface: `/metrics`, `/healthz` and a root banner.
//!
//! `/metrics` renders the most recently published snapshot and never talks
//! to the bridge. `/healthz` does the opposite: it probes the bridge live so
//! that orchestration health checks observe real reachability. Every
//! response carries a `casstat-version` header.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::exporter;
use crate::jolokia::MetricSource;
use crate::scraper::SnapshotHandle;
use crate::signals::Shutdown;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const VERSION_HEADER: &str = "casstat-version";

/// Errors produced by [`Httpd`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wrapper for [`std::io::Error`].
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The exporter's HTTP server.
#[derive(Debug)]
pub struct Httpd<S> {
    addr: SocketAddr,
    concurrency_limit: usize,
    source: Arc<S>,
    snapshots: SnapshotHandle,
    shutdown: Shutdown,
}

impl<S> Httpd<S>
where
    S: MetricSource + Send + Sync + 'static,
{
    /// Create a new [`Httpd`] serving `snapshots` and probing `source` for
    /// health checks.
    #[must_use]
    pub fn new(
        addr: SocketAddr,
        concurrency_limit: usize,
        source: Arc<S>,
        snapshots: SnapshotHandle,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            addr,
            concurrency_limit,
            source,
            snapshots,
            shutdown,
        }
    }

    /// Accept and serve connections until shutdown is signalled. Connections
    /// beyond the concurrency limit are shed rather than queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn run(self) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        let sem = Arc::new(Semaphore::new(self.concurrency_limit));
        let mut join_set = JoinSet::new();
        let mut shutdown = self.shutdown.clone();

        info!("listening on {addr}", addr = self.addr);

        loop {
            tokio::select! {
                () = shutdown.recv() => {
                    info!("shutdown signal received, stopping accept loop");
                    break;
                }

                incoming = listener.accept() => {
                    let (stream, addr) = match incoming {
                        Ok(sa) => sa,
                        Err(e) => {
                            error!("error accepting connection: {e}");
                            continue;
                        }
                    };
                    debug!("accepted connection from {addr}");

                    let sem = Arc::clone(&sem);
                    let source = Arc::clone(&self.source);
                    let snapshots = self.snapshots.clone();

                    join_set.spawn(async move {
                        let permit = match sem.try_acquire() {
                            Ok(p) => p,
                            Err(TryAcquireError::Closed) => {
                                error!("semaphore closed");
                                return;
                            }
                            Err(TryAcquireError::NoPermits) => {
                                warn!("httpd over connection capacity, load shedding");
                                drop(stream);
                                return;
                            }
                        };

                        let service = service_fn(move |req: hyper::Request<Incoming>| {
                            let source = Arc::clone(&source);
                            let snapshots = snapshots.clone();
                            async move {
                                let start = Instant::now();
                                let method = req.method().clone();
                                let path = req.uri().path().to_string();
                                let response =
                                    route(source.as_ref(), &snapshots, &path).await;
                                info!(
                                    "{method} {path} {elapsed:?}",
                                    elapsed = start.elapsed()
                                );
                                Ok::<_, Infallible>(response)
                            }
                        });

                        let builder = auto::Builder::new(TokioExecutor::new());
                        let serve_future = builder
                            .serve_connection_with_upgrades(TokioIo::new(stream), service);

                        if let Err(e) = serve_future.await {
                            error!("error serving {addr}: {e}");
                        }
                        drop(permit);
                    });
                }
            }
        }

        drop(listener);
        while join_set.join_next().await.is_some() {}
        Ok(())
    }
}

/// Dispatch one request. Unknown paths answer the banner, matching the
/// behavior operators already expect from the exporter.
async fn route<S>(
    source: &S,
    snapshots: &SnapshotHandle,
    path: &str,
) -> Response<Full<Bytes>>
where
    S: MetricSource + Sync,
{
    match path {
        "/metrics" => metrics(snapshots),
        "/healthz" => healthz(source).await,
        _ => banner(),
    }
}

fn metrics(snapshots: &SnapshotHandle) -> Response<Full<Bytes>> {
    // Before the first successful cycle there is nothing to expose; an
    // empty exposition is valid and distinguishable from zeroes.
    let body = snapshots
        .get()
        .map(|snapshot| exporter::render(&snapshot))
        .unwrap_or_default();
    respond(StatusCode::OK, exporter::CONTENT_TYPE, Bytes::from(body))
}

async fn healthz<S>(source: &S) -> Response<Full<Bytes>>
where
    S: MetricSource + Sync,
{
    match source.version().await {
        Ok(version) => {
            let body = json!({ "jolokia": version, "casstat": VERSION });
            respond(
                StatusCode::OK,
                "application/json",
                Bytes::from(body.to_string()),
            )
        }
        Err(err) => {
            let body = json!({ "error": err.to_string() });
            respond(
                StatusCode::SERVICE_UNAVAILABLE,
                "application/json",
                Bytes::from(body.to_string()),
            )
        }
    }
}

fn banner() -> Response<Full<Bytes>> {
    respond(
        StatusCode::OK,
        "text/plain; charset=utf-8",
        Bytes::from(format!("Casstat Cassandra Exporter {VERSION}")),
    )
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(VERSION_HEADER, HeaderValue::from_static(VERSION));
    response
}
