use axum::{
    middleware as axum_mw,
    routing::any,
    Router,
};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::Service;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::{Config, ConnectionLimits};
use crate::conn::{ConnState, TimeoutStream};
use crate::error::Error;
use crate::handlers;
use crate::metrics::{export, METRICS_PATH};
use crate::middleware::instrument;
use crate::AppState;

/// Builds the full Axum `Router`: instrumented application routes plus the
/// bare exposition endpoint.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ── Application endpoints (any method) ──────────────────
        .route("/", any(handlers::root))
        .route("/health", any(handlers::health))
        .route("/api", any(handlers::api::hello))
        .fallback(handlers::root)
        // ── Instrumentation covers everything above, fallback included ──
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            instrument::track_metrics,
        ))
        // ── Exposition, added after the layer so scrapes aren't counted ──
        .route(METRICS_PATH, any(export::get_metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

// ─── Lifecycle ───────────────────────────────────────────────────

/// Owns the listening socket from bind until the drain completes.
///
/// `bind` is the Initializing → Listening edge; `serve` stays in Listening
/// until the shutdown token is cancelled, then drains and returns.
pub struct Server {
    listener: TcpListener,
    limits: ConnectionLimits,
    drain_timeout: Duration,
}

impl Server {
    pub async fn bind(config: &Config) -> Result<Self, Error> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;

        Ok(Self {
            listener,
            limits: config.limits,
            drain_timeout: config.drain_timeout,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires, then stop accepting and give
    /// open connections `drain_timeout` to finish their in-flight requests.
    ///
    /// The same token is expected to stop every other background task (the
    /// rate estimator), so cancelling it is the whole Draining transition.
    pub async fn serve(self, app: Router, shutdown: CancellationToken) -> Result<(), Error> {
        let Self {
            listener,
            limits,
            drain_timeout,
        } = self;
        let connections = TaskTracker::new();

        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(error = %err, "failed to accept connection");
                        continue;
                    }
                },
            };

            connections.spawn(serve_connection(
                stream,
                peer,
                app.clone(),
                limits,
                shutdown.clone(),
            ));
        }

        // Refuse new connections from here on.
        drop(listener);
        connections.close();
        info!(
            in_flight = connections.len(),
            budget = ?drain_timeout,
            "draining connections"
        );

        tokio::time::timeout(drain_timeout, connections.wait())
            .await
            .map_err(|_| Error::DrainTimeout(drain_timeout))
    }
}

/// Drives one HTTP/1.1 connection under `limits`. On shutdown the
/// connection finishes the request it is serving (if any) and then closes.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    app: Router,
    limits: ConnectionLimits,
    shutdown: CancellationToken,
) {
    let state = Arc::new(ConnState::default());
    let io = TokioIo::new(TimeoutStream::new(stream, limits, state.clone()));
    let service = service_fn(move |req: hyper::Request<Incoming>| {
        let guard = state.begin_request();
        let response = app.clone().call(req);
        async move {
            let res = response.await;
            drop(guard);
            res
        }
    });

    // Every deadline lives in `TimeoutStream`; hyper's own header timer
    // would also run while a keep-alive connection sits idle.
    let mut builder = http1::Builder::new();
    builder.header_read_timeout(None).keep_alive(true);

    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(err) = res {
                    debug!(%peer, error = %err, "connection closed with error");
                }
                break;
            }
            _ = shutdown.cancelled(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}
