use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod conn;
mod error;
mod handlers;
mod metrics;
mod middleware;
mod server;

use crate::error::Error;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Request instruments — the middleware writes, `/metrics` reads.
    pub metrics: Arc<metrics::MetricsCollector>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let result = run().await;
    match &result {
        Ok(()) => info!("server stopped"),
        Err(err) => error!(error = %err, "fatal server error"),
    }
    ExitCode::from(exit_status(&result))
}

/// 0 once the drain has completed; 1 for every fatal error (bind failure,
/// bad configuration, drain overrun).
fn exit_status(result: &Result<(), Error>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

async fn run() -> Result<(), Error> {
    // ── 1. Configuration ─────────────────────────────────────────
    let config = config::Config::from_env()?;

    // ── 2. Build shared state ────────────────────────────────────
    let state = Arc::new(AppState {
        metrics: Arc::new(metrics::MetricsCollector::new()?),
    });

    // ── 3. Bind ──────────────────────────────────────────────────
    let server = server::Server::bind(&config).await?;
    let addr = server
        .local_addr()
        .unwrap_or_else(|_| config.listen_addr());
    info!(
        %addr,
        metrics = metrics::METRICS_PATH,
        "server listening"
    );

    // ── 4. Background tasks ──────────────────────────────────────
    // One token drives the whole shutdown: the accept loop, every open
    // connection and the rate estimator.
    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));
    let estimator = tokio::spawn(metrics::rate::run(
        state.metrics.clone(),
        shutdown.clone(),
    ));

    // ── 5. Serve until drained ───────────────────────────────────
    let app = server::create_router(state);
    let result = server.serve(app, shutdown).await;

    if let Err(err) = estimator.await {
        warn!(error = %err, "rate estimator task failed");
    }
    result
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, starting graceful shutdown");
    shutdown.cancel();
}
