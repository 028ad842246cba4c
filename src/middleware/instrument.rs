use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;

use crate::AppState;

/// Middleware applied to every application route (not `/metrics`).
///
/// Bumps the raw request counter up front, then after the inner handler
/// returns records one `http_requests_total` increment with the status the
/// client actually receives and one `http_request_duration_seconds`
/// observation.
///
/// A panicking handler unwinds through `next.run` and nothing after it
/// is recorded.
pub async fn track_metrics(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let start = Instant::now();
    state.metrics.count_request();

    let response = next.run(req).await;
    let elapsed = start.elapsed().as_secs_f64();

    let status = response.status();
    state
        .metrics
        .increment_request(&path, method.as_str(), status.as_str());
    state
        .metrics
        .observe_duration(&path, method.as_str(), elapsed);

    response
}
