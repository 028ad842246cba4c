use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;

use crate::handlers::AppError;
use crate::AppState;

// ─── GET /metrics ────────────────────────────────────────────────
/// Prometheus scrape target. Dumps every instrument in the text
/// exposition format. Not wrapped by the instrumentation middleware.

pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    let body = state
        .metrics
        .render()
        .map_err(|e| AppError::Exposition(e.to_string()))?;

    let content_type = TextEncoder::new().format_type().to_owned();
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}
