pub mod api;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

pub const ROOT_BODY: &str = "Scaling PoC Application - Go to /api for API endpoint, \
                             /metrics for Prometheus metrics";

// ─── ANY / (and every unmatched path) ────────────────────────────

pub async fn root() -> (StatusCode, &'static str) {
    (StatusCode::OK, ROOT_BODY)
}

// ─── ANY /health ─────────────────────────────────────────────────
/// Liveness / readiness check. Never fails.

pub async fn health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

// ─── Unified error type ──────────────────────────────────────────

/// Errors surfaced to HTTP callers. Request handlers never produce one;
/// only the exposition endpoint can fail.
#[derive(Debug)]
pub enum AppError {
    Exposition(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Exposition(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("metrics encoding failed: {msg}"),
            ),
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
