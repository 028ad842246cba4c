use axum::{http::StatusCode, Json};
use serde::Serialize;
use std::time::Duration;

/// Fixed artificial latency of the synthetic workload.
pub const API_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse {
    pub status: &'static str,
    pub message: &'static str,
}

// ─── ANY /api ────────────────────────────────────────────────────
/// Synthetic endpoint: sleeps `API_DELAY` to emulate work so latency and
/// throughput have something to show under load.

pub async fn hello() -> (StatusCode, Json<ApiResponse>) {
    tokio::time::sleep(API_DELAY).await;

    (
        StatusCode::OK,
        Json(ApiResponse {
            status: "success",
            message: "Hello from scaling-poc!",
        }),
    )
}
