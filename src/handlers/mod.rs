pub mod admin;
pub mod auth;
pub mod users;
pub mod ws;

use axum::{extract::State, http::StatusCode};

use crate::AppState;

pub async fn health(State(_state): State<AppState>) -> &'static str {
    "ok"
}

/// GET /metrics — Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> Result<String, (StatusCode, &'static str)> {
    state.metrics.render().map_err(|e| {
        tracing::error!("render metrics: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render metrics")
    })
}
