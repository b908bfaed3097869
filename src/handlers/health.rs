//! Liveness and metrics surfaces.

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::error::ProxyError;
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub active_sessions: usize,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.started_at.elapsed().as_secs(),
        active_sessions: state.sessions.count(),
    })
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Response {
    state
        .metrics
        .active_sessions
        .set(state.sessions.count() as i64);
    match state.metrics.render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to render metrics");
            ProxyError::internal("failed to render metrics").into_response()
        }
    }
}
