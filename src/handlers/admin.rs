//! Admin surface: redacted session directory snapshot.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::server::AppState;
use crate::session::SessionInfo;

#[derive(Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionInfo>,
}

/// GET /admin/sessions
pub async fn admin_sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.sessions.snapshot(),
    })
}
