//! Common test utilities.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use http_body_util::BodyExt;
use tokio::time::Instant;

use pairlink::config::Config;
use pairlink::metrics::ProxyMetrics;
use pairlink::server::{self, AppState};
use pairlink::session::{ManagerConfig, SessionManager};

/// Budgets short enough for tests, long enough to be deterministic.
pub fn fast_manager_config() -> ManagerConfig {
    ManagerConfig {
        handshake_budget: Duration::from_millis(800),
        turn_budget: Duration::from_millis(800),
        session_ttl: Duration::from_secs(60),
        max_sessions: 100,
        evict_on_full: true,
    }
}

/// Build a test app with the default server config and given budgets.
pub fn test_app_with(manager_config: ManagerConfig) -> (Router, Arc<SessionManager>) {
    test_app_full(manager_config, Config::default(), 1024 * 1024)
}

pub fn test_app_full(
    manager_config: ManagerConfig,
    config: Config,
    max_payload_bytes: usize,
) -> (Router, Arc<SessionManager>) {
    let sessions = Arc::new(SessionManager::new(manager_config));
    let state = AppState {
        sessions: Arc::clone(&sessions),
        metrics: Arc::new(ProxyMetrics::new()),
        max_payload_bytes,
        started_at: Instant::now(),
    };
    (server::build_app(state, &config), sessions)
}

pub fn test_app() -> (Router, Arc<SessionManager>) {
    test_app_with(fast_manager_config())
}

/// Build a POST request with a JSON body.
pub fn post_json(path: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Collect a response body as JSON.
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Collect a response body as text.
pub async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Parse the `data:` lines out of an SSE body.
pub fn sse_data_lines(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.trim().to_string())
        .collect()
}

/// Parse `(event, data)` pairs out of an SSE body.
pub fn parse_sse_events(body: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    let mut current_event = String::new();
    let mut current_data = String::new();

    for line in body.lines() {
        if let Some(event_name) = line.strip_prefix("event:") {
            current_event = event_name.trim().to_string();
        } else if let Some(data) = line.strip_prefix("data:") {
            current_data = data.trim().to_string();
        } else if line.is_empty() && !current_event.is_empty() {
            events.push((current_event.clone(), current_data.clone()));
            current_event.clear();
            current_data.clear();
        }
    }
    if !current_event.is_empty() {
        events.push((current_event, current_data));
    }
    events
}

/// A minimal chat-completions body for one utterance.
pub fn chat_body(session_id: &str, content: &str) -> serde_json::Value {
    serde_json::json!({
        "model": session_id,
        "messages": [{"role": "user", "content": content}],
    })
}

/// A minimal messages body for one utterance.
pub fn messages_body(session_id: &str, content: &str) -> serde_json::Value {
    serde_json::json!({
        "model": session_id,
        "messages": [{"role": "user", "content": content}],
        "max_tokens": 64,
    })
}
