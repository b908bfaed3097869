//! Per-request turn orchestration.
//!
//! Each inbound request is half a duplex turn: decode it through the
//! adapter for its endpoint, hand the utterance to the session, suspend
//! until the peer answers, and re-encode the peer's utterance as this
//! request's response.

use std::convert::Infallible;
use std::time::Duration;

use axum::Extension;
use axum::Json;
use axum::body::{Bytes, to_bytes};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use crate::correlation::RequestId;
use crate::envelope::{TurnRequest, TurnResponse, WireFormat};
use crate::error::ProxyError;
use crate::protocols::{self, ProtocolAdapter};
use crate::server::AppState;

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    request: Request,
) -> Response {
    handle_turn(state, request_id, WireFormat::ChatCompletions, request).await
}

/// POST /v1/messages
pub async fn messages(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    request: Request,
) -> Response {
    handle_turn(state, request_id, WireFormat::Messages, request).await
}

async fn handle_turn(
    state: AppState,
    request_id: RequestId,
    format: WireFormat,
    request: Request,
) -> Response {
    state.metrics.requests_total.inc();

    let body = match read_body(request, state.max_payload_bytes).await {
        Ok(body) => body,
        Err(e) => {
            warn!(request_id = %request_id.0, error = %e, "rejected oversized body");
            return e.into_response();
        }
    };

    let adapter = protocols::adapter_for(format);
    let turn = match decode_and_validate(adapter, &body) {
        Ok(turn) => turn,
        Err(e) => {
            warn!(request_id = %request_id.0, kind = e.kind(), error = %e, "rejected request");
            return e.into_response();
        }
    };

    info!(
        request_id = %request_id.0,
        session_id = %turn.session_id,
        format = %format,
        stream = turn.stream,
        "turn request received"
    );

    let session = match state.sessions.get_or_create(&turn.session_id) {
        Ok(session) => session,
        Err(e) => {
            warn!(request_id = %request_id.0, session_id = %turn.session_id, "directory refused session");
            return e.into_response();
        }
    };
    state
        .metrics
        .active_sessions
        .set(state.sessions.count() as i64);

    let reply = match session.exchange(&turn.utterance).await {
        Ok(reply) => reply,
        Err(e) => {
            match &e {
                ProxyError::Timeout { .. } => state.metrics.timeouts_total.inc(),
                ProxyError::SessionConflict { .. } => state.metrics.conflicts_total.inc(),
                _ => {}
            }
            warn!(
                request_id = %request_id.0,
                session_id = %turn.session_id,
                kind = e.kind(),
                code = e.code(),
                "turn failed"
            );
            return e.into_response();
        }
    };

    state.metrics.turns_completed_total.inc();
    info!(
        request_id = %request_id.0,
        session_id = %turn.session_id,
        reply_bytes = reply.len(),
        "turn completed"
    );

    let response = TurnResponse::new(reply);
    if turn.stream {
        let events = adapter.encode_stream(&turn.session_id, &response);
        let stream = futures::stream::iter(events.into_iter().map(Ok::<Event, Infallible>));
        Sse::new(stream)
            .keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE).text("keep-alive"))
            .into_response()
    } else {
        (
            StatusCode::OK,
            Json(adapter.encode(&turn.session_id, &response)),
        )
            .into_response()
    }
}

/// Read the raw body, capped before any decoding happens.
async fn read_body(request: Request, limit: usize) -> Result<Bytes, ProxyError> {
    to_bytes(request.into_body(), limit)
        .await
        .map_err(|_| ProxyError::PayloadTooLarge { limit })
}

fn decode_and_validate(
    adapter: &dyn ProtocolAdapter,
    body: &[u8],
) -> Result<TurnRequest, ProxyError> {
    let turn = adapter.decode(body)?;
    if turn.session_id.trim().is_empty() {
        return Err(ProxyError::invalid_request(
            "session_id_empty",
            "model must be a non-empty session id",
        ));
    }
    if turn.utterance.is_empty() {
        return Err(ProxyError::invalid_request(
            "utterance_empty",
            "last user message must be non-empty",
        ));
    }
    Ok(turn)
}
