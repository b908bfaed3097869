//! Error taxonomy for the proxy core.
//!
//! Every failure site produces one of these kinds; the HTTP boundary maps
//! them to a status code and the uniform wire shape
//! `{"error":{"message","type","code"}}` without rewriting them on the way.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Errors raised by the proxy core.
///
/// `kind` is the stable taxonomy identifier (the wire `type` field); `code`
/// names the specific situation within a kind.
#[derive(Debug, Clone, Error)]
pub enum ProxyError {
    /// Payload decoded but violates a semantic rule.
    #[error("{message}")]
    InvalidRequest { code: &'static str, message: String },

    /// Payload cannot be decoded into the adapter's input schema.
    #[error("{message}")]
    SchemaError { message: String },

    /// Request body exceeds the configured size limit.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Handshake or turn waited longer than its budget.
    #[error("{message}")]
    Timeout { code: &'static str, message: String },

    /// A second concurrent request on a side that already has one in
    /// flight, or an attempted third participant.
    #[error("{message}")]
    SessionConflict { message: String },

    /// Target session was evicted or closed while the request was pending.
    #[error("{message}")]
    SessionGone { code: &'static str, message: String },

    /// Session quota reached and no eviction candidate available.
    #[error("session limit reached")]
    Overloaded,

    /// Unexpected failure.
    #[error("{message}")]
    Internal { message: String },
}

impl ProxyError {
    pub fn invalid_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            code,
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::SchemaError {
            message: message.into(),
        }
    }

    pub fn handshake_timeout() -> Self {
        Self::Timeout {
            code: "handshake_timeout",
            message: "timed out waiting for the peer to join the session".into(),
        }
    }

    pub fn turn_timeout() -> Self {
        Self::Timeout {
            code: "turn_timeout",
            message: "timed out waiting for the peer's reply".into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::SessionConflict {
            message: message.into(),
        }
    }

    pub fn gone(code: &'static str, message: impl Into<String>) -> Self {
        Self::SessionGone {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable taxonomy identifier, used as the wire `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::SchemaError { .. } => "schema_error",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Timeout { .. } => "timeout",
            Self::SessionConflict { .. } => "session_conflict",
            Self::SessionGone { .. } => "session_gone",
            Self::Overloaded => "overloaded",
            Self::Internal { .. } => "internal",
        }
    }

    /// Situation-specific identifier, used as the wire `code` field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { code, .. } => code,
            Self::SchemaError { .. } => "schema_error",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Timeout { code, .. } => code,
            Self::SessionConflict { .. } => "session_conflict",
            Self::SessionGone { code, .. } => code,
            Self::Overloaded => "max_sessions_reached",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Suggested HTTP status.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::SchemaError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            Self::SessionConflict { .. } => StatusCode::CONFLICT,
            Self::SessionGone { .. } => StatusCode::GONE,
            Self::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetails,
}

#[derive(Serialize)]
struct ErrorDetails {
    message: String,
    #[serde(rename = "type")]
    kind: &'static str,
    code: &'static str,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetails {
                message: self.to_string(),
                kind: self.kind(),
                code: self.code(),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}
