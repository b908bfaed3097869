//! Wire-format-independent request/response envelope.
//!
//! Both protocol adapters decode into [`TurnRequest`] and encode from
//! [`TurnResponse`]; nothing downstream of the adapter layer knows which
//! wire format a request arrived in.

use std::fmt;

/// Wire formats understood by the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// OpenAI-shaped Chat Completions (`/v1/chat/completions`).
    ChatCompletions,
    /// Claude-shaped Messages (`/v1/messages`).
    Messages,
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::ChatCompletions => write!(f, "chat_completions"),
            WireFormat::Messages => write!(f, "messages"),
        }
    }
}

/// A decoded inbound turn.
///
/// Only `utterance` is ever forwarded to the peer; all other wire-format
/// metadata (temperature, max_tokens, system prompts, history) is accepted
/// and discarded at decode time.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Session identifier carried in the `model` field.
    pub session_id: String,
    /// Content of the last `user`-role message.
    pub utterance: String,
    /// Whether the caller asked for a streamed response.
    pub stream: bool,
    /// Which adapter produced this envelope.
    pub format: WireFormat,
}

/// The peer's utterance, ready for re-encoding by an adapter.
#[derive(Debug, Clone)]
pub struct TurnResponse {
    pub utterance: String,
    pub finish_reason: &'static str,
}

impl TurnResponse {
    pub fn new(utterance: String) -> Self {
        Self {
            utterance,
            finish_reason: "stop",
        }
    }
}
