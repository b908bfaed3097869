//! Protocol adapters: bidirectional mapping between each supported wire
//! format and the internal envelope.
//!
//! An adapter is a pair of pure functions over one wire format. Decoding
//! tolerates unknown optional fields and rejects missing or malformed
//! required ones; encoding renders the peer's utterance in the shape the
//! caller expects, including cosmetic chunking for streamed responses.

mod chat_completions;
mod messages;

pub use chat_completions::ChatCompletionsAdapter;
pub use messages::MessagesAdapter;

use axum::response::sse::Event;

use crate::envelope::{TurnRequest, TurnResponse, WireFormat};
use crate::error::ProxyError;

/// One wire format's encode/decode pair.
pub trait ProtocolAdapter: Send + Sync {
    fn format(&self) -> WireFormat;

    /// Decode a raw body into the internal envelope.
    fn decode(&self, raw: &[u8]) -> Result<TurnRequest, ProxyError>;

    /// Encode a completed turn as a single response body.
    fn encode(&self, session_id: &str, response: &TurnResponse) -> serde_json::Value;

    /// Encode a completed turn as a sequence of SSE events.
    ///
    /// The peer always delivers a whole utterance in one shot; streaming
    /// is cosmetic chunking, one event per whitespace-preserving segment.
    fn encode_stream(&self, session_id: &str, response: &TurnResponse) -> Vec<Event>;
}

static CHAT_COMPLETIONS: ChatCompletionsAdapter = ChatCompletionsAdapter;
static MESSAGES: MessagesAdapter = MessagesAdapter;

/// Select the adapter for a wire format.
pub fn adapter_for(format: WireFormat) -> &'static dyn ProtocolAdapter {
    match format {
        WireFormat::ChatCompletions => &CHAT_COMPLETIONS,
        WireFormat::Messages => &MESSAGES,
    }
}

/// Split an utterance into whitespace-preserving segments, each segment a
/// word plus the whitespace that follows it. Concatenating the segments
/// reproduces the input exactly.
pub fn segment_utterance(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_whitespace = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            in_whitespace = true;
        } else if in_whitespace {
            segments.push(std::mem::take(&mut current));
            in_whitespace = false;
        }
        current.push(ch);
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}
