//! OpenAI-shaped Chat Completions adapter.

use axum::response::sse::Event;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use ulid::Ulid;

use super::{ProtocolAdapter, segment_utterance};
use crate::envelope::{TurnRequest, TurnResponse, WireFormat};
use crate::error::ProxyError;

/// `/v1/chat/completions` wire format.
///
/// Decodes `model` as the session id and the last `user`-role message as
/// the utterance. Everything else the caller sends (temperature,
/// max_tokens, earlier history) is accepted and discarded.
pub struct ChatCompletionsAdapter;

#[derive(Debug, Deserialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(default)]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

impl ProtocolAdapter for ChatCompletionsAdapter {
    fn format(&self) -> WireFormat {
        WireFormat::ChatCompletions
    }

    fn decode(&self, raw: &[u8]) -> Result<TurnRequest, ProxyError> {
        let request: ChatCompletionRequest = serde_json::from_slice(raw)
            .map_err(|e| ProxyError::schema(format!("invalid chat completions payload: {e}")))?;

        if request.messages.is_empty() {
            return Err(ProxyError::invalid_request(
                "messages_empty",
                "messages array cannot be empty",
            ));
        }
        let utterance = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone().unwrap_or_default())
            .ok_or_else(|| {
                ProxyError::invalid_request("no_user_message", "no user-role message in messages")
            })?;

        Ok(TurnRequest {
            session_id: request.model,
            utterance,
            stream: request.stream,
            format: WireFormat::ChatCompletions,
        })
    }

    fn encode(&self, session_id: &str, response: &TurnResponse) -> serde_json::Value {
        json!({
            "id": completion_id(),
            "object": "chat.completion",
            "created": Utc::now().timestamp(),
            "model": session_id,
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": response.utterance,
                },
                "finish_reason": response.finish_reason,
            }],
            "usage": {
                "prompt_tokens": 0,
                "completion_tokens": 0,
                "total_tokens": 0,
            },
        })
    }

    fn encode_stream(&self, session_id: &str, response: &TurnResponse) -> Vec<Event> {
        let id = completion_id();
        let created = Utc::now().timestamp();
        let chunk = |delta: serde_json::Value, finish: Option<&str>| {
            json!({
                "id": &id,
                "object": "chat.completion.chunk",
                "created": created,
                "model": session_id,
                "choices": [{
                    "index": 0,
                    "delta": delta,
                    "finish_reason": finish,
                }],
            })
        };

        let mut events = Vec::new();
        for (i, segment) in segment_utterance(&response.utterance).iter().enumerate() {
            let delta = if i == 0 {
                json!({"role": "assistant", "content": segment})
            } else {
                json!({"content": segment})
            };
            events.push(Event::default().data(chunk(delta, None).to_string()));
        }
        events.push(
            Event::default().data(chunk(json!({}), Some(response.finish_reason)).to_string()),
        );
        events.push(Event::default().data("[DONE]"));
        events
    }
}

fn completion_id() -> String {
    format!("chatcmpl-{}", Ulid::new().to_string().to_lowercase())
}
