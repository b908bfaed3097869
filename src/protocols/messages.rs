//! Claude-shaped Messages adapter.

use axum::response::sse::Event;
use serde::Deserialize;
use serde_json::json;
use ulid::Ulid;

use super::{ProtocolAdapter, segment_utterance};
use crate::envelope::{TurnRequest, TurnResponse, WireFormat};
use crate::error::ProxyError;

/// `/v1/messages` wire format.
///
/// Message content arrives either as a plain string or as an array of
/// content blocks; only `text` blocks contribute to the utterance.
pub struct MessagesAdapter;

#[derive(Debug, Deserialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<InboundMessage>,
    #[serde(default)]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    role: String,
    content: MessageContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl MessageContent {
    fn into_text(self) -> String {
        match self {
            MessageContent::Text(text) => text,
            MessageContent::Blocks(blocks) => blocks
                .into_iter()
                .filter(|b| b.kind == "text")
                .map(|b| b.text)
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

impl ProtocolAdapter for MessagesAdapter {
    fn format(&self) -> WireFormat {
        WireFormat::Messages
    }

    fn decode(&self, raw: &[u8]) -> Result<TurnRequest, ProxyError> {
        let request: MessagesRequest = serde_json::from_slice(raw)
            .map_err(|e| ProxyError::schema(format!("invalid messages payload: {e}")))?;

        if request.messages.is_empty() {
            return Err(ProxyError::invalid_request(
                "messages_empty",
                "messages array cannot be empty",
            ));
        }
        let utterance = request
            .messages
            .into_iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.into_text())
            .ok_or_else(|| {
                ProxyError::invalid_request("no_user_message", "no user-role message in messages")
            })?;

        Ok(TurnRequest {
            session_id: request.model,
            utterance,
            stream: request.stream,
            format: WireFormat::Messages,
        })
    }

    fn encode(&self, session_id: &str, response: &TurnResponse) -> serde_json::Value {
        json!({
            "id": message_id(),
            "type": "message",
            "role": "assistant",
            "model": session_id,
            "content": [{
                "type": "text",
                "text": response.utterance,
            }],
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {
                "input_tokens": 0,
                "output_tokens": 0,
            },
        })
    }

    fn encode_stream(&self, session_id: &str, response: &TurnResponse) -> Vec<Event> {
        let id = message_id();
        let named = |name: &str, data: serde_json::Value| {
            Event::default().event(name).data(data.to_string())
        };

        let mut events = vec![
            named(
                "message_start",
                json!({
                    "type": "message_start",
                    "message": {
                        "id": id,
                        "type": "message",
                        "role": "assistant",
                        "model": session_id,
                        "content": [],
                        "stop_reason": null,
                        "usage": {"input_tokens": 0, "output_tokens": 0},
                    },
                }),
            ),
            named(
                "content_block_start",
                json!({
                    "type": "content_block_start",
                    "index": 0,
                    "content_block": {"type": "text", "text": ""},
                }),
            ),
        ];
        for segment in segment_utterance(&response.utterance) {
            events.push(named(
                "content_block_delta",
                json!({
                    "type": "content_block_delta",
                    "index": 0,
                    "delta": {"type": "text_delta", "text": segment},
                }),
            ));
        }
        events.push(named(
            "content_block_stop",
            json!({"type": "content_block_stop", "index": 0}),
        ));
        events.push(named(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": {"stop_reason": "end_turn", "stop_sequence": null},
                "usage": {"output_tokens": 0},
            }),
        ));
        events.push(named("message_stop", json!({"type": "message_stop"})));
        events
    }
}

fn message_id() -> String {
    format!("msg_{}", Ulid::new().to_string().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &str) -> Result<TurnRequest, ProxyError> {
        MessagesAdapter.decode(raw.as_bytes())
    }

    #[test]
    fn decodes_string_content() {
        let turn = decode(
            r#"{"model":"s4","messages":[{"role":"user","content":"hi there"}],"max_tokens":128}"#,
        )
        .unwrap();
        assert_eq!(turn.session_id, "s4");
        assert_eq!(turn.utterance, "hi there");
    }

    #[test]
    fn decodes_content_blocks() {
        let turn = decode(
            r#"{
                "model": "s4",
                "messages": [{
                    "role": "user",
                    "content": [
                        {"type": "text", "text": "part one "},
                        {"type": "image", "source": {}},
                        {"type": "text", "text": "part two"}
                    ]
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(turn.utterance, "part one part two");
    }

    #[test]
    fn last_user_message_wins() {
        let turn = decode(
            r#"{"model":"s","messages":[
                {"role":"user","content":"old"},
                {"role":"assistant","content":"mid"},
                {"role":"user","content":"new"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(turn.utterance, "new");
    }

    #[test]
    fn missing_messages_is_a_schema_error() {
        let err = decode(r#"{"model":"s"}"#).unwrap_err();
        assert_eq!(err.kind(), "schema_error");
    }

    #[test]
    fn no_user_role_is_invalid() {
        let err =
            decode(r#"{"model":"s","messages":[{"role":"assistant","content":"x"}]}"#).unwrap_err();
        assert_eq!(err.code(), "no_user_message");
    }

    #[test]
    fn encodes_message_shape() {
        let body = MessagesAdapter.encode("s4", &TurnResponse::new("answer".into()));
        assert_eq!(body["type"], "message");
        assert_eq!(body["role"], "assistant");
        assert_eq!(body["model"], "s4");
        assert_eq!(body["content"][0]["type"], "text");
        assert_eq!(body["content"][0]["text"], "answer");
        assert_eq!(body["stop_reason"], "end_turn");
        assert!(body["id"].as_str().unwrap().starts_with("msg_"));
    }

    #[test]
    fn encode_then_decode_round_trips_the_utterance() {
        let encoded = MessagesAdapter.encode("s4", &TurnResponse::new("round trip".into()));
        let echoed = json!({
            "model": encoded["model"],
            "messages": [{"role": "user", "content": encoded["content"]}],
        });
        let turn = MessagesAdapter.decode(echoed.to_string().as_bytes()).unwrap();
        assert_eq!(turn.session_id, "s4");
        assert_eq!(turn.utterance, "round trip");
    }

    #[test]
    fn stream_events_follow_the_messages_protocol() {
        let events = MessagesAdapter.encode_stream("s4", &TurnResponse::new("a b".into()));
        // start, block_start, two deltas, block_stop, message_delta, stop.
        assert_eq!(events.len(), 7);
    }
}
