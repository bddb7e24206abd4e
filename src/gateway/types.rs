//! Wire types for the gateway's `/v1/chat/completions` HTTP surface
//! (spec §4.5, §6). Bearer-auth'd, SSE-streamed, backed by whatever
//! [`crate::runner::AgentRunner`] the caller installed — this module
//! only owns request/response shape, not model semantics.

use serde::{Deserialize, Serialize};

/// Options used to start the gateway's listeners.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

/// Request body for `POST /v1/chat/completions`. OpenAI-shaped: the
/// only fields this gateway interprets are `model` (agent selection)
/// and `user` (session identity); the rest of the OpenAI surface
/// (`temperature`, `max_tokens`, ...) is accepted as part of `messages`
/// but otherwise left to the underlying [`crate::runner::AgentRunner`].
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatCompletionMessage>,
    #[serde(default)]
    pub stream: bool,
    /// `epiloop:<agentId>` or `agent:<agentId>` selects the target
    /// agent; otherwise the `x-epiloop-agent-id` header, then the
    /// configured default agent, decide it.
    #[serde(default)]
    pub model: Option<String>,
    /// Stable per-caller identity. The request is stateless (a fresh
    /// session per call) unless this is set, in which case the
    /// SessionKey is derived deterministically from it so repeat calls
    /// with the same `user` continue the same conversation.
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChoiceDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunkChoice {
    pub index: u32,
    pub delta: ChatCompletionChoiceDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// One SSE `data:` frame of a streamed chat completion response,
/// shaped to match the OpenAI-style chunk envelope most agent clients
/// already speak.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub choices: Vec<ChatCompletionChunkChoice>,
}

impl ChatCompletionChunk {
    pub fn text_delta(id: &str, text: &str) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk",
            choices: vec![ChatCompletionChunkChoice {
                index: 0,
                delta: ChatCompletionChoiceDelta {
                    role: None,
                    content: Some(text.to_string()),
                },
                finish_reason: None,
            }],
        }
    }

    pub fn done(id: &str) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk",
            choices: vec![ChatCompletionChunkChoice {
                index: 0,
                delta: ChatCompletionChoiceDelta {
                    role: None,
                    content: None,
                },
                finish_reason: Some("stop".to_string()),
            }],
        }
    }

    pub fn to_sse_line(&self) -> String {
        format!("data: {}\n\n", serde_json::to_string(self).expect("chunk always serializes"))
    }
}

/// SSE terminator line for a streamed chat completion.
pub const SSE_DONE: &str = "data: [DONE]\n\n";

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponseMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponseChoice {
    pub index: u32,
    pub message: ChatCompletionResponseMessage,
    pub finish_reason: &'static str,
}

/// Non-streaming response body for `POST /v1/chat/completions` when
/// `stream` is absent or `false` — a single completed turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub choices: Vec<ChatCompletionResponseChoice>,
}

impl ChatCompletionResponse {
    pub fn single(id: &str, content: String) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion",
            choices: vec![ChatCompletionResponseChoice {
                index: 0,
                message: ChatCompletionResponseMessage {
                    role: "assistant",
                    content,
                },
                finish_reason: "stop",
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_delta_round_trips_through_sse() {
        let chunk = ChatCompletionChunk::text_delta("abc", "hello");
        let line = chunk.to_sse_line();
        assert!(line.starts_with("data: "));
        assert!(line.contains("\"content\":\"hello\""));
    }

    #[test]
    fn done_chunk_carries_stop_reason() {
        let chunk = ChatCompletionChunk::done("abc");
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn request_parses_model_and_user_not_session_key() {
        let body = r#"{"messages":[{"role":"user","content":"hi"}],"model":"epiloop:agent-1","user":"u1"}"#;
        let req: ChatCompletionRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.model.as_deref(), Some("epiloop:agent-1"));
        assert_eq!(req.user.as_deref(), Some("u1"));
        assert!(!req.stream);
    }

    #[test]
    fn single_completion_response_shapes_one_choice() {
        let resp = ChatCompletionResponse::single("abc", "hello".to_string());
        assert_eq!(resp.choices.len(), 1);
        assert_eq!(resp.choices[0].message.content, "hello");
        assert_eq!(resp.choices[0].finish_reason, "stop");
    }
}
