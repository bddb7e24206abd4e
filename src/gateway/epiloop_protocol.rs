//! Wire frame envelopes for the gateway's WebSocket protocol (spec §6).
//!
//! Frames are tagged JSON objects, following the `json!({"type": ...})`
//! idiom already used by the connection handler rather than the
//! bincode binary frames in `gateway::protocol`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    Connect {
        role: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        device_id: Option<String>,
    },
    Subscribe {
        channel: String,
        account: String,
    },
    Inbound {
        channel: String,
        account: String,
        peer: String,
        #[serde(default)]
        thread: Option<String>,
        text: String,
    },
    #[serde(rename = "node.reply")]
    NodeReply {
        id: String,
        #[serde(default)]
        ok: bool,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<Value>,
    },
    #[serde(rename = "pair.approve")]
    PairApprove { sender_key: String, code: String },
    Cancel {
        session_key: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    Connected {
        role: String,
    },
    Unauthorized {
        reason: String,
    },
    Deliver {
        channel: String,
        account: String,
        target: String,
        /// Pre-chunked reply text (spec §4.4/§4.6); each element is
        /// independently renderable and ≤ the resolved per-channel limit.
        chunks: Vec<String>,
        /// Whether the channel plugin should show a typing/processing
        /// indicator alongside this delivery (spec §4.9).
        indicator: bool,
        /// `{mention, quote, none}` hint for group replies (spec §4.9).
        #[serde(skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
    },
    #[serde(rename = "node.invoke")]
    NodeInvoke {
        id: String,
        command: String,
        arguments: Value,
        timeout_ms: u64,
    },
    #[serde(rename = "event.indicator")]
    EventIndicator {
        session_key: String,
        active: bool,
    },
    #[serde(rename = "event.heartbeat")]
    EventHeartbeat {
        text: String,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl ServerFrame {
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).expect("ServerFrame always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_frame_round_trips() {
        let raw = r#"{"type":"connect","role":"operator","token":"abc"}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        match frame {
            ClientFrame::Connect { role, token, .. } => {
                assert_eq!(role, "operator");
                assert_eq!(token.as_deref(), Some("abc"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn server_frame_renders_kebab_case_type() {
        let frame = ServerFrame::EventHeartbeat {
            text: "ok".to_string(),
        };
        let text = frame.to_text();
        assert!(text.contains("\"type\":\"event.heartbeat\""));
    }
}
