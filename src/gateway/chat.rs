//! HTTP surface for `POST /v1/chat/completions` (spec §4.5, §6).
//!
//! Grounded in `gateway::health`'s raw-HTTP style: no framework, just
//! enough request/response parsing to serve one path on the same
//! listener the WebSocket accept loop runs on. The listener peeks the
//! first bytes of a connection to tell a chat-completions POST apart
//! from a WebSocket upgrade before committing to either path.

use std::sync::Arc;

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::auth::{authorize_connect, ConnectAuth, ConnectContext, ConnectHeaders};
use crate::runner::{dispatch as run_dispatch, RunnerBlock, ToolCancelFlag};
use crate::session::SessionKey;

use super::types::{
    ChatCompletionChunk, ChatCompletionMessage, ChatCompletionRequest, ChatCompletionResponse,
    SSE_DONE,
};
use super::Gateway;

const MAX_REQUEST_BYTES: usize = 1 << 20;

/// Peek the first bytes of `stream` to tell a chat-completions POST
/// apart from a WebSocket upgrade request, without consuming them —
/// the real read happens in [`handle`].
pub(super) async fn looks_like_chat_completions(stream: &TcpStream) -> bool {
    let mut buf = [0u8; 512];
    match stream.peek(&mut buf).await {
        Ok(n) if n > 0 => String::from_utf8_lossy(&buf[..n])
            .lines()
            .next()
            .map(|line| line.starts_with("POST /v1/chat/completions"))
            .unwrap_or(false),
        _ => false,
    }
}

/// Serve one `POST /v1/chat/completions` request end to end: parse,
/// authenticate, select an agent, run it, and write either a single
/// JSON response or an SSE stream.
pub(super) async fn handle(gateway: Arc<Gateway>, mut stream: TcpStream) -> Result<()> {
    if !gateway.config.gateway.http_chat_completions_enabled {
        return write_json(
            &mut stream,
            "404 Not Found",
            &serde_json::json!({"error": {"message": "chat completions endpoint is disabled"}}),
        )
        .await;
    }

    let parsed = match read_request(&mut stream).await {
        Ok(parsed) => parsed,
        Err(err) => {
            return write_json(
                &mut stream,
                "400 Bad Request",
                &serde_json::json!({"error": {"message": err.to_string()}}),
            )
            .await;
        }
    };

    let resolved = gateway.config.resolve_auth();
    let decision = authorize_connect(
        &resolved,
        &ConnectHeaders::default(),
        &ConnectAuth {
            token: parsed.bearer.as_deref(),
            password: parsed.bearer.as_deref(),
            device_id: None,
        },
        ConnectContext { is_local_direct: false },
    );
    let decision = match decision {
        Ok(decision) => {
            crate::metrics::record_auth_attempt(true);
            decision
        }
        Err(err) => {
            crate::metrics::record_auth_attempt(false);
            return write_json(
                &mut stream,
                "401 Unauthorized",
                &serde_json::json!({"error": {"message": err.reason_code()}}),
            )
            .await;
        }
    };
    tracing::debug!(principal = ?decision.principal, "chat completions request authorized");

    let request: ChatCompletionRequest = match serde_json::from_str(&parsed.body) {
        Ok(req) => req,
        Err(err) => {
            return write_json(
                &mut stream,
                "400 Bad Request",
                &serde_json::json!({"error": {"message": format!("invalid request body: {err}")}}),
            )
            .await;
        }
    };

    let agent_id = resolve_agent_id(&gateway, &request, parsed.agent_id_header.as_deref());
    let session_key = session_key_for(agent_id.as_deref(), request.user.as_deref());
    let prompt = flatten_messages(&request.messages);
    let id = format!("chatcmpl-{}", generate_id());

    gateway
        .sessions
        .ensure_run(&session_key, agent_id.as_deref().unwrap_or("default"))
        .await;

    if request.stream {
        stream_completion(&gateway, &mut stream, &session_key, &prompt, &id).await
    } else {
        single_completion(&gateway, &mut stream, &session_key, &prompt, &id).await
    }
}

async fn stream_completion(
    gateway: &Gateway,
    stream: &mut TcpStream,
    session_key: &SessionKey,
    prompt: &str,
    id: &str,
) -> Result<()> {
    write_sse_preamble(stream).await?;

    let cancel = ToolCancelFlag::new();
    let mut lines = Vec::new();
    let result = run_dispatch(&*gateway.runner, session_key, prompt, &cancel, |block| {
        if let RunnerBlock::Text { text } = block {
            lines.push(ChatCompletionChunk::text_delta(id, &text).to_sse_line());
        }
    })
    .await;

    for line in &lines {
        stream.write_all(line.as_bytes()).await?;
    }
    stream
        .write_all(ChatCompletionChunk::done(id).to_sse_line().as_bytes())
        .await?;
    stream.write_all(SSE_DONE.as_bytes()).await?;
    stream.flush().await?;

    gateway.sessions.retire(session_key).await;
    if let Err(err) = result {
        tracing::warn!(%err, "chat completions runner dispatch failed");
    }
    Ok(())
}

async fn single_completion(
    gateway: &Gateway,
    stream: &mut TcpStream,
    session_key: &SessionKey,
    prompt: &str,
    id: &str,
) -> Result<()> {
    let cancel = ToolCancelFlag::new();
    let mut content = String::new();
    let result = run_dispatch(&*gateway.runner, session_key, prompt, &cancel, |block| {
        if let RunnerBlock::Text { text } = block {
            content.push_str(&text);
        }
    })
    .await;
    gateway.sessions.retire(session_key).await;

    if let Err(err) = result {
        return write_json(
            stream,
            "500 Internal Server Error",
            &serde_json::json!({"error": {"message": err.to_string()}}),
        )
        .await;
    }

    let response = ChatCompletionResponse::single(id, content);
    write_json(stream, "200 OK", &serde_json::to_value(&response)?).await
}

/// Agent selection order (spec §4.5): `model=epiloop:<id>`/`agent:<id>`
/// in the body, then the `x-epiloop-agent-id` header, then the
/// configured default agent.
fn resolve_agent_id(
    gateway: &Gateway,
    request: &ChatCompletionRequest,
    agent_id_header: Option<&str>,
) -> Option<String> {
    if let Some(model) = request.model.as_deref() {
        if let Some(id) = model.strip_prefix("epiloop:").or_else(|| model.strip_prefix("agent:")) {
            return Some(id.to_string());
        }
    }
    if let Some(id) = agent_id_header {
        return Some(id.to_string());
    }
    gateway.config.agents.default_agent_id.clone()
}

/// Stateless per request unless `user` is set, in which case the same
/// `user` always derives the same key so repeat calls continue one
/// conversation.
fn session_key_for(agent_id: Option<&str>, user: Option<&str>) -> SessionKey {
    let account = agent_id.unwrap_or("default");
    match user {
        Some(user) => SessionKey::new("http", account, user, None),
        None => SessionKey::new("http", account, format!("anon-{}", generate_id()), None),
    }
}

fn flatten_messages(messages: &[ChatCompletionMessage]) -> String {
    messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn generate_id() -> String {
    let mut bytes = [0u8; 12];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

struct ParsedRequest {
    bearer: Option<String>,
    agent_id_header: Option<String>,
    body: String,
}

async fn write_sse_preamble(stream: &mut TcpStream) -> Result<()> {
    stream
        .write_all(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: keep-alive\r\n\r\n",
        )
        .await
        .context("writing SSE preamble")?;
    Ok(())
}

async fn write_json(stream: &mut TcpStream, status: &str, body: &serde_json::Value) -> Result<()> {
    let body = body.to_string();
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len(),
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Read a full HTTP/1.1 request off `stream`: headers (bounded by
/// [`MAX_REQUEST_BYTES`]), then exactly `Content-Length` bytes of body.
async fn read_request(stream: &mut TcpStream) -> Result<ParsedRequest> {
    let mut buf = Vec::new();
    let mut scratch = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut scratch).await.context("reading request")?;
        if n == 0 {
            anyhow::bail!("connection closed while reading request headers");
        }
        buf.extend_from_slice(&scratch[..n]);
        if let Some(pos) = find_header_terminator(&buf) {
            break pos;
        }
        if buf.len() > MAX_REQUEST_BYTES {
            anyhow::bail!("request headers exceeded {MAX_REQUEST_BYTES} bytes");
        }
    };

    let header_text = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut bearer = None;
    let mut agent_id_header = None;
    let mut content_length = 0usize;
    for line in header_text.lines().skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "authorization" => bearer = value.strip_prefix("Bearer ").map(str::to_string),
            "x-epiloop-agent-id" => agent_id_header = Some(value.to_string()),
            "content-length" => content_length = value.parse().unwrap_or(0),
            _ => {}
        }
    }

    let body_start = header_end + 4;
    let mut body = buf[body_start..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut scratch).await.context("reading request body")?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&scratch[..n]);
        if body.len() > MAX_REQUEST_BYTES {
            anyhow::bail!("request body exceeded {MAX_REQUEST_BYTES} bytes");
        }
    }
    body.truncate(content_length.min(body.len()));

    Ok(ParsedRequest {
        bearer,
        agent_id_header,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_joins_message_contents() {
        let messages = vec![
            ChatCompletionMessage {
                role: "system".into(),
                content: "be terse".into(),
            },
            ChatCompletionMessage {
                role: "user".into(),
                content: "hi".into(),
            },
        ];
        assert_eq!(flatten_messages(&messages), "be terse\nhi");
    }

    #[test]
    fn session_key_is_stable_for_same_user() {
        let a = session_key_for(Some("agent-1"), Some("u1"));
        let b = session_key_for(Some("agent-1"), Some("u1"));
        assert_eq!(a, b);
    }

    #[test]
    fn session_key_is_unique_without_user() {
        let a = session_key_for(Some("agent-1"), None);
        let b = session_key_for(Some("agent-1"), None);
        assert_ne!(a, b);
    }

    #[test]
    fn resolve_agent_id_prefers_model_field() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::config::GatewayConfig::default();
        config.agents.default_agent_id = Some("fallback".into());
        let pairing = crate::pairing::PairingManager::new(dir.path().join("allowlist.json")).unwrap();
        let gateway = Gateway::new(config, std::sync::Arc::new(NoopRunner), pairing);

        let request = ChatCompletionRequest {
            messages: vec![],
            stream: false,
            model: Some("epiloop:agent-x".into()),
            user: None,
        };
        assert_eq!(
            resolve_agent_id(&gateway, &request, Some("header-agent")),
            Some("agent-x".to_string())
        );

        let header_only = ChatCompletionRequest {
            messages: vec![],
            stream: false,
            model: None,
            user: None,
        };
        assert_eq!(
            resolve_agent_id(&gateway, &header_only, Some("header-agent")),
            Some("header-agent".to_string())
        );

        let neither = ChatCompletionRequest {
            messages: vec![],
            stream: false,
            model: None,
            user: None,
        };
        assert_eq!(resolve_agent_id(&gateway, &neither, None), Some("fallback".to_string()));
    }

    struct NoopRunner;

    #[async_trait::async_trait]
    impl crate::runner::AgentRunner for NoopRunner {
        async fn run_round(
            &self,
            _session_key: &SessionKey,
            _input: &str,
        ) -> Result<Vec<RunnerBlock>, crate::error::RunnerError> {
            Ok(vec![RunnerBlock::End])
        }
    }
}
