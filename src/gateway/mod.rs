//! Gateway — the WebSocket/HTTP front door that authenticates incoming
//! connections, routes messages into the per-session hub, and brokers
//! node RPC round-trips (spec §4, §6).
//!
//! Grounded in the teacher's WebSocket accept loop: one task per
//! connection, a reader half feeding frames into session dispatch, a
//! writer half fed by an mpsc channel so outbound delivery never blocks
//! on a slow reader.

mod chat;
pub mod csrf;
pub mod epiloop_protocol;
pub mod health;
pub mod node_rpc;
pub mod tls;
pub mod types;

pub use types::{ChatCompletionChunk, ChatCompletionRequest, GatewayOptions};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::auth::{authorize_connect, ConnectAuth, ConnectContext, ConnectHeaders, Principal};
use crate::chunk::{self, ChunkMode};
use crate::config::GatewayConfig;
use crate::error::{AuthError, NodeRpcError};
use crate::failure::FailureRegistry;
use crate::heartbeat::HeartbeatPolicy;
use crate::pairing::PairingManager;
use crate::plugin::PluginRegistry;
use crate::runner::{dispatch as run_dispatch, AgentRunner, ToolCancelFlag};
use crate::session::{InboundMessage, SessionHub, SessionKey};
use epiloop_protocol::{ClientFrame, ServerFrame};
use health::{start_health_server, HealthStats, SharedHealthStats};
use node_rpc::{clamp_timeout, NodeInvokeResult, NodeRpcTable};

/// Everything one running gateway process owns, shared across
/// connection tasks via `Arc`.
pub struct Gateway {
    pub config: GatewayConfig,
    pub sessions: Arc<SessionHub>,
    pub plugins: Arc<PluginRegistry>,
    pub node_rpc: Arc<NodeRpcTable>,
    pub pairing: Arc<Mutex<PairingManager>>,
    pub health: SharedHealthStats,
    pub runner: Arc<dyn AgentRunner>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, runner: Arc<dyn AgentRunner>, pairing: PairingManager) -> Self {
        Self {
            config,
            sessions: Arc::new(SessionHub::new()),
            plugins: Arc::new(PluginRegistry::new()),
            node_rpc: Arc::new(NodeRpcTable::new()),
            pairing: Arc::new(Mutex::new(pairing)),
            health: Arc::new(HealthStats::new()),
            runner,
        }
    }

    /// Run the WebSocket listener until `cancel` fires. Each accepted
    /// connection is handled by its own task; a listener-level failure
    /// is reported through the process-wide [`FailureRegistry`] rather
    /// than unwinding the whole gateway.
    pub async fn run(self: Arc<Self>, options: GatewayOptions, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&options.listen)
            .await
            .with_context(|| format!("binding gateway listener on {}", options.listen))?;
        tracing::info!(listen = %options.listen, "gateway listening");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("gateway shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            FailureRegistry::report_fatal(anyhow::anyhow!(err)).await;
                            continue;
                        }
                    };
                    let this = self.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        if chat::looks_like_chat_completions(&stream).await {
                            if let Err(err) = chat::handle(this, stream).await {
                                tracing::warn!(%peer_addr, %err, "chat completions request ended with error");
                            }
                            return;
                        }
                        if let Err(err) = this.handle_connection(stream, peer_addr, cancel).await {
                            tracing::warn!(%peer_addr, %err, "connection ended with error");
                        }
                    });
                }
            }
        }
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<()> {
        let peer_is_loopback = peer_addr.ip().is_loopback();
        let mut captured_headers = CapturedHeaders::default();

        let callback = |req: &Request, resp: Response| {
            captured_headers.host = header_str(req, "host");
            captured_headers.tailscale_user_login = header_str(req, "tailscale-user-login");
            captured_headers.forwarded_for = header_str(req, "x-forwarded-for");
            captured_headers.forwarded_proto = header_str(req, "x-forwarded-proto");
            captured_headers.forwarded_host = header_str(req, "x-forwarded-host");
            captured_headers.auth_token = header_str(req, "x-epiloop-token");
            captured_headers.auth_password = header_str(req, "x-epiloop-password");
            Ok(resp)
        };

        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .context("WebSocket handshake failed")?;

        crate::metrics::record_connection_opened();
        self.health
            .total_connections
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.health
            .active_connections
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let resolved = self.config.resolve_auth();
        let headers = ConnectHeaders {
            tailscale_user_login: captured_headers.tailscale_user_login.as_deref(),
            forwarded_for: captured_headers.forwarded_for.as_deref(),
            forwarded_proto: captured_headers.forwarded_proto.as_deref(),
            forwarded_host: captured_headers.forwarded_host.as_deref(),
        };
        let is_local_direct =
            crate::auth::is_local_direct(peer_is_loopback, captured_headers.host.as_deref(), &headers);
        let decision = authorize_connect(
            &resolved,
            &headers,
            &ConnectAuth {
                token: captured_headers.auth_token.as_deref(),
                password: captured_headers.auth_password.as_deref(),
                device_id: None,
            },
            ConnectContext { is_local_direct },
        );

        let (mut write, mut read) = ws_stream.split();

        let principal = match decision {
            Ok(decision) => {
                crate::metrics::record_auth_attempt(true);
                let _ = write
                    .send(WsMessage::Text(
                        ServerFrame::Connected {
                            role: role_label(&decision.principal),
                        }
                        .to_text()
                        .into(),
                    ))
                    .await;
                decision.principal
            }
            Err(err) => {
                crate::metrics::record_auth_attempt(false);
                let _ = write
                    .send(WsMessage::Text(
                        ServerFrame::Unauthorized {
                            reason: auth_reason(&err),
                        }
                        .to_text()
                        .into(),
                    ))
                    .await;
                self.teardown_connection();
                return Ok(());
            }
        };
        tracing::info!(%peer_addr, ?principal, "connection authorized");

        let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(64);
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if write.send(WsMessage::Text(frame.to_text().into())).await.is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = read.next() => {
                    match next {
                        Some(Ok(WsMessage::Text(text))) => {
                            self.health.total_messages.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            if let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) {
                                self.handle_client_frame(frame, out_tx.clone()).await;
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Err(err)) => {
                            tracing::warn!(%err, "websocket read error");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }

        writer_task.abort();
        self.teardown_connection();
        Ok(())
    }

    fn teardown_connection(&self) {
        crate::metrics::record_connection_closed();
        self.health
            .active_connections
            .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
    }

    async fn handle_client_frame(&self, frame: ClientFrame, out: mpsc::Sender<ServerFrame>) {
        match frame {
            ClientFrame::Connect { .. } => {}
            ClientFrame::Subscribe { .. } => {}
            ClientFrame::Inbound {
                channel,
                account,
                peer,
                thread,
                text,
            } => {
                let key = SessionKey::new(&channel, &account, &peer, thread.clone());
                self.sessions.ensure_run(&key, "default").await;
                let runner = self.runner.clone();
                let sessions = self.sessions.clone();
                let target = peer.clone();
                let channel_for_deliver = channel.clone();
                let account_for_deliver = account.clone();
                let chunk_limit = self.config.resolve_chunk_limit(&channel, &account);
                let msg = InboundMessage {
                    session_key: key.clone(),
                    text,
                };
                self.sessions
                    .clone()
                    .dispatch(msg, move |inbound| {
                        let runner = runner.clone();
                        let sessions = sessions.clone();
                        let out = out.clone();
                        let target = target.clone();
                        let channel_for_deliver = channel_for_deliver.clone();
                        let account_for_deliver = account_for_deliver.clone();
                        async move {
                            let started = Instant::now();
                            let cancel = ToolCancelFlag::new();
                            let mut segments: Vec<String> = vec![String::new()];
                            let result = run_dispatch(
                                &*runner,
                                &inbound.session_key,
                                &inbound.text,
                                &cancel,
                                |block| {
                                    // Tool calls/results close out the current
                                    // user-visible segment so they never mix
                                    // into one delivered message (spec §4.6).
                                    match block {
                                        crate::runner::RunnerBlock::Text { text } => {
                                            segments.last_mut().unwrap().push_str(&text);
                                        }
                                        crate::runner::RunnerBlock::ToolCall { .. }
                                        | crate::runner::RunnerBlock::ToolResult { .. } => {
                                            if !segments.last().unwrap().is_empty() {
                                                segments.push(String::new());
                                            }
                                        }
                                        crate::runner::RunnerBlock::End => {}
                                    }
                                },
                            )
                            .await;

                            if result.is_ok() {
                                for segment in segments.into_iter().filter(|s| !s.is_empty()) {
                                    // BlueBubbles is the only channel using
                                    // newline mode today (spec §4.4);
                                    // everything else chunks by length.
                                    let chunks = chunk::chunk(&segment, chunk_limit, ChunkMode::Length);
                                    let _ = out
                                        .send(ServerFrame::Deliver {
                                            channel: channel_for_deliver.clone(),
                                            account: account_for_deliver.clone(),
                                            target: target.clone(),
                                            chunks,
                                            indicator: HeartbeatPolicy::default().use_indicator,
                                            reply_to: None,
                                        })
                                        .await;
                                }
                                crate::metrics::record_delivery_latency(
                                    &channel_for_deliver,
                                    started.elapsed().as_secs_f64(),
                                );
                            }
                            if let Err(err) = result {
                                tracing::warn!(%err, "runner dispatch failed");
                            }
                            sessions.retire(&inbound.session_key).await;
                        }
                    })
                    .await;
            }
            ClientFrame::NodeReply { id, ok, result, error } => {
                self.node_rpc
                    .resolve(&id, NodeInvokeResult { ok, result, error })
                    .await;
            }
            ClientFrame::PairApprove { sender_key, code } => {
                let (messenger_type, sender_id) = split_sender_key(&sender_key);
                let pairing = self.pairing.lock().await;
                if !pairing.verify_code(messenger_type, sender_id, &code).await {
                    tracing::warn!(%sender_key, "pairing code rejected");
                    return;
                }
                if let Err(err) = pairing
                    .approve_sender(messenger_type, sender_id, sender_id.to_string())
                    .await
                {
                    tracing::warn!(%sender_key, %err, "pairing approval failed");
                }
            }
            ClientFrame::Cancel { session_key } => {
                tracing::debug!(%session_key, "cancel requested");
            }
        }
    }

    /// Invoke a node command, clamping the timeout for media-heavy
    /// commands, and correlate the reply through [`NodeRpcTable`].
    pub async fn invoke_node(
        &self,
        send: impl FnOnce(ServerFrame) -> Result<()>,
        id: String,
        command: String,
        arguments: serde_json::Value,
        requested_timeout: std::time::Duration,
    ) -> Result<NodeInvokeResult, NodeRpcError> {
        let timeout = clamp_timeout(&command, requested_timeout);
        send(ServerFrame::NodeInvoke {
            id: id.clone(),
            command,
            arguments,
            timeout_ms: timeout.as_millis() as u64,
        })
        .map_err(|err| NodeRpcError::Unavailable(err.to_string()))?;
        self.node_rpc.invoke_and_wait(id, timeout).await
    }
}

/// `"messenger_type:sender_id"` → `(messenger_type, sender_id)`, split
/// on the first colon so sender ids may themselves contain colons.
fn split_sender_key(sender_key: &str) -> (&str, &str) {
    sender_key.split_once(':').unwrap_or((sender_key, ""))
}

#[derive(Default)]
struct CapturedHeaders {
    host: Option<String>,
    tailscale_user_login: Option<String>,
    forwarded_for: Option<String>,
    forwarded_proto: Option<String>,
    forwarded_host: Option<String>,
    auth_token: Option<String>,
    auth_password: Option<String>,
}

fn header_str(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn role_label(principal: &Principal) -> String {
    match principal {
        Principal::None => "none".to_string(),
        Principal::Token => "token".to_string(),
        Principal::Password => "password".to_string(),
        Principal::Tailscale { user } => format!("tailscale:{user}"),
        Principal::DeviceToken { device_id } => format!("device:{device_id}"),
    }
}

fn auth_reason(err: &AuthError) -> String {
    err.reason_code().to_string()
}

/// Serve `/health`/`/status` and block until `cancel` fires. Intended
/// to be spawned alongside [`Gateway::run`].
pub async fn run_health_server(
    listen_addr: String,
    stats: SharedHealthStats,
    cancel: CancellationToken,
) -> Result<()> {
    start_health_server(&listen_addr, stats, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunnerError;
    use crate::runner::RunnerBlock;
    use async_trait::async_trait;

    struct EchoRunner;

    #[async_trait]
    impl AgentRunner for EchoRunner {
        async fn run_round(
            &self,
            _session_key: &SessionKey,
            input: &str,
        ) -> Result<Vec<RunnerBlock>, RunnerError> {
            Ok(vec![
                RunnerBlock::Text {
                    text: format!("echo: {input}"),
                },
                RunnerBlock::End,
            ])
        }
    }

    fn test_gateway() -> Arc<Gateway> {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig::default();
        let pairing = PairingManager::new(dir.path().join("allowlist.json")).unwrap();
        // Keep the tempdir alive for the duration of the test by leaking it;
        // tests run in-process and exit cleanup is not load-bearing here.
        std::mem::forget(dir);
        Arc::new(Gateway::new(config, Arc::new(EchoRunner), pairing))
    }

    #[tokio::test]
    async fn inbound_frame_delivers_runner_output() {
        let gateway = test_gateway();
        let (tx, mut rx) = mpsc::channel(8);

        gateway
            .handle_client_frame(
                ClientFrame::Inbound {
                    channel: "slack".into(),
                    account: "acct1".into(),
                    peer: "C1".into(),
                    thread: None,
                    text: "hi".into(),
                },
                tx,
            )
            .await;

        let frame = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("deliver within timeout")
            .expect("a frame was sent");
        match frame {
            ServerFrame::Deliver { chunks, .. } => assert_eq!(chunks, vec!["echo: hi".to_string()]),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn node_reply_resolves_pending_invocation() {
        let gateway = test_gateway();
        let gw2 = gateway.clone();

        let waiter = tokio::spawn(async move {
            gw2.invoke_node(
                |_frame| Ok(()),
                "inv-1".to_string(),
                "run_shell".to_string(),
                serde_json::json!({}),
                std::time::Duration::from_secs(1),
            )
            .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        gateway
            .handle_client_frame(
                ClientFrame::NodeReply {
                    id: "inv-1".to_string(),
                    ok: true,
                    result: Some(serde_json::json!({"done": true})),
                    error: None,
                },
                mpsc::channel(1).0,
            )
            .await;

        let result = waiter.await.unwrap().unwrap();
        assert!(result.ok);
    }

    #[test]
    fn sender_key_splits_on_first_colon() {
        assert_eq!(split_sender_key("slack:U123"), ("slack", "U123"));
        assert_eq!(split_sender_key("slack:team:U123"), ("slack", "team:U123"));
    }
}
