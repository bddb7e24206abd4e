//! Node RPC correlation (spec §4: `node.invoke`/`node.reply`/`node.event`).
//!
//! Invocations are correlated by id; each has a per-command timeout,
//! clamped to at most 60s for media-heavy commands (clip/screen
//! recording) regardless of what the caller asked for.

use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::sync::Mutex;

use crate::error::NodeRpcError;

pub const MAX_MEDIA_TIMEOUT: Duration = Duration::from_secs(60);

/// Commands whose timeout is clamped to [`MAX_MEDIA_TIMEOUT`]
/// regardless of the caller-requested value.
const CLAMPED_COMMANDS: &[&str] = &["clip", "screen.record"];

pub fn clamp_timeout(command: &str, requested: Duration) -> Duration {
    if CLAMPED_COMMANDS.contains(&command) {
        requested.min(MAX_MEDIA_TIMEOUT)
    } else {
        requested
    }
}

#[derive(Debug, Clone)]
pub struct NodeInvokeResult {
    pub ok: bool,
    pub result: Option<Value>,
    pub error: Option<Value>,
}

/// Pending invocations awaiting a `node.reply`, keyed by invocation id.
#[derive(Default)]
pub struct NodeRpcTable {
    pending: Mutex<HashMap<String, oneshot::Sender<NodeInvokeResult>>>,
}

impl NodeRpcTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending invocation and await its reply, bounded by
    /// `timeout` (already clamped via [`clamp_timeout`]).
    pub async fn invoke_and_wait(
        &self,
        id: String,
        timeout: Duration,
    ) -> Result<NodeInvokeResult, NodeRpcError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id.clone(), tx);
        }

        let outcome = tokio::time::timeout(timeout, rx).await;

        // Regardless of outcome, the entry must not linger.
        self.pending.lock().await.remove(&id);

        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(NodeRpcError::Unavailable(
                "node reply channel closed".to_string(),
            )),
            Err(_) => Err(NodeRpcError::TimedOut),
        }
    }

    /// Deliver a `node.reply` frame to its waiting invocation, if any.
    pub async fn resolve(&self, id: &str, result: NodeInvokeResult) -> bool {
        let sender = self.pending.lock().await.remove(id);
        match sender {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_commands_clamp_to_sixty_seconds() {
        assert_eq!(
            clamp_timeout("clip", Duration::from_secs(120)),
            MAX_MEDIA_TIMEOUT
        );
        assert_eq!(
            clamp_timeout("screen.record", Duration::from_secs(10)),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn non_media_commands_are_unclamped() {
        assert_eq!(
            clamp_timeout("run_shell", Duration::from_secs(300)),
            Duration::from_secs(300)
        );
    }

    #[tokio::test]
    async fn resolve_delivers_to_waiting_invoke() {
        let table = std::sync::Arc::new(NodeRpcTable::new());
        let table2 = table.clone();

        let waiter = tokio::spawn(async move {
            table2
                .invoke_and_wait("inv-1".to_string(), Duration::from_secs(1))
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let delivered = table
            .resolve(
                "inv-1",
                NodeInvokeResult {
                    ok: true,
                    result: Some(serde_json::json!({"done": true})),
                    error: None,
                },
            )
            .await;
        assert!(delivered);

        let result = waiter.await.unwrap().unwrap();
        assert!(result.ok);
    }

    #[tokio::test]
    async fn invoke_times_out_without_a_reply() {
        let table = NodeRpcTable::new();
        let err = table
            .invoke_and_wait("inv-2".to_string(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeRpcError::TimedOut));
    }
}
