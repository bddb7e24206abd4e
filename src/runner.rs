//! Agent Runner boundary (spec §4.5, §9 Design Notes: modeled as an
//! opaque trait rather than an inline call into one model provider).
//!
//! Grounded in the agentic tool loop in `gateway::dispatch_text_message`:
//! a bounded round count as a safety net against runaway loops, with
//! cooperative cancellation checked every round.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::RunnerError;
use crate::session::SessionKey;

/// Safety net against a runner that never signals completion.
pub const MAX_RUN_ROUNDS: usize = 500;

/// One unit of runner output, streamed back to the caller as the
/// underlying model produces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RunnerBlock {
    Text { text: String },
    ToolCall { id: String, name: String, arguments: serde_json::Value },
    ToolResult { id: String, output: serde_json::Value },
    End,
}

#[derive(Debug, Clone, Default)]
pub struct ToolCancelFlag(Arc<AtomicBool>);

impl ToolCancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Opaque boundary to whatever produces agent turns (a model provider,
/// a scripted test double, ...). Implementations own their own
/// provider/session bookkeeping; this crate only needs the block
/// stream and a way to ask for the next round.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Produce the next round of blocks for `session_key`. Returns an
    /// empty vec (with no `RunnerBlock::End`) if the runner has more
    /// work but nothing to emit this round (e.g. it is waiting on a
    /// tool result a caller hasn't supplied yet).
    async fn run_round(
        &self,
        session_key: &SessionKey,
        input: &str,
    ) -> Result<Vec<RunnerBlock>, RunnerError>;
}

/// Drives an [`AgentRunner`] for a single input, feeding `on_block` as
/// blocks arrive, stopping at `RunnerBlock::End`, cancellation, or
/// [`MAX_RUN_ROUNDS`].
pub async fn dispatch<F>(
    runner: &dyn AgentRunner,
    session_key: &SessionKey,
    input: &str,
    cancel: &ToolCancelFlag,
    mut on_block: F,
) -> Result<(), RunnerError>
where
    F: FnMut(RunnerBlock),
{
    let mut round_input = input.to_string();

    for _round in 0..MAX_RUN_ROUNDS {
        if cancel.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }

        let blocks = runner.run_round(session_key, &round_input).await?;
        let mut ended = false;
        for block in blocks {
            if matches!(block, RunnerBlock::End) {
                ended = true;
            }
            on_block(block);
        }
        if ended {
            return Ok(());
        }
        round_input = String::new();
    }

    Err(RunnerError::Internal(format!(
        "exceeded {MAX_RUN_ROUNDS} rounds without an End block"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedRunner {
        rounds: Mutex<Vec<Vec<RunnerBlock>>>,
    }

    #[async_trait]
    impl AgentRunner for ScriptedRunner {
        async fn run_round(
            &self,
            _session_key: &SessionKey,
            _input: &str,
        ) -> Result<Vec<RunnerBlock>, RunnerError> {
            let mut rounds = self.rounds.lock().unwrap();
            if rounds.is_empty() {
                return Ok(vec![]);
            }
            Ok(rounds.remove(0))
        }
    }

    #[tokio::test]
    async fn dispatch_stops_at_end_block() {
        let runner = ScriptedRunner {
            rounds: Mutex::new(vec![
                vec![RunnerBlock::Text { text: "hi".into() }],
                vec![RunnerBlock::End],
            ]),
        };
        let key = SessionKey::new("slack", "acct1", "C1", None);
        let cancel = ToolCancelFlag::new();
        let mut seen = Vec::new();

        dispatch(&runner, &key, "hello", &cancel, |block| seen.push(block))
            .await
            .unwrap();

        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[1], RunnerBlock::End));
    }

    #[tokio::test]
    async fn dispatch_honors_cancellation() {
        let runner = ScriptedRunner {
            rounds: Mutex::new(vec![vec![RunnerBlock::Text { text: "hi".into() }]]),
        };
        let key = SessionKey::new("slack", "acct1", "C1", None);
        let cancel = ToolCancelFlag::new();
        cancel.cancel();

        let err = dispatch(&runner, &key, "hello", &cancel, |_| {}).await.unwrap_err();
        assert!(matches!(err, RunnerError::Cancelled));
    }
}
