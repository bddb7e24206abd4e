//! Session hub (spec §4.5, §5 concurrency model).
//!
//! One mailbox per [`SessionKey`], each drained by a single consumer
//! task so messages for a given conversation are always processed in
//! the order they arrived. Mirrors the reader-task/mpsc-channel split
//! used by the connection handler in `gateway::mod`.

pub mod key;

pub use key::{AgentRun, InvalidTransition, RunState, SessionKey};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

const MAILBOX_CAPACITY: usize = 256;

/// An inbound unit of work queued for a session's consumer task.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub session_key: SessionKey,
    pub text: String,
}

struct Mailbox {
    sender: mpsc::Sender<InboundMessage>,
}

/// Registry of live per-session mailboxes and run state. Exclusive
/// mutation of the session table is a single `Mutex`; per-session
/// traffic then flows through that session's own channel, so one
/// session's backlog never blocks another's dispatch.
#[derive(Default)]
pub struct SessionHub {
    mailboxes: Mutex<HashMap<SessionKey, Mailbox>>,
    runs: Mutex<HashMap<SessionKey, AgentRun>>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `msg` for its session, spawning a consumer task with
    /// `on_message` the first time this `SessionKey` is seen.
    ///
    /// When the mailbox is saturated, this blocks the caller rather
    /// than dropping the message (batching back-pressure, not
    /// best-effort delivery).
    pub async fn dispatch<F, Fut>(self: &Arc<Self>, msg: InboundMessage, on_message: F)
    where
        F: Fn(InboundMessage) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let key = msg.session_key.clone();
        let sender = {
            let mut mailboxes = self.mailboxes.lock().await;
            if let Some(mailbox) = mailboxes.get(&key) {
                mailbox.sender.clone()
            } else {
                let (tx, mut rx) = mpsc::channel::<InboundMessage>(MAILBOX_CAPACITY);
                mailboxes.insert(
                    key.clone(),
                    Mailbox {
                        sender: tx.clone(),
                    },
                );
                tokio::spawn(async move {
                    while let Some(next) = rx.recv().await {
                        on_message(next).await;
                    }
                });
                tx
            }
        };

        // Channel-full back-pressure: wait rather than drop.
        let _ = sender.send(msg).await;
    }

    pub async fn run_state(&self, key: &SessionKey) -> Option<RunState> {
        self.runs.lock().await.get(key).map(|r| r.state())
    }

    pub async fn ensure_run(&self, key: &SessionKey, agent_id: &str) {
        let mut runs = self.runs.lock().await;
        runs.entry(key.clone())
            .or_insert_with(|| AgentRun::new(key.clone(), agent_id));
    }

    pub async fn transition(
        &self,
        key: &SessionKey,
        next: RunState,
    ) -> Result<(), InvalidTransition> {
        let mut runs = self.runs.lock().await;
        match runs.get_mut(key) {
            Some(run) => run.transition(next),
            None => Err(InvalidTransition {
                from: RunState::Idle,
                to: next,
            }),
        }
    }

    /// Remove a session's mailbox and run state, e.g. once its consumer
    /// task observes the run reach `ended`/`failed` and nothing remains
    /// queued.
    pub async fn retire(&self, key: &SessionKey) {
        self.mailboxes.lock().await.remove(key);
        self.runs.lock().await.remove(key);
    }

    /// Count of sessions with a run still in a non-terminal state.
    /// Used by [`crate::shutdown`] to decide when a graceful drain is
    /// complete.
    pub async fn active_run_count(&self) -> usize {
        self.runs
            .lock()
            .await
            .values()
            .filter(|run| !matches!(run.state(), RunState::Ended | RunState::Failed))
            .count()
    }
}
