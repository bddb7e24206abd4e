//! Session key derivation and the agent run state machine (spec §3
//! SessionKey, AgentRun).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Deterministic key identifying one conversational thread. Two inbound
/// messages map to the same `SessionKey` iff they agree on
/// `(channel, account, peer, thread)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub channel: String,
    pub account: String,
    pub peer: String,
    pub thread: Option<String>,
}

impl SessionKey {
    pub fn new(
        channel: impl Into<String>,
        account: impl Into<String>,
        peer: impl Into<String>,
        thread: Option<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            account: account.into(),
            peer: peer.into(),
            thread,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.thread {
            Some(thread) => write!(
                f,
                "{}:{}:{}:{}",
                self.channel, self.account, self.peer, thread
            ),
            None => write!(f, "{}:{}:{}", self.channel, self.account, self.peer),
        }
    }
}

/// State machine for one agent turn bound to a [`SessionKey`].
///
/// `idle -> running -> (awaiting-tool | streaming) -> idle | failed | ended`.
/// `awaiting-tool` and `streaming` both return to `running` once their
/// respective event resolves; only `running` can transition out to a
/// terminal or idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    Idle,
    Running,
    AwaitingTool,
    Streaming,
    Failed,
    Ended,
}

impl RunState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Running)
                | (Running, AwaitingTool)
                | (Running, Streaming)
                | (Running, Idle)
                | (Running, Failed)
                | (Running, Ended)
                | (AwaitingTool, Running)
                | (Streaming, Running)
        )
    }
}

#[derive(Debug)]
pub struct InvalidTransition {
    pub from: RunState,
    pub to: RunState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal run state transition {:?} -> {:?}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// A single agent run bound to a session key.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub session_key: SessionKey,
    pub agent_id: String,
    state: RunState,
}

impl AgentRun {
    pub fn new(session_key: SessionKey, agent_id: impl Into<String>) -> Self {
        Self {
            session_key,
            agent_id: agent_id.into(),
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn transition(&mut self, next: RunState) -> Result<(), InvalidTransition> {
        if self.state.can_transition_to(next) {
            self.state = next;
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self.state,
                to: next,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_display_includes_thread_when_present() {
        let key = SessionKey::new("discord", "acct1", "U123", Some("t1".into()));
        assert_eq!(key.to_string(), "discord:acct1:U123:t1");
        let no_thread = SessionKey::new("discord", "acct1", "U123", None);
        assert_eq!(no_thread.to_string(), "discord:acct1:U123");
    }

    #[test]
    fn same_tuple_produces_equal_keys() {
        let a = SessionKey::new("slack", "acct1", "C1", None);
        let b = SessionKey::new("slack", "acct1", "C1", None);
        assert_eq!(a, b);
    }

    #[test]
    fn run_transitions_follow_state_machine() {
        let key = SessionKey::new("slack", "acct1", "C1", None);
        let mut run = AgentRun::new(key, "agent-1");
        assert_eq!(run.state(), RunState::Idle);

        run.transition(RunState::Running).unwrap();
        run.transition(RunState::AwaitingTool).unwrap();
        run.transition(RunState::Running).unwrap();
        run.transition(RunState::Ended).unwrap();
        assert_eq!(run.state(), RunState::Ended);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let key = SessionKey::new("slack", "acct1", "C1", None);
        let mut run = AgentRun::new(key, "agent-1");
        let err = run.transition(RunState::Ended).unwrap_err();
        assert_eq!(err.from, RunState::Idle);
        assert_eq!(err.to, RunState::Ended);
    }
}
