//! Agent session lifecycle.
//!
//! An agent session is the resumable conversation one agent CLI keeps for one
//! Agora conversation. Agents are re-invoked per turn, so there is no process
//! handle here: liveness is a plain state that the runner moves forward.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Liveness of an agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No agent-side session exists yet; the next turn uses the create command.
    #[default]
    Uninitialized,
    /// The agent acknowledged the session; the next turn resumes it.
    Active,
    /// The session was idle for longer than the expiry window.
    Expired,
    /// The agent process failed or rejected the session identifier.
    Crashed,
}

impl SessionState {
    /// Whether the session must be replaced before the next turn.
    pub fn needs_replacement(&self) -> bool {
        matches!(self, SessionState::Expired | SessionState::Crashed)
    }
}

/// A resumable session with one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSession {
    /// Agent name (key into the agent registry).
    pub agent: String,

    /// Opaque session identifier understood by the agent CLI.
    ///
    /// `None` until the agent assigns one (or until we generate one for
    /// agents that accept caller-chosen ids).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// When this session was created.
    pub created_at: DateTime<Utc>,

    /// When this session last completed a turn.
    pub last_activity: DateTime<Utc>,

    /// Current liveness.
    #[serde(default)]
    pub state: SessionState,
}

impl AgentSession {
    /// Creates a fresh, uninitialized session.
    pub fn new(agent: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            agent: agent.into(),
            session_id: None,
            created_at: now,
            last_activity: now,
            state: SessionState::Uninitialized,
        }
    }

    /// Creates a fresh session with a caller-generated identifier.
    pub fn with_session_id(agent: impl Into<String>, session_id: impl Into<String>) -> Self {
        let mut session = Self::new(agent);
        session.session_id = Some(session_id.into());
        session
    }

    /// Whether the next turn must use the create command.
    pub fn is_first_turn(&self) -> bool {
        self.state == SessionState::Uninitialized
    }

    /// Marks the session active after a successful turn.
    pub fn activate(&mut self, session_id: Option<String>) {
        if session_id.is_some() {
            self.session_id = session_id;
        }
        self.state = SessionState::Active;
        self.last_activity = Utc::now();
    }

    /// Marks the session crashed; the next turn will replace it.
    pub fn mark_crashed(&mut self) {
        self.state = SessionState::Crashed;
    }

    /// Moves an active session to `Expired` if it has been idle past `expiry`.
    ///
    /// Returns `true` if the state changed.
    pub fn expire_if_idle(&mut self, expiry: Duration, now: DateTime<Utc>) -> bool {
        if self.state == SessionState::Active && now - self.last_activity > expiry {
            self.state = SessionState::Expired;
            return true;
        }
        false
    }

    /// Seconds since the last completed turn.
    pub fn idle_seconds(&self) -> i64 {
        (Utc::now() - self.last_activity).num_seconds()
    }
}
