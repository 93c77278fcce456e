//! The seam between the orchestrator and agent execution.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use agora_models::ConversationId;

use crate::error::Result;
use crate::output::FileWriteRequest;

/// A successful agent turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOutput {
    pub agent: String,
    /// Cleaned reply text.
    pub text: String,
    /// Reply with file-write blocks replaced by placeholders.
    pub display: String,
    /// File writes requested in the reply.
    pub file_writes: Vec<FileWriteRequest>,
    /// Session the turn ran in, if known.
    pub session_id: Option<String>,
    /// Whether this turn created the session.
    pub created_session: bool,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl TurnOutput {
    /// Output for `agent` with `text`, as produced by a resumed session.
    pub fn new(agent: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            agent: agent.into(),
            display: text.clone(),
            text,
            file_writes: Vec::new(),
            session_id: None,
            created_session: false,
            elapsed: Duration::ZERO,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Runs one prompt against one agent in one conversation.
///
/// Implementations must return promptly with [`crate::RunnerError::Cancelled`]
/// once `cancel` holds `true`.
#[async_trait]
pub trait TurnRunner: Send + Sync {
    /// Executes a turn, creating or resuming the agent's session as needed.
    async fn run_turn(
        &self,
        conversation: &ConversationId,
        agent: &str,
        prompt: &str,
        cancel: watch::Receiver<bool>,
    ) -> Result<TurnOutput>;

    /// Terminates in-flight turns. Returns how many were signalled.
    async fn kill(&self, conversation: &ConversationId, agent: Option<&str>) -> usize {
        let _ = (conversation, agent);
        0
    }
}
