//! Discussion and debate progress events.

use serde::Serialize;

use agora_core::{DebateConfig, DiscussionConfig};
use agora_models::{ConversationId, DebateId, DiscussionId};
use agora_runner::FailureKind;

use crate::debate::{DebateArgument, DebatePhase, DebateStatus, DebateStep, Verdict};
use crate::discussion::{BestContribution, DiscussionStatus, FailureReason, RoundRecord};

/// Events emitted by the orchestrator for the presentation layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DiscussionEvent {
    /// A discussion began.
    Started {
        conversation: ConversationId,
        discussion: DiscussionId,
        topic: String,
        participants: Vec<String>,
        config: DiscussionConfig,
    },
    /// A round's prompts were dispatched.
    RoundStarted {
        conversation: ConversationId,
        round: u32,
    },
    /// A round finished and was scored.
    RoundCompleted {
        conversation: ConversationId,
        record: RoundRecord,
    },
    /// The discussion ended as `Failed`. Followed by `Finished`.
    Failed {
        conversation: ConversationId,
        reason: FailureReason,
    },
    /// The discussion reached a terminal status.
    Finished {
        conversation: ConversationId,
        status: DiscussionStatus,
        best: Option<BestContribution>,
        history: Vec<RoundRecord>,
    },
}

impl DiscussionEvent {
    /// Returns the conversation this event belongs to.
    pub fn conversation(&self) -> &ConversationId {
        match self {
            DiscussionEvent::Started { conversation, .. } => conversation,
            DiscussionEvent::RoundStarted { conversation, .. } => conversation,
            DiscussionEvent::RoundCompleted { conversation, .. } => conversation,
            DiscussionEvent::Failed { conversation, .. } => conversation,
            DiscussionEvent::Finished { conversation, .. } => conversation,
        }
    }

    /// Returns true for the final event of a discussion.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DiscussionEvent::Finished { .. })
    }
}

/// Events emitted by the debate moderator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DebateEvent {
    Started {
        conversation: ConversationId,
        debate: DebateId,
        topic: String,
        config: DebateConfig,
    },
    /// A new phase, or a new free-debate exchange, began.
    PhaseStarted {
        conversation: ConversationId,
        phase: DebatePhase,
        round: u32,
    },
    /// An agent was asked to speak.
    TurnStarted {
        conversation: ConversationId,
        agent: String,
        step: DebateStep,
    },
    /// An agent spoke.
    Argument {
        conversation: ConversationId,
        argument: DebateArgument,
    },
    /// An agent's turn failed; the debate goes on without it.
    TurnFailed {
        conversation: ConversationId,
        agent: String,
        step: DebateStep,
        kind: FailureKind,
    },
    /// The debate reached a terminal status.
    Finished {
        conversation: ConversationId,
        status: DebateStatus,
        verdict: Option<Verdict>,
    },
}

impl DebateEvent {
    pub fn conversation(&self) -> &ConversationId {
        match self {
            DebateEvent::Started { conversation, .. }
            | DebateEvent::PhaseStarted { conversation, .. }
            | DebateEvent::TurnStarted { conversation, .. }
            | DebateEvent::Argument { conversation, .. }
            | DebateEvent::TurnFailed { conversation, .. }
            | DebateEvent::Finished { conversation, .. } => conversation,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DebateEvent::Finished { .. })
    }
}
