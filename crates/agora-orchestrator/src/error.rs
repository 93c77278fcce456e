//! Error types for the orchestrator.

use agora_models::ConversationId;
use agora_runner::RunnerError;
use thiserror::Error;

/// Errors returned to callers of the orchestrator.
///
/// A discussion that ends badly is not an error: it finishes with status
/// `Failed` or `Stopped`. These errors mean the request itself was refused.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The conversation already has a running discussion.
    #[error("a discussion is already running in {0}")]
    DiscussionActive(ConversationId),

    /// The conversation already has a running debate.
    #[error("a debate is already running in {0}")]
    DebateActive(ConversationId),

    /// The debate roles cannot run as configured.
    #[error("invalid debate roles: {0}")]
    InvalidRoles(String),

    /// No agents are configured.
    #[error("no agents configured")]
    NoAgents,

    /// The agent name does not match any definition.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// A single-agent turn failed.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
