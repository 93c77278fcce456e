//! Core data models for Agora.
//!
//! This crate provides the data types shared by the store, the runner and the
//! orchestrator: conversation ids, agent sessions and per-conversation state.

pub mod conversation;
pub mod ids;
pub mod session;

pub use conversation::{
    ConversationState, HistoryEntry, DEFAULT_ENTRY_CHARS, DEFAULT_HISTORY_CAP, USER_ROLE,
};
pub use ids::{ConversationId, DebateId, DiscussionId};
pub use session::{AgentSession, SessionState};
