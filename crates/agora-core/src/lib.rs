//! Core configuration for Agora.
//!
//! - [`agents`]: agent definitions and the ordered [`AgentRegistry`]
//! - [`settings`]: the immutable [`AgoraConfig`] and discussion limits
//! - [`router`]: the [`IntentRouter`] seam and its keyword implementation
//! - [`paths`]: state and config directory layout

pub mod agents;
pub mod error;
pub mod paths;
pub mod router;
pub mod settings;

pub use agents::{
    builtin_agents, AgentDefinition, AgentRegistry, OutputStream, SessionIdSource,
    SESSION_PLACEHOLDER,
};
pub use error::{ConfigError, Result};
pub use router::{IntentRouter, KeywordRouter, RouteDecision, RouteKind};
pub use settings::{
    AgoraConfig, DebateConfig, DebateOverrides, DiscussionConfig, DiscussionOverrides, TimeoutPolicy,
};
