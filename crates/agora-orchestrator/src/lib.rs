//! Roundtable discussions and debates for Agora.
//!
//! [`RoundtableOrchestrator`] sends a topic to every configured agent in
//! parallel, scores each round with a [`ConvergenceScorer`], and feeds the
//! strongest contribution into the next round until the agents converge,
//! the round limit is hit, or the discussion is stopped.
//!
//! [`DebateModerator`] runs a structured debate instead: a pro and a con
//! agent argue a motion through fixed phases and a judge agent scores both
//! sides.

pub mod debate;
pub mod debate_prompts;
pub mod discussion;
pub mod error;
pub mod event;
pub mod moderator;
pub mod orchestrator;
pub mod prompts;
pub mod scorer;

pub use debate::{
    parse_verdict, schedule, DebateArgument, DebatePhase, DebateSession, DebateSide, DebateStatus,
    DebateStep, DebateWinner, DimensionScore, Verdict, SCORING_DIMENSIONS,
};
pub use discussion::{
    AgentFailure, BestContribution, Contribution, DiscussionSession, DiscussionStatus,
    FailureReason, RoundRecord,
};
pub use error::{OrchestratorError, Result};
pub use event::{DebateEvent, DiscussionEvent};
pub use moderator::DebateModerator;
pub use orchestrator::{RoundtableOrchestrator, DEFAULT_ASK_HISTORY, MAX_ASK_HISTORY};
pub use scorer::{decide, ConvergenceScorer, MarkerScorer, RoundVerdict};
