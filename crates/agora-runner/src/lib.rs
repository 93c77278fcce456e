//! Agent execution for Agora.
//!
//! Agents are command-line tools re-invoked once per turn with a resumable
//! session handle. [`AgentRunner`] keeps the session bookkeeping in the
//! [`agora_persistence::SessionStore`], spawns one process per turn, and
//! enforces the idle and total timeouts.
//!
//! The orchestrator depends only on the [`TurnRunner`] trait.

pub mod error;
pub mod output;
pub mod process;
pub mod runner;
pub mod traits;

pub use error::{FailureKind, Result, RunnerError, TimeoutKind};
pub use output::{clean_output, extract_file_writes, is_session_invalid, FileWriteRequest};
pub use process::{ProcessOutput, ProcessSpec, TurnLimits};
pub use runner::AgentRunner;
pub use traits::{TurnOutput, TurnRunner};
