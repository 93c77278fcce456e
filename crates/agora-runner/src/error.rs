//! Error types for agent turns.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which timer expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKind {
    /// No output for the idle window.
    Idle,
    /// Wall-clock cap reached.
    Total,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Total => write!(f, "total"),
        }
    }
}

/// Coarse failure classification recorded in round records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Crash,
    SessionInvalid,
    EmptyOutput,
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Timeout => "timeout",
            Self::Crash => "crash",
            Self::SessionInvalid => "invalid session",
            Self::EmptyOutput => "no response",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

/// Errors from running a single agent turn.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The process exceeded a timeout and was killed.
    #[error("{agent} timed out ({kind} limit)")]
    Timeout { agent: String, kind: TimeoutKind },

    /// Non-zero exit or abnormal termination.
    #[error("{agent} exited with {}: {message}", exit_label(.code))]
    ProcessCrash {
        agent: String,
        code: Option<i32>,
        message: String,
    },

    /// The agent rejected its session identifier.
    #[error("{agent} reported an invalid session: {message}")]
    SessionCorrupt { agent: String, message: String },

    /// The process succeeded but produced no usable output.
    #[error("no response from {0}")]
    EmptyOutput(String),

    /// The process could not be started.
    #[error("failed to start {agent}: {source}")]
    Spawn {
        agent: String,
        #[source]
        source: std::io::Error,
    },

    /// The turn was abandoned by a stop request or kill.
    #[error("{0} turn cancelled")]
    Cancelled(String),

    /// No definition for the agent.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// I/O failure while talking to the process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Classification for round records and user-facing messages.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::SessionCorrupt { .. } => FailureKind::SessionInvalid,
            Self::EmptyOutput(_) => FailureKind::EmptyOutput,
            Self::Cancelled(_) => FailureKind::Cancelled,
            Self::ProcessCrash { .. } | Self::Spawn { .. } | Self::UnknownAgent(_) | Self::Io(_) => {
                FailureKind::Crash
            }
        }
    }
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;
