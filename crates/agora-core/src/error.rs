//! Error types for configuration loading.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file is not valid JSON for the expected shape.
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// An agent definition is unusable.
    #[error("invalid agent '{agent}': {reason}")]
    InvalidAgent { agent: String, reason: String },

    /// An agent name does not match any definition.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// The agent set is empty.
    #[error("no agents configured")]
    NoAgents,
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
