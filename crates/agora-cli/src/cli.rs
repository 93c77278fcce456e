//! Command-line interface definition using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Version string with git hash and build date, e.g. "0.1.0 (abc1234, 2026-10-19)".
fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("AGORA_GIT_HASH");
    const BUILD_DATE: &str = env!("AGORA_BUILD_DATE");

    static VERSION_STRING: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    VERSION_STRING.get_or_init(|| format!("{} ({}, {})", VERSION, GIT_HASH, BUILD_DATE))
}

/// Agora - roundtable discussions between AI coding agents
#[derive(Parser, Debug)]
#[command(name = "agora")]
#[command(author, version = version_string(), about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Directory holding conversation records
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Conversation to work in
    #[arg(short, long, global = true, env = "AGORA_CONVERSATION", default_value = "cli")]
    pub conversation: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a roundtable discussion on a topic
    Discuss {
        /// Discussion topic
        #[arg(required = true, num_args = 1..)]
        topic: Vec<String>,

        /// Maximum rounds for this discussion (1-10)
        #[arg(short, long)]
        rounds: Option<u32>,

        /// Convergence score for this discussion (0-100)
        #[arg(short, long)]
        score: Option<u8>,

        /// Write the finished discussion as JSON to this file
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Run a judged debate: one agent argues for the motion, one against
    Debate {
        /// Motion to debate
        #[arg(required = true, num_args = 1..)]
        topic: Vec<String>,

        /// Agent arguing for the motion
        #[arg(long)]
        pro: Option<String>,

        /// Agent arguing against the motion
        #[arg(long)]
        con: Option<String>,

        /// Agent scoring the debate
        #[arg(long)]
        judge: Option<String>,

        /// Free-debate exchanges before the closings (0-5)
        #[arg(short, long)]
        free_rounds: Option<u32>,

        /// Write the finished debate as JSON to this file
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Ask a single agent
    Ask {
        /// Agent name (case-insensitive)
        #[arg(required = true)]
        agent: String,

        /// Question to send
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,

        /// Recent history entries to include as context (1-20)
        #[arg(long, default_value = "2")]
        history: usize,
    },

    /// Interactive chat; messages are routed to agents or start discussions
    Chat,

    /// List agent sessions of the conversation
    Sessions,

    /// Clear agent sessions
    Clear {
        /// Only clear this agent's session
        agent: Option<String>,

        /// Also clear the conversation history
        #[arg(long, conflicts_with = "agent")]
        all: bool,
    },

    /// Show configuration and report problems
    Config,
}

impl Cli {
    /// Returns the log filter directive based on verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "agora=warn",
            1 => "agora=info",
            2 => "agora=debug",
            _ => "agora=trace",
        }
    }
}

/// Joins free-form words into one message.
pub fn join_words(words: &[String]) -> String {
    words.join(" ").trim().to_string()
}
