//! Engine configuration.
//!
//! [`AgoraConfig`] is built once at startup (usually via [`AgoraConfig::from_env`])
//! and then shared read-only behind an `Arc`. Tests build independent values
//! with the `with_*` setters instead of touching process environment.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agora_models::{DEFAULT_ENTRY_CHARS, DEFAULT_HISTORY_CAP};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::agents::AgentRegistry;
use crate::error::Result;
use crate::paths;

/// Default maximum number of discussion rounds.
pub const DEFAULT_MAX_ROUNDS: u32 = 5;
/// Allowed range for the maximum number of rounds.
pub const MAX_ROUNDS_RANGE: (u32, u32) = (1, 10);
/// Default score at which a discussion counts as converged.
pub const DEFAULT_SCORE_THRESHOLD: u8 = 90;
/// Default minimum per-round improvement before a plateau is declared.
pub const DEFAULT_DELTA_THRESHOLD: u8 = 5;

/// Default idle timeout for one agent turn (20 minutes).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1200);
/// Default wall-clock cap for one agent turn (30 minutes).
pub const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(1800);
/// Sessions idle for longer than this are treated as expired.
pub const DEFAULT_SESSION_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

/// Default number of free-debate exchanges.
pub const DEFAULT_FREE_ROUNDS: u32 = 2;
/// Upper bound for free-debate exchanges.
pub const MAX_FREE_ROUNDS: u32 = 5;

/// Default debounce between the last mutation and a flush.
pub const DEFAULT_FLUSH_DEBOUNCE: Duration = Duration::from_millis(500);

fn clamp_rounds(rounds: u32) -> u32 {
    rounds.clamp(MAX_ROUNDS_RANGE.0, MAX_ROUNDS_RANGE.1)
}

/// Round limits and convergence thresholds for one discussion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscussionConfig {
    /// Hard cap on rounds (1–10).
    pub max_rounds: u32,
    /// Score (0–100) at or above which the discussion has converged.
    pub score_threshold: u8,
    /// Improvement below which two consecutive rounds count as a plateau.
    pub delta_threshold: u8,
}

impl Default for DiscussionConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            delta_threshold: DEFAULT_DELTA_THRESHOLD,
        }
    }
}

impl DiscussionConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the round cap, clamped to 1–10.
    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = clamp_rounds(rounds);
        self
    }

    /// Sets the convergence score threshold, clamped to 0–100.
    pub fn with_score_threshold(mut self, score: u8) -> Self {
        self.score_threshold = score.min(100);
        self
    }

    /// Sets the plateau delta threshold.
    pub fn with_delta_threshold(mut self, delta: u8) -> Self {
        self.delta_threshold = delta.min(100);
        self
    }

    /// Returns a copy with trigger overrides applied.
    pub fn apply(self, overrides: &DiscussionOverrides) -> Self {
        let mut config = self;
        if let Some(rounds) = overrides.max_rounds {
            config = config.with_max_rounds(rounds);
        }
        if let Some(score) = overrides.score_threshold {
            config = config.with_score_threshold(score);
        }
        config
    }
}

/// Per-trigger overrides for a single discussion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscussionOverrides {
    pub max_rounds: Option<u32>,
    pub score_threshold: Option<u8>,
}

impl DiscussionOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = Some(rounds);
        self
    }

    pub fn with_score_threshold(mut self, score: u8) -> Self {
        self.score_threshold = Some(score);
        self
    }
}

/// Role assignment and length of a debate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateConfig {
    /// Agent arguing for the motion.
    pub pro: String,
    /// Agent arguing against it.
    pub con: String,
    /// Agent scoring both sides.
    pub judge: String,
    /// Free-debate exchanges between cross-examination and closing (0–5).
    pub free_rounds: u32,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            pro: "Claude".to_string(),
            con: "Gemini".to_string(),
            judge: "Codex".to_string(),
            free_rounds: DEFAULT_FREE_ROUNDS,
        }
    }
}

impl DebateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pro(mut self, agent: impl Into<String>) -> Self {
        self.pro = agent.into();
        self
    }

    pub fn with_con(mut self, agent: impl Into<String>) -> Self {
        self.con = agent.into();
        self
    }

    pub fn with_judge(mut self, agent: impl Into<String>) -> Self {
        self.judge = agent.into();
        self
    }

    /// Sets the free-debate exchanges, clamped to 0–5.
    pub fn with_free_rounds(mut self, rounds: u32) -> Self {
        self.free_rounds = rounds.min(MAX_FREE_ROUNDS);
        self
    }

    /// Returns a copy with trigger overrides applied.
    pub fn apply(&self, overrides: &DebateOverrides) -> Self {
        let mut config = self.clone();
        if let Some(pro) = &overrides.pro {
            config.pro = pro.clone();
        }
        if let Some(con) = &overrides.con {
            config.con = con.clone();
        }
        if let Some(judge) = &overrides.judge {
            config.judge = judge.clone();
        }
        if let Some(rounds) = overrides.free_rounds {
            config = config.with_free_rounds(rounds);
        }
        config
    }
}

/// Per-trigger overrides for a single debate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateOverrides {
    pub pro: Option<String>,
    pub con: Option<String>,
    pub judge: Option<String>,
    pub free_rounds: Option<u32>,
}

impl DebateOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pro(mut self, agent: impl Into<String>) -> Self {
        self.pro = Some(agent.into());
        self
    }

    pub fn with_con(mut self, agent: impl Into<String>) -> Self {
        self.con = Some(agent.into());
        self
    }

    pub fn with_judge(mut self, agent: impl Into<String>) -> Self {
        self.judge = Some(agent.into());
        self
    }

    pub fn with_free_rounds(mut self, rounds: u32) -> Self {
        self.free_rounds = Some(rounds);
        self
    }
}

/// Timing limits for agent turns and sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// A turn fails if the process is silent for this long.
    pub idle: Duration,
    /// A turn fails after this long regardless of activity.
    pub total: Duration,
    /// Active sessions unused for this long are replaced on the next turn.
    pub session_expiry: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            idle: DEFAULT_IDLE_TIMEOUT,
            total: DEFAULT_TOTAL_TIMEOUT,
            session_expiry: DEFAULT_SESSION_EXPIRY,
        }
    }
}

impl TimeoutPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the idle timeout.
    pub fn with_idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    /// Sets the total timeout.
    pub fn with_total(mut self, total: Duration) -> Self {
        self.total = total;
        self
    }

    /// Sets the session expiry.
    pub fn with_session_expiry(mut self, expiry: Duration) -> Self {
        self.session_expiry = expiry;
        self
    }
}

/// Immutable engine configuration.
#[derive(Debug, Clone)]
pub struct AgoraConfig {
    /// Agent definitions in round order.
    pub agents: AgentRegistry,
    /// Default discussion limits.
    pub discussion: DiscussionConfig,
    /// Default debate roles.
    pub debate: DebateConfig,
    /// Turn and session timeouts.
    pub timeouts: TimeoutPolicy,
    /// Working directory for agent processes.
    pub project_root: PathBuf,
    /// Proxy propagated to agent processes.
    pub proxy_url: Option<String>,
    /// Directory holding conversation records.
    pub state_dir: PathBuf,
    /// History entries kept per conversation.
    pub history_cap: usize,
    /// Character limit per stored history entry.
    pub entry_chars: usize,
    /// Debounce before dirty state is flushed.
    pub flush_debounce: Duration,
    /// Agent used when routing finds no better candidate.
    pub default_agent: String,
}

impl Default for AgoraConfig {
    fn default() -> Self {
        Self {
            agents: AgentRegistry::builtin(),
            discussion: DiscussionConfig::default(),
            debate: DebateConfig::default(),
            timeouts: TimeoutPolicy::default(),
            project_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            proxy_url: None,
            state_dir: paths::runtime_state_dir(),
            history_cap: DEFAULT_HISTORY_CAP,
            entry_chars: DEFAULT_ENTRY_CHARS,
            flush_debounce: DEFAULT_FLUSH_DEBOUNCE,
            default_agent: "Claude".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring unparseable environment value");
            None
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Expands `~` and environment references in a path.
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::full(raw).map(|s| s.into_owned()).unwrap_or_else(|_| raw.to_string()))
}

impl AgoraConfig {
    /// Creates a config with defaults and the built-in agents.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the config from environment variables and the agents file.
    ///
    /// Call [`paths::load_env`] first so `.env.local` values are visible.
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            agents: AgentRegistry::load(&paths::agents_file())?,
            ..Self::default()
        };

        if let Some(rounds) = env_parse::<u32>("AGORA_MAX_ROUNDS") {
            config.discussion = config.discussion.with_max_rounds(rounds);
        }
        if let Some(score) = env_parse::<u32>("AGORA_CONVERGENCE_SCORE") {
            config.discussion = config.discussion.with_score_threshold(score.min(100) as u8);
        }
        if let Some(delta) = env_parse::<u32>("AGORA_CONVERGENCE_DELTA") {
            config.discussion = config.discussion.with_delta_threshold(delta.min(100) as u8);
        }
        if let Some(agent) = env_string("AGORA_DEBATE_PRO") {
            config.debate.pro = agent;
        }
        if let Some(agent) = env_string("AGORA_DEBATE_CON") {
            config.debate.con = agent;
        }
        if let Some(agent) = env_string("AGORA_DEBATE_JUDGE") {
            config.debate.judge = agent;
        }
        if let Some(rounds) = env_parse::<u32>("AGORA_FREE_DEBATE_ROUNDS") {
            config.debate = config.debate.with_free_rounds(rounds);
        }
        if let Some(secs) = env_parse::<u64>("AGORA_IDLE_TIMEOUT_SECS") {
            config.timeouts = config.timeouts.with_idle(Duration::from_secs(secs));
        }
        if let Some(secs) = env_parse::<u64>("AGORA_TOTAL_TIMEOUT_SECS") {
            config.timeouts = config.timeouts.with_total(Duration::from_secs(secs));
        }
        if let Some(root) = env_string("PROJECT_ROOT") {
            config.project_root = expand_path(&root);
        }
        config.proxy_url = env_string("PROXY_URL");
        if let Some(agent) = env_string("AGORA_DEFAULT_AGENT") {
            config.default_agent = agent;
        }
        if let Some(first) = config.agents.names().first() {
            if config.agents.get(&config.default_agent).is_none() {
                config.default_agent = first.to_string();
            }
        }
        Ok(config)
    }

    pub fn with_agents(mut self, agents: AgentRegistry) -> Self {
        self.agents = agents;
        self
    }

    pub fn with_discussion(mut self, discussion: DiscussionConfig) -> Self {
        self.discussion = discussion;
        self
    }

    pub fn with_debate(mut self, debate: DebateConfig) -> Self {
        self.debate = debate;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }

    pub fn with_proxy_url(mut self, proxy: impl Into<String>) -> Self {
        self.proxy_url = Some(proxy.into());
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap.max(1);
        self
    }

    pub fn with_default_agent(mut self, agent: impl Into<String>) -> Self {
        self.default_agent = agent.into();
        self
    }

    /// Environment variables set on every agent process.
    pub fn process_env(&self) -> Vec<(String, String)> {
        let mut env = vec![("NODE_NO_WARNINGS".to_string(), "1".to_string())];
        if let Some(proxy) = &self.proxy_url {
            for key in ["HTTP_PROXY", "HTTPS_PROXY", "ALL_PROXY"] {
                env.push((key.to_string(), proxy.clone()));
                env.push((key.to_lowercase(), proxy.clone()));
            }
        }
        env
    }

    /// Returns human-readable configuration problems. Empty means usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.agents.is_empty() {
            problems.push("no agents configured".to_string());
        }
        if self.agents.get(&self.default_agent).is_none() {
            problems.push(format!("default agent '{}' is not configured", self.default_agent));
        }
        for (role, agent) in [
            ("pro", &self.debate.pro),
            ("con", &self.debate.con),
            ("judge", &self.debate.judge),
        ] {
            if self.agents.get(agent).is_none() {
                problems.push(format!("debate {} agent '{}' is not configured", role, agent));
            }
        }
        if self.debate.pro.eq_ignore_ascii_case(&self.debate.con) {
            problems.push("debate pro and con must be different agents".to_string());
        }
        if self.timeouts.idle >= self.timeouts.total {
            problems.push(format!(
                "idle timeout ({}s) should be shorter than total timeout ({}s)",
                self.timeouts.idle.as_secs(),
                self.timeouts.total.as_secs()
            ));
        }
        if !self.project_root.is_dir() {
            problems.push(format!(
                "project root {} does not exist",
                self.project_root.display()
            ));
        }
        for agent in self.agents.iter() {
            if let Some(program) = agent.program() {
                if which::which(program).is_err() && !Path::new(program).is_file() {
                    problems.push(format!("{}: '{}' not found on PATH", agent.name, program));
                }
            }
        }
        problems
    }

    /// One-screen description for logs and `agora config`.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Agents:");
        for agent in self.agents.iter() {
            let _ = writeln!(
                out,
                "  {} {} ({}): {}",
                agent.emoji,
                agent.name,
                agent.role,
                agent.create_command.join(" ")
            );
        }
        let _ = writeln!(out, "Default agent: {}", self.default_agent);
        let _ = writeln!(
            out,
            "Discussion: max {} rounds, converge at {}, plateau delta {}",
            self.discussion.max_rounds, self.discussion.score_threshold, self.discussion.delta_threshold
        );
        let _ = writeln!(
            out,
            "Debate: {} (pro) vs {} (con), judged by {}, {} free round(s)",
            self.debate.pro, self.debate.con, self.debate.judge, self.debate.free_rounds
        );
        let _ = writeln!(
            out,
            "Timeouts: idle {}s, total {}s, session expiry {}h",
            self.timeouts.idle.as_secs(),
            self.timeouts.total.as_secs(),
            self.timeouts.session_expiry.as_secs() / 3600
        );
        let _ = writeln!(out, "Project root: {}", self.project_root.display());
        let _ = writeln!(out, "State dir: {}", self.state_dir.display());
        let _ = writeln!(
            out,
            "Proxy: {}",
            self.proxy_url.as_deref().unwrap_or("(none)")
        );
        let _ = write!(
            out,
            "History: {} entries, {} chars each",
            self.history_cap, self.entry_chars
        );
        out
    }
}
