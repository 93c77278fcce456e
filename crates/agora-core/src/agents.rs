//! Agent definitions and the agent registry.
//!
//! An [`AgentDefinition`] describes how to talk to one AI command-line tool:
//! the argv used to open a new session, the argv used to resume one, and
//! where the session identifier comes from. Definitions are immutable once
//! loaded and shared through [`AgentRegistry`].

use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConfigError, Result};

/// Placeholder substituted with the session identifier in command templates.
pub const SESSION_PLACEHOLDER: &str = "{session_id}";

/// Output stream an agent prints its session identifier on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    #[default]
    Stdout,
    Stderr,
}

/// Where the session identifier for a new session comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum SessionIdSource {
    /// Agora generates a UUID and passes it through the create command.
    #[default]
    Generated,
    /// The first capture group of `pattern` matched against the create turn's output.
    Output {
        #[serde(default)]
        stream: OutputStream,
        pattern: String,
    },
    /// The first capture group of the last `pattern` match in the output of `command`.
    ListCommand { command: Vec<String>, pattern: String },
}

/// Static description of one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Display and lookup name, e.g. `Claude`.
    pub name: String,
    /// Role label used in prompts, e.g. `architect`.
    pub role: String,
    /// Decoration for presentation layers.
    #[serde(default)]
    pub emoji: String,
    /// Argv that opens a new session. The prompt is appended as the last argument.
    pub create_command: Vec<String>,
    /// Argv that resumes a session; must contain `{session_id}`.
    pub resume_command: Vec<String>,
    /// Whether Agora must generate the session id for the create command.
    #[serde(default)]
    pub needs_uuid: bool,
    /// Whether stdin must be closed immediately (agents that otherwise wait on it).
    #[serde(default)]
    pub close_stdin: bool,
    /// How to learn the session id of a newly created session.
    #[serde(default)]
    pub session_id: SessionIdSource,
    /// Words that route a message to this agent.
    #[serde(default)]
    pub intent_keywords: Vec<String>,
}

fn substitute(template: &[String], session_id: Option<&str>) -> Vec<String> {
    template
        .iter()
        .map(|arg| match session_id {
            Some(id) => arg.replace(SESSION_PLACEHOLDER, id),
            None => arg.clone(),
        })
        .collect()
}

impl AgentDefinition {
    /// Argv for a create turn. `session_id` is substituted when provided.
    pub fn create_args(&self, session_id: Option<&str>) -> Vec<String> {
        substitute(&self.create_command, session_id)
    }

    /// Argv for a resume turn.
    pub fn resume_args(&self, session_id: &str) -> Vec<String> {
        substitute(&self.resume_command, Some(session_id))
    }

    /// Program name of the create command (used for PATH checks).
    pub fn program(&self) -> Option<&str> {
        self.create_command.first().map(String::as_str)
    }

    /// Checks the definition for internal consistency.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| ConfigError::InvalidAgent {
            agent: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if self.create_command.is_empty() {
            return Err(invalid("create_command is empty"));
        }
        if self.resume_command.is_empty() {
            return Err(invalid("resume_command is empty"));
        }
        if !self.resume_command.iter().any(|a| a.contains(SESSION_PLACEHOLDER)) {
            return Err(invalid("resume_command has no {session_id} placeholder"));
        }
        let create_has_placeholder = self
            .create_command
            .iter()
            .any(|a| a.contains(SESSION_PLACEHOLDER));
        if self.needs_uuid && !create_has_placeholder {
            return Err(invalid("needs_uuid requires {session_id} in create_command"));
        }
        match &self.session_id {
            SessionIdSource::Generated if !self.needs_uuid => {
                Err(invalid("generated session ids require needs_uuid"))
            }
            SessionIdSource::Output { pattern, .. } => check_pattern(self, pattern),
            SessionIdSource::ListCommand { command, pattern } => {
                if command.is_empty() {
                    return Err(invalid("list command is empty"));
                }
                check_pattern(self, pattern)
            }
            SessionIdSource::Generated => Ok(()),
        }
    }
}

fn check_pattern(agent: &AgentDefinition, pattern: &str) -> Result<()> {
    let re = Regex::new(pattern).map_err(|e| ConfigError::InvalidAgent {
        agent: agent.name.clone(),
        reason: format!("bad session id pattern: {}", e),
    })?;
    if re.captures_len() < 2 {
        return Err(ConfigError::InvalidAgent {
            agent: agent.name.clone(),
            reason: "session id pattern needs a capture group".to_string(),
        });
    }
    Ok(())
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn keywords(parts: &[&str]) -> Vec<String> {
    argv(parts)
}

/// Built-in definitions for Claude Code, Codex and Gemini CLIs.
pub fn builtin_agents() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition {
            name: "Claude".to_string(),
            role: "architect".to_string(),
            emoji: "🔸".to_string(),
            create_command: argv(&[
                "claude",
                "-p",
                "--dangerously-skip-permissions",
                "--session-id",
                SESSION_PLACEHOLDER,
            ]),
            resume_command: argv(&[
                "claude",
                "-p",
                "--dangerously-skip-permissions",
                "--resume",
                SESSION_PLACEHOLDER,
            ]),
            needs_uuid: true,
            close_stdin: false,
            session_id: SessionIdSource::Generated,
            intent_keywords: keywords(&[
                "架构", "设计", "方案", "design", "architecture", "分析", "规划", "plan",
            ]),
        },
        AgentDefinition {
            name: "Codex".to_string(),
            role: "implementer".to_string(),
            emoji: "❇️".to_string(),
            create_command: argv(&["codex", "exec", "--skip-git-repo-check", "--full-auto"]),
            resume_command: argv(&[
                "codex",
                "exec",
                "--skip-git-repo-check",
                "resume",
                SESSION_PLACEHOLDER,
            ]),
            needs_uuid: false,
            close_stdin: false,
            session_id: SessionIdSource::Output {
                stream: OutputStream::Stderr,
                pattern: r"(?i)session id:\s+([a-f0-9-]+)".to_string(),
            },
            intent_keywords: keywords(&[
                "写", "实现", "代码", "write", "implement", "code", "create", "开发", "编写",
            ]),
        },
        AgentDefinition {
            name: "Gemini".to_string(),
            role: "reviewer".to_string(),
            emoji: "💠".to_string(),
            create_command: argv(&["gemini", "-y", "-p"]),
            resume_command: argv(&["gemini", "--resume", SESSION_PLACEHOLDER, "-y", "-p"]),
            needs_uuid: false,
            close_stdin: true,
            session_id: SessionIdSource::ListCommand {
                command: argv(&["gemini", "--list-sessions"]),
                pattern: r"\[([a-f0-9-]+)\]".to_string(),
            },
            intent_keywords: keywords(&[
                "审查", "测试", "检查", "review", "test", "check", "安全", "验证", "verify",
            ]),
        },
    ]
}

/// Ordered, immutable set of agent definitions.
///
/// Order is significant: it is the order agents appear in round records
/// and the tie-break order when picking a best contribution.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: Vec<Arc<AgentDefinition>>,
}

impl AgentRegistry {
    /// Creates a registry from definitions, validating each one.
    pub fn new(definitions: Vec<AgentDefinition>) -> Result<Self> {
        if definitions.is_empty() {
            return Err(ConfigError::NoAgents);
        }
        let mut agents: Vec<Arc<AgentDefinition>> = Vec::with_capacity(definitions.len());
        for def in definitions {
            def.validate()?;
            if agents.iter().any(|a| a.name.eq_ignore_ascii_case(&def.name)) {
                return Err(ConfigError::InvalidAgent {
                    agent: def.name,
                    reason: "duplicate agent name".to_string(),
                });
            }
            agents.push(Arc::new(def));
        }
        Ok(Self { agents })
    }

    /// Registry with the built-in agents.
    pub fn builtin() -> Self {
        Self {
            agents: builtin_agents().into_iter().map(Arc::new).collect(),
        }
    }

    /// Loads definitions from a JSON file, or the built-ins if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no agents file, using built-in agents");
            return Ok(Self::builtin());
        }
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let definitions: Vec<AgentDefinition> =
            serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let registry = Self::new(definitions)?;
        info!(path = %path.display(), count = registry.len(), "loaded agent definitions");
        Ok(registry)
    }

    /// Looks up an agent by name, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<Arc<AgentDefinition>> {
        self.agents
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Looks up an agent or fails with [`ConfigError::UnknownAgent`].
    pub fn require(&self, name: &str) -> Result<Arc<AgentDefinition>> {
        self.get(name)
            .ok_or_else(|| ConfigError::UnknownAgent(name.to_string()))
    }

    /// Agent names in registry order.
    pub fn names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name.as_str()).collect()
    }

    /// Iterates over the definitions in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<AgentDefinition>> {
        self.agents.iter()
    }

    /// Number of agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
