//! Per-conversation state: agent sessions plus bounded message history.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ConversationId;
use crate::session::AgentSession;

/// Default number of history entries kept per conversation.
pub const DEFAULT_HISTORY_CAP: usize = 20;

/// Default maximum length (in characters) of a single history entry.
pub const DEFAULT_ENTRY_CHARS: usize = 1000;

/// Role used for messages written by the user.
pub const USER_ROLE: &str = "user";

/// One message in a conversation's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// `"user"` or the agent name.
    pub role: String,
    /// Message content, already truncated.
    pub content: String,
    /// When the message was recorded.
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// Creates an entry, truncating the content to `max_chars` characters.
    pub fn new(role: impl Into<String>, content: &str, max_chars: usize) -> Self {
        Self {
            role: role.into(),
            content: truncate_chars(content, max_chars),
            timestamp: Utc::now(),
        }
    }

    /// Creates a user entry with the default truncation.
    pub fn user(content: &str) -> Self {
        Self::new(USER_ROLE, content, DEFAULT_ENTRY_CHARS)
    }

    /// Creates an agent entry with the default truncation.
    pub fn agent(agent: impl Into<String>, content: &str) -> Self {
        Self::new(agent, content, DEFAULT_ENTRY_CHARS)
    }

    /// Whether this entry was written by the user.
    pub fn is_user(&self) -> bool {
        self.role == USER_ROLE
    }
}

fn truncate_chars(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &content[..idx]),
        None => content.to_string(),
    }
}

/// State of one conversation (one chat / topic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Conversation identifier.
    pub id: ConversationId,

    /// Agent sessions keyed by agent name.
    #[serde(default)]
    pub sessions: BTreeMap<String, AgentSession>,

    /// Recent messages, oldest first.
    #[serde(default)]
    pub history: VecDeque<HistoryEntry>,

    /// Agent that answered most recently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_agent: Option<String>,

    /// Last time the state was mutated.
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    /// Creates an empty conversation state.
    pub fn new(id: impl Into<ConversationId>) -> Self {
        Self {
            id: id.into(),
            sessions: BTreeMap::new(),
            history: VecDeque::new(),
            last_agent: None,
            updated_at: Utc::now(),
        }
    }

    /// Appends a history entry, evicting the oldest entries beyond `cap`.
    pub fn push_history(&mut self, entry: HistoryEntry, cap: usize) {
        self.history.push_back(entry);
        self.enforce_cap(cap);
        self.touch();
    }

    /// Drops the oldest entries until at most `cap` remain.
    pub fn enforce_cap(&mut self, cap: usize) {
        while self.history.len() > cap {
            self.history.pop_front();
        }
    }

    /// Returns the last `limit` history entries, oldest first.
    pub fn recent_history(&self, limit: usize) -> Vec<&HistoryEntry> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).collect()
    }

    /// Returns the session for `agent`, if any.
    pub fn session(&self, agent: &str) -> Option<&AgentSession> {
        self.sessions.get(agent)
    }

    /// Inserts or replaces the session for its agent.
    pub fn set_session(&mut self, session: AgentSession) {
        self.sessions.insert(session.agent.clone(), session);
        self.touch();
    }

    /// Removes one agent's session, or all sessions when `agent` is `None`.
    ///
    /// Clearing all sessions also forgets the last active agent.
    pub fn clear_sessions(&mut self, agent: Option<&str>) {
        match agent {
            Some(name) => {
                self.sessions.remove(name);
            }
            None => {
                self.sessions.clear();
                self.last_agent = None;
            }
        }
        self.touch();
    }

    /// Clears the message history.
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.touch();
    }

    /// Records the agent that answered most recently.
    pub fn set_last_agent(&mut self, agent: impl Into<String>) {
        self.last_agent = Some(agent.into());
        self.touch();
    }

    /// Map of agent name to session identifier for sessions that have one.
    pub fn session_ids(&self) -> BTreeMap<String, String> {
        self.sessions
            .iter()
            .filter_map(|(name, s)| s.session_id.clone().map(|id| (name.clone(), id)))
            .collect()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
