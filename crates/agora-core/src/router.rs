//! Message routing.
//!
//! Deciding whether a chat message starts a roundtable or goes to specific
//! agents is a presentation-layer concern. The engine only sees the
//! [`IntentRouter`] trait, so the keyword matcher here can be swapped out.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::agents::AgentRegistry;

/// Default phrases that start a roundtable discussion.
pub const DISCUSSION_KEYWORDS: &[&str] = &[
    "讨论",
    "discuss",
    "roundtable",
    "你们商量",
    "你们聊聊",
    "你们说说",
    "大家说说",
    "一起分析",
    "集体讨论",
];

/// Default phrases that start a debate. Checked before discussion phrases.
pub const DEBATE_KEYWORDS: &[&str] = &[
    "辩论",
    "辩一辩",
    "正反方",
    "你们辩",
    "辩个",
    "debate",
    " vs ",
    " vs. ",
];

/// Where a message should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    /// One agent answers.
    Single,
    /// Several agents answer independently.
    Multiple,
    /// Start a roundtable discussion with every agent.
    Discussion,
    /// Start a debate between the configured pro and con agents.
    Debate,
}

/// Outcome of routing one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub kind: RouteKind,
    /// Target agents in registry order.
    pub agents: Vec<String>,
    /// Short explanation for logs.
    pub reason: String,
    /// Message with agent mentions removed.
    pub prompt: String,
}

/// Selects targets for an incoming message.
pub trait IntentRouter: Send + Sync {
    /// Routes `message`. `last_agent` is the conversation's last active agent.
    fn route(&self, message: &str, last_agent: Option<&str>) -> RouteDecision;
}

struct AgentPatterns {
    name: String,
    mention: Regex,
    keywords: Vec<String>,
}

/// Rule-based router.
///
/// Priority: explicit mention, debate keywords, discussion keywords, intent
/// keywords, last active agent, default agent.
pub struct KeywordRouter {
    agents: Vec<AgentPatterns>,
    debate_keywords: Vec<String>,
    discussion_keywords: Vec<String>,
    default_agent: String,
}

impl KeywordRouter {
    /// Builds a router from the registry's names and intent keywords.
    pub fn new(registry: &AgentRegistry, default_agent: impl Into<String>) -> Self {
        let agents = registry
            .iter()
            .filter_map(|agent| {
                let pattern = format!(r"@?\b{}\b\s*[,，:：]?\s*", regex::escape(&agent.name));
                let mention = RegexBuilder::new(&pattern)
                    .case_insensitive(true)
                    .build()
                    .ok()?;
                Some(AgentPatterns {
                    name: agent.name.clone(),
                    mention,
                    keywords: agent.intent_keywords.iter().map(|k| k.to_lowercase()).collect(),
                })
            })
            .collect();

        Self {
            agents,
            debate_keywords: DEBATE_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            discussion_keywords: DISCUSSION_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            default_agent: default_agent.into(),
        }
    }

    /// Replaces the discussion trigger phrases.
    pub fn with_discussion_keywords(mut self, keywords: Vec<String>) -> Self {
        self.discussion_keywords = keywords.into_iter().map(|k| k.to_lowercase()).collect();
        self
    }

    /// Whether `message` asks for a debate.
    pub fn is_debate(&self, message: &str) -> bool {
        let lower = format!(" {} ", message.to_lowercase());
        self.debate_keywords.iter().any(|kw| lower.contains(kw.as_str()))
    }

    /// Whether `message` asks for a roundtable.
    pub fn is_discussion(&self, message: &str) -> bool {
        let lower = message.to_lowercase();
        self.discussion_keywords.iter().any(|kw| lower.contains(kw.as_str()))
    }

    fn mentioned(&self, message: &str) -> Vec<&AgentPatterns> {
        self.agents
            .iter()
            .filter(|a| a.mention.is_match(message))
            .collect()
    }

    fn decision(kind: RouteKind, agents: Vec<String>, reason: String, prompt: &str) -> RouteDecision {
        let kind = match kind {
            RouteKind::Discussion | RouteKind::Debate => kind,
            _ if agents.len() > 1 => RouteKind::Multiple,
            _ => RouteKind::Single,
        };
        RouteDecision {
            kind,
            agents,
            reason,
            prompt: prompt.to_string(),
        }
    }
}

impl IntentRouter for KeywordRouter {
    fn route(&self, message: &str, last_agent: Option<&str>) -> RouteDecision {
        let mentioned = self.mentioned(message);
        if !mentioned.is_empty() {
            let mut cleaned = message.to_string();
            for agent in &mentioned {
                cleaned = agent.mention.replace_all(&cleaned, "").into_owned();
            }
            let cleaned = cleaned.trim();
            let prompt = if cleaned.is_empty() { message } else { cleaned };
            let names: Vec<String> = mentioned.iter().map(|a| a.name.clone()).collect();
            let reason = format!("mentioned: {}", names.join(", "));
            return Self::decision(RouteKind::Single, names, reason, prompt);
        }

        if self.is_debate(message) {
            return Self::decision(
                RouteKind::Debate,
                Vec::new(),
                "debate keyword".to_string(),
                message,
            );
        }

        if self.is_discussion(message) {
            let names = self.agents.iter().map(|a| a.name.clone()).collect();
            return Self::decision(
                RouteKind::Discussion,
                names,
                "discussion keyword".to_string(),
                message,
            );
        }

        let lower = message.to_lowercase();
        let by_intent: Vec<String> = self
            .agents
            .iter()
            .filter(|a| a.keywords.iter().any(|kw| lower.contains(kw.as_str())))
            .map(|a| a.name.clone())
            .collect();
        if !by_intent.is_empty() {
            let reason = format!("intent: {}", by_intent.join(", "));
            return Self::decision(RouteKind::Single, by_intent, reason, message);
        }

        if let Some(last) = last_agent {
            if let Some(agent) = self.agents.iter().find(|a| a.name.eq_ignore_ascii_case(last)) {
                return Self::decision(
                    RouteKind::Single,
                    vec![agent.name.clone()],
                    format!("continuing with {}", agent.name),
                    message,
                );
            }
        }

        Self::decision(
            RouteKind::Single,
            vec![self.default_agent.clone()],
            "default agent".to_string(),
            message,
        )
    }
}
