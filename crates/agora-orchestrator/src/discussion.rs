//! Discussion records.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agora_core::DiscussionConfig;
use agora_models::{ConversationId, DiscussionId};
use agora_runner::FailureKind;

/// Lifecycle of a discussion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionStatus {
    Running,
    Converged,
    MaxRoundsReached,
    Stopped,
    Failed,
}

impl DiscussionStatus {
    /// Whether no further rounds will run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DiscussionStatus::Running)
    }
}

impl fmt::Display for DiscussionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Running => "running",
            Self::Converged => "converged",
            Self::MaxRoundsReached => "max rounds reached",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

/// One agent's contribution to a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Contribution {
    /// The agent answered.
    Response {
        text: String,
        /// Contribution score from the scorer (0–100).
        score: u8,
    },
    /// The agent's turn failed; counts as an empty contribution.
    Failed { kind: FailureKind },
}

impl Contribution {
    /// Reply text, if the agent answered.
    pub fn text(&self) -> Option<&str> {
        match self {
            Contribution::Response { text, .. } => Some(text),
            Contribution::Failed { .. } => None,
        }
    }

    /// Contribution score; failures score 0.
    pub fn score(&self) -> u8 {
        match self {
            Contribution::Response { score, .. } => *score,
            Contribution::Failed { .. } => 0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Contribution::Response { .. })
    }
}

/// The highest-scoring contribution of a round or a whole discussion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestContribution {
    pub round: u32,
    pub agent: String,
    pub text: String,
    pub score: u8,
}

/// Result of one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// 1-based round number.
    pub round: u32,
    /// Every participant's contribution, failures included.
    pub outputs: BTreeMap<String, Contribution>,
    /// Round convergence score (0–100).
    pub score: u8,
    /// Change from the previous round's score; `None` for round 1.
    pub delta: Option<i16>,
}

impl RoundRecord {
    /// Number of agents that answered.
    pub fn success_count(&self) -> usize {
        self.outputs.values().filter(|c| c.is_success()).count()
    }

    /// Agents whose turns failed, with the failure kind.
    pub fn failures(&self) -> Vec<AgentFailure> {
        self.outputs
            .iter()
            .filter_map(|(agent, c)| match c {
                Contribution::Failed { kind } => Some(AgentFailure {
                    agent: agent.clone(),
                    kind: *kind,
                }),
                Contribution::Response { .. } => None,
            })
            .collect()
    }

    /// Highest-scoring answer; ties go to the agent earliest in `order`.
    pub fn best(&self, order: &[String]) -> Option<BestContribution> {
        let mut best: Option<BestContribution> = None;
        for agent in order {
            if let Some(Contribution::Response { text, score }) = self.outputs.get(agent) {
                if best.as_ref().map_or(true, |b| *score > b.score) {
                    best = Some(BestContribution {
                        round: self.round,
                        agent: agent.clone(),
                        text: text.clone(),
                        score: *score,
                    });
                }
            }
        }
        best
    }
}

/// An agent that could not contribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFailure {
    pub agent: String,
    pub kind: FailureKind,
}

/// Why a discussion ended as `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// No agent produced a usable answer in a round.
    AllAgentsFailed { round: u32, agents: Vec<AgentFailure> },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::AllAgentsFailed { round, agents } => {
                let detail: Vec<String> = agents
                    .iter()
                    .map(|a| format!("{} ({})", a.agent, a.kind))
                    .collect();
                write!(f, "all agents failed in round {}: {}", round, detail.join(", "))
            }
        }
    }
}

/// A roundtable discussion and its full record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscussionSession {
    pub id: DiscussionId,
    pub conversation: ConversationId,
    pub topic: String,
    /// Participating agents in speaking order.
    pub participants: Vec<String>,
    /// Limits in force for this discussion.
    pub config: DiscussionConfig,
    pub status: DiscussionStatus,
    pub rounds: Vec<RoundRecord>,
    /// Best contribution across all rounds so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best: Option<BestContribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl DiscussionSession {
    /// Creates a running discussion.
    pub fn new(
        conversation: ConversationId,
        topic: impl Into<String>,
        participants: Vec<String>,
        config: DiscussionConfig,
    ) -> Self {
        Self {
            id: DiscussionId::new(),
            conversation,
            topic: topic.into(),
            participants,
            config,
            status: DiscussionStatus::Running,
            rounds: Vec::new(),
            best: None,
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Number of completed rounds.
    pub fn rounds_completed(&self) -> u32 {
        self.rounds.len() as u32
    }

    /// Score of the last completed round.
    pub fn last_score(&self) -> Option<u8> {
        self.rounds.last().map(|r| r.score)
    }

    /// Appends a round and updates the overall best contribution.
    ///
    /// Earlier rounds win ties.
    pub fn push_round(&mut self, record: RoundRecord) {
        if let Some(candidate) = record.best(&self.participants) {
            if self.best.as_ref().map_or(true, |b| candidate.score > b.score) {
                self.best = Some(candidate);
            }
        }
        self.rounds.push(record);
    }

    /// Moves to a terminal status.
    pub fn finish(&mut self, status: DiscussionStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// Pretty JSON for export.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Short human-readable outcome.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "Discussion {} after {} round(s)",
            self.status,
            self.rounds_completed()
        );
        if let Some(score) = self.last_score() {
            line.push_str(&format!(", final score {}", score));
        }
        if let Some(best) = &self.best {
            line.push_str(&format!(
                "; best contribution by {} in round {} (score {})",
                best.agent, best.round, best.score
            ));
        }
        if let Some(reason) = &self.failure {
            line.push_str(&format!("; {}", reason));
        }
        line
    }
}
