//! Debate records, turn order and verdict parsing.
//!
//! A debate pits a pro agent against a con agent on a motion and ends with
//! a judge scoring both sides. The turn order is fixed up front by
//! [`schedule`]; the [`DebateSession`] accumulates what was said.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use agora_core::DebateConfig;
use agora_models::{ConversationId, DebateId};

/// Dimensions the judge scores for each side, 0–100 each.
pub const SCORING_DIMENSIONS: &[&str] = &["Argument quality", "Evidence", "Rebuttal", "Delivery"];

/// Which side an agent speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateSide {
    Pro,
    Con,
    Judge,
}

impl DebateSide {
    /// The other debating side. The judge has no opponent.
    pub fn opponent(self) -> Self {
        match self {
            Self::Pro => Self::Con,
            Self::Con => Self::Pro,
            Self::Judge => Self::Judge,
        }
    }
}

impl fmt::Display for DebateSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pro => write!(f, "Pro"),
            Self::Con => write!(f, "Con"),
            Self::Judge => write!(f, "Judge"),
        }
    }
}

/// Phase of a debate, in running order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebatePhase {
    Opening,
    CrossExamination,
    Response,
    FreeDebate,
    Closing,
    Judgment,
}

impl DebatePhase {
    /// Heading used in transcripts and progress output.
    pub fn title(self) -> &'static str {
        match self {
            Self::Opening => "Opening statements",
            Self::CrossExamination => "Cross-examination",
            Self::Response => "Responses",
            Self::FreeDebate => "Free debate",
            Self::Closing => "Closing statements",
            Self::Judgment => "Judgment",
        }
    }
}

impl fmt::Display for DebatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opening => write!(f, "opening"),
            Self::CrossExamination => write!(f, "cross_examination"),
            Self::Response => write!(f, "response"),
            Self::FreeDebate => write!(f, "free_debate"),
            Self::Closing => write!(f, "closing"),
            Self::Judgment => write!(f, "judgment"),
        }
    }
}

/// One scheduled turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateStep {
    pub phase: DebatePhase,
    pub side: DebateSide,
    /// Free-debate exchange number; 0 outside free debate.
    pub round: u32,
}

impl DebateStep {
    fn new(phase: DebatePhase, side: DebateSide, round: u32) -> Self {
        Self { phase, side, round }
    }
}

/// Turn order for a debate with `free_rounds` free-debate exchanges.
///
/// Pro opens. Con cross-examines first and pro answers, then the roles
/// swap. Each free exchange is pro then con. Con closes first so pro has
/// the last word before the judge.
pub fn schedule(free_rounds: u32) -> Vec<DebateStep> {
    use DebatePhase::*;
    use DebateSide::*;

    let mut steps = vec![
        DebateStep::new(Opening, Pro, 0),
        DebateStep::new(Opening, Con, 0),
        DebateStep::new(CrossExamination, Con, 0),
        DebateStep::new(Response, Pro, 0),
        DebateStep::new(CrossExamination, Pro, 0),
        DebateStep::new(Response, Con, 0),
    ];
    for round in 1..=free_rounds {
        steps.push(DebateStep::new(FreeDebate, Pro, round));
        steps.push(DebateStep::new(FreeDebate, Con, round));
    }
    steps.push(DebateStep::new(Closing, Con, 0));
    steps.push(DebateStep::new(Closing, Pro, 0));
    steps.push(DebateStep::new(Judgment, Judge, 0));
    steps
}

/// Something an agent said.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateArgument {
    pub agent: String,
    pub side: DebateSide,
    pub phase: DebatePhase,
    pub round: u32,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl DebateArgument {
    pub fn new(agent: impl Into<String>, step: DebateStep, text: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            side: step.side,
            phase: step.phase,
            round: step.round,
            text: text.into(),
            at: Utc::now(),
        }
    }

    fn heading(&self) -> String {
        if self.phase == DebatePhase::FreeDebate {
            format!("{}, round {}", self.phase.title(), self.round)
        } else {
            self.phase.title().to_string()
        }
    }
}

/// Scores of both sides on one dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: String,
    pub pro: u8,
    pub con: u8,
}

/// Outcome of a judged debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateWinner {
    Pro,
    Con,
    Tie,
}

impl fmt::Display for DebateWinner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pro => write!(f, "pro"),
            Self::Con => write!(f, "con"),
            Self::Tie => write!(f, "tie"),
        }
    }
}

/// The judge's scores and decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// One entry per [`SCORING_DIMENSIONS`] item, in that order.
    pub scores: Vec<DimensionScore>,
    /// Mean over the dimensions.
    pub pro_total: f64,
    pub con_total: f64,
    pub winner: DebateWinner,
    /// The judge's explanation, empty if none was given.
    #[serde(default)]
    pub reasoning: String,
}

fn heading_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?im)^[ \t]*#{1,6}[ \t]*(pro|con|winner|verdict|reasoning|reasons?)\b.*$")
            .expect("Invalid regex pattern")
    })
}

fn winner_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)<WINNER>\s*(.*?)\s*</WINNER>").expect("Invalid regex pattern")
    })
}

/// Splits a judgment into `(heading keyword, body)` pairs.
fn sections(text: &str) -> Vec<(String, &str)> {
    let headings: Vec<(String, usize, usize)> = heading_pattern()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let keyword = caps.get(1)?.as_str().to_lowercase();
            Some((keyword, whole.start(), whole.end()))
        })
        .collect();

    headings
        .iter()
        .enumerate()
        .map(|(i, (keyword, _, end))| {
            let stop = headings.get(i + 1).map_or(text.len(), |next| next.1);
            (keyword.clone(), &text[*end..stop])
        })
        .collect()
}

fn section<'a>(sections: &[(String, &'a str)], keyword: &str) -> &'a str {
    sections
        .iter()
        .find(|(k, _)| k.starts_with(keyword))
        .map_or("", |(_, body)| body)
}

fn dimension_score(body: &str, dimension: &str) -> u8 {
    let pattern = format!(
        r"{}[^\n]*?<SCORE>\s*(\d{{1,3}})\s*</SCORE>",
        regex::escape(dimension)
    );
    let Ok(re) = RegexBuilder::new(&pattern).case_insensitive(true).build() else {
        return 0;
    };
    re.captures(body)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .map_or(0, |n| n.min(100) as u8)
}

fn mean(values: impl Iterator<Item = u8>) -> f64 {
    let (sum, count) = values.fold((0u32, 0u32), |(s, c), v| (s + u32::from(v), c + 1));
    if count == 0 {
        0.0
    } else {
        f64::from(sum) / f64::from(count)
    }
}

/// Parses the judge's answer.
///
/// Scores are read from `<SCORE>n</SCORE>` markers on each dimension's line
/// under the `## Pro` and `## Con` headings; a missing score counts 0. An
/// explicit `<WINNER>` marker decides the winner (naming both sides is a
/// tie), otherwise the higher mean wins.
pub fn parse_verdict(text: &str) -> Verdict {
    let sections = sections(text);
    let pro_body = section(&sections, "pro");
    let con_body = section(&sections, "con");

    let scores: Vec<DimensionScore> = SCORING_DIMENSIONS
        .iter()
        .map(|dimension| DimensionScore {
            dimension: dimension.to_string(),
            pro: dimension_score(pro_body, dimension),
            con: dimension_score(con_body, dimension),
        })
        .collect();
    let pro_total = mean(scores.iter().map(|s| s.pro));
    let con_total = mean(scores.iter().map(|s| s.con));

    let declared = winner_pattern()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase());
    let winner = match declared {
        Some(w) => {
            let pro = w.contains("pro") || w.contains("正方");
            let con = w.contains("con") || w.contains("反方");
            match (pro, con) {
                (true, false) => DebateWinner::Pro,
                (false, true) => DebateWinner::Con,
                _ => DebateWinner::Tie,
            }
        }
        None if pro_total > con_total => DebateWinner::Pro,
        None if con_total > pro_total => DebateWinner::Con,
        None => DebateWinner::Tie,
    };

    Verdict {
        scores,
        pro_total,
        con_total,
        winner,
        reasoning: section(&sections, "reason").trim().to_string(),
    }
}

/// Lifecycle of a debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateStatus {
    Running,
    /// The judge delivered a verdict.
    Judged,
    Stopped,
    Failed,
}

impl DebateStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DebateStatus::Running)
    }
}

impl fmt::Display for DebateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Judged => write!(f, "judged"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A debate and its full record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateSession {
    pub id: DebateId,
    pub conversation: ConversationId,
    pub topic: String,
    /// Roles and length in force for this debate.
    pub config: DebateConfig,
    pub status: DebateStatus,
    pub arguments: Vec<DebateArgument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl DebateSession {
    /// Creates a running debate.
    pub fn new(conversation: ConversationId, topic: impl Into<String>, config: DebateConfig) -> Self {
        Self {
            id: DebateId::new(),
            conversation,
            topic: topic.into(),
            config,
            status: DebateStatus::Running,
            arguments: Vec::new(),
            verdict: None,
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Agent speaking for `side`.
    pub fn agent(&self, side: DebateSide) -> &str {
        match side {
            DebateSide::Pro => &self.config.pro,
            DebateSide::Con => &self.config.con,
            DebateSide::Judge => &self.config.judge,
        }
    }

    pub fn push_argument(&mut self, argument: DebateArgument) {
        self.arguments.push(argument);
    }

    /// Latest thing `side` said in `phase`.
    pub fn statement(&self, side: DebateSide, phase: DebatePhase) -> Option<&DebateArgument> {
        self.arguments
            .iter()
            .rev()
            .find(|a| a.side == side && a.phase == phase)
    }

    /// Everything said in phases before `phase`, for debater prompts.
    pub fn history_before(&self, phase: DebatePhase) -> String {
        let mut out = String::new();
        for argument in self.arguments.iter().filter(|a| a.phase < phase) {
            out.push_str(&format!(
                "[{}] {} ({}):\n{}\n\n",
                argument.heading(),
                argument.side,
                argument.agent,
                argument.text.trim()
            ));
        }
        out.trim_end().to_string()
    }

    /// Full record grouped under phase headings, for the judge.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        let mut current: Option<String> = None;
        for argument in self.arguments.iter().filter(|a| a.side != DebateSide::Judge) {
            let heading = argument.heading();
            if current.as_deref() != Some(heading.as_str()) {
                out.push_str(&format!("== {} ==\n\n", heading));
                current = Some(heading);
            }
            out.push_str(&format!(
                "{} ({}):\n{}\n\n",
                argument.side,
                argument.agent,
                argument.text.trim()
            ));
        }
        out.trim_end().to_string()
    }

    /// Moves to a terminal status.
    pub fn finish(&mut self, status: DebateStatus) {
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
            "Debate {}: {} (pro) vs {} (con)",
            self.status, self.config.pro, self.config.con
        );
        if let Some(verdict) = &self.verdict {
            let outcome = match verdict.winner {
                DebateWinner::Pro => format!("{} wins for pro", self.config.pro),
                DebateWinner::Con => format!("{} wins for con", self.config.con),
                DebateWinner::Tie => "tie".to_string(),
            };
            line.push_str(&format!(
                "; {} ({:.1} to {:.1}, judged by {})",
                outcome, verdict.pro_total, verdict.con_total, self.config.judge
            ));
        }
        if let Some(reason) = &self.failure {
            line.push_str(&format!("; {}", reason));
        }
        line
    }
}
