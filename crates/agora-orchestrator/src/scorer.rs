//! Convergence scoring.
//!
//! A scorer turns a round's contributions into a 0–100 score. The
//! orchestrator compares that score with the discussion's thresholds in
//! [`decide`] to choose whether another round runs.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use agora_core::DiscussionConfig;

use crate::discussion::{Contribution, RoundRecord};

/// Score for an answer that votes or says it agrees.
pub const AGREE_SCORE: u8 = 85;
/// Score for an answer that disagrees.
pub const DISAGREE_SCORE: u8 = 25;
/// Score for an answer with no agreement signal.
pub const NEUTRAL_SCORE: u8 = 50;
/// Deduction per line raising an objection.
pub const OBJECTION_PENALTY: u8 = 5;

const AGREE_MARKERS: &[&str] = &["agree", "lgtm", "approve", "同意", "赞成"];
const DISAGREE_MARKERS: &[&str] = &["disagree", "reject", "反对"];
const OBJECTION_MARKERS: &[&str] = &["objection", "concern", "disagree", "but ", "反对", "担心"];

/// Scores discussion rounds.
///
/// Scores are per round and never cumulative. Implementations must be
/// deterministic and must accept failed contributions.
pub trait ConvergenceScorer: Send + Sync {
    /// Scores one answer (0–100).
    fn contribution_score(&self, agent: &str, text: &str) -> u8;

    /// Scores a round given the rounds before it.
    ///
    /// The default is the mean contribution score over every participant,
    /// failed contributions counting 0.
    fn score(&self, outputs: &BTreeMap<String, Contribution>, history: &[RoundRecord]) -> u8 {
        let _ = history;
        if outputs.is_empty() {
            return 0;
        }
        let total: u32 = outputs.values().map(|c| u32::from(c.score())).sum();
        (total / outputs.len() as u32).min(100) as u8
    }
}

fn score_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)<SCORE>\s*(\d{1,3})\s*</SCORE>|score:\s*(\d{1,3})\s*/\s*100")
            .expect("Invalid regex pattern")
    })
}

fn vote_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?is)<VOTE>(.*?)</VOTE>").expect("Invalid regex pattern"))
}

/// Extracts the `<VOTE>` content of an answer.
pub fn extract_vote(text: &str) -> Option<String> {
    vote_pattern()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Extracts a self-reported score, clamped to 100.
pub fn extract_score(text: &str) -> Option<u8> {
    let caps = score_pattern().captures(text)?;
    let raw = caps.get(1).or_else(|| caps.get(2))?;
    raw.as_str().parse::<u32>().ok().map(|n| n.min(100) as u8)
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Rule-based scorer over structural markers.
///
/// A self-reported `<SCORE>n</SCORE>` or `Score: n/100` wins outright.
/// Otherwise the stance sets a base score (vote or agreement 85,
/// disagreement 25, neither 50) and every line raising an objection
/// costs 5 points.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerScorer;

impl MarkerScorer {
    pub fn new() -> Self {
        Self
    }
}

impl ConvergenceScorer for MarkerScorer {
    fn contribution_score(&self, _agent: &str, text: &str) -> u8 {
        if text.trim().is_empty() {
            return 0;
        }
        if let Some(score) = extract_score(text) {
            return score;
        }

        let stance = extract_vote(text)
            .unwrap_or_else(|| text.to_string())
            .to_lowercase();
        let base = if contains_any(&stance, DISAGREE_MARKERS) {
            DISAGREE_SCORE
        } else if contains_any(&stance, AGREE_MARKERS) || extract_vote(text).is_some() {
            AGREE_SCORE
        } else {
            NEUTRAL_SCORE
        };

        let objections = text
            .lines()
            .map(str::to_lowercase)
            .filter(|line| contains_any(line, OBJECTION_MARKERS))
            .count();
        let penalty = (objections as u32).saturating_mul(u32::from(OBJECTION_PENALTY));
        (u32::from(base).saturating_sub(penalty)) as u8
    }
}

/// What happens after a round has been scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundVerdict {
    /// Run another round.
    Continue,
    /// Score reached the threshold.
    Converged,
    /// Score stopped improving.
    Plateau,
    /// Round limit reached.
    MaxRounds,
}

/// Applies the stop rules, in order: threshold, round limit, plateau.
///
/// A plateau needs a previous round with a non-zero score; rounds with no
/// measurable agreement never plateau. A stop request is checked by the
/// caller before this.
pub fn decide(config: &DiscussionConfig, round: u32, score: u8, previous: Option<u8>) -> RoundVerdict {
    if score >= config.score_threshold {
        return RoundVerdict::Converged;
    }
    if round >= config.max_rounds {
        return RoundVerdict::MaxRounds;
    }
    if let Some(previous) = previous.filter(|p| *p > 0) {
        let improvement = i16::from(score) - i16::from(previous);
        if round >= 2 && improvement < i16::from(config.delta_threshold) {
            return RoundVerdict::Plateau;
        }
    }
    RoundVerdict::Continue
}
