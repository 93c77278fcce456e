//! Text rendering of discussion and debate events and outcomes.

use agora_core::AgentRegistry;
use agora_orchestrator::{
    Contribution, DebateEvent, DebatePhase, DebateSession, DebateSide, DiscussionEvent,
    DiscussionSession, RoundRecord, Verdict,
};
use agora_runner::TurnOutput;

const PREVIEW_CHARS: usize = 400;

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

fn label(agents: &AgentRegistry, name: &str) -> String {
    match agents.get(name) {
        Some(def) => format!("{} {}", def.emoji, def.name),
        None => name.to_string(),
    }
}

/// Renders a round's contributions in agent order.
pub fn render_round(agents: &AgentRegistry, record: &RoundRecord) -> String {
    let mut out = format!("── Round {} ──\n", record.round);
    for (agent, contribution) in &record.outputs {
        match contribution {
            Contribution::Response { text, score } => {
                out.push_str(&format!(
                    "{} [{}]\n{}\n\n",
                    label(agents, agent),
                    score,
                    preview(text)
                ));
            }
            Contribution::Failed { kind } => {
                out.push_str(&format!("{} failed: {}\n\n", label(agents, agent), kind));
            }
        }
    }
    match record.delta {
        Some(delta) => out.push_str(&format!("Round score: {} ({:+})", record.score, delta)),
        None => out.push_str(&format!("Round score: {}", record.score)),
    }
    out
}

/// Renders one event, or `None` for events with nothing to show.
pub fn render_event(agents: &AgentRegistry, event: &DiscussionEvent) -> Option<String> {
    match event {
        DiscussionEvent::Started {
            topic,
            participants,
            config,
            ..
        } => Some(format!(
            "Roundtable on \"{}\" with {} (max {} rounds, converge at {})",
            topic,
            participants
                .iter()
                .map(|p| label(agents, p))
                .collect::<Vec<_>>()
                .join(", "),
            config.max_rounds,
            config.score_threshold
        )),
        DiscussionEvent::RoundStarted { round, .. } => Some(format!("Round {} in progress...", round)),
        DiscussionEvent::RoundCompleted { record, .. } => Some(render_round(agents, record)),
        DiscussionEvent::Failed { reason, .. } => Some(format!("Discussion failed: {}", reason)),
        DiscussionEvent::Finished { .. } => None,
    }
}

/// Renders the outcome of a finished discussion.
pub fn render_outcome(agents: &AgentRegistry, session: &DiscussionSession) -> String {
    let mut out = session.summary();
    if let Some(best) = &session.best {
        out.push_str(&format!(
            "\n\nConclusion ({}):\n{}",
            label(agents, &best.agent),
            best.text.trim()
        ));
    }
    out
}

/// Renders one debate event, or `None` for events with nothing to show.
///
/// The judge's answer is left to [`render_debate_outcome`].
pub fn render_debate_event(agents: &AgentRegistry, event: &DebateEvent) -> Option<String> {
    match event {
        DebateEvent::Started { topic, config, .. } => Some(format!(
            "Debate on \"{}\": {} (pro) vs {} (con), judged by {}",
            topic,
            label(agents, &config.pro),
            label(agents, &config.con),
            label(agents, &config.judge)
        )),
        DebateEvent::PhaseStarted { phase, round, .. } if *phase == DebatePhase::FreeDebate => {
            Some(format!("── {}, round {} ──", phase.title(), round))
        }
        DebateEvent::PhaseStarted { phase, .. } => Some(format!("── {} ──", phase.title())),
        DebateEvent::Argument { argument, .. } if argument.side != DebateSide::Judge => Some(format!(
            "{} ({}):\n{}",
            label(agents, &argument.agent),
            argument.side,
            preview(&argument.text)
        )),
        DebateEvent::TurnFailed { agent, kind, .. } => {
            Some(format!("{} failed: {}", label(agents, agent), kind))
        }
        _ => None,
    }
}

/// Renders the judge's scorecard.
pub fn render_verdict(verdict: &Verdict) -> String {
    let mut out = format!("{:<18} {:>5} {:>5}\n", "", "PRO", "CON");
    for score in &verdict.scores {
        out.push_str(&format!(
            "{:<18} {:>5} {:>5}\n",
            score.dimension, score.pro, score.con
        ));
    }
    out.push_str(&format!(
        "{:<18} {:>5.1} {:>5.1}\nWinner: {}",
        "Average", verdict.pro_total, verdict.con_total, verdict.winner
    ));
    out
}

/// Renders the outcome of a finished debate.
pub fn render_debate_outcome(session: &DebateSession) -> String {
    let mut out = session.summary();
    if let Some(verdict) = &session.verdict {
        out.push_str(&format!("\n\n{}", render_verdict(verdict)));
        if !verdict.reasoning.is_empty() {
            out.push_str(&format!("\n\nReasoning ({}):\n{}", session.config.judge, verdict.reasoning));
        }
    }
    out
}

/// Renders a single-agent reply with any requested file writes.
pub fn render_reply(agents: &AgentRegistry, output: &TurnOutput) -> String {
    let mut out = format!("{}:\n{}", label(agents, &output.agent), output.display.trim());
    for write in &output.file_writes {
        out.push_str(&format!(
            "\n[{} requested a write to {} ({} bytes), not applied]",
            output.agent,
            write.path,
            write.content.len()
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_orchestrator::DebateArgument;
    use agora_runner::FailureKind;
    use std::collections::BTreeMap;

    fn record() -> RoundRecord {
        let mut outputs = BTreeMap::new();
        outputs.insert(
            "Claude".to_string(),
            Contribution::Response {
                text: "Use Redis.".into(),
                score: 85,
            },
        );
        outputs.insert(
            "Gemini".to_string(),
            Contribution::Failed {
                kind: FailureKind::Timeout,
            },
        );
        RoundRecord {
            round: 2,
            outputs,
            score: 42,
            delta: Some(-3),
        }
    }

    #[test]
    fn test_render_round() {
        let agents = AgentRegistry::builtin();
        let text = render_round(&agents, &record());
        assert!(text.starts_with("── Round 2 ──"));
        assert!(text.contains("Claude [85]\nUse Redis."));
        assert!(text.contains("Gemini failed: timeout"));
        assert!(text.ends_with("Round score: 42 (-3)"));
    }

    #[test]
    fn test_preview_truncates_long_text() {
        let long = "x".repeat(PREVIEW_CHARS + 10);
        let shown = preview(&long);
        assert_eq!(shown.chars().count(), PREVIEW_CHARS + 3);
        assert!(shown.ends_with("..."));
    }

    #[test]
    fn test_render_debate_events() {
        let agents = AgentRegistry::builtin();
        let conversation = agora_models::ConversationId::from_string("c");
        let steps = agora_orchestrator::schedule(1);

        let phase = DebateEvent::PhaseStarted {
            conversation: conversation.clone(),
            phase: DebatePhase::FreeDebate,
            round: 1,
        };
        assert!(render_debate_event(&agents, &phase).unwrap().contains("Free debate, round 1"));

        let opening = DebateEvent::Argument {
            conversation: conversation.clone(),
            argument: DebateArgument::new("Claude", steps[0], "Yes, because."),
        };
        let text = render_debate_event(&agents, &opening).unwrap();
        assert!(text.contains("Claude (Pro):\nYes, because."));

        let judgment = DebateEvent::Argument {
            conversation,
            argument: DebateArgument::new("Codex", steps[steps.len() - 1], "## Winner"),
        };
        assert!(render_debate_event(&agents, &judgment).is_none());
    }

    #[test]
    fn test_render_debate_outcome() {
        let mut session = DebateSession::new(
            agora_models::ConversationId::from_string("c"),
            "Tabs win",
            agora_core::DebateConfig::default(),
        );
        session.verdict = Some(agora_orchestrator::parse_verdict(
            "## Pro scores\n- Evidence: <SCORE>80</SCORE>\n## Con scores\n- Evidence: <SCORE>60</SCORE>\n## Reasoning\nPro cited sources.",
        ));
        session.finish(agora_orchestrator::DebateStatus::Judged);

        let text = render_debate_outcome(&session);
        assert!(text.starts_with("Debate judged: Claude (pro) vs Gemini (con)"));
        assert!(text.contains("Evidence              80    60"));
        assert!(text.contains("Winner: pro"));
        assert!(text.ends_with("Reasoning (Codex):\nPro cited sources."));
    }

    #[test]
    fn test_render_reply_lists_file_writes() {
        let agents = AgentRegistry::builtin();
        let mut output = TurnOutput::new("Codex", "Done.");
        output.file_writes.push(agora_runner::FileWriteRequest {
            path: "src/lib.rs".into(),
            content: "fn main() {}".into(),
        });
        let text = render_reply(&agents, &output);
        assert!(text.contains("Codex:\nDone."));
        assert!(text.contains("write to src/lib.rs (12 bytes), not applied"));
    }
}
