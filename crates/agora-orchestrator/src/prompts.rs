//! Prompt construction for discussion rounds and single-agent questions.

use agora_core::AgentDefinition;
use agora_models::HistoryEntry;

use crate::discussion::BestContribution;

const MARKER_INSTRUCTIONS: &str = "\
- If you agree with a proposal, vote with <VOTE>agree</VOTE>; if not, <VOTE>disagree</VOTE>.
- Rate how settled the discussion is with <SCORE>0-100</SCORE>.
- To write a file, use <WRITE_FILE path=\"path/to/file\">content</WRITE_FILE>.";

/// Prompt for one agent in one round.
///
/// Round 1 frames the topic. Later rounds add the previous round's best
/// contribution as shared context to refine, rebut or extend.
pub fn round_prompt(
    agent: &AgentDefinition,
    topic: &str,
    round: u32,
    previous_best: Option<&BestContribution>,
) -> String {
    let mut prompt = if round <= 1 {
        format!(
            "You are {} ({}), taking part in a roundtable technical discussion with other AI agents.\n\n\
             [Topic]\n{}\n\n\
             [Your task]\n\
             - Give your analysis and recommendation from your role's point of view.\n",
            agent.name, agent.role, topic
        )
    } else {
        format!(
            "You are {} ({}), continuing the roundtable discussion.\n\n\
             [Topic]\n{}\n\n",
            agent.name, agent.role, topic
        )
    };

    if round > 1 {
        if let Some(best) = previous_best {
            prompt.push_str(&format!(
                "[Strongest contribution of round {}, by {} (score {})]\n{}\n\n",
                best.round, best.agent, best.score, best.text
            ));
        }
        prompt.push_str(&format!(
            "[Round {} - your task]\n\
             - Refine, rebut or extend the contribution above. Focus on the remaining disagreements.\n",
            round
        ));
    }

    prompt.push_str(MARKER_INSTRUCTIONS);
    prompt.push_str("\n\nKeep it concise.");
    prompt
}

/// Renders history entries as a context block. Empty history renders nothing.
pub fn history_block(history: &[HistoryEntry]) -> String {
    if history.is_empty() {
        return String::new();
    }
    let mut lines = vec!["[Recent conversation history]:".to_string()];
    for entry in history {
        if entry.is_user() {
            lines.push(format!("User: {}", entry.content));
        } else {
            lines.push(format!("{}: {}", entry.role, entry.content));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Prompt for a single-agent question with recent history as context.
pub fn ask_prompt(agent: &AgentDefinition, history: &[HistoryEntry], question: &str) -> String {
    let context = history_block(history);
    let context = if context.is_empty() {
        context
    } else {
        format!("{}\n", context)
    };
    format!(
        "You are {} ({}).\n\
         If you need to write a file, use the format: <WRITE_FILE path=\"path/to/file\">file content</WRITE_FILE>\n\
         Keep concise.\n\n\
         {}User: {}",
        agent.name, agent.role, context, question
    )
}
