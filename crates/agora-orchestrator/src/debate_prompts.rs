//! Prompt construction for debate turns.

use crate::debate::{DebateSide, SCORING_DIMENSIONS};

const CONDUCT: &str = "\
- This is a formal debate: stay rational and professional.
- Attack arguments, never the opponent.";

fn stance(side: DebateSide) -> &'static str {
    match side {
        DebateSide::Pro => "FOR",
        _ => "AGAINST",
    }
}

fn preamble(agent: &str, side: DebateSide, topic: &str) -> String {
    format!(
        "You are {}, speaking for the {} side in a formal debate.\n\n[Motion]\n{}\n\n",
        agent, side, topic
    )
}

/// Opening statement: stance, two or three core arguments, support.
pub fn opening_prompt(agent: &str, topic: &str, side: DebateSide) -> String {
    format!(
        "{}[Your position]\nYou argue {} the motion.\n\n\
         [Task]\n\
         Give your opening statement (about 300-500 words):\n\
         1. State your position clearly.\n\
         2. Present two or three core arguments.\n\
         3. Support them with facts, data, examples or reasoning.\n\n\
         {}\n\n\
         Output only your opening statement.",
        preamble(agent, side, topic),
        stance(side),
        CONDUCT
    )
}

/// Cross-examination of the opponent's opening statement.
pub fn cross_examination_prompt(
    agent: &str,
    topic: &str,
    side: DebateSide,
    opponent_statement: &str,
) -> String {
    format!(
        "{}[{} side's statement]\n{}\n\n\
         [Task]\n\
         Cross-examine the statement above (about 200-300 words):\n\
         1. Find the gaps and weak points in its reasoning.\n\
         2. Ask two or three pointed questions.\n\
         3. Challenge its evidence with counterexamples, data or logic.\n\n\
         {}\n\n\
         Output only your cross-examination.",
        preamble(agent, side, topic),
        side.opponent(),
        opponent_statement,
        CONDUCT
    )
}

/// Answer to the opponent's cross-examination.
pub fn response_prompt(agent: &str, topic: &str, side: DebateSide, questions: &str) -> String {
    format!(
        "{}[{} side's questions]\n{}\n\n\
         [Task]\n\
         Answer the cross-examination (about 200-300 words):\n\
         1. Answer the questions directly without dodging.\n\
         2. Clear up misunderstandings of your position.\n\
         3. Concede fair points without giving up your core position.\n\
         4. Use the answer to strengthen your own case.\n\n\
         Output only your response.",
        preamble(agent, side, topic),
        side.opponent(),
        questions
    )
}

/// One free-debate exchange with the record so far.
pub fn free_debate_prompt(
    agent: &str,
    topic: &str,
    side: DebateSide,
    history: &str,
    round: u32,
    total_rounds: u32,
) -> String {
    let closing_hint = if round >= total_rounds {
        "\n4. This is the last exchange: start drawing your case together."
    } else {
        ""
    };
    format!(
        "{}[Debate so far]\n{}\n\n\
         [Now]\nFree debate, round {} of {}.\n\n\
         [Task]\n\
         Speak in the free debate (about 200-300 words):\n\
         1. Rebut the opponent's most recent points.\n\
         2. Add a new argument or angle.\n\
         3. Go after the weakest link in the opponent's reasoning.{}\n\n\
         Output only your contribution.",
        preamble(agent, side, topic),
        history,
        round,
        total_rounds,
        closing_hint
    )
}

/// Closing statement over the whole exchange.
pub fn closing_prompt(agent: &str, topic: &str, side: DebateSide, history: &str) -> String {
    format!(
        "{}[Full debate record]\n{}\n\n\
         [Task]\n\
         Give your closing statement (about 300-400 words):\n\
         1. Restate that you argue {} the motion.\n\
         2. Summarize your core arguments and evidence.\n\
         3. Answer the opponent's main attacks.\n\
         4. End with a strong appeal to the judge.\n\n\
         Do not introduce new arguments.\n\n\
         Output only your closing statement.",
        preamble(agent, side, topic),
        history,
        stance(side)
    )
}

/// Judgment over the full transcript, with the marker format the verdict
/// parser reads.
pub fn judgment_prompt(judge: &str, topic: &str, transcript: &str) -> String {
    let dimensions: Vec<String> = SCORING_DIMENSIONS.iter().map(|d| format!("- {}", d)).collect();
    let score_lines: Vec<String> = SCORING_DIMENSIONS
        .iter()
        .map(|d| format!("- {}: <SCORE>XX</SCORE>", d))
        .collect();
    let score_lines = score_lines.join("\n");

    format!(
        "You are {}, the judge of this debate. Deliver a fair verdict.\n\n\
         [Motion]\n{}\n\n\
         [Full transcript]\n{}\n\n\
         [Task]\n\
         Score both sides from 0 to 100 on each dimension:\n{}\n\n\
         [Scale]\n\
         - 90-100: outstanding, highly persuasive\n\
         - 80-89: strong and complete\n\
         - 70-79: sound with some flaws\n\
         - 60-69: passable with clear gaps\n\
         - below 60: does not hold up\n\n\
         [Output format] Follow exactly:\n\n\
         ## Pro scores\n{}\n\n\
         ## Con scores\n{}\n\n\
         ## Winner\n<WINNER>Pro/Con/Tie</WINNER>\n\n\
         ## Reasoning\n(why this side won, with each side's strengths and weaknesses)",
        judge,
        topic,
        transcript,
        dimensions.join("\n"),
        score_lines,
        score_lines
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::{parse_verdict, DebateWinner};

    #[test]
    fn test_opening_states_position() {
        let prompt = opening_prompt("Claude", "Monorepos scale better", DebateSide::Pro);
        assert!(prompt.starts_with("You are Claude, speaking for the Pro side"));
        assert!(prompt.contains("[Motion]\nMonorepos scale better"));
        assert!(prompt.contains("You argue FOR the motion."));

        let prompt = opening_prompt("Gemini", "Monorepos scale better", DebateSide::Con);
        assert!(prompt.contains("You argue AGAINST the motion."));
    }

    #[test]
    fn test_cross_examination_quotes_opponent() {
        let prompt = cross_examination_prompt("Gemini", "m", DebateSide::Con, "One repo to rule them all.");
        assert!(prompt.contains("[Pro side's statement]\nOne repo to rule them all."));
    }

    #[test]
    fn test_last_free_round_hints_at_closing() {
        let last = free_debate_prompt("Claude", "m", DebateSide::Pro, "history", 2, 2);
        assert!(last.contains("Free debate, round 2 of 2."));
        assert!(last.contains("last exchange"));
        let first = free_debate_prompt("Claude", "m", DebateSide::Pro, "history", 1, 2);
        assert!(!first.contains("last exchange"));
    }

    #[test]
    fn test_judgment_template_parses_as_tie() {
        let prompt = judgment_prompt("Codex", "m", "transcript");
        assert!(prompt.contains("- Rebuttal: <SCORE>XX</SCORE>"));
        assert!(prompt.contains("<WINNER>Pro/Con/Tie</WINNER>"));
        // An agent that echoes the template unfilled must not produce a winner.
        let verdict = parse_verdict(&prompt);
        assert_eq!(verdict.pro_total, 0.0);
        assert_eq!(verdict.winner, DebateWinner::Tie);
    }
}
