//! Integration tests for debates driven by scripted agents.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use agora_core::{AgoraConfig, DebateConfig, DebateOverrides};
use agora_models::ConversationId;
use agora_orchestrator::{
    DebateEvent, DebateModerator, DebatePhase, DebateSide, DebateStatus, DebateWinner,
    OrchestratorError,
};
use agora_persistence::SessionStore;
use agora_runner::{FailureKind, RunnerError, TurnOutput, TurnRunner};

const JUDGMENT: &str = "\
## Pro scores
- Argument quality: <SCORE>70</SCORE>
- Evidence: <SCORE>72</SCORE>
- Rebuttal: <SCORE>68</SCORE>
- Delivery: <SCORE>70</SCORE>

## Con scores
- Argument quality: <SCORE>85</SCORE>
- Evidence: <SCORE>88</SCORE>
- Rebuttal: <SCORE>90</SCORE>
- Delivery: <SCORE>83</SCORE>

## Winner
<WINNER>Con</WINNER>

## Reasoning
Con took apart the cost argument.";

#[derive(Clone)]
enum Step {
    Reply(String),
    Crash,
    /// Sleeps far longer than any test, ignoring cancellation.
    Hang,
}

type Script = Box<dyn Fn(&str, u32) -> Step + Send + Sync>;

struct ScriptedRunner {
    script: Script,
    turns: Mutex<HashMap<String, u32>>,
    prompts: Mutex<Vec<(String, String)>>,
    kills: Mutex<u32>,
}

impl ScriptedRunner {
    fn new(script: impl Fn(&str, u32) -> Step + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            turns: Mutex::new(HashMap::new()),
            prompts: Mutex::new(Vec::new()),
            kills: Mutex::new(0),
        })
    }

    /// Debaters answer "<agent> turn <n>", the judge answers with `JUDGMENT`.
    fn debating() -> Arc<Self> {
        Self::new(|agent, turn| reply(agent, turn))
    }

    fn prompt(&self, index: usize) -> (String, String) {
        self.prompts.lock().unwrap()[index].clone()
    }

    fn speakers(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .map(|(agent, _)| agent.clone())
            .collect()
    }

    fn turn_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

fn reply(agent: &str, turn: u32) -> Step {
    if agent == "Codex" {
        Step::Reply(JUDGMENT.to_string())
    } else {
        Step::Reply(format!("{} turn {}", agent, turn))
    }
}

#[async_trait]
impl TurnRunner for ScriptedRunner {
    async fn run_turn(
        &self,
        _conversation: &ConversationId,
        agent: &str,
        prompt: &str,
        _cancel: watch::Receiver<bool>,
    ) -> agora_runner::Result<TurnOutput> {
        let turn = {
            let mut turns = self.turns.lock().unwrap();
            let n = turns.entry(agent.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        self.prompts
            .lock()
            .unwrap()
            .push((agent.to_string(), prompt.to_string()));

        match (self.script)(agent, turn) {
            Step::Reply(text) => Ok(TurnOutput::new(agent, text)),
            Step::Crash => Err(RunnerError::ProcessCrash {
                agent: agent.to_string(),
                code: Some(1),
                message: "boom".into(),
            }),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(TurnOutput::new(agent, "too late"))
            }
        }
    }

    async fn kill(&self, _conversation: &ConversationId, _agent: Option<&str>) -> usize {
        *self.kills.lock().unwrap() += 1;
        0
    }
}

struct Harness {
    moderator: Arc<DebateModerator>,
    store: Arc<SessionStore>,
    _dir: tempfile::TempDir,
}

fn harness(runner: Arc<ScriptedRunner>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(
        AgoraConfig::new()
            .with_state_dir(dir.path())
            .with_debate(DebateConfig::new().with_free_rounds(1)),
    );
    let store = Arc::new(SessionStore::new(dir.path()));
    let moderator = DebateModerator::new(config, runner, Arc::clone(&store));
    Harness {
        moderator: Arc::new(moderator),
        store,
        _dir: dir,
    }
}

fn conv(name: &str) -> ConversationId {
    ConversationId::from_string(name)
}

#[tokio::test]
async fn test_full_debate_reaches_verdict() {
    let runner = ScriptedRunner::debating();
    let h = harness(runner.clone());

    let session = h
        .moderator
        .run(&conv("d1"), "Rewrite it in Rust", DebateOverrides::new())
        .await
        .unwrap();

    assert_eq!(session.status, DebateStatus::Judged);
    assert_eq!(session.arguments.len(), 11);
    assert!(session.failure.is_none());
    assert!(session.finished_at.is_some());

    let verdict = session.verdict.as_ref().unwrap();
    assert_eq!(verdict.winner, DebateWinner::Con);
    assert_eq!(verdict.pro_total, 70.0);
    assert_eq!(verdict.con_total, 86.5);
    assert_eq!(verdict.reasoning, "Con took apart the cost argument.");
    assert!(session.summary().contains("Gemini wins for con"));
}

#[tokio::test]
async fn test_turn_order_and_prompts() {
    let runner = ScriptedRunner::debating();
    let h = harness(runner.clone());

    let session = h
        .moderator
        .run(&conv("d2"), "Tabs beat spaces", DebateOverrides::new())
        .await
        .unwrap();

    assert_eq!(
        runner.speakers(),
        vec![
            "Claude", "Gemini", "Gemini", "Claude", "Claude", "Gemini", "Claude", "Gemini",
            "Gemini", "Claude", "Codex"
        ]
    );

    // Con's cross-examination quotes pro's opening.
    let (_, cross) = runner.prompt(2);
    assert!(cross.contains("[Pro side's statement]\nClaude turn 1"));
    // Pro answers con's questions.
    let (_, response) = runner.prompt(3);
    assert!(response.contains("[Con side's questions]\nGemini turn 2"));
    // The judge sees the whole exchange but not itself.
    let (_, judgment) = runner.prompt(10);
    assert!(judgment.contains("[Motion]\nTabs beat spaces"));
    assert!(judgment.contains("Claude turn 5"));
    assert!(judgment.contains("Gemini turn 5"));

    let phases: Vec<DebatePhase> = session.arguments.iter().map(|a| a.phase).collect();
    assert_eq!(phases[0], DebatePhase::Opening);
    assert_eq!(phases[6], DebatePhase::FreeDebate);
    assert_eq!(phases[10], DebatePhase::Judgment);
    assert_eq!(session.arguments[10].side, DebateSide::Judge);
}

#[tokio::test]
async fn test_failed_turn_is_skipped() {
    let runner = ScriptedRunner::new(|agent, turn| {
        if agent == "Claude" && turn == 1 {
            Step::Crash
        } else {
            reply(agent, turn)
        }
    });
    let h = harness(runner.clone());
    let mut events = h.moderator.subscribe();

    let session = h
        .moderator
        .run(&conv("d3"), "Static typing pays off", DebateOverrides::new())
        .await
        .unwrap();

    assert_eq!(session.status, DebateStatus::Judged);
    assert_eq!(session.arguments.len(), 10);
    assert!(session.statement(DebateSide::Pro, DebatePhase::Opening).is_none());

    let (agent, cross) = runner.prompt(2);
    assert_eq!(agent, "Gemini");
    assert!(cross.contains("(no statement: the speaker did not answer)"));

    let mut failed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let DebateEvent::TurnFailed { agent, step, kind, .. } = event {
            failed.push((agent, step.phase, kind));
        }
    }
    assert_eq!(
        failed,
        vec![(
            "Claude".to_string(),
            DebatePhase::Opening,
            FailureKind::Crash
        )]
    );
}

#[tokio::test]
async fn test_judge_failure_fails_debate() {
    let runner = ScriptedRunner::new(|agent, turn| {
        if agent == "Codex" {
            Step::Crash
        } else {
            reply(agent, turn)
        }
    });
    let h = harness(runner);

    let session = h
        .moderator
        .run(&conv("d4"), "Microservices first", DebateOverrides::new())
        .await
        .unwrap();

    assert_eq!(session.status, DebateStatus::Failed);
    assert!(session.verdict.is_none());
    assert_eq!(session.arguments.len(), 10);
    assert!(session.failure.as_deref().unwrap().starts_with("judge Codex failed"));
}

#[tokio::test]
async fn test_no_openings_abandons_debate() {
    let runner = ScriptedRunner::new(|_, _| Step::Crash);
    let h = harness(runner.clone());

    let session = h
        .moderator
        .run(&conv("d5"), "Vim over Emacs", DebateOverrides::new())
        .await
        .unwrap();

    assert_eq!(session.status, DebateStatus::Failed);
    assert!(session.arguments.is_empty());
    assert_eq!(runner.turn_count(), 2);
    assert_eq!(
        session.failure.as_deref(),
        Some("neither side gave an opening statement")
    );
}

#[tokio::test]
async fn test_stop_during_turn() {
    let runner = ScriptedRunner::new(|agent, turn| {
        if agent == "Gemini" {
            Step::Hang
        } else {
            reply(agent, turn)
        }
    });
    let h = harness(runner.clone());
    let id = conv("d6");
    let mut events = h.moderator.subscribe();

    let handle = h
        .moderator
        .start(&id, "Dark mode by default", DebateOverrides::new())
        .unwrap();
    loop {
        match events.recv().await.unwrap() {
            DebateEvent::TurnStarted { agent, .. } if agent == "Gemini" => break,
            _ => {}
        }
    }
    assert!(h.moderator.is_active(&id));
    assert!(h.moderator.stop(&id).await);

    let session = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, DebateStatus::Stopped);
    assert_eq!(session.arguments.len(), 1);
    assert!(!h.moderator.is_active(&id));
    assert!(*runner.kills.lock().unwrap() >= 1);
    assert!(!h.moderator.stop(&id).await);
}

#[tokio::test]
async fn test_second_debate_is_refused() {
    let runner = ScriptedRunner::new(|_, _| Step::Hang);
    let h = harness(runner);
    let id = conv("d7");

    let handle = h
        .moderator
        .start(&id, "First motion", DebateOverrides::new())
        .unwrap();
    let second = h
        .moderator
        .run(&id, "Second motion", DebateOverrides::new())
        .await;
    assert!(matches!(second, Err(OrchestratorError::DebateActive(c)) if c == id));

    // Other conversations are independent.
    assert!(h
        .moderator
        .start(&conv("d7-other"), "Other motion", DebateOverrides::new())
        .is_ok());

    assert!(h.moderator.stop(&id).await);
    let session = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.topic, "First motion");
    assert!(h.moderator.stop(&conv("d7-other")).await);
}

#[tokio::test]
async fn test_roles_are_checked() {
    let runner = ScriptedRunner::debating();
    let h = harness(runner.clone());

    let same = h
        .moderator
        .run(
            &conv("d8"),
            "m",
            DebateOverrides::new().with_pro("gemini").with_con("Gemini"),
        )
        .await;
    assert!(matches!(same, Err(OrchestratorError::InvalidRoles(_))));

    let unknown = h
        .moderator
        .run(&conv("d8"), "m", DebateOverrides::new().with_judge("Nobody"))
        .await;
    assert!(matches!(unknown, Err(OrchestratorError::UnknownAgent(name)) if name == "Nobody"));
    assert_eq!(runner.turn_count(), 0);
    assert!(!h.moderator.is_active(&conv("d8")));

    // Names resolve case-insensitively to the canonical agent.
    let session = h
        .moderator
        .run(
            &conv("d8"),
            "m",
            DebateOverrides::new().with_pro("codex").with_judge("claude"),
        )
        .await
        .unwrap();
    assert_eq!(session.config.pro, "Codex");
    assert_eq!(session.config.judge, "Claude");
    assert_eq!(runner.prompt(0).0, "Codex");
}

#[tokio::test]
async fn test_topic_and_verdict_recorded_in_history() {
    let runner = ScriptedRunner::debating();
    let h = harness(runner);
    let id = conv("d9");

    h.moderator
        .run(&id, "Rewrite it in Rust", DebateOverrides::new())
        .await
        .unwrap();

    let state = h.store.load(&id);
    let history = state.recent_history(10);
    assert_eq!(history.len(), 2);
    assert!(history[0].is_user());
    assert_eq!(history[0].content, "Rewrite it in Rust");
    assert_eq!(history[1].role, "Codex");
    assert!(history[1].content.contains("Gemini wins for con"));
    assert!(history[1].content.contains("cost argument"));
}

#[tokio::test]
async fn test_debate_visible_after_finish() {
    let runner = ScriptedRunner::debating();
    let h = harness(runner);
    let id = conv("d10");
    let mut events = h.moderator.subscribe();

    let handle = h
        .moderator
        .start(&id, "Rewrite it in Rust", DebateOverrides::new())
        .unwrap();

    let mut phases = Vec::new();
    loop {
        match events.recv().await.unwrap() {
            DebateEvent::PhaseStarted { phase, .. } => phases.push(phase),
            DebateEvent::Finished { status, verdict, .. } => {
                assert_eq!(status, DebateStatus::Judged);
                assert_eq!(verdict.unwrap().winner, DebateWinner::Con);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(phases.first(), Some(&DebatePhase::Opening));
    assert_eq!(phases.last(), Some(&DebatePhase::Judgment));

    let seen = h.moderator.debate(&id).unwrap();
    assert_eq!(seen.status, DebateStatus::Judged);
    assert_eq!(h.moderator.last_debate(&id).unwrap().id, seen.id);
    assert_eq!(handle.await.unwrap().id, seen.id);
}
