//! Integration tests for roundtable discussions driven by scripted agents.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use agora_core::{AgoraConfig, DiscussionConfig, DiscussionOverrides};
use agora_models::ConversationId;
use agora_orchestrator::{
    Contribution, ConvergenceScorer, DiscussionEvent, DiscussionStatus, OrchestratorError,
    RoundRecord, RoundtableOrchestrator,
};
use agora_persistence::SessionStore;
use agora_runner::{FailureKind, RunnerError, TimeoutKind, TurnOutput, TurnRunner};

/// What a scripted agent does on one turn.
#[derive(Clone)]
enum Step {
    Reply(&'static str),
    ReplyAfter(Duration, &'static str),
    Timeout,
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

    fn replying(text: &'static str) -> Arc<Self> {
        Self::new(move |_, _| Step::Reply(text))
    }

    fn prompts_containing(&self, needle: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, p)| p.contains(needle))
            .count()
    }

    fn turn_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
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
            Step::ReplyAfter(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(TurnOutput::new(agent, text))
            }
            Step::Timeout => Err(RunnerError::Timeout {
                agent: agent.to_string(),
                kind: TimeoutKind::Idle,
            }),
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

/// Returns a fixed score per round; the last entry repeats.
struct ScriptedScores(Vec<u8>);

impl ConvergenceScorer for ScriptedScores {
    fn contribution_score(&self, _agent: &str, text: &str) -> u8 {
        text.len().min(100) as u8
    }

    fn score(&self, _outputs: &BTreeMap<String, Contribution>, history: &[RoundRecord]) -> u8 {
        let index = history.len().min(self.0.len() - 1);
        self.0[index]
    }
}

struct Harness {
    orchestrator: Arc<RoundtableOrchestrator>,
    store: Arc<SessionStore>,
    _dir: tempfile::TempDir,
}

fn harness(runner: Arc<ScriptedRunner>, scores: Vec<u8>, discussion: DiscussionConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(
        AgoraConfig::new()
            .with_state_dir(dir.path())
            .with_discussion(discussion),
    );
    let store = Arc::new(SessionStore::new(dir.path()));
    let orchestrator = RoundtableOrchestrator::new(config, runner, Arc::clone(&store))
        .with_scorer(Arc::new(ScriptedScores(scores)));
    Harness {
        orchestrator: Arc::new(orchestrator),
        store,
        _dir: dir,
    }
}

fn defaults() -> DiscussionConfig {
    DiscussionConfig::new()
        .with_max_rounds(5)
        .with_score_threshold(90)
        .with_delta_threshold(5)
}

fn conv(name: &str) -> ConversationId {
    ConversationId::from_string(name)
}

#[tokio::test]
async fn test_zero_scores_run_to_round_limit() {
    let runner = ScriptedRunner::replying("still thinking");
    let h = harness(runner.clone(), vec![0], defaults().with_max_rounds(3));

    let session = h
        .orchestrator
        .run(&conv("c1"), "Pick a queue", DiscussionOverrides::new())
        .await
        .unwrap();

    assert_eq!(session.status, DiscussionStatus::MaxRoundsReached);
    assert_eq!(session.rounds.len(), 3);
    assert_eq!(runner.turn_count(), 9);
    assert!(session.finished_at.is_some());
}

#[tokio::test]
async fn test_threshold_converges_after_first_round() {
    let runner = ScriptedRunner::replying("<VOTE>agree</VOTE>");
    let h = harness(runner.clone(), vec![95], defaults());

    let session = h
        .orchestrator
        .run(&conv("c2"), "Pick a cache", DiscussionOverrides::new())
        .await
        .unwrap();

    assert_eq!(session.status, DiscussionStatus::Converged);
    assert_eq!(session.rounds.len(), 1);
    assert_eq!(runner.prompts_containing("[Round 2"), 0);
    assert_eq!(runner.turn_count(), 3);
}

#[tokio::test]
async fn test_plateau_converges_below_threshold() {
    let runner = ScriptedRunner::replying("an answer");
    let h = harness(runner, vec![70, 73, 99], defaults());

    let session = h
        .orchestrator
        .run(&conv("c3"), "Pick a database", DiscussionOverrides::new())
        .await
        .unwrap();

    assert_eq!(session.status, DiscussionStatus::Converged);
    assert_eq!(session.rounds.len(), 2);
    assert_eq!(session.rounds[1].score, 73);
    assert_eq!(session.rounds[1].delta, Some(3));
}

#[tokio::test]
async fn test_overrides_apply_to_one_discussion() {
    let runner = ScriptedRunner::replying("answer");
    let h = harness(runner, vec![10, 30, 50, 70], defaults());

    let session = h
        .orchestrator
        .run(
            &conv("c4"),
            "Topic",
            DiscussionOverrides::new().with_max_rounds(2),
        )
        .await
        .unwrap();

    assert_eq!(session.config.max_rounds, 2);
    assert_eq!(session.status, DiscussionStatus::MaxRoundsReached);
    assert_eq!(h.orchestrator.config().discussion.max_rounds, 5);
}

#[tokio::test]
async fn test_single_timeout_keeps_discussion_going() {
    let runner = ScriptedRunner::new(|agent, turn| {
        if agent == "Gemini" && turn == 1 {
            Step::Timeout
        } else {
            Step::Reply("a considered answer")
        }
    });
    let h = harness(runner.clone(), vec![40, 80, 95], defaults());

    let session = h
        .orchestrator
        .run(&conv("c5"), "Pick a protocol", DiscussionOverrides::new())
        .await
        .unwrap();

    let first = &session.rounds[0];
    assert_eq!(first.outputs.len(), 3);
    assert_eq!(first.success_count(), 2);
    assert_eq!(
        first.outputs["Gemini"],
        Contribution::Failed {
            kind: FailureKind::Timeout
        }
    );
    assert!(session.rounds.len() >= 2);
    assert_eq!(runner.prompts_containing("[Round 2 - your task]"), 3);
}

#[tokio::test]
async fn test_all_agents_failing_fails_discussion() {
    let runner = ScriptedRunner::new(|agent, _| {
        if agent == "Codex" {
            Step::Crash
        } else {
            Step::Timeout
        }
    });
    let h = harness(runner.clone(), vec![0], defaults());
    let mut events = h.orchestrator.subscribe();

    let session = h
        .orchestrator
        .run(&conv("c6"), "Anything", DiscussionOverrides::new())
        .await
        .unwrap();

    assert_eq!(session.status, DiscussionStatus::Failed);
    assert_eq!(session.rounds.len(), 1);
    assert_eq!(runner.turn_count(), 3);
    let reason = session.failure.as_ref().unwrap().to_string();
    assert!(reason.contains("round 1"));
    assert!(reason.contains("Codex (crash)"));
    assert!(reason.contains("Claude (timeout)"));

    let mut saw_failed = false;
    loop {
        match events.recv().await.unwrap() {
            DiscussionEvent::Failed { .. } => saw_failed = true,
            DiscussionEvent::Finished { status, .. } => {
                assert!(saw_failed);
                assert_eq!(status, DiscussionStatus::Failed);
                break;
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_stop_mid_round_discards_late_results() {
    let runner = ScriptedRunner::new(|agent, _| {
        if agent == "Claude" {
            Step::Reply("quick answer")
        } else {
            Step::Hang
        }
    });
    let h = harness(runner.clone(), vec![50], defaults());
    let id = conv("c7");

    let handle = h
        .orchestrator
        .start(&id, "Long topic", DiscussionOverrides::new())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.orchestrator.is_active(&id));
    assert!(h.orchestrator.stop(&id).await);

    let session = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(session.status, DiscussionStatus::Stopped);
    assert!(session.rounds.is_empty());
    assert!(session.best.is_none());
    assert!(!h.orchestrator.is_active(&id));
    assert!(*runner.kills.lock().unwrap() >= 1);

    // Only the topic was recorded.
    let state = h.store.load(&id);
    let history = state.recent_history(10);
    assert_eq!(history.len(), 1);
    assert!(history[0].is_user());
}

#[tokio::test]
async fn test_stop_between_rounds_keeps_completed_rounds() {
    let runner = ScriptedRunner::new(|_, turn| {
        if turn == 1 {
            Step::Reply("first pass")
        } else {
            Step::ReplyAfter(Duration::from_secs(3600), "second pass")
        }
    });
    let h = harness(runner, vec![40, 60], defaults());
    let id = conv("c8");
    let mut events = h.orchestrator.subscribe();

    let handle = h
        .orchestrator
        .start(&id, "Topic", DiscussionOverrides::new())
        .unwrap();
    loop {
        if let DiscussionEvent::RoundStarted { round: 2, .. } = events.recv().await.unwrap() {
            break;
        }
    }
    h.orchestrator.stop(&id).await;

    let session = handle.await.unwrap();
    assert_eq!(session.status, DiscussionStatus::Stopped);
    assert_eq!(session.rounds.len(), 1);
    assert_eq!(session.best.as_ref().unwrap().text, "first pass");
}

#[tokio::test]
async fn test_second_discussion_in_conversation_is_rejected() {
    let runner = ScriptedRunner::new(|_, _| Step::Hang);
    let h = harness(runner, vec![0], defaults());
    let id = conv("c9");

    let _handle = h
        .orchestrator
        .start(&id, "First", DiscussionOverrides::new())
        .unwrap();
    let err = h
        .orchestrator
        .run(&id, "Second", DiscussionOverrides::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::DiscussionActive(ref c) if *c == id));

    // Other conversations are unaffected.
    assert!(h
        .orchestrator
        .start(&conv("c9-other"), "Parallel", DiscussionOverrides::new())
        .is_ok());

    h.orchestrator.stop(&id).await;
    h.orchestrator.stop(&conv("c9-other")).await;
}

#[tokio::test]
async fn test_best_contribution_feeds_next_round_and_history() {
    let runner = ScriptedRunner::new(|agent, turn| match (agent, turn) {
        ("Codex", 1) => Step::Reply("a long and detailed proposal"),
        _ => Step::Reply("short"),
    });
    let h = harness(runner.clone(), vec![50, 95], defaults());
    let id = conv("c10");

    let session = h
        .orchestrator
        .run(&id, "Design it", DiscussionOverrides::new())
        .await
        .unwrap();

    assert_eq!(session.status, DiscussionStatus::Converged);
    let best = session.best.as_ref().unwrap();
    assert_eq!(best.agent, "Codex");
    assert_eq!(best.round, 1);
    assert_eq!(
        runner.prompts_containing("by Codex (score 28)]\na long and detailed proposal"),
        3
    );

    let state = h.store.load(&id);
    let history = state.recent_history(10);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "Design it");
    assert_eq!(history[1].role, "Codex");
    assert_eq!(h.orchestrator.last_discussion(&id).unwrap().id, session.id);
}

#[tokio::test]
async fn test_ask_records_exchange_and_last_agent() {
    let runner = ScriptedRunner::replying("Use a ring buffer.");
    let h = harness(runner.clone(), vec![0], defaults());
    let id = conv("c11");

    h.orchestrator.ask(&id, "codex", "first question", 2).await.unwrap();
    let output = h
        .orchestrator
        .ask(&id, "Codex", "second question", 0)
        .await
        .unwrap();
    assert_eq!(output.text, "Use a ring buffer.");

    let state = h.store.load(&id);
    assert_eq!(state.last_agent.as_deref(), Some("Codex"));
    assert_eq!(state.recent_history(10).len(), 4);

    // A limit of 0 is clamped to 1: only the previous reply is included.
    let prompts = runner.prompts.lock().unwrap();
    let (_, second) = &prompts[1];
    assert!(second.contains("[Recent conversation history]:\nCodex: Use a ring buffer.\n"));
    assert!(!second.contains("User: first question"));
    assert!(second.ends_with("User: second question"));
}

#[tokio::test]
async fn test_ask_unknown_agent() {
    let h = harness(ScriptedRunner::replying("x"), vec![0], defaults());
    let err = h
        .orchestrator
        .ask(&conv("c12"), "Nobody", "hello", 2)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownAgent(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_discussion_record_visible_while_finishing() {
    let runner = ScriptedRunner::replying("answer");
    let h = harness(runner, vec![10, 30, 95], defaults());
    let id = conv("c13");
    let mut events = h.orchestrator.subscribe();

    let handle = h
        .orchestrator
        .start(&id, "Topic", DiscussionOverrides::new())
        .unwrap();
    let watcher = {
        let orchestrator = Arc::clone(&h.orchestrator);
        let id = id.clone();
        tokio::spawn(async move {
            let mut gaps = 0u32;
            loop {
                let running = orchestrator.is_active(&id);
                if orchestrator.discussion(&id).is_none() {
                    gaps += 1;
                }
                if !running {
                    return gaps;
                }
                tokio::task::yield_now().await;
            }
        })
    };

    loop {
        if let DiscussionEvent::Finished { .. } = events.recv().await.unwrap() {
            let record = h.orchestrator.discussion(&id).unwrap();
            assert!(record.status.is_terminal());
            break;
        }
    }
    let session = handle.await.unwrap();
    assert_eq!(session.status, DiscussionStatus::Converged);
    assert_eq!(watcher.await.unwrap(), 0);
}
