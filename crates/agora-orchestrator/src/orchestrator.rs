//! The roundtable orchestrator.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use agora_core::{AgoraConfig, DiscussionOverrides};
use agora_models::{ConversationId, DiscussionId, HistoryEntry, USER_ROLE};
use agora_persistence::SessionStore;
use agora_runner::{FailureKind, TurnOutput, TurnRunner};

use crate::discussion::{
    BestContribution, Contribution, DiscussionSession, DiscussionStatus, FailureReason, RoundRecord,
};
use crate::error::{OrchestratorError, Result};
use crate::event::DiscussionEvent;
use crate::prompts;
use crate::scorer::{decide, ConvergenceScorer, MarkerScorer, RoundVerdict};

/// History entries passed to a single-agent question by default.
pub const DEFAULT_ASK_HISTORY: usize = 2;
/// Upper bound for the history passed to a single-agent question.
pub const MAX_ASK_HISTORY: usize = 20;

const EVENT_CAPACITY: usize = 256;

struct ActiveDiscussion {
    id: DiscussionId,
    stop_tx: watch::Sender<bool>,
    snapshot: DiscussionSession,
}

enum RoundOutcome {
    Completed(BTreeMap<String, Contribution>),
    Stopped,
}

/// Resolves once a stop has been requested.
pub(crate) async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Drives roundtable discussions.
///
/// One discussion may run per conversation at a time. Discussions in
/// different conversations are independent and run concurrently.
pub struct RoundtableOrchestrator {
    config: Arc<AgoraConfig>,
    runner: Arc<dyn TurnRunner>,
    store: Arc<SessionStore>,
    scorer: Arc<dyn ConvergenceScorer>,
    active: Mutex<HashMap<ConversationId, ActiveDiscussion>>,
    /// Last finished discussion per conversation, for export.
    finished: Mutex<HashMap<ConversationId, DiscussionSession>>,
    event_tx: broadcast::Sender<DiscussionEvent>,
}

impl RoundtableOrchestrator {
    /// Creates an orchestrator with the rule-based [`MarkerScorer`].
    pub fn new(config: Arc<AgoraConfig>, runner: Arc<dyn TurnRunner>, store: Arc<SessionStore>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            runner,
            store,
            scorer: Arc::new(MarkerScorer::new()),
            active: Mutex::new(HashMap::new()),
            finished: Mutex::new(HashMap::new()),
            event_tx,
        }
    }

    /// Replaces the scorer.
    pub fn with_scorer(mut self, scorer: Arc<dyn ConvergenceScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AgoraConfig {
        &self.config
    }

    /// Subscribe to discussion events.
    pub fn subscribe(&self) -> broadcast::Receiver<DiscussionEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: DiscussionEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<ConversationId, ActiveDiscussion>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_finished(&self) -> MutexGuard<'_, HashMap<ConversationId, DiscussionSession>> {
        self.finished.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether the conversation has a running discussion.
    pub fn is_active(&self, conversation: &ConversationId) -> bool {
        self.lock_active().contains_key(conversation)
    }

    /// Current state of a running discussion, or the last finished one.
    pub fn discussion(&self, conversation: &ConversationId) -> Option<DiscussionSession> {
        if let Some(active) = self.lock_active().get(conversation) {
            return Some(active.snapshot.clone());
        }
        self.lock_finished().get(conversation).cloned()
    }

    /// Last finished discussion of a conversation.
    pub fn last_discussion(&self, conversation: &ConversationId) -> Option<DiscussionSession> {
        self.lock_finished().get(conversation).cloned()
    }

    /// Requests a stop. In-flight turns are killed and their results discarded.
    ///
    /// Returns `false` if no discussion is running.
    pub async fn stop(&self, conversation: &ConversationId) -> bool {
        let signalled = match self.lock_active().get(conversation) {
            Some(active) => {
                info!(conversation = %conversation, discussion = %active.id, "stop requested");
                let _ = active.stop_tx.send(true);
                true
            }
            None => false,
        };
        if signalled {
            let killed = self.runner.kill(conversation, None).await;
            debug!(conversation = %conversation, killed, "killed in-flight turns");
        }
        signalled
    }

    fn register(
        &self,
        conversation: &ConversationId,
        topic: &str,
        overrides: &DiscussionOverrides,
    ) -> Result<(DiscussionSession, watch::Receiver<bool>)> {
        let participants: Vec<String> = self
            .config
            .agents
            .names()
            .into_iter()
            .map(String::from)
            .collect();
        if participants.is_empty() {
            return Err(OrchestratorError::NoAgents);
        }

        let mut active = self.lock_active();
        if active.contains_key(conversation) {
            return Err(OrchestratorError::DiscussionActive(conversation.clone()));
        }
        let config = self.config.discussion.apply(overrides);
        let session = DiscussionSession::new(conversation.clone(), topic, participants, config);
        let (stop_tx, stop_rx) = watch::channel(false);
        active.insert(
            conversation.clone(),
            ActiveDiscussion {
                id: session.id.clone(),
                stop_tx,
                snapshot: session.clone(),
            },
        );
        Ok((session, stop_rx))
    }

    /// Runs a discussion to completion.
    ///
    /// Fails only if the request is refused; a discussion that ends badly
    /// returns with status `Failed` or `Stopped`.
    pub async fn run(
        &self,
        conversation: &ConversationId,
        topic: &str,
        overrides: DiscussionOverrides,
    ) -> Result<DiscussionSession> {
        let (session, stop_rx) = self.register(conversation, topic, &overrides)?;
        Ok(self.drive(session, stop_rx).await)
    }

    /// Starts a discussion in the background.
    ///
    /// The conversation is registered before this returns, so a second
    /// `start` for it fails immediately.
    pub fn start(
        self: &Arc<Self>,
        conversation: &ConversationId,
        topic: &str,
        overrides: DiscussionOverrides,
    ) -> Result<JoinHandle<DiscussionSession>> {
        let (session, stop_rx) = self.register(conversation, topic, &overrides)?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.drive(session, stop_rx).await }))
    }

    async fn drive(
        &self,
        mut session: DiscussionSession,
        mut stop_rx: watch::Receiver<bool>,
    ) -> DiscussionSession {
        let conversation = session.conversation.clone();
        info!(
            conversation = %conversation,
            discussion = %session.id,
            max_rounds = session.config.max_rounds,
            score_threshold = session.config.score_threshold,
            "discussion started"
        );

        let entry = HistoryEntry::new(USER_ROLE, &session.topic, self.config.entry_chars);
        let cap = self.config.history_cap;
        self.store
            .update(&conversation, |state| state.push_history(entry, cap));

        self.emit(DiscussionEvent::Started {
            conversation: conversation.clone(),
            discussion: session.id.clone(),
            topic: session.topic.clone(),
            participants: session.participants.clone(),
            config: session.config,
        });

        let mut previous_best: Option<BestContribution> = None;
        loop {
            if *stop_rx.borrow() {
                session.finish(DiscussionStatus::Stopped);
                break;
            }

            let round = session.rounds_completed() + 1;
            self.emit(DiscussionEvent::RoundStarted {
                conversation: conversation.clone(),
                round,
            });

            let outputs = match self
                .run_round(&session, round, previous_best.as_ref(), &mut stop_rx)
                .await
            {
                RoundOutcome::Completed(outputs) => outputs,
                RoundOutcome::Stopped => {
                    info!(conversation = %conversation, round, "discussion stopped mid-round");
                    session.finish(DiscussionStatus::Stopped);
                    break;
                }
            };

            let successes = outputs.values().filter(|c| c.is_success()).count();
            if successes == 0 {
                let record = RoundRecord {
                    round,
                    outputs,
                    score: 0,
                    delta: session.last_score().map(|p| -i16::from(p)),
                };
                let reason = FailureReason::AllAgentsFailed {
                    round,
                    agents: record.failures(),
                };
                warn!(conversation = %conversation, round, reason = %reason, "round failed");
                session.push_round(record.clone());
                self.emit(DiscussionEvent::RoundCompleted {
                    conversation: conversation.clone(),
                    record,
                });
                self.emit(DiscussionEvent::Failed {
                    conversation: conversation.clone(),
                    reason: reason.clone(),
                });
                session.failure = Some(reason);
                session.finish(DiscussionStatus::Failed);
                break;
            }

            let score = self.scorer.score(&outputs, &session.rounds);
            let previous = session.last_score();
            let record = RoundRecord {
                round,
                outputs,
                score,
                delta: previous.map(|p| i16::from(score) - i16::from(p)),
            };
            let round_best = record.best(&session.participants);
            session.push_round(record.clone());
            info!(
                conversation = %conversation,
                round,
                score,
                delta = ?record.delta,
                successes,
                "round completed"
            );
            self.emit(DiscussionEvent::RoundCompleted {
                conversation: conversation.clone(),
                record,
            });
            self.update_snapshot(&session);

            if *stop_rx.borrow() {
                session.finish(DiscussionStatus::Stopped);
                break;
            }
            match decide(&session.config, round, score, previous) {
                RoundVerdict::Continue => previous_best = round_best,
                RoundVerdict::Converged | RoundVerdict::Plateau => {
                    session.finish(DiscussionStatus::Converged);
                    break;
                }
                RoundVerdict::MaxRounds => {
                    session.finish(DiscussionStatus::MaxRoundsReached);
                    break;
                }
            }
        }

        self.complete(&session);
        session
    }

    async fn run_round(
        &self,
        session: &DiscussionSession,
        round: u32,
        previous_best: Option<&BestContribution>,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> RoundOutcome {
        let conversation = &session.conversation;
        let mut agents = Vec::new();
        let mut handles = Vec::new();
        let mut aborts = Vec::new();

        for name in &session.participants {
            let Some(def) = self.config.agents.get(name) else {
                continue;
            };
            let prompt = prompts::round_prompt(&def, &session.topic, round, previous_best);
            let runner = Arc::clone(&self.runner);
            let conv = conversation.clone();
            let agent = name.clone();
            let cancel = stop_rx.clone();
            let handle = tokio::spawn(async move {
                runner.run_turn(&conv, &agent, &prompt, cancel).await
            });
            aborts.push(handle.abort_handle());
            handles.push(handle);
            agents.push(name.clone());
        }
        debug!(conversation = %conversation, round, agents = agents.len(), "round dispatched");

        let results = tokio::select! {
            biased;
            _ = stop_requested(stop_rx) => {
                for abort in &aborts {
                    abort.abort();
                }
                let killed = self.runner.kill(conversation, None).await;
                debug!(conversation = %conversation, round, killed, "abandoned in-flight turns");
                return RoundOutcome::Stopped;
            }
            results = join_all(handles) => results,
        };

        let mut outputs = BTreeMap::new();
        for (agent, joined) in agents.into_iter().zip(results) {
            let contribution = match joined {
                Ok(Ok(turn)) => self.contribution(&agent, turn),
                Ok(Err(e)) => {
                    warn!(conversation = %conversation, agent = %agent, round, error = %e, "agent turn failed");
                    Contribution::Failed { kind: e.kind() }
                }
                Err(e) => {
                    warn!(conversation = %conversation, agent = %agent, round, error = %e, "agent task aborted");
                    Contribution::Failed {
                        kind: FailureKind::Crash,
                    }
                }
            };
            outputs.insert(agent, contribution);
        }
        RoundOutcome::Completed(outputs)
    }

    fn contribution(&self, agent: &str, turn: TurnOutput) -> Contribution {
        let score = self.scorer.contribution_score(agent, &turn.text);
        Contribution::Response {
            text: turn.text,
            score,
        }
    }

    fn update_snapshot(&self, session: &DiscussionSession) {
        if let Some(active) = self.lock_active().get_mut(&session.conversation) {
            if active.id == session.id {
                active.snapshot = session.clone();
            }
        }
    }

    fn complete(&self, session: &DiscussionSession) {
        let conversation = &session.conversation;

        if let Some(best) = &session.best {
            let entry = HistoryEntry::new(best.agent.clone(), &best.text, self.config.entry_chars);
            let cap = self.config.history_cap;
            self.store
                .update(conversation, |state| state.push_history(entry, cap));
        }

        // Finished first: `discussion()` must always find one of the two.
        self.lock_finished()
            .insert(conversation.clone(), session.clone());
        self.lock_active().remove(conversation);

        info!(
            conversation = %conversation,
            discussion = %session.id,
            status = %session.status,
            rounds = session.rounds_completed(),
            "discussion finished"
        );
        self.emit(DiscussionEvent::Finished {
            conversation: conversation.clone(),
            status: session.status,
            best: session.best.clone(),
            history: session.rounds.clone(),
        });
    }

    /// Asks one agent directly, with the last `history_limit` messages as context.
    ///
    /// The limit is clamped to 1–20. The question and reply are recorded in
    /// the conversation history and the agent becomes the last active agent.
    pub async fn ask(
        &self,
        conversation: &ConversationId,
        agent: &str,
        question: &str,
        history_limit: usize,
    ) -> Result<TurnOutput> {
        let def = self
            .config
            .agents
            .get(agent)
            .ok_or_else(|| OrchestratorError::UnknownAgent(agent.to_string()))?;
        let limit = history_limit.clamp(1, MAX_ASK_HISTORY);
        let cap = self.config.history_cap;
        let chars = self.config.entry_chars;

        let history: Vec<HistoryEntry> = self
            .store
            .load(conversation)
            .recent_history(limit)
            .into_iter()
            .cloned()
            .collect();
        let entry = HistoryEntry::new(USER_ROLE, question, chars);
        self.store
            .update(conversation, |state| state.push_history(entry, cap));

        let prompt = prompts::ask_prompt(&def, &history, question);
        let (_cancel_tx, cancel) = watch::channel(false);
        let output = self.runner.run_turn(conversation, &def.name, &prompt, cancel).await?;

        let reply = HistoryEntry::new(def.name.clone(), &output.display, chars);
        let name = def.name.clone();
        self.store.update(conversation, |state| {
            state.push_history(reply, cap);
            state.set_last_agent(name);
        });
        Ok(output)
    }
}
