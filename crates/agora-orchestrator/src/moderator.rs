//! The debate moderator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use agora_core::{AgoraConfig, DebateConfig, DebateOverrides};
use agora_models::{ConversationId, DebateId, HistoryEntry, USER_ROLE};
use agora_persistence::SessionStore;
use agora_runner::{RunnerError, TurnRunner};

use crate::debate::{
    parse_verdict, schedule, DebateArgument, DebatePhase, DebateSession, DebateSide, DebateStatus,
    DebateStep,
};
use crate::debate_prompts as prompts;
use crate::error::{OrchestratorError, Result};
use crate::event::DebateEvent;
use crate::orchestrator::stop_requested;

const EVENT_CAPACITY: usize = 256;

/// Stands in for a statement the speaker never delivered.
const NO_STATEMENT: &str = "(no statement: the speaker did not answer)";

struct ActiveDebate {
    id: DebateId,
    stop_tx: watch::Sender<bool>,
    snapshot: DebateSession,
}

enum TurnOutcome {
    Spoke(String),
    Failed(RunnerError),
    Stopped,
}

fn said(session: &DebateSession, side: DebateSide, phase: DebatePhase) -> &str {
    session
        .statement(side, phase)
        .map_or(NO_STATEMENT, |a| a.text.as_str())
}

/// Runs debates: pro against con through the phases of [`schedule`],
/// then a judge scores both sides.
///
/// Turns run one at a time. One debate may run per conversation; debates
/// in different conversations are independent.
pub struct DebateModerator {
    config: Arc<AgoraConfig>,
    runner: Arc<dyn TurnRunner>,
    store: Arc<SessionStore>,
    active: Mutex<HashMap<ConversationId, ActiveDebate>>,
    finished: Mutex<HashMap<ConversationId, DebateSession>>,
    event_tx: broadcast::Sender<DebateEvent>,
}

impl DebateModerator {
    pub fn new(config: Arc<AgoraConfig>, runner: Arc<dyn TurnRunner>, store: Arc<SessionStore>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            runner,
            store,
            active: Mutex::new(HashMap::new()),
            finished: Mutex::new(HashMap::new()),
            event_tx,
        }
    }

    /// Subscribe to debate events.
    pub fn subscribe(&self) -> broadcast::Receiver<DebateEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: DebateEvent) {
        let _ = self.event_tx.send(event);
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<ConversationId, ActiveDebate>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_finished(&self) -> MutexGuard<'_, HashMap<ConversationId, DebateSession>> {
        self.finished.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_active(&self, conversation: &ConversationId) -> bool {
        self.lock_active().contains_key(conversation)
    }

    /// Current state of a running debate, or the last finished one.
    pub fn debate(&self, conversation: &ConversationId) -> Option<DebateSession> {
        if let Some(active) = self.lock_active().get(conversation) {
            return Some(active.snapshot.clone());
        }
        self.lock_finished().get(conversation).cloned()
    }

    pub fn last_debate(&self, conversation: &ConversationId) -> Option<DebateSession> {
        self.lock_finished().get(conversation).cloned()
    }

    /// Requests a stop and kills the speaking agent's process.
    ///
    /// Returns `false` if no debate is running.
    pub async fn stop(&self, conversation: &ConversationId) -> bool {
        let signalled = match self.lock_active().get(conversation) {
            Some(active) => {
                info!(conversation = %conversation, debate = %active.id, "debate stop requested");
                let _ = active.stop_tx.send(true);
                true
            }
            None => false,
        };
        if signalled {
            let killed = self.runner.kill(conversation, None).await;
            debug!(conversation = %conversation, killed, "killed in-flight debate turn");
        }
        signalled
    }

    /// Resolves role names to configured agents.
    fn roles(&self, overrides: &DebateOverrides) -> Result<DebateConfig> {
        let mut roles = self.config.debate.apply(overrides);
        for name in [&mut roles.pro, &mut roles.con, &mut roles.judge] {
            let def = self
                .config
                .agents
                .get(name.as_str())
                .ok_or_else(|| OrchestratorError::UnknownAgent(name.clone()))?;
            *name = def.name.clone();
        }
        if roles.pro == roles.con {
            return Err(OrchestratorError::InvalidRoles(format!(
                "{} cannot argue both sides",
                roles.pro
            )));
        }
        if roles.judge == roles.pro || roles.judge == roles.con {
            warn!(judge = %roles.judge, "debate judge is also a debater");
        }
        Ok(roles)
    }

    fn register(
        &self,
        conversation: &ConversationId,
        topic: &str,
        overrides: &DebateOverrides,
    ) -> Result<(DebateSession, watch::Receiver<bool>)> {
        let roles = self.roles(overrides)?;
        let mut active = self.lock_active();
        if active.contains_key(conversation) {
            return Err(OrchestratorError::DebateActive(conversation.clone()));
        }
        let session = DebateSession::new(conversation.clone(), topic, roles);
        let (stop_tx, stop_rx) = watch::channel(false);
        active.insert(
            conversation.clone(),
            ActiveDebate {
                id: session.id.clone(),
                stop_tx,
                snapshot: session.clone(),
            },
        );
        Ok((session, stop_rx))
    }

    /// Runs a debate to its verdict.
    ///
    /// Fails only if the request is refused; a debate that ends badly
    /// returns with status `Failed` or `Stopped`.
    pub async fn run(
        &self,
        conversation: &ConversationId,
        topic: &str,
        overrides: DebateOverrides,
    ) -> Result<DebateSession> {
        let (session, stop_rx) = self.register(conversation, topic, &overrides)?;
        Ok(self.drive(session, stop_rx).await)
    }

    /// Starts a debate in the background.
    pub fn start(
        self: &Arc<Self>,
        conversation: &ConversationId,
        topic: &str,
        overrides: DebateOverrides,
    ) -> Result<JoinHandle<DebateSession>> {
        let (session, stop_rx) = self.register(conversation, topic, &overrides)?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.drive(session, stop_rx).await }))
    }

    async fn drive(&self, mut session: DebateSession, mut stop_rx: watch::Receiver<bool>) -> DebateSession {
        let conversation = session.conversation.clone();
        info!(
            conversation = %conversation,
            debate = %session.id,
            pro = %session.config.pro,
            con = %session.config.con,
            judge = %session.config.judge,
            "debate started"
        );

        let entry = HistoryEntry::new(USER_ROLE, &session.topic, self.config.entry_chars);
        let cap = self.config.history_cap;
        self.store
            .update(&conversation, |state| state.push_history(entry, cap));

        self.emit(DebateEvent::Started {
            conversation: conversation.clone(),
            debate: session.id.clone(),
            topic: session.topic.clone(),
            config: session.config.clone(),
        });

        let mut current: Option<(DebatePhase, u32)> = None;
        for step in schedule(session.config.free_rounds) {
            if *stop_rx.borrow() {
                session.finish(DebateStatus::Stopped);
                break;
            }
            if step.phase > DebatePhase::Opening && session.arguments.is_empty() {
                warn!(conversation = %conversation, "no opening statements, abandoning debate");
                session.failure = Some("neither side gave an opening statement".to_string());
                session.finish(DebateStatus::Failed);
                break;
            }
            if current != Some((step.phase, step.round)) {
                current = Some((step.phase, step.round));
                self.emit(DebateEvent::PhaseStarted {
                    conversation: conversation.clone(),
                    phase: step.phase,
                    round: step.round,
                });
            }

            let agent = session.agent(step.side).to_string();
            let prompt = self.prompt(&session, step);
            self.emit(DebateEvent::TurnStarted {
                conversation: conversation.clone(),
                agent: agent.clone(),
                step,
            });

            match self.take_turn(&conversation, &agent, &prompt, &mut stop_rx).await {
                TurnOutcome::Spoke(text) => {
                    let argument = DebateArgument::new(agent, step, text);
                    if step.side == DebateSide::Judge {
                        session.verdict = Some(parse_verdict(&argument.text));
                    }
                    session.push_argument(argument.clone());
                    self.emit(DebateEvent::Argument {
                        conversation: conversation.clone(),
                        argument,
                    });
                    self.update_snapshot(&session);
                }
                TurnOutcome::Failed(e) => {
                    warn!(
                        conversation = %conversation,
                        agent = %agent,
                        phase = %step.phase,
                        error = %e,
                        "debate turn failed"
                    );
                    if step.side == DebateSide::Judge {
                        session.failure = Some(format!("judge {} failed: {}", agent, e));
                    }
                    self.emit(DebateEvent::TurnFailed {
                        conversation: conversation.clone(),
                        agent,
                        step,
                        kind: e.kind(),
                    });
                }
                TurnOutcome::Stopped => {
                    info!(conversation = %conversation, phase = %step.phase, "debate stopped mid-turn");
                    session.finish(DebateStatus::Stopped);
                    break;
                }
            }
        }

        if !session.status.is_terminal() {
            if session.verdict.is_some() {
                session.finish(DebateStatus::Judged);
            } else {
                session.finish(DebateStatus::Failed);
            }
        }
        self.complete(&session);
        session
    }

    fn prompt(&self, session: &DebateSession, step: DebateStep) -> String {
        let agent = session.agent(step.side);
        let topic = &session.topic;
        let side = step.side;
        match step.phase {
            DebatePhase::Opening => prompts::opening_prompt(agent, topic, side),
            DebatePhase::CrossExamination => prompts::cross_examination_prompt(
                agent,
                topic,
                side,
                said(session, side.opponent(), DebatePhase::Opening),
            ),
            DebatePhase::Response => prompts::response_prompt(
                agent,
                topic,
                side,
                said(session, side.opponent(), DebatePhase::CrossExamination),
            ),
            DebatePhase::FreeDebate => prompts::free_debate_prompt(
                agent,
                topic,
                side,
                &session.history_before(DebatePhase::Closing),
                step.round,
                session.config.free_rounds,
            ),
            // Both closings see the record up to the closings.
            DebatePhase::Closing => prompts::closing_prompt(
                agent,
                topic,
                side,
                &session.history_before(DebatePhase::Closing),
            ),
            DebatePhase::Judgment => prompts::judgment_prompt(agent, topic, &session.transcript()),
        }
    }

    async fn take_turn(
        &self,
        conversation: &ConversationId,
        agent: &str,
        prompt: &str,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> TurnOutcome {
        let cancel = stop_rx.clone();
        let stopped = stop_rx.clone();
        let turn = self.runner.run_turn(conversation, agent, prompt, cancel);
        tokio::select! {
            biased;
            _ = stop_requested(stop_rx) => {
                let killed = self.runner.kill(conversation, None).await;
                debug!(conversation = %conversation, agent, killed, "abandoned debate turn");
                TurnOutcome::Stopped
            }
            result = turn => match result {
                Ok(output) => TurnOutcome::Spoke(output.text),
                Err(_) if *stopped.borrow() => TurnOutcome::Stopped,
                Err(e) => TurnOutcome::Failed(e),
            },
        }
    }

    fn update_snapshot(&self, session: &DebateSession) {
        if let Some(active) = self.lock_active().get_mut(&session.conversation) {
            if active.id == session.id {
                active.snapshot = session.clone();
            }
        }
    }

    fn complete(&self, session: &DebateSession) {
        let conversation = &session.conversation;

        if let Some(verdict) = &session.verdict {
            let content = format!("{}\n{}", session.summary(), verdict.reasoning);
            let entry = HistoryEntry::new(session.config.judge.clone(), content.trim(), self.config.entry_chars);
            let cap = self.config.history_cap;
            self.store
                .update(conversation, |state| state.push_history(entry, cap));
        }

        self.lock_finished()
            .insert(conversation.clone(), session.clone());
        self.lock_active().remove(conversation);

        info!(
            conversation = %conversation,
            debate = %session.id,
            status = %session.status,
            arguments = session.arguments.len(),
            winner = ?session.verdict.as_ref().map(|v| v.winner),
            "debate finished"
        );
        self.emit(DebateEvent::Finished {
            conversation: conversation.clone(),
            status: session.status,
            verdict: session.verdict.clone(),
        });
    }
}
