//! Agent session bookkeeping and turn execution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use agora_core::{AgentDefinition, AgoraConfig, OutputStream, SessionIdSource};
use agora_models::{AgentSession, ConversationId};
use agora_persistence::SessionStore;

use crate::error::{Result, RunnerError};
use crate::output::{clean_output, extract_file_writes, extract_session_id, is_session_invalid};
use crate::process::{run_process, signalled, ProcessFailure, ProcessOutput, ProcessSpec, TurnLimits};
use crate::traits::{TurnOutput, TurnRunner};

/// Timeout for an agent's session listing command.
const LIST_SESSIONS_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest error message carried in a crash error.
const MAX_ERROR_CHARS: usize = 500;

type TurnKey = (ConversationId, String);

/// Runs agent turns and owns the agent sessions of every conversation.
///
/// Turns for the same (conversation, agent) pair are serialized; turns for
/// different pairs run in parallel.
pub struct AgentRunner {
    config: Arc<AgoraConfig>,
    store: Arc<SessionStore>,
    /// Kill switches for in-flight turns.
    active: Mutex<HashMap<TurnKey, watch::Sender<bool>>>,
    turn_locks: Mutex<HashMap<TurnKey, Arc<tokio::sync::Mutex<()>>>>,
}

/// Removes a turn from the registry when the turn ends or is dropped.
///
/// A create turn dropped before its process settled may have registered
/// the session id on the agent side, so the session is marked `Crashed`
/// and the next turn starts over with a fresh id.
struct ActiveTurn<'a> {
    runner: &'a AgentRunner,
    key: TurnKey,
    creating: bool,
    settled: bool,
}

impl Drop for ActiveTurn<'_> {
    fn drop(&mut self) {
        self.runner.lock_active().remove(&self.key);
        if self.creating && !self.settled {
            let (conversation, agent) = &self.key;
            self.runner.mark_crashed(conversation, agent);
            warn!(
                conversation = %conversation,
                agent = %agent,
                "create turn abandoned, session will be recreated"
            );
        }
    }
}

fn truncate_message(message: &str) -> String {
    let trimmed = message.trim();
    match trimmed.char_indices().nth(MAX_ERROR_CHARS) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

impl AgentRunner {
    /// Creates a runner over `store` using `config`'s agents and timeouts.
    pub fn new(config: Arc<AgoraConfig>, store: Arc<SessionStore>) -> Self {
        Self {
            config,
            store,
            active: Mutex::new(HashMap::new()),
            turn_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AgoraConfig {
        &self.config
    }

    /// Returns the session store.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    fn definition(&self, agent: &str) -> Result<Arc<AgentDefinition>> {
        self.config
            .agents
            .get(agent)
            .ok_or_else(|| RunnerError::UnknownAgent(agent.to_string()))
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<TurnKey, watch::Sender<bool>>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn turn_lock(&self, key: &TurnKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .turn_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(key.clone()).or_default().clone()
    }

    fn session_expiry(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.timeouts.session_expiry)
            .unwrap_or_else(|_| chrono::Duration::days(1))
    }

    /// Returns a usable session for the agent, replacing expired or crashed ones.
    ///
    /// A replacement starts `Uninitialized`: the agent-side session is
    /// created by the next turn's create command, which also carries the
    /// first prompt. Agents that need a caller-generated id get a fresh UUID
    /// here, so ids are never shared between conversations.
    pub fn ensure_session(&self, conversation: &ConversationId, agent: &str) -> Result<AgentSession> {
        let def = self.definition(agent)?;
        let expiry = self.session_expiry();

        let current = self.store.load(conversation).session(&def.name).cloned();
        let mut session = match current {
            Some(mut session) => {
                if session.expire_if_idle(expiry, Utc::now()) {
                    info!(
                        conversation = %conversation,
                        agent = %def.name,
                        idle_secs = session.idle_seconds(),
                        "agent session expired"
                    );
                }
                session
            }
            None => AgentSession::new(def.name.clone()),
        };

        let replace = session.state.needs_replacement()
            || (session.is_first_turn() && def.needs_uuid && session.session_id.is_none());
        if replace {
            session = if def.needs_uuid {
                AgentSession::with_session_id(def.name.clone(), Uuid::new_v4().to_string())
            } else {
                AgentSession::new(def.name.clone())
            };
            debug!(conversation = %conversation, agent = %def.name, "prepared new agent session");
        }

        let stored = session.clone();
        self.store.update(conversation, move |state| {
            if state.session(&stored.agent) != Some(&stored) {
                state.set_session(stored);
            }
        });
        Ok(session)
    }

    fn update_session(
        &self,
        conversation: &ConversationId,
        agent: &str,
        mutate: impl FnOnce(&mut AgentSession),
    ) {
        self.store.update(conversation, |state| {
            if let Some(mut session) = state.session(agent).cloned() {
                mutate(&mut session);
                state.set_session(session);
            }
        });
    }

    fn mark_crashed(&self, conversation: &ConversationId, agent: &str) {
        self.update_session(conversation, agent, AgentSession::mark_crashed);
    }

    /// Runs one turn with the configured timeouts.
    pub async fn run_turn(
        &self,
        conversation: &ConversationId,
        agent: &str,
        prompt: &str,
        cancel: watch::Receiver<bool>,
    ) -> Result<TurnOutput> {
        let limits = TurnLimits::new(self.config.timeouts.idle, self.config.timeouts.total);
        self.run_turn_with(conversation, agent, prompt, limits, cancel).await
    }

    /// Runs one turn with explicit limits.
    ///
    /// Failures on the create turn leave the session `Crashed` so the next
    /// turn starts over. Crashes and invalid-session reports on a resume
    /// turn do the same. Timeouts on a resume turn keep the session.
    pub async fn run_turn_with(
        &self,
        conversation: &ConversationId,
        agent: &str,
        prompt: &str,
        limits: TurnLimits,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<TurnOutput> {
        let def = self.definition(agent)?;
        let key: TurnKey = (conversation.clone(), def.name.clone());

        let lock = self.turn_lock(&key);
        let _turn_guard = tokio::select! {
            guard = lock.lock() => guard,
            _ = signalled(&mut cancel) => return Err(RunnerError::Cancelled(def.name.clone())),
        };

        let session = self.ensure_session(conversation, &def.name)?;
        let resume_id = if session.is_first_turn() {
            None
        } else {
            session.session_id.clone()
        };
        let creating = resume_id.is_none();

        let mut argv = match &resume_id {
            Some(id) => def.resume_args(id),
            None => def.create_args(session.session_id.as_deref()),
        };
        argv.push(prompt.to_string());

        let spec = ProcessSpec::from_argv(&argv)
            .ok_or_else(|| RunnerError::Spawn {
                agent: def.name.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            })?
            .with_cwd(self.config.project_root.clone())
            .with_env(self.config.process_env())
            .with_close_stdin(def.close_stdin);

        info!(
            conversation = %conversation,
            agent = %def.name,
            creating,
            prompt_chars = prompt.chars().count(),
            "running agent turn"
        );

        let (kill_tx, mut kill_rx) = watch::channel(false);
        self.lock_active().insert(key.clone(), kill_tx);
        let mut registration = ActiveTurn {
            runner: self,
            key,
            creating,
            settled: false,
        };

        let started = Instant::now();
        let result = run_process(&spec, limits, &mut cancel, &mut kill_rx).await;
        registration.settled = true;
        drop(registration);

        let output = match result {
            Ok(output) => output,
            Err(failure) => return Err(self.turn_failed(conversation, &def, creating, failure)),
        };

        let text = clean_output(&output.stdout, &output.stderr);

        if !output.success() {
            let raw = if output.stderr.trim().is_empty() {
                text.as_str()
            } else {
                output.stderr.as_str()
            };
            let message = truncate_message(raw);
            self.mark_crashed(conversation, &def.name);
            warn!(
                conversation = %conversation,
                agent = %def.name,
                code = ?output.code,
                "agent process failed"
            );
            return Err(if is_session_invalid(&message) {
                RunnerError::SessionCorrupt {
                    agent: def.name.clone(),
                    message,
                }
            } else {
                RunnerError::ProcessCrash {
                    agent: def.name.clone(),
                    code: output.code,
                    message,
                }
            });
        }

        if text.is_empty() {
            if creating {
                self.mark_crashed(conversation, &def.name);
            }
            warn!(conversation = %conversation, agent = %def.name, "agent returned no output");
            return Err(RunnerError::EmptyOutput(def.name.clone()));
        }

        let session_id = if creating {
            let id = self.resolve_session_id(&def, &session, &output).await;
            match &id {
                Some(id) => {
                    let id = id.clone();
                    self.update_session(conversation, &def.name, move |s| s.activate(Some(id)));
                    info!(conversation = %conversation, agent = %def.name, "agent session created");
                }
                None => {
                    self.mark_crashed(conversation, &def.name);
                    warn!(
                        conversation = %conversation,
                        agent = %def.name,
                        "could not determine session id, session will be recreated"
                    );
                }
            }
            id
        } else {
            self.update_session(conversation, &def.name, |s| s.activate(None));
            resume_id
        };

        let (display, file_writes) = extract_file_writes(&text);
        Ok(TurnOutput {
            agent: def.name.clone(),
            text,
            display,
            file_writes,
            session_id,
            created_session: creating,
            elapsed: started.elapsed(),
        })
    }

    fn turn_failed(
        &self,
        conversation: &ConversationId,
        def: &AgentDefinition,
        creating: bool,
        failure: ProcessFailure,
    ) -> RunnerError {
        let agent = def.name.clone();
        let error = match failure {
            ProcessFailure::Spawn(source) => {
                return RunnerError::Spawn { agent, source };
            }
            ProcessFailure::Io(source) => {
                self.mark_crashed(conversation, &def.name);
                return RunnerError::Io(source);
            }
            ProcessFailure::Timeout { kind, .. } => RunnerError::Timeout { agent, kind },
            ProcessFailure::Cancelled => RunnerError::Cancelled(agent),
        };
        if creating {
            self.mark_crashed(conversation, &def.name);
        }
        warn!(conversation = %conversation, agent = %def.name, error = %error, "agent turn failed");
        error
    }

    async fn resolve_session_id(
        &self,
        def: &AgentDefinition,
        session: &AgentSession,
        output: &ProcessOutput,
    ) -> Option<String> {
        match &def.session_id {
            SessionIdSource::Generated => session.session_id.clone(),
            SessionIdSource::Output { stream, pattern } => {
                let re = Regex::new(pattern).ok()?;
                let text = match stream {
                    OutputStream::Stdout => &output.stdout,
                    OutputStream::Stderr => &output.stderr,
                };
                extract_session_id(&re, text)
            }
            SessionIdSource::ListCommand { command, pattern } => {
                let re = Regex::new(pattern).ok()?;
                let spec = ProcessSpec::from_argv(command)?
                    .with_cwd(self.config.project_root.clone())
                    .with_env(self.config.process_env())
                    .with_close_stdin(true);
                let (_cancel_tx, mut cancel) = watch::channel(false);
                let mut kill = cancel.clone();
                let limits = TurnLimits::new(LIST_SESSIONS_TIMEOUT, LIST_SESSIONS_TIMEOUT);
                match run_process(&spec, limits, &mut cancel, &mut kill).await {
                    Ok(listing) => {
                        let text = if listing.stderr.trim().is_empty() {
                            &listing.stdout
                        } else {
                            &listing.stderr
                        };
                        extract_session_id(&re, text)
                    }
                    Err(failure) => {
                        warn!(agent = %def.name, error = ?failure, "session listing failed");
                        None
                    }
                }
            }
        }
    }

    /// Signals in-flight turns of a conversation to stop. Returns how many were signalled.
    pub fn kill(&self, conversation: &ConversationId, agent: Option<&str>) -> usize {
        let active = self.lock_active();
        let mut killed = 0;
        for ((conv, name), tx) in active.iter() {
            if conv != conversation {
                continue;
            }
            if agent.map_or(true, |a| a.eq_ignore_ascii_case(name)) {
                info!(conversation = %conversation, agent = %name, "killing agent turn");
                let _ = tx.send(true);
                killed += 1;
            }
        }
        killed
    }

    /// Whether any turn of the conversation is running.
    pub fn has_active_turns(&self, conversation: &ConversationId) -> bool {
        self.lock_active().keys().any(|(conv, _)| conv == conversation)
    }

    /// Sessions of a conversation in agent-name order.
    pub fn sessions(&self, conversation: &ConversationId) -> Vec<AgentSession> {
        self.store
            .load(conversation)
            .sessions
            .into_values()
            .collect()
    }

    /// Drops one agent's session, or all sessions when `agent` is `None`.
    pub fn clear_sessions(&self, conversation: &ConversationId, agent: Option<&str>) -> Result<()> {
        let name = match agent {
            Some(agent) => Some(self.definition(agent)?.name.clone()),
            None => None,
        };
        self.store
            .update(conversation, |state| state.clear_sessions(name.as_deref()));
        info!(conversation = %conversation, agent = ?name, "cleared agent sessions");
        Ok(())
    }

    /// Drops all sessions and the history of a conversation.
    pub fn reset_conversation(&self, conversation: &ConversationId) {
        self.store.update(conversation, |state| {
            state.clear_sessions(None);
            state.clear_history();
        });
        info!(conversation = %conversation, "conversation reset");
    }
}

#[async_trait]
impl TurnRunner for AgentRunner {
    async fn run_turn(
        &self,
        conversation: &ConversationId,
        agent: &str,
        prompt: &str,
        cancel: watch::Receiver<bool>,
    ) -> Result<TurnOutput> {
        AgentRunner::run_turn(self, conversation, agent, prompt, cancel).await
    }

    async fn kill(&self, conversation: &ConversationId, agent: Option<&str>) -> usize {
        AgentRunner::kill(self, conversation, agent)
    }
}
