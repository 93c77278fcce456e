//! Wiring of configuration, store, runner, orchestrator and moderator.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use agora_core::{paths, AgoraConfig};
use agora_models::ConversationId;
use agora_orchestrator::{DebateModerator, RoundtableOrchestrator};
use agora_persistence::{FlushHandle, SessionStore};
use agora_runner::AgentRunner;

use crate::commands::Result;

/// Everything a command needs.
pub struct App {
    pub config: Arc<AgoraConfig>,
    pub store: Arc<SessionStore>,
    pub runner: Arc<AgentRunner>,
    pub orchestrator: Arc<RoundtableOrchestrator>,
    pub debates: Arc<DebateModerator>,
    pub conversation: ConversationId,
    flusher: FlushHandle,
}

impl App {
    /// Builds the application from the environment.
    ///
    /// Must be called inside a tokio runtime; the background flusher is
    /// spawned here.
    pub fn new(state_dir: Option<PathBuf>, conversation: &str) -> Result<Self> {
        let mut config = AgoraConfig::from_env()?;
        if let Some(dir) = state_dir {
            config = config.with_state_dir(dir);
        } else if let Err(e) = paths::ensure_all_dirs() {
            warn!(error = %e, "could not create agora directories");
        }
        Ok(Self::with_config(config, conversation))
    }

    /// Builds the application from an explicit configuration.
    pub fn with_config(config: AgoraConfig, conversation: &str) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(
            SessionStore::new(&config.state_dir)
                .with_history_cap(config.history_cap)
                .with_debounce(config.flush_debounce),
        );
        let runner = Arc::new(AgentRunner::new(Arc::clone(&config), Arc::clone(&store)));
        let orchestrator = Arc::new(RoundtableOrchestrator::new(
            Arc::clone(&config),
            runner.clone(),
            Arc::clone(&store),
        ));
        let debates = Arc::new(DebateModerator::new(
            Arc::clone(&config),
            runner.clone(),
            Arc::clone(&store),
        ));
        let flusher = store.start_flusher();
        debug!(state_dir = %config.state_dir.display(), conversation, "agora initialized");

        Self {
            config,
            store,
            runner,
            orchestrator,
            debates,
            conversation: ConversationId::from_string(conversation),
            flusher,
        }
    }

    /// Flushes pending state and stops the background flusher.
    pub async fn shutdown(self) -> Result<()> {
        let written = self.flusher.shutdown().await?;
        debug!(written, "final flush");
        Ok(())
    }
}
