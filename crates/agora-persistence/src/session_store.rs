//! Debounced store for per-conversation state.
//!
//! Conversations are cached in memory and written as individual JSON records:
//! ```text
//! base_path/
//! └── conversations/
//!     ├── -100123.json
//!     └── chat-42.json
//! ```
//!
//! Mutations only mark a conversation dirty. A background flusher writes dirty
//! records once no mutation has arrived for the debounce window, and a final
//! flush runs at shutdown.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use agora_models::{ConversationId, ConversationState, DEFAULT_HISTORY_CAP};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::atomic::{atomic_write_json, read_json_optional};
use crate::error::{PersistenceError, Result};

/// Default debounce window between the last mutation and a flush.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Default)]
struct Cache {
    states: HashMap<ConversationId, ConversationState>,
    dirty: HashSet<ConversationId>,
}

/// Manages conversation state with debounced persistence.
pub struct SessionStore {
    base_path: PathBuf,
    history_cap: usize,
    debounce: Duration,
    cache: Mutex<Cache>,
    /// One write lock per conversation so two flushes never race on a file.
    write_locks: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
    changed: Notify,
}

impl SessionStore {
    /// Creates a store rooted at `base_path` with default cap and debounce.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            history_cap: DEFAULT_HISTORY_CAP,
            debounce: DEFAULT_DEBOUNCE,
            cache: Mutex::new(Cache::default()),
            write_locks: Mutex::new(HashMap::new()),
            changed: Notify::new(),
        }
    }

    /// Sets the history cap applied on every mutation and load.
    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap;
        self
    }

    /// Sets the debounce window used by the background flusher.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Returns the configured history cap.
    pub fn history_cap(&self) -> usize {
        self.history_cap
    }

    /// Returns the directory holding conversation records.
    pub fn conversations_dir(&self) -> PathBuf {
        self.base_path.join("conversations")
    }

    fn record_path(&self, id: &ConversationId) -> PathBuf {
        self.conversations_dir()
            .join(format!("{}.json", id.file_stem()))
    }

    fn lock_cache(&self) -> MutexGuard<'_, Cache> {
        // A panic while holding the lock leaves plain data behind; keep serving it.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reads a record from disk, falling back to an empty state.
    ///
    /// Damaged or unreadable records are logged and replaced: losing history
    /// is recoverable, refusing to serve the conversation is not.
    fn read_or_default(&self, id: &ConversationId) -> ConversationState {
        let path = self.record_path(id);
        match read_json_optional::<ConversationState>(&path) {
            Ok(Some(mut state)) => {
                state.id = id.clone();
                state.enforce_cap(self.history_cap);
                debug!(conversation = %id, sessions = state.sessions.len(), history = state.history.len(), "loaded conversation");
                state
            }
            Ok(None) => ConversationState::new(id.clone()),
            Err(PersistenceError::Corrupt { path, source }) => {
                warn!(conversation = %id, path = %path.display(), error = %source, "corrupt conversation record, starting empty");
                ConversationState::new(id.clone())
            }
            Err(e) => {
                warn!(conversation = %id, error = %e, "failed to read conversation record, starting empty");
                ConversationState::new(id.clone())
            }
        }
    }

    fn cached<'a>(&self, cache: &'a mut Cache, id: &ConversationId) -> &'a mut ConversationState {
        cache
            .states
            .entry(id.clone())
            .or_insert_with(|| self.read_or_default(id))
    }

    /// Returns a snapshot of the conversation, loading it on first access.
    ///
    /// Never fails: missing or corrupt records yield an empty state.
    pub fn load(&self, id: &ConversationId) -> ConversationState {
        let mut cache = self.lock_cache();
        self.cached(&mut cache, id).clone()
    }

    /// Applies `mutator` to the conversation and marks it dirty.
    ///
    /// The history cap is enforced after the mutation, so no code path can
    /// grow a stored history past it.
    pub fn update<F, R>(&self, id: &ConversationId, mutator: F) -> R
    where
        F: FnOnce(&mut ConversationState) -> R,
    {
        let result = {
            let mut cache = self.lock_cache();
            let cap = self.history_cap;
            let state = self.cached(&mut cache, id);
            let result = mutator(state);
            state.enforce_cap(cap);
            cache.dirty.insert(id.clone());
            result
        };
        self.changed.notify_one();
        result
    }

    /// Whether any conversation has unsaved changes.
    pub fn has_dirty(&self) -> bool {
        !self.lock_cache().dirty.is_empty()
    }

    fn write_lock(&self, id: &ConversationId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .write_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(id.clone()).or_default())
    }

    /// Writes every dirty conversation to disk.
    ///
    /// Returns the number of records written. A record that fails to write is
    /// marked dirty again and retried on the next flush.
    pub async fn flush_if_dirty(&self) -> Result<usize> {
        let dirty: Vec<ConversationId> = {
            let mut cache = self.lock_cache();
            cache.dirty.drain().collect()
        };
        if dirty.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        let mut first_error = None;
        for id in dirty {
            let lock = self.write_lock(&id);
            let _guard = lock.lock().await;

            // Snapshot under the write lock so the newest state is what lands.
            let snapshot = self.lock_cache().states.get(&id).cloned();
            let Some(state) = snapshot else { continue };

            let path = self.record_path(&id);
            let outcome = tokio::task::spawn_blocking(move || atomic_write_json(&path, &state))
                .await
                .unwrap_or_else(|e| Err(PersistenceError::WriteTask(e.to_string())));
            match outcome {
                Ok(()) => written += 1,
                Err(e) => {
                    error!(conversation = %id, error = %e, "failed to persist conversation");
                    self.lock_cache().dirty.insert(id);
                    first_error.get_or_insert(e);
                }
            }
        }

        debug!(written, "flushed conversation state");
        match first_error {
            Some(e) if written == 0 => Err(e),
            _ => Ok(written),
        }
    }

    /// Lists conversation ids known in memory or on disk.
    pub fn conversation_ids(&self) -> Vec<ConversationId> {
        let mut ids: HashSet<ConversationId> = self.lock_cache().states.keys().cloned().collect();
        if let Ok(entries) = fs::read_dir(self.conversations_dir()) {
            for entry in entries.flatten() {
                let path = entry.path();
                if let Some(stem) = json_stem(&path) {
                    ids.insert(ConversationId::from_string(stem));
                }
            }
        }
        let mut ids: Vec<ConversationId> = ids.into_iter().collect();
        ids.sort();
        ids
    }

    /// Starts the background debounce flusher.
    pub fn start_flusher(self: &Arc<Self>) -> FlushHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let store = Arc::clone(self);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = store.changed.notified() => {}
                    _ = shutdown_rx.changed() => break,
                }

                // Wait for a quiet period; each new mutation restarts the window.
                let mut shutting_down = false;
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(store.debounce) => break,
                        _ = store.changed.notified() => continue,
                        _ = shutdown_rx.changed() => {
                            shutting_down = true;
                            break;
                        }
                    }
                }

                if let Err(e) = store.flush_if_dirty().await {
                    warn!(error = %e, "debounced flush failed");
                }
                if shutting_down {
                    break;
                }
            }
            debug!("session store flusher stopped");
        });

        FlushHandle {
            store: Arc::clone(self),
            shutdown_tx,
            handle: Some(handle),
        }
    }
}

fn json_stem(path: &Path) -> Option<String> {
    if path.extension().is_some_and(|ext| ext == "json") {
        path.file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
    } else {
        None
    }
}

/// Handle to the background flusher.
///
/// Call [`FlushHandle::shutdown`] on clean exit; it stops the task and flushes
/// whatever is still dirty.
pub struct FlushHandle {
    store: Arc<SessionStore>,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl FlushHandle {
    /// Stops the flusher and persists all remaining dirty state.
    pub async fn shutdown(mut self) -> Result<usize> {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "flusher task ended abnormally");
            }
        }
        let written = self.store.flush_if_dirty().await?;
        info!(written, "session store shut down");
        Ok(written)
    }
}

impl Drop for FlushHandle {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.shutdown_tx.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_models::{AgentSession, HistoryEntry};
    use tempfile::tempdir;

    fn conv(id: &str) -> ConversationId {
        ConversationId::from_string(id)
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        let state = store.load(&conv("chat-1"));
        assert_eq!(state.id, conv("chat-1"));
        assert!(state.sessions.is_empty());
        assert!(state.history.is_empty());
        assert!(!store.has_dirty());
    }

    #[tokio::test]
    async fn test_roundtrip_across_instances() {
        let dir = tempdir().unwrap();
        let id = conv("chat-1");

        let store = SessionStore::new(dir.path());
        store.update(&id, |s| {
            s.set_session(AgentSession::with_session_id("Claude", "uuid-1"));
            s.set_session(AgentSession::with_session_id("Codex", "codex-9"));
            s.push_history(HistoryEntry::user("hello"), 20);
            s.push_history(HistoryEntry::agent("Claude", "hi there"), 20);
            s.set_last_agent("Claude");
        });
        assert_eq!(store.flush_if_dirty().await.unwrap(), 1);
        let before = store.load(&id);

        let reloaded = SessionStore::new(dir.path()).load(&id);
        assert_eq!(reloaded.session_ids(), before.session_ids());
        assert_eq!(reloaded.history, before.history);
        assert_eq!(reloaded.last_agent.as_deref(), Some("Claude"));
    }

    #[test]
    fn test_update_enforces_cap() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path()).with_history_cap(3);
        let id = conv("chat-1");

        for i in 0..10 {
            let len = store.update(&id, |s| {
                s.history.push_back(HistoryEntry::user(&i.to_string()));
                s.history.len()
            });
            assert!(len <= 4);
            assert!(store.load(&id).history.len() <= 3);
        }
        let state = store.load(&id);
        assert_eq!(state.history.front().unwrap().content, "7");
    }

    #[tokio::test]
    async fn test_corrupt_record_resets_to_empty() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let id = conv("chat-bad");
        fs::create_dir_all(store.conversations_dir()).unwrap();
        fs::write(store.record_path(&id), "{ definitely not json").unwrap();

        let state = store.load(&id);
        assert!(state.history.is_empty());

        // The store keeps working and overwrites the damaged record.
        store.update(&id, |s| s.push_history(HistoryEntry::user("fresh"), 20));
        store.flush_if_dirty().await.unwrap();
        let reloaded = SessionStore::new(dir.path()).load(&id);
        assert_eq!(reloaded.history.len(), 1);
    }

    #[tokio::test]
    async fn test_flush_only_writes_dirty() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        store.load(&conv("a"));
        store.update(&conv("b"), |s| s.set_last_agent("Codex"));

        assert_eq!(store.flush_if_dirty().await.unwrap(), 1);
        assert_eq!(store.flush_if_dirty().await.unwrap(), 0);
        assert!(!store.record_path(&conv("a")).exists());
        assert!(store.record_path(&conv("b")).exists());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_flush_writes_off_the_runtime_thread() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        for i in 0..5 {
            store.update(&conv(&format!("chat-{}", i)), |s| s.set_last_agent("Claude"));
        }

        // The ticker only runs while the flush yields to the runtime.
        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            })
        };

        assert_eq!(store.flush_if_dirty().await.unwrap(), 5);
        assert!(ticks.load(std::sync::atomic::Ordering::SeqCst) > 0);
        ticker.abort();
    }

    #[tokio::test]
    async fn test_concurrent_flushes_leave_valid_record() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SessionStore::new(dir.path()));
        let id = conv("chat-1");

        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                store.update(&id, |s| s.push_history(HistoryEntry::user(&i.to_string()), 20));
                store.flush_if_dirty().await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        store.flush_if_dirty().await.unwrap();

        let reloaded = SessionStore::new(dir.path()).load(&id);
        assert_eq!(reloaded.history.len(), 8);
    }

    #[tokio::test]
    async fn test_flusher_debounces_and_flushes_on_shutdown() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            SessionStore::new(dir.path()).with_debounce(Duration::from_millis(30)),
        );
        let flusher = store.start_flusher();
        let id = conv("chat-1");

        store.update(&id, |s| s.set_last_agent("Claude"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.record_path(&id).exists());
        assert!(!store.has_dirty());

        store.update(&id, |s| s.set_last_agent("Gemini"));
        flusher.shutdown().await.unwrap();

        let reloaded = SessionStore::new(dir.path()).load(&id);
        assert_eq!(reloaded.last_agent.as_deref(), Some("Gemini"));
    }

    #[test]
    fn test_conversation_ids_lists_disk_and_memory() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        fs::create_dir_all(store.conversations_dir()).unwrap();
        fs::write(store.conversations_dir().join("disk-only.json"), "{}").unwrap();
        store.load(&conv("memory-only"));

        let ids = store.conversation_ids();
        assert_eq!(ids, vec![conv("disk-only"), conv("memory-only")]);
    }
}
