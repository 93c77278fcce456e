//! Persistence layer for Agora.
//!
//! Conversation state (agent session ids plus bounded history) is cached in
//! memory and written through a debounced flush using atomic file operations
//! (write to temp file, then rename).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use agora_models::{ConversationId, HistoryEntry};
//! use agora_persistence::SessionStore;
//!
//! # async fn example() -> agora_persistence::Result<()> {
//! let store = Arc::new(SessionStore::new("/home/user/.agora/state"));
//! let flusher = store.start_flusher();
//!
//! let id = ConversationId::from_string("chat-42");
//! store.update(&id, |state| state.push_history(HistoryEntry::user("hello"), 20));
//!
//! // On clean exit
//! flusher.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod atomic;
pub mod error;
pub mod session_store;

pub use error::{PersistenceError, Result};
pub use session_store::{FlushHandle, SessionStore, DEFAULT_DEBOUNCE};
