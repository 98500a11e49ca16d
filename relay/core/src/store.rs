//! Conversation Store
//!
//! The client's conversations and model choice live behind an injected
//! [`ConversationStore`] rather than a global. Readers take snapshots or
//! subscribe to changes; writers go through [`ConversationStore::modify`],
//! which applies a closure atomically and only notifies (and persists) when
//! the closure reports that it changed something.
//!
//! High-frequency writers (one update per streamed fragment) use
//! [`ConversationStore::modify_transient`] instead, which notifies
//! subscribers but leaves the backing storage alone, and call
//! [`ConversationStore::flush`] once the burst is over. Persisting stores do
//! blocking file IO in `modify` and `flush`; async callers run those on the
//! blocking pool.
//!
//! # Implementations
//!
//! - [`MemoryStore`]: a `tokio::sync::watch` channel
//! - [`JsonFileStore`]: a `MemoryStore` mirrored to a JSON file on every
//!   persisting change and on flush

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::conversation::ConversationCollection;
use crate::request::ModelConfig;

/// Everything the client keeps between sessions
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    /// Conversations and the active index
    #[serde(default)]
    pub conversations: ConversationCollection,
    /// Model selection sent with every request
    #[serde(default)]
    pub models: ModelConfig,
}

/// Errors from loading or persisting the store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("store file {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// The backing file did not hold a valid state
    #[error("store contents invalid: {0}")]
    Format(#[from] serde_json::Error),
}

/// Injected store with get/set/subscribe semantics
pub trait ConversationStore: Send + Sync {
    /// Current state
    fn snapshot(&self) -> StoreState;

    /// Atomically apply `change`
    ///
    /// `change` returns whether it modified the state; subscribers are
    /// notified and the state persisted only when it did. Returns that flag.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisting the changed state failed.
    fn modify(&self, change: &mut dyn FnMut(&mut StoreState) -> bool) -> Result<bool, StoreError>;

    /// Atomically apply `change` without persisting it
    ///
    /// Subscribers are notified as with [`modify`](Self::modify); the change
    /// reaches backing storage with the next persisting write or
    /// [`flush`](Self::flush). Never blocks on IO.
    ///
    /// # Errors
    ///
    /// The default delegates to `modify` and returns its errors.
    fn modify_transient(
        &self,
        change: &mut dyn FnMut(&mut StoreState) -> bool,
    ) -> Result<bool, StoreError> {
        self.modify(change)
    }

    /// Write the current state to backing storage
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisting failed.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Receive every committed state
    fn subscribe(&self) -> watch::Receiver<StoreState>;

    /// Replace the whole state
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if persisting failed.
    fn set(&self, state: StoreState) -> Result<(), StoreError> {
        let mut next = Some(state);
        self.modify(&mut |current| match next.take() {
            Some(state) if state != *current => {
                *current = state;
                true
            }
            _ => false,
        })
        .map(|_| ())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Store backed by a `watch` channel
#[derive(Debug)]
pub struct MemoryStore {
    tx: watch::Sender<StoreState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(StoreState::default())
    }
}

impl MemoryStore {
    /// Create a store holding `state`
    #[must_use]
    pub fn new(state: StoreState) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self { tx }
    }
}

impl ConversationStore for MemoryStore {
    fn snapshot(&self) -> StoreState {
        self.tx.borrow().clone()
    }

    fn modify(&self, change: &mut dyn FnMut(&mut StoreState) -> bool) -> Result<bool, StoreError> {
        Ok(self.tx.send_if_modified(|state| change(state)))
    }

    fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.tx.subscribe()
    }
}

// ============================================================================
// JSON file store
// ============================================================================

/// Store persisted to a JSON file
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous state intact.
#[derive(Debug)]
pub struct JsonFileStore {
    memory: MemoryStore,
    path: PathBuf,
    /// Serializes modify + persist so file order matches commit order
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open the store at `path`; a missing file yields a fresh state
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(text) => {
                let state: StoreState = serde_json::from_str(&text)?;
                info!(
                    path = %path.display(),
                    conversations = state.conversations.len(),
                    "Loaded conversation store"
                );
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Store file not found, starting fresh");
                StoreState::default()
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self {
            memory: MemoryStore::new(state),
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Default store location: `$XDG_DATA_HOME/deepchat/conversations.json`
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join("deepchat").join("conversations.json"))
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_vec(state)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        debug!(path = %self.path.display(), "Store persisted");
        Ok(())
    }
}

impl ConversationStore for JsonFileStore {
    fn snapshot(&self) -> StoreState {
        self.memory.snapshot()
    }

    fn modify(&self, change: &mut dyn FnMut(&mut StoreState) -> bool) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        let changed = self.memory.modify(change)?;
        if changed {
            self.persist(&self.memory.snapshot())?;
        }
        Ok(changed)
    }

    fn modify_transient(
        &self,
        change: &mut dyn FnMut(&mut StoreState) -> bool,
    ) -> Result<bool, StoreError> {
        self.memory.modify(change)
    }

    fn flush(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        self.persist(&self.memory.snapshot())
    }

    fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.memory.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ChatMessage;

    fn add_turn(state: &mut StoreState) -> bool {
        let id = state.conversations.active().id;
        match state.conversations.with_turn(
            id,
            ChatMessage::user("Hi"),
            ChatMessage::assistant_placeholder(),
        ) {
            Ok(next) => {
                state.conversations = next;
                true
            }
            Err(_) => false,
        }
    }

    fn clear_active(state: &mut StoreState) -> bool {
        match state.conversations.cleared_active() {
            Some(next) => {
                state.conversations = next;
                true
            }
            None => false,
        }
    }

    #[test]
    fn test_memory_store_notifies_on_change() {
        let store = MemoryStore::default();
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        assert!(store.modify(&mut add_turn).unwrap());
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().conversations.active().len(), 2);
        assert_eq!(store.snapshot().conversations.active().len(), 2);
    }

    #[test]
    fn test_clear_on_empty_conversation_writes_nothing() {
        let store = MemoryStore::default();
        let mut rx = store.subscribe();
        let before = store.snapshot();

        assert!(!store.modify(&mut clear_active).unwrap());
        assert!(!rx.has_changed().unwrap());
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_set_skips_identical_state() {
        let store = MemoryStore::default();
        let mut rx = store.subscribe();
        store.set(store.snapshot()).unwrap();
        assert!(!rx.has_changed().unwrap());

        let mut next = store.snapshot();
        next.models.llm = Some("qwen".to_string());
        store.set(next.clone()).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(store.snapshot(), next);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("conversations.json");

        let store = JsonFileStore::open(&path).unwrap();
        assert!(!path.exists());
        assert!(store.modify(&mut add_turn).unwrap());
        assert!(path.exists());

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.snapshot(), store.snapshot());
        assert_eq!(reopened.path(), path.as_path());
    }

    #[test]
    fn test_file_store_skips_write_without_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.json");

        let store = JsonFileStore::open(&path).unwrap();
        assert!(!store.modify(&mut clear_active).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_transient_changes_wait_for_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.json");

        let store = JsonFileStore::open(&path).unwrap();
        let mut rx = store.subscribe();
        assert!(store.modify_transient(&mut add_turn).unwrap());
        assert!(rx.has_changed().unwrap());
        assert!(!path.exists());

        store.flush().unwrap();
        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.snapshot(), store.snapshot());
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path),
            Err(StoreError::Format(_))
        ));
    }

    #[test]
    fn test_store_is_object_safe() {
        let store: std::sync::Arc<dyn ConversationStore> =
            std::sync::Arc::new(MemoryStore::default());
        assert_eq!(store.snapshot().conversations.len(), 1);
    }
}
