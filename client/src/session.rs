//! Chat Session
//!
//! Drives conversation turns against the relay and records them in the
//! injected [`ConversationStore`].
//!
//! # Turn lifecycle
//!
//! ```text
//! send(text)
//!   ├─ lock conversation          (one turn at a time per conversation)
//!   ├─ store: + user, + placeholder (single atomic change, then flushed)
//!   ├─ POST /api/deep-chat        (history = earlier turns)
//!   ├─ on_update → placeholder.content = full content so far (memory only)
//!   ├─ on_done   → placeholder.status = Completed | Error
//!   └─ flush store
//! ```
//!
//! Turns on different conversations run concurrently. Store flushes run on
//! the blocking pool so file IO never stalls the runtime.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_core::{
    ChatMessage, CompletionRequest, ConversationCollection, ConversationError, ConversationId,
    ConversationStore, MessageError, MessageId, StoreError, StreamStatus,
};

use crate::client::RelayClient;
use crate::consumer::{StreamConsumer, StreamObserver, StreamOutcome};

/// Something attached to a user turn
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Attachment {
    /// Inline image, as a data URL or bare base64
    Image(String),
    /// Text extracted from a document
    Document {
        /// Document file name
        name: String,
        /// Extracted text
        text: String,
    },
}

/// Errors from session operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// Persisting the change failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The collection refused the change
    #[error(transparent)]
    Conversation(#[from] ConversationError),

    /// The background store flush did not run to completion
    #[error("store flush aborted: {0}")]
    Flush(#[from] tokio::task::JoinError),
}

/// Apply a collection update to `store`, in memory
///
/// `change` returns `None` when there is nothing to do; subscribers are not
/// notified then. Returns whether the store changed; the caller flushes.
fn update_collection<F>(store: &dyn ConversationStore, change: F) -> Result<bool, SessionError>
where
    F: FnOnce(&ConversationCollection) -> Result<Option<ConversationCollection>, ConversationError>,
{
    let mut change = Some(change);
    let mut failure = None;
    let changed = store.modify_transient(&mut |state| {
        let Some(change) = change.take() else {
            return false;
        };
        match change(&state.conversations) {
            Ok(Some(next)) => {
                state.conversations = next;
                true
            }
            Ok(None) => false,
            Err(e) => {
                failure = Some(e);
                false
            }
        }
    })?;
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(changed),
    }
}

/// Mirrors consumer progress into the placeholder message
struct PlaceholderWriter<'a> {
    store: &'a dyn ConversationStore,
    conversation: ConversationId,
    message: MessageId,
    inner: &'a mut dyn StreamObserver,
}

impl PlaceholderWriter<'_> {
    fn write<F>(&self, update: F)
    where
        F: FnOnce(&mut ChatMessage) -> Result<(), MessageError>,
    {
        let mut update = Some(update);
        let mut failure = None;
        let result = self.store.modify_transient(&mut |state| {
            let Some(update) = update.take() else {
                return false;
            };
            match state
                .conversations
                .update_message(self.conversation, &self.message, update)
            {
                Ok(()) => true,
                Err(e) => {
                    failure = Some(SessionError::from(e));
                    false
                }
            }
        });
        if let Some(e) = result.err().map(SessionError::from).or(failure) {
            // The conversation may have been cleared or removed mid-turn
            warn!(conversation = %self.conversation, message = %self.message, error = %e, "placeholder update dropped");
        }
    }
}

impl StreamObserver for PlaceholderWriter<'_> {
    fn on_update(&mut self, content: &str) {
        self.write(|m| m.replace_streamed(content));
        self.inner.on_update(content);
    }

    fn on_done(&mut self, status: StreamStatus) {
        self.write(|m| m.finish(status));
        self.inner.on_done(status);
    }
}

/// Conversation-aware chat client
pub struct ChatSession {
    store: Arc<dyn ConversationStore>,
    client: RelayClient,
    turn_locks: DashMap<ConversationId, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("relay", &self.client.base_url())
            .field("open_turn_locks", &self.turn_locks.len())
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    /// Session over `store`, talking to the relay through `client`
    pub fn new(store: Arc<dyn ConversationStore>, client: RelayClient) -> Self {
        Self {
            store,
            client,
            turn_locks: DashMap::new(),
        }
    }

    /// The backing store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// The relay client
    #[must_use]
    pub fn client(&self) -> &RelayClient {
        &self.client
    }

    fn turn_lock(&self, conversation: ConversationId) -> Arc<Mutex<()>> {
        Arc::clone(self.turn_locks.entry(conversation).or_default().value())
    }

    /// Write the store's current state on the blocking pool
    async fn flush(&self) -> Result<(), SessionError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.flush()).await??;
        Ok(())
    }

    /// Flush when `changed`, passing the flag through
    async fn flush_if(&self, changed: bool) -> Result<bool, SessionError> {
        if changed {
            self.flush().await?;
        }
        Ok(changed)
    }

    /// Send `text` in the active conversation and stream the answer
    ///
    /// Transport and relay failures are not errors here: they end up in the
    /// outcome's status and in the placeholder. Only store failures (and a
    /// conversation vanishing before the turn started) are returned.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the turn could not be recorded.
    pub async fn send(
        &self,
        text: &str,
        attachment: Option<Attachment>,
        cancel: CancellationToken,
        observer: &mut dyn StreamObserver,
    ) -> Result<StreamOutcome, SessionError> {
        let conversation = self.store.snapshot().conversations.active().id;
        let lock = self.turn_lock(conversation);
        let _turn = lock.lock().await;

        let mut user = ChatMessage::user(text);
        let mut request = CompletionRequest::new(text);
        match attachment {
            Some(Attachment::Image(image)) => {
                user = user.with_image(image.clone());
                request.image = Some(image);
            }
            Some(Attachment::Document { name, text }) => {
                user = user.with_pdf(name);
                request.pdf_text = Some(text);
            }
            None => {}
        }
        let placeholder = ChatMessage::assistant_placeholder();
        let placeholder_id = placeholder.id.clone();

        // History and the new turn come from the same state
        let mut history = Vec::new();
        update_collection(self.store.as_ref(), |c| {
            history = c
                .get(conversation)
                .ok_or(ConversationError::UnknownConversation(conversation))?
                .history();
            c.with_turn(conversation, user, placeholder).map(Some)
        })?;
        self.flush().await?;
        request.history = history;
        request.model_config = self.store.snapshot().models;

        info!(
            conversation = %conversation,
            history = request.history.len(),
            "sending turn"
        );

        let mut writer = PlaceholderWriter {
            store: self.store.as_ref(),
            conversation,
            message: placeholder_id,
            inner: observer,
        };

        let outcome = match self.client.stream_completion(&request).await {
            Ok(body) => {
                StreamConsumer::with_cancel(cancel)
                    .consume(body, &mut writer)
                    .await
            }
            Err(e) => StreamConsumer::transport_failed(&mut writer, &e),
        };
        self.flush().await?;

        debug!(conversation = %conversation, status = ?outcome.status, "turn finished");
        Ok(outcome)
    }

    /// Empty the active conversation
    ///
    /// Returns `false` (and writes nothing) when it was already empty.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if persisting failed.
    pub async fn clear(&self) -> Result<bool, SessionError> {
        let changed = update_collection(self.store.as_ref(), |c| Ok(c.cleared_active()))?;
        self.flush_if(changed).await
    }

    /// Start a new conversation and make it active
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if persisting failed.
    pub async fn new_conversation(&self) -> Result<ConversationId, SessionError> {
        let mut created = None;
        let changed = update_collection(self.store.as_ref(), |c| {
            let next = c.with_new_conversation();
            created = Some(next.active().id);
            Ok(Some(next))
        })?;
        self.flush_if(changed).await?;
        Ok(created.unwrap_or_else(|| self.store.snapshot().conversations.active().id))
    }

    /// Make conversation `index` active
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] for a bad index or if persisting failed.
    pub async fn select(&self, index: usize) -> Result<(), SessionError> {
        let changed =
            update_collection(self.store.as_ref(), |c| c.with_active(index).map(Some))?;
        self.flush_if(changed).await?;
        Ok(())
    }

    /// Remove conversation `index`; the one before it becomes active
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] for a bad index, for the last remaining
    /// conversation, or if persisting failed.
    pub async fn remove(&self, index: usize) -> Result<(), SessionError> {
        let mut removed = None;
        let changed = update_collection(self.store.as_ref(), |c| {
            removed = c.conversations().get(index).map(|conv| conv.id);
            c.without(index).map(Some)
        })?;
        self.flush_if(changed).await?;
        if let Some(id) = removed {
            self.turn_locks.remove(&id);
        }
        Ok(())
    }

    /// Flip whether a message's reasoning is shown
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the message is not in the active
    /// conversation or persisting failed.
    pub async fn toggle_reasoning(&self, message: &MessageId) -> Result<bool, SessionError> {
        let mut shown = false;
        let changed = update_collection(self.store.as_ref(), |c| {
            c.with_message_update(c.active().id, message, |m| {
                m.show_reasoning = !m.show_reasoning;
                shown = m.show_reasoning;
                Ok(())
            })
            .map(Some)
        })?;
        self.flush_if(changed).await?;
        Ok(shown)
    }

    /// Choose the chat model sent with later requests
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if persisting failed.
    pub async fn set_llm(&self, model: &str) -> Result<(), SessionError> {
        let model = model.trim();
        let changed = self.store.modify_transient(&mut |state| {
            if state.models.llm.as_deref() == Some(model) {
                return false;
            }
            state.models.llm = Some(model.to_string());
            true
        })?;
        self.flush_if(changed).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{MemoryStore, StoreState};

    fn session() -> ChatSession {
        ChatSession::new(
            Arc::new(MemoryStore::default()),
            RelayClient::new("http://127.0.0.1:9"),
        )
    }

    #[tokio::test]
    async fn test_clear_empty_conversation_writes_nothing() {
        let session = session();
        let mut rx = session.store().subscribe();
        rx.mark_unchanged();

        assert!(!session.clear().await.unwrap());
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_new_select_remove() {
        let session = session();
        let first = session.store().snapshot().conversations.active().id;
        let second = session.new_conversation().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(session.store().snapshot().conversations.active_index(), 1);

        session.select(0).await.unwrap();
        assert_eq!(session.store().snapshot().conversations.active().id, first);

        session.remove(1).await.unwrap();
        let state = session.store().snapshot();
        assert_eq!(state.conversations.len(), 1);
        assert_eq!(state.conversations.active().id, first);
    }

    #[tokio::test]
    async fn test_remove_last_conversation_refused() {
        let session = session();
        let err = session.remove(0).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Conversation(ConversationError::LastConversation)
        ));
    }

    #[tokio::test]
    async fn test_select_out_of_range() {
        let session = session();
        assert!(matches!(
            session.select(4).await,
            Err(SessionError::Conversation(ConversationError::IndexOutOfRange { index: 4, len: 1 }))
        ));
    }

    #[tokio::test]
    async fn test_set_llm_is_idempotent() {
        let session = session();
        session.set_llm("qwen2.5").await.unwrap();
        let mut rx = session.store().subscribe();
        rx.mark_unchanged();
        session.set_llm("qwen2.5").await.unwrap();
        assert!(!rx.has_changed().unwrap());
        assert_eq!(
            session.store().snapshot().models.llm.as_deref(),
            Some("qwen2.5")
        );
    }

    #[tokio::test]
    async fn test_unreachable_relay_marks_turn_failed() {
        let session = session();
        let outcome = session
            .send("Hi", None, CancellationToken::new(), &mut ())
            .await
            .unwrap();
        assert_eq!(outcome.status, StreamStatus::Error);
        assert_eq!(outcome.content, "");

        let state: StoreState = session.store().snapshot();
        let messages = state.conversations.active().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content(), "Hi");
        assert_eq!(messages[1].content(), "");
        assert_eq!(messages[1].status(), Some(StreamStatus::Error));
    }

    #[tokio::test]
    async fn test_toggle_reasoning() {
        let session = session();
        session
            .send("Hi", None, CancellationToken::new(), &mut ())
            .await
            .unwrap();
        let reply = session.store().snapshot().conversations.active().messages()[1]
            .id
            .clone();

        assert!(session.toggle_reasoning(&reply).await.unwrap());
        assert!(!session.toggle_reasoning(&reply).await.unwrap());
        assert!(matches!(
            session.toggle_reasoning(&MessageId::new()).await,
            Err(SessionError::Conversation(ConversationError::UnknownMessage(_)))
        ));
    }
}
