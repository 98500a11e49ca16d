//! Conversation Collection
//!
//! The client keeps several conversations and one of them is active. The
//! collection is never empty, and structural operations return a new
//! collection instead of splicing in place, so a reader holding the previous
//! value (a renderer, a stream callback) never observes a half-applied
//! change. Streamed content is the exception: [`ConversationCollection::update_message`]
//! edits one message in place, since it runs once per fragment.
//!
//! ```text
//! ConversationCollection { active: 1 }
//!   [0] Conversation "Hi there"        3 messages
//!   [1] Conversation "Summarize..."    2 messages   ← active
//!   [2] Conversation (empty)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::messages::{ChatMessage, HistoryEntry, MessageError, MessageId, MessageRole};

/// Maximum characters of the first user message used as a title
const TITLE_MAX_CHARS: usize = 40;

/// Title of a conversation without user messages
const UNTITLED: &str = "New conversation";

// ============================================================================
// Core Types
// ============================================================================

/// Unique identifier for a conversation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    /// Create a new unique conversation ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form: first 8 chars of UUID
        write!(f, "{}", &self.0.simple().to_string()[..8])
    }
}

/// Errors from collection operations
#[derive(Debug, Error, PartialEq)]
pub enum ConversationError {
    /// No conversation at that position
    #[error("no conversation at index {index} (have {len})")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of conversations
        len: usize,
    },

    /// Tried to remove the only conversation
    #[error("cannot remove the last conversation")]
    LastConversation,

    /// No conversation with that ID
    #[error("unknown conversation {0}")]
    UnknownConversation(ConversationId),

    /// No message with that ID in the conversation
    #[error("unknown message {0}")]
    UnknownMessage(MessageId),

    /// The message refused the update
    #[error(transparent)]
    Message(#[from] MessageError),
}

/// An ordered list of chat messages
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation ID
    pub id: ConversationId,
    messages: Vec<ChatMessage>,
    /// When the conversation was started
    pub created_at: DateTime<Utc>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    /// Create an empty conversation
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ConversationId::new(),
            messages: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Messages in order
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Whether there are no messages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Look up a message by ID
    #[must_use]
    pub fn message(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// First user message, truncated; a placeholder when there is none
    #[must_use]
    pub fn title(&self) -> String {
        let Some(first) = self
            .messages
            .iter()
            .find(|m| m.role() == MessageRole::User)
        else {
            return UNTITLED.to_string();
        };
        let line = first.content().lines().next().unwrap_or_default().trim();
        if line.chars().count() > TITLE_MAX_CHARS {
            let mut title: String = line.chars().take(TITLE_MAX_CHARS).collect();
            title.push_str("...");
            title
        } else if line.is_empty() {
            UNTITLED.to_string()
        } else {
            line.to_string()
        }
    }

    /// `{role, content}` of every message, in order
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.messages.iter().map(ChatMessage::to_history).collect()
    }
}

// ============================================================================
// Collection
// ============================================================================

#[derive(Deserialize)]
struct CollectionRepr {
    #[serde(default)]
    conversations: Vec<Conversation>,
    #[serde(default)]
    active: usize,
}

impl From<CollectionRepr> for ConversationCollection {
    fn from(mut repr: CollectionRepr) -> Self {
        if repr.conversations.is_empty() {
            return Self::new();
        }
        // A turn still streaming when the state was saved can never finish now
        let interrupted = repr
            .conversations
            .iter_mut()
            .flat_map(|c| c.messages.iter_mut())
            .map(|m| m.interrupt())
            .filter(|&hit| hit)
            .count();
        if interrupted > 0 {
            warn!(interrupted, "Marked unfinished turns as failed");
        }
        let active = repr.active.min(repr.conversations.len() - 1);
        Self {
            conversations: repr.conversations,
            active,
        }
    }
}

/// Ordered conversations plus the active index
///
/// Never empty; `active` is always a valid index. Loading a stored collection
/// repairs both.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "CollectionRepr")]
pub struct ConversationCollection {
    conversations: Vec<Conversation>,
    active: usize,
}

impl Default for ConversationCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationCollection {
    /// One empty conversation, active
    #[must_use]
    pub fn new() -> Self {
        Self {
            conversations: vec![Conversation::new()],
            active: 0,
        }
    }

    /// All conversations in order
    #[must_use]
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    /// Number of conversations (at least one)
    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Always `false`; present for API symmetry with `len`
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Index of the active conversation
    #[must_use]
    pub fn active_index(&self) -> usize {
        self.active
    }

    /// The active conversation
    #[must_use]
    pub fn active(&self) -> &Conversation {
        &self.conversations[self.active]
    }

    /// Look up a conversation by ID
    #[must_use]
    pub fn get(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    fn position(&self, id: ConversationId) -> Result<usize, ConversationError> {
        self.conversations
            .iter()
            .position(|c| c.id == id)
            .ok_or(ConversationError::UnknownConversation(id))
    }

    fn check_index(&self, index: usize) -> Result<(), ConversationError> {
        if index < self.conversations.len() {
            Ok(())
        } else {
            Err(ConversationError::IndexOutOfRange {
                index,
                len: self.conversations.len(),
            })
        }
    }

    /// Append an empty conversation and make it active
    #[must_use]
    pub fn with_new_conversation(&self) -> Self {
        let mut next = self.clone();
        next.conversations.push(Conversation::new());
        next.active = next.conversations.len() - 1;
        next
    }

    /// Make conversation `index` active
    ///
    /// # Errors
    ///
    /// Returns [`ConversationError::IndexOutOfRange`] for a bad index.
    pub fn with_active(&self, index: usize) -> Result<Self, ConversationError> {
        self.check_index(index)?;
        let mut next = self.clone();
        next.active = index;
        Ok(next)
    }

    /// Remove conversation `index`
    ///
    /// The conversation before it becomes active (the first one when
    /// `index` is 0), regardless of which was active before.
    ///
    /// # Errors
    ///
    /// Returns [`ConversationError::LastConversation`] when only one
    /// conversation exists, or [`ConversationError::IndexOutOfRange`].
    pub fn without(&self, index: usize) -> Result<Self, ConversationError> {
        self.check_index(index)?;
        if self.conversations.len() == 1 {
            return Err(ConversationError::LastConversation);
        }
        let mut next = self.clone();
        next.conversations.remove(index);
        next.active = index.saturating_sub(1);
        Ok(next)
    }

    /// Empty the active conversation
    ///
    /// Returns `None` when it is already empty, so callers can skip the write.
    #[must_use]
    pub fn cleared_active(&self) -> Option<Self> {
        if self.active().is_empty() {
            return None;
        }
        let mut next = self.clone();
        next.conversations[next.active].messages.clear();
        Some(next)
    }

    /// Append a user turn and its assistant placeholder in one step
    ///
    /// # Errors
    ///
    /// Returns [`ConversationError::UnknownConversation`] for a bad ID.
    pub fn with_turn(
        &self,
        conversation: ConversationId,
        user: ChatMessage,
        placeholder: ChatMessage,
    ) -> Result<Self, ConversationError> {
        let index = self.position(conversation)?;
        let mut next = self.clone();
        let messages = &mut next.conversations[index].messages;
        messages.push(user);
        messages.push(placeholder);
        Ok(next)
    }

    /// Apply `update` to one message, returning the updated collection
    ///
    /// # Errors
    ///
    /// Returns an error if the conversation or message is unknown, or if the
    /// message refuses the update (for example, because it is frozen).
    pub fn with_message_update<F>(
        &self,
        conversation: ConversationId,
        message: &MessageId,
        update: F,
    ) -> Result<Self, ConversationError>
    where
        F: FnOnce(&mut ChatMessage) -> Result<(), MessageError>,
    {
        let mut next = self.clone();
        next.update_message(conversation, message, update)?;
        Ok(next)
    }

    /// Apply `update` to one message in place
    ///
    /// On error nothing is modified.
    ///
    /// # Errors
    ///
    /// Same as [`with_message_update`](Self::with_message_update).
    pub fn update_message<F>(
        &mut self,
        conversation: ConversationId,
        message: &MessageId,
        update: F,
    ) -> Result<(), ConversationError>
    where
        F: FnOnce(&mut ChatMessage) -> Result<(), MessageError>,
    {
        let index = self.position(conversation)?;
        let target = self.conversations[index]
            .messages
            .iter_mut()
            .find(|m| &m.id == message)
            .ok_or_else(|| ConversationError::UnknownMessage(message.clone()))?;
        update(target)?;
        Ok(())
    }
}
