//! Chat Messages
//!
//! One turn in a conversation, plus the slim `{role, content}` projection the
//! relay forwards to the backend.
//!
//! # Lifecycle
//!
//! A user turn and an empty assistant placeholder are created together. The
//! placeholder is in [`StreamStatus::Streaming`] and its content may only
//! move forward while fragments arrive; once the status becomes terminal the
//! content is frozen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique message identifier
///
/// Generated by the caller; opaque to the relay.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message sender role
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Instructions for the model
    System,
    /// User input
    User,
    /// Model output
    Assistant,
}

impl MessageRole {
    /// Wire name of the role
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Status of a streamed assistant turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatus {
    /// Fragments are still arriving
    Streaming,
    /// The terminal sentinel was received
    Completed,
    /// The turn ended in an error
    Error,
}

impl StreamStatus {
    /// Whether no further content may arrive
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Streaming)
    }
}

/// Errors from mutating a message
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    /// The message already reached a terminal status
    #[error("message {0} is frozen")]
    Frozen(MessageId),

    /// A replacement did not extend the content streamed so far
    #[error("message {0} content may only grow while streaming")]
    NotAppendOnly(MessageId),
}

/// `{role, content}` pair forwarded to the backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Who said it
    pub role: MessageRole,
    /// What was said
    pub content: String,
}

impl HistoryEntry {
    /// Create a new entry
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A message in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message ID
    pub id: MessageId,
    role: MessageRole,
    content: String,
    /// Inline image data (data URL or bare base64) attached to a user turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Name of the document attached to a user turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf: Option<String>,
    /// Streaming status (assistant placeholders only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<StreamStatus>,
    /// Whether the reasoning part is shown
    #[serde(default)]
    pub show_reasoning: bool,
    /// When the message was created
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a finished message
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            image: None,
            pdf: None,
            status: None,
            show_reasoning: false,
            created_at: Utc::now(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an empty assistant placeholder awaiting fragments
    #[must_use]
    pub fn assistant_placeholder() -> Self {
        Self {
            status: Some(StreamStatus::Streaming),
            ..Self::new(MessageRole::Assistant, String::new())
        }
    }

    /// Attach inline image data
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Attach a document name
    #[must_use]
    pub fn with_pdf(mut self, name: impl Into<String>) -> Self {
        self.pdf = Some(name.into());
        self
    }

    /// The sender role (fixed at creation)
    #[must_use]
    pub fn role(&self) -> MessageRole {
        self.role
    }

    /// The message content
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Streaming status, if this is a streamed turn
    #[must_use]
    pub fn status(&self) -> Option<StreamStatus> {
        self.status
    }

    /// Whether fragments may still be applied
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.status == Some(StreamStatus::Streaming)
    }

    /// Replace the content with the full accumulated stream content
    ///
    /// The consumer reports the whole content so far on every update; the new
    /// value must extend what was already stored.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Frozen`] if the message is not streaming, or
    /// [`MessageError::NotAppendOnly`] if `content` does not start with the
    /// current content.
    pub fn replace_streamed(&mut self, content: &str) -> Result<(), MessageError> {
        if !self.is_streaming() {
            return Err(MessageError::Frozen(self.id.clone()));
        }
        if !content.starts_with(&self.content) {
            return Err(MessageError::NotAppendOnly(self.id.clone()));
        }
        self.content = content.to_string();
        Ok(())
    }

    /// Move a streaming message to a terminal status
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Frozen`] if the message is already terminal.
    pub fn finish(&mut self, status: StreamStatus) -> Result<(), MessageError> {
        if !self.is_streaming() {
            return Err(MessageError::Frozen(self.id.clone()));
        }
        self.status = Some(status);
        Ok(())
    }

    /// End a turn left streaming by an earlier run as failed
    ///
    /// Returns whether the status changed.
    pub(crate) fn interrupt(&mut self) -> bool {
        if self.is_streaming() {
            self.status = Some(StreamStatus::Error);
            true
        } else {
            false
        }
    }

    /// Project to the `{role, content}` pair sent as history
    #[must_use]
    pub fn to_history(&self) -> HistoryEntry {
        HistoryEntry::new(self.role, self.content.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_uniqueness() {
        assert_ne!(MessageId::new(), MessageId::new());
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let role: MessageRole = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(role, MessageRole::System);
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&StreamStatus::Completed).unwrap(),
            "\"COMPLETED\""
        );
        assert!(StreamStatus::Error.is_terminal());
        assert!(!StreamStatus::Streaming.is_terminal());
    }

    #[test]
    fn test_placeholder_streaming_lifecycle() {
        let mut msg = ChatMessage::assistant_placeholder();
        assert!(msg.is_streaming());
        assert_eq!(msg.content(), "");

        msg.replace_streamed("He").unwrap();
        msg.replace_streamed("Hello").unwrap();
        assert_eq!(msg.content(), "Hello");

        msg.finish(StreamStatus::Completed).unwrap();
        assert_eq!(msg.status(), Some(StreamStatus::Completed));
        assert_eq!(
            msg.replace_streamed("Hello!"),
            Err(MessageError::Frozen(msg.id.clone()))
        );
        assert!(msg.finish(StreamStatus::Error).is_err());
        assert_eq!(msg.content(), "Hello");
    }

    #[test]
    fn test_replace_must_extend() {
        let mut msg = ChatMessage::assistant_placeholder();
        msg.replace_streamed("abc").unwrap();
        assert_eq!(
            msg.replace_streamed("xyz"),
            Err(MessageError::NotAppendOnly(msg.id.clone()))
        );
        assert_eq!(msg.content(), "abc");
    }

    #[test]
    fn test_user_message_is_not_streaming() {
        let mut msg = ChatMessage::user("hi").with_pdf("notes.pdf");
        assert_eq!(msg.role(), MessageRole::User);
        assert_eq!(msg.status(), None);
        assert!(msg.replace_streamed("hi!").is_err());
        assert_eq!(msg.pdf.as_deref(), Some("notes.pdf"));
    }

    #[test]
    fn test_history_projection_drops_attachments() {
        let msg = ChatMessage::user("look").with_image("data:image/png;base64,AAAA");
        let entry = msg.to_history();
        assert_eq!(entry, HistoryEntry::new(MessageRole::User, "look"));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "look"}));
    }
}
