//! Prompt Composition
//!
//! Builds the single outbound prompt from the user's text and at most one
//! auxiliary source, and assembles the message sequence sent to the backend.

use crate::messages::{HistoryEntry, MessageRole};
use crate::request::DEFAULT_LANGUAGE;

/// Compose the effective prompt
///
/// Exactly one rule applies, in order:
/// 1. image description available → `"{text} : {description}"`
/// 2. document text available → `"{text} : {document}"`
/// 3. otherwise `text` unchanged
///
/// Empty auxiliary values count as unavailable.
#[must_use]
pub fn compose_prompt(
    text: &str,
    image_description: Option<&str>,
    document_text: Option<&str>,
) -> String {
    match (
        image_description.filter(|d| !d.is_empty()),
        document_text.filter(|d| !d.is_empty()),
    ) {
        (Some(description), _) => format!("{text} : {description}"),
        (None, Some(document)) => format!("{text} : {document}"),
        (None, None) => text.to_string(),
    }
}

/// The system message prepended to every conversation
#[must_use]
pub fn system_preamble(language: Option<&str>) -> HistoryEntry {
    let language = language
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or(DEFAULT_LANGUAGE);
    HistoryEntry::new(
        MessageRole::System,
        format!(
            "You are my assistant. Please Well format answer using markdown. Current language: {language}."
        ),
    )
}

/// Preamble, then history, then the composed user prompt
#[must_use]
pub fn build_messages(
    preamble: HistoryEntry,
    history: &[HistoryEntry],
    prompt: String,
) -> Vec<HistoryEntry> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(preamble);
    messages.extend_from_slice(history);
    messages.push(HistoryEntry::new(MessageRole::User, prompt));
    messages
}
