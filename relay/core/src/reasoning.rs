//! Reasoning Markers
//!
//! Reasoning models wrap their "thinking" in `<think>`…`</think>`. The relay
//! rewrites the opening marker to a readable prefix and the closing marker to
//! a separator token; the client later splits accumulated content at that
//! separator into a reasoning part and an answer part.
//!
//! # Fragment boundaries
//!
//! Backends deliver text in arbitrary fragments, so a marker can arrive as
//! `"</th"` + `"ink>"`. [`rewrite_fragment`] only sees one fragment at a time
//! and misses such markers. [`MarkerRewriter`] holds back a trailing partial
//! marker until the next fragment shows whether it completes.

/// Opening reasoning marker emitted by the model
pub const THINK_OPEN: &str = "<think>";

/// Closing reasoning marker emitted by the model
pub const THINK_CLOSE: &str = "</think>";

/// Replacement for [`THINK_OPEN`]
pub const REASONING_PREFIX: &str = "I'm thinking: ";

/// Replacement for [`THINK_CLOSE`]; splits reasoning from answer
pub const SEPARATOR: &str = "^^^^^^^";

const MARKERS: [&str; 2] = [THINK_OPEN, THINK_CLOSE];

/// Rewrite the markers contained in a single fragment
///
/// Every occurrence is rewritten, not only the first, so a fragment carrying
/// two reasoning blocks reads the same as two fragments carrying one each.
#[must_use]
pub fn rewrite_fragment(fragment: &str) -> String {
    fragment
        .replace(THINK_OPEN, REASONING_PREFIX)
        .replace(THINK_CLOSE, SEPARATOR)
}

/// Length of the longest suffix of `text` that could start a marker
fn partial_marker_len(text: &str) -> usize {
    let longest = MARKERS.iter().map(|m| m.len() - 1).max().unwrap_or(0);
    (1..=longest.min(text.len()))
        .rev()
        .find(|&k| MARKERS.iter().any(|m| k < m.len() && text.ends_with(&m[..k])))
        .unwrap_or(0)
}

/// Marker rewriter that sees across fragment boundaries
///
/// Feed fragments with [`push`](Self::push) and emit whatever it returns;
/// call [`finish`](Self::finish) at end of stream to flush the held-back tail.
/// Concatenating all outputs equals [`rewrite_fragment`] applied to the
/// concatenated input.
#[derive(Debug, Default)]
pub struct MarkerRewriter {
    pending: String,
}

impl MarkerRewriter {
    /// Create a rewriter with nothing held back
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite a fragment, returning the text that is safe to emit now
    pub fn push(&mut self, fragment: &str) -> String {
        self.pending.push_str(fragment);
        let mut rewritten = rewrite_fragment(&self.pending);
        let hold = partial_marker_len(&rewritten);
        self.pending = rewritten.split_off(rewritten.len() - hold);
        rewritten
    }

    /// Text currently held back
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Flush the held-back tail verbatim
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }
}

/// Accumulated content split into reasoning and answer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReasoningSplit<'a> {
    /// Text before the separator (empty without one)
    pub reasoning: &'a str,
    /// Text after the separator, or everything without one
    pub answer: &'a str,
}

impl<'a> ReasoningSplit<'a> {
    /// Split `content` at the first separator
    #[must_use]
    pub fn of(content: &'a str) -> Self {
        match content.split_once(SEPARATOR) {
            Some((reasoning, answer)) => Self { reasoning, answer },
            None => Self {
                reasoning: "",
                answer: content,
            },
        }
    }

    /// Whether the content carried a reasoning part
    #[must_use]
    pub fn has_reasoning(&self) -> bool {
        !self.reasoning.is_empty()
    }
}
