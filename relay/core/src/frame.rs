//! Stream Frames
//!
//! Wire format between the relay and its clients: a line-oriented text event
//! stream where every unit is one `data:` line followed by a blank line.
//!
//! # Frame Format
//!
//! ```text
//! data: {"content":"<fragment text>"}\n\n     content frame
//! data: [DONE]\n\n                           terminal sentinel
//! data: {"error":"<message>"}\n\n            error frame
//! ```
//!
//! An error frame is never followed by the sentinel.
//!
//! # Security
//!
//! - Maximum line size is enforced to prevent memory exhaustion
//! - Invalid lines are reported per line and never poison the decoder

use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;

/// Prefix of every data line
pub const DATA_PREFIX: &str = "data: ";

/// Payload of the terminal sentinel
pub const DONE_SENTINEL: &str = "[DONE]";

/// Maximum buffered line size (10 MB)
pub const MAX_LINE_SIZE: usize = 10 * 1024 * 1024;

/// Minimum buffer capacity for decoder
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Errors from decoding a single line
#[derive(Debug, Error)]
pub enum FrameError {
    /// Payload was not JSON
    #[error("invalid frame payload: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON payload carried neither content nor error
    #[error("unrecognized frame payload: {0}")]
    UnknownPayload(String),

    /// Line bytes were not UTF-8
    #[error("frame line is not valid UTF-8")]
    InvalidUtf8,

    /// A line grew past [`MAX_LINE_SIZE`] without a newline
    #[error("frame line exceeds {MAX_LINE_SIZE} bytes")]
    LineTooLong,
}

/// One unit of the event stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamFrame {
    /// A piece of generated text
    Content(String),
    /// No further frames will arrive
    Done,
    /// The stream failed; carries the error message
    Error(String),
}

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl StreamFrame {
    /// Encode as a complete `data: ...\n\n` unit
    #[must_use]
    pub fn encode(&self) -> String {
        let data = match self {
            Self::Content(content) => serde_json::json!({ "content": content }).to_string(),
            Self::Done => DONE_SENTINEL.to_string(),
            Self::Error(message) => serde_json::json!({ "error": message }).to_string(),
        };
        format!("{DATA_PREFIX}{data}\n\n")
    }

    /// Encode into a byte buffer ready for the response body
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.encode())
    }

    /// Whether this frame ends the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Content(_))
    }

    /// Parse the payload that follows `data: `
    ///
    /// An error field wins over a content field.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the payload is neither the sentinel nor a
    /// recognized JSON object.
    pub fn parse_data(data: &str) -> Result<Self, FrameError> {
        if data.trim() == DONE_SENTINEL {
            return Ok(Self::Done);
        }
        let payload: Payload = serde_json::from_str(data)?;
        match (payload.error, payload.content) {
            (Some(error), _) => Ok(Self::Error(error)),
            (None, Some(content)) => Ok(Self::Content(content)),
            (None, None) => Err(FrameError::UnknownPayload(data.to_string())),
        }
    }

    /// Parse one line; `None` if it is not a data line
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Result<Self, FrameError>> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        line.strip_prefix(DATA_PREFIX).map(Self::parse_data)
    }
}

/// Incremental decoder for the event stream
///
/// Buffers raw bytes across chunk boundaries (including split UTF-8
/// sequences) and yields frames for complete lines.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Position where we've consumed up to
    read_pos: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a new decoder with default buffer capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
        }
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        // Compact buffer if we've consumed a lot
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Get the number of bytes available in the buffer
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Try to decode the next frame
    ///
    /// Returns:
    /// - `Some(Ok(frame))` for each complete data line
    /// - `Some(Err(..))` for a data line that failed to parse; the line is
    ///   consumed, so the caller may log it and keep going
    /// - `None` if more data is needed
    pub fn next_frame(&mut self) -> Option<Result<StreamFrame, FrameError>> {
        loop {
            let pending = &self.buffer[self.read_pos..];
            let Some(newline) = pending.iter().position(|&b| b == b'\n') else {
                if pending.len() > MAX_LINE_SIZE {
                    self.clear();
                    return Some(Err(FrameError::LineTooLong));
                }
                return None;
            };
            let line_end = self.read_pos + newline;
            let parsed = Self::decode_line(&self.buffer[self.read_pos..line_end]);
            self.read_pos = line_end + 1;
            if parsed.is_some() {
                return parsed;
            }
        }
    }

    /// Decode a trailing line that was never newline-terminated
    pub fn finish(&mut self) -> Option<Result<StreamFrame, FrameError>> {
        let parsed = Self::decode_line(&self.buffer[self.read_pos..]);
        self.clear();
        parsed
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }

    fn decode_line(bytes: &[u8]) -> Option<Result<StreamFrame, FrameError>> {
        match std::str::from_utf8(bytes) {
            Ok(line) => StreamFrame::parse_line(line),
            Err(_) if bytes.starts_with(DATA_PREFIX.as_bytes()) => {
                Some(Err(FrameError::InvalidUtf8))
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encode_wire_forms() {
        assert_eq!(
            StreamFrame::Content("He".into()).encode(),
            "data: {\"content\":\"He\"}\n\n"
        );
        assert_eq!(StreamFrame::Done.encode(), "data: [DONE]\n\n");
        assert_eq!(
            StreamFrame::Error("model not found".into()).encode(),
            "data: {\"error\":\"model not found\"}\n\n"
        );
    }

    #[test]
    fn test_encode_escapes_content() {
        let frame = StreamFrame::Content("line\n\"quoted\"".into());
        let encoded = frame.encode();
        assert_eq!(encoded.matches('\n').count(), 2);
        assert_eq!(
            StreamFrame::parse_line(encoded.trim_end()).unwrap().unwrap(),
            frame
        );
    }

    #[test]
    fn test_parse_line_kinds() {
        assert_eq!(
            StreamFrame::parse_line("data: [DONE]").unwrap().unwrap(),
            StreamFrame::Done
        );
        assert_eq!(
            StreamFrame::parse_line("data: {\"error\":\"boom\",\"content\":\"x\"}")
                .unwrap()
                .unwrap(),
            StreamFrame::Error("boom".into())
        );
        assert!(StreamFrame::parse_line("").is_none());
        assert!(StreamFrame::parse_line(": keep-alive").is_none());
        assert!(matches!(
            StreamFrame::parse_line("data: {oops"),
            Some(Err(FrameError::Json(_)))
        ));
        assert!(matches!(
            StreamFrame::parse_line("data: {\"other\":1}"),
            Some(Err(FrameError::UnknownPayload(_)))
        ));
    }

    #[test]
    fn test_decoder_across_chunks() {
        let wire = [
            StreamFrame::Content("He".into()).encode(),
            StreamFrame::Content("llo".into()).encode(),
            StreamFrame::Done.encode(),
        ]
        .concat();

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in wire.as_bytes().chunks(5) {
            decoder.push(chunk);
            while let Some(frame) = decoder.next_frame() {
                frames.push(frame.unwrap());
            }
        }

        assert_eq!(
            frames,
            vec![
                StreamFrame::Content("He".into()),
                StreamFrame::Content("llo".into()),
                StreamFrame::Done,
            ]
        );
        assert_eq!(decoder.available(), 0);
    }

    #[test]
    fn test_decoder_split_utf8() {
        let wire = StreamFrame::Content("ünïcode ✓".into()).encode();
        let bytes = wire.as_bytes();
        let mut decoder = FrameDecoder::new();
        // Split inside the multi-byte "ü"
        decoder.push(&bytes[..19]);
        assert!(decoder.next_frame().is_none());
        decoder.push(&bytes[19..]);
        assert_eq!(
            decoder.next_frame().unwrap().unwrap(),
            StreamFrame::Content("ünïcode ✓".into())
        );
    }

    #[test]
    fn test_decoder_skips_bad_line() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"data: {bad\n\ndata: {\"content\":\"ok\"}\n\n");
        assert!(matches!(decoder.next_frame(), Some(Err(FrameError::Json(_)))));
        assert_eq!(
            decoder.next_frame().unwrap().unwrap(),
            StreamFrame::Content("ok".into())
        );
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn test_decoder_finish_unterminated_line() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"data: [DONE]");
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.finish().unwrap().unwrap(), StreamFrame::Done);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_terminal_frames() {
        assert!(StreamFrame::Done.is_terminal());
        assert!(StreamFrame::Error(String::new()).is_terminal());
        assert!(!StreamFrame::Content(String::new()).is_terminal());
    }
}
