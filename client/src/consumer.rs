//! Stream Consumer
//!
//! Reads the relay's event stream, accumulates content and reports progress
//! to a [`StreamObserver`]. Every outcome resolves into a status; nothing is
//! propagated as an error.
//!
//! | Input                         | Effect                                          |
//! |-------------------------------|-------------------------------------------------|
//! | content frame                 | append, `on_update(full content)`               |
//! | `[DONE]`                      | `on_done(Completed)`, stop reading              |
//! | error frame                   | append `"\nError: <msg>"`, update, `on_done(Error)` |
//! | unparsable line               | warn, skip                                      |
//! | transport failure             | `on_done(Error)`, no update                     |
//! | end of bytes without `[DONE]` | `on_done(Completed)`                            |
//! | cancelled                     | `on_done(Error)`                                |

use std::fmt::Display;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use relay_core::{FrameDecoder, StreamFrame, StreamStatus};

/// Receives progress from a [`StreamConsumer`]
pub trait StreamObserver: Send {
    /// Called with the full content accumulated so far
    fn on_update(&mut self, content: &str);

    /// Called exactly once, with a terminal status
    fn on_done(&mut self, status: StreamStatus);
}

/// Observer that ignores everything
impl StreamObserver for () {
    fn on_update(&mut self, _content: &str) {}
    fn on_done(&mut self, _status: StreamStatus) {}
}

/// Final state of a consumed stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Everything accumulated, including any appended error text
    pub content: String,
    /// Terminal status
    pub status: StreamStatus,
}

/// Text appended to the content when the relay reports an error
#[must_use]
pub fn error_suffix(message: &str) -> String {
    format!("\nError: {message}")
}

/// Turns a byte stream into content updates
#[derive(Clone, Debug, Default)]
pub struct StreamConsumer {
    cancel: CancellationToken,
}

impl StreamConsumer {
    /// Consumer that runs until the stream ends
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumer that also stops when `cancel` fires
    #[must_use]
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Report a failure that happened before any byte was read
    pub fn transport_failed(observer: &mut dyn StreamObserver, error: &dyn Display) -> StreamOutcome {
        warn!(error = %error, "stream transport failed");
        observer.on_done(StreamStatus::Error);
        StreamOutcome {
            content: String::new(),
            status: StreamStatus::Error,
        }
    }

    /// Read `body` to its end, reporting to `observer`
    ///
    /// The body is dropped (releasing the connection) as soon as a terminal
    /// frame arrives.
    pub async fn consume<S, B, E>(&self, body: S, observer: &mut dyn StreamObserver) -> StreamOutcome
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let mut body = std::pin::pin!(body);
        let mut decoder = FrameDecoder::new();
        let mut content = String::new();

        let status = 'read: loop {
            let chunk = tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!("stream consumption cancelled");
                    break 'read StreamStatus::Error;
                }
                chunk = body.next() => chunk,
            };

            let bytes = match chunk {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    warn!(error = %e, "stream read failed");
                    break 'read StreamStatus::Error;
                }
                None => {
                    if let Some(status) = Self::drain(decoder.finish(), &mut content, observer) {
                        break 'read status;
                    }
                    warn!("stream ended without [DONE]; treating as complete");
                    break 'read StreamStatus::Completed;
                }
            };

            decoder.push(bytes.as_ref());
            while let Some(frame) = decoder.next_frame() {
                if let Some(status) = Self::drain(Some(frame), &mut content, observer) {
                    break 'read status;
                }
            }
        };

        observer.on_done(status);
        StreamOutcome { content, status }
    }

    /// Apply one decoded frame; `Some(status)` when it ends the stream
    fn drain(
        frame: Option<Result<StreamFrame, relay_core::FrameError>>,
        content: &mut String,
        observer: &mut dyn StreamObserver,
    ) -> Option<StreamStatus> {
        match frame? {
            Ok(StreamFrame::Content(text)) => {
                if !text.is_empty() {
                    content.push_str(&text);
                    observer.on_update(content);
                }
                None
            }
            Ok(StreamFrame::Done) => Some(StreamStatus::Completed),
            Ok(StreamFrame::Error(message)) => {
                content.push_str(&error_suffix(&message));
                observer.on_update(content);
                Some(StreamStatus::Error)
            }
            Err(e) => {
                warn!(error = %e, "skipping unparsable frame");
                None
            }
        }
    }
}
