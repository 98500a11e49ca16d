//! Stream Relay
//!
//! Pulls fragments from an open backend stream and writes them to the
//! response body as event-stream frames.
//!
//! ```text
//! backend fragments ──► marker rewrite ──► StreamFrame::encode ──► mpsc ──► response body
//! ```
//!
//! # Termination
//!
//! - Backend exhausted: held-back marker text, then `data: [DONE]`
//! - Backend error: held-back marker text, then one error frame, no sentinel
//! - Client gone (body dropped): the backend's token is cancelled and the
//!   task stops without writing anything else

use std::convert::Infallible;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use relay_core::reasoning::rewrite_fragment;
use relay_core::{FragmentStream, MarkerRewriter, RelayConfig, StreamFrame};

/// Body chunks produced by the relay task
pub type FrameStream = ReceiverStream<Result<Bytes, Infallible>>;

/// How the relay treats fragments
#[derive(Clone, Copy, Debug)]
pub struct RelayOptions {
    /// Hold back partial markers across fragment boundaries
    pub split_markers: bool,
    /// Frames buffered ahead of the response body
    pub channel_capacity: usize,
}

impl From<&RelayConfig> for RelayOptions {
    fn from(config: &RelayConfig) -> Self {
        Self {
            split_markers: config.split_markers_across_fragments,
            channel_capacity: config.channel_capacity.max(1),
        }
    }
}

/// How a relayed stream ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Sentinel written
    Completed,
    /// Error frame written
    Failed(String),
    /// Client went away first
    Disconnected,
}

/// Either rewriting strategy
enum Rewriter {
    Buffered(MarkerRewriter),
    PerFragment,
}

impl Rewriter {
    fn push(&mut self, fragment: &str) -> String {
        match self {
            Self::Buffered(rewriter) => rewriter.push(fragment),
            Self::PerFragment => rewrite_fragment(fragment),
        }
    }

    fn finish(&mut self) -> String {
        match self {
            Self::Buffered(rewriter) => rewriter.finish(),
            Self::PerFragment => String::new(),
        }
    }
}

/// Frame sink that notices when the client is gone
struct FrameSink {
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
    frames: usize,
}

impl FrameSink {
    /// Write one frame; `false` if the body was dropped
    async fn send(&mut self, frame: &StreamFrame) -> bool {
        self.frames += 1;
        self.tx.send(Ok(frame.to_bytes())).await.is_ok()
    }

    /// Write pending text as a content frame, if any
    async fn send_text(&mut self, text: String) -> bool {
        if text.is_empty() {
            return true;
        }
        self.send(&StreamFrame::Content(text)).await
    }
}

/// Spawn the relay task and return the response body stream
///
/// `cancel` must be the token handed to the backend's `stream_chat`.
pub fn spawn_relay(
    fragments: FragmentStream,
    cancel: CancellationToken,
    options: RelayOptions,
) -> FrameStream {
    let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
    tokio::spawn(run_relay(fragments, tx, cancel, options).in_current_span());
    ReceiverStream::new(rx)
}

/// Drive one stream to its end
pub async fn run_relay(
    mut fragments: FragmentStream,
    tx: mpsc::Sender<Result<Bytes, Infallible>>,
    cancel: CancellationToken,
    options: RelayOptions,
) -> RelayOutcome {
    let mut rewriter = if options.split_markers {
        Rewriter::Buffered(MarkerRewriter::new())
    } else {
        Rewriter::PerFragment
    };
    let mut sink = FrameSink { tx, frames: 0 };

    let outcome = loop {
        let next = tokio::select! {
            () = sink.tx.closed() => break RelayOutcome::Disconnected,
            next = fragments.next() => next,
        };

        match next {
            Some(Ok(fragment)) => {
                let text = rewriter.push(&fragment);
                if !sink.send_text(text).await {
                    break RelayOutcome::Disconnected;
                }
            }
            Some(Err(e)) => {
                let message = e.to_string();
                warn!(error = %message, "backend failed mid-stream");
                if !sink.send_text(rewriter.finish()).await
                    || !sink.send(&StreamFrame::Error(message.clone())).await
                {
                    break RelayOutcome::Disconnected;
                }
                break RelayOutcome::Failed(message);
            }
            None => {
                if !sink.send_text(rewriter.finish()).await
                    || !sink.send(&StreamFrame::Done).await
                {
                    break RelayOutcome::Disconnected;
                }
                break RelayOutcome::Completed;
            }
        }
    };

    match &outcome {
        RelayOutcome::Completed => info!(frames = sink.frames, "stream completed"),
        RelayOutcome::Failed(_) => debug!(frames = sink.frames, "stream closed after error"),
        RelayOutcome::Disconnected => {
            cancel.cancel();
            info!(frames = sink.frames, "client disconnected; backend cancelled");
        }
    }
    outcome
}
