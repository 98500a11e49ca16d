//! Scripted Backend
//!
//! A deterministic [`LlmBackend`] for tests and offline demos. It replays a
//! fixed list of fragments, can be told to fail at a chosen point, and records
//! every call so tests can assert on what the relay asked for.
//!
//! Clones share state, so a test can keep one handle while the server owns
//! another.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::traits::{BackendError, FragmentStream, LlmBackend, ModelInfo};
use crate::messages::HistoryEntry;

/// A call observed by a [`ScriptedBackend`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendCall {
    /// `describe_image` was called
    DescribeImage {
        /// Vision model requested
        model: String,
        /// Decoded image bytes
        image: Vec<u8>,
    },
    /// `stream_chat` was called
    StreamChat {
        /// Chat model requested
        model: String,
        /// Messages sent to the model
        messages: Vec<HistoryEntry>,
    },
    /// `list_models` was called
    ListModels,
}

#[derive(Debug)]
struct Script {
    fragments: Vec<String>,
    fail_after: Option<(usize, String)>,
    open_error: Option<String>,
    image_result: Result<String, String>,
    models: Result<Vec<ModelInfo>, String>,
    hold_open: bool,
    healthy: bool,
}

#[derive(Debug, Default)]
struct Recorded {
    calls: Vec<BackendCall>,
    cancel_tokens: Vec<CancellationToken>,
}

/// Deterministic in-process backend
#[derive(Clone, Debug)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
    recorded: Arc<Mutex<Recorded>>,
}

impl ScriptedBackend {
    /// Backend that streams `fragments` and then completes
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Arc::new(Mutex::new(Script {
                fragments: fragments.into_iter().map(Into::into).collect(),
                fail_after: None,
                open_error: None,
                image_result: Ok("an image".to_string()),
                models: Ok(Vec::new()),
                hold_open: false,
                healthy: true,
            })),
            recorded: Arc::new(Mutex::new(Recorded::default())),
        }
    }

    /// Emit only the first `k` fragments, then fail with `message`
    #[must_use]
    pub fn failing_after(self, k: usize, message: impl Into<String>) -> Self {
        self.script.lock().fail_after = Some((k, message.into()));
        self
    }

    /// Refuse to open the stream at all
    #[must_use]
    pub fn failing_open(self, message: impl Into<String>) -> Self {
        self.script.lock().open_error = Some(message.into());
        self
    }

    /// Answer image descriptions with `description`
    #[must_use]
    pub fn with_image_description(self, description: impl Into<String>) -> Self {
        self.script.lock().image_result = Ok(description.into());
        self
    }

    /// Fail image descriptions with `message`
    #[must_use]
    pub fn failing_image(self, message: impl Into<String>) -> Self {
        self.script.lock().image_result = Err(message.into());
        self
    }

    /// Models reported by `list_models`
    #[must_use]
    pub fn with_models(self, models: Vec<ModelInfo>) -> Self {
        self.script.lock().models = Ok(models);
        self
    }

    /// Fail `list_models` with `message`
    #[must_use]
    pub fn failing_models(self, message: impl Into<String>) -> Self {
        self.script.lock().models = Err(message.into());
        self
    }

    /// Keep the stream open after the last fragment until cancelled
    #[must_use]
    pub fn held_open(self) -> Self {
        self.script.lock().hold_open = true;
        self
    }

    /// Report the backend as unreachable from `health_check`
    #[must_use]
    pub fn unhealthy(self) -> Self {
        self.script.lock().healthy = false;
        self
    }

    /// Calls observed so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.recorded.lock().calls.clone()
    }

    /// Cancellation token handed to the most recent `stream_chat`
    #[must_use]
    pub fn last_cancel_token(&self) -> Option<CancellationToken> {
        self.recorded.lock().cancel_tokens.last().cloned()
    }

    /// Whether any stream handed out so far has been cancelled
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.recorded
            .lock()
            .cancel_tokens
            .iter()
            .any(CancellationToken::is_cancelled)
    }

    fn record(&self, call: BackendCall) {
        self.recorded.lock().calls.push(call);
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "Scripted"
    }

    async fn health_check(&self) -> bool {
        self.script.lock().healthy
    }

    async fn describe_image(&self, model: &str, image: &[u8]) -> Result<String, BackendError> {
        self.record(BackendCall::DescribeImage {
            model: model.to_string(),
            image: image.to_vec(),
        });
        self.script
            .lock()
            .image_result
            .clone()
            .map_err(BackendError::Model)
    }

    async fn stream_chat(
        &self,
        model: &str,
        messages: Vec<HistoryEntry>,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, BackendError> {
        self.record(BackendCall::StreamChat {
            model: model.to_string(),
            messages,
        });

        let (fragments, fail_after, hold_open) = {
            let script = self.script.lock();
            if let Some(message) = &script.open_error {
                return Err(BackendError::Http(message.clone()));
            }
            (
                script.fragments.clone(),
                script.fail_after.clone(),
                script.hold_open,
            )
        };
        self.recorded.lock().cancel_tokens.push(cancel.clone());

        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            let emitted = fail_after
                .as_ref()
                .map_or(fragments.len(), |(k, _)| (*k).min(fragments.len()));

            for fragment in fragments.into_iter().take(emitted) {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    sent = tx.send(Ok(fragment)) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }

            if let Some((_, message)) = fail_after {
                let _ = tx.send(Err(BackendError::Model(message))).await;
                return;
            }

            if hold_open {
                cancel.cancelled().await;
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError> {
        self.record(BackendCall::ListModels);
        self.script.lock().models.clone().map_err(BackendError::Http)
    }
}
