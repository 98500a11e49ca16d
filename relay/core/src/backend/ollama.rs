//! Ollama Backend Implementation
//!
//! LLM backend for Ollama (local LLM server).
//!
//! # Ollama API
//!
//! Ollama provides a REST API for:
//! - `/api/chat` - Chat completions with message history (streaming or batch)
//! - `/api/tags` - List available models
//!
//! Streaming responses are newline-delimited JSON, one object per line:
//!
//! ```text
//! {"message":{"role":"assistant","content":"He"},"done":false}
//! {"message":{"role":"assistant","content":"llo"},"done":false}
//! {"message":{"role":"assistant","content":""},"done":true}
//! ```
//!
//! A line carrying `{"error": "..."}` ends the stream with that error.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::traits::{BackendError, FragmentStream, LlmBackend, ModelInfo, DESCRIBE_IMAGE_PROMPT};
use crate::messages::HistoryEntry;

/// Default Ollama host
pub const DEFAULT_HOST: &str = "localhost";

/// Default Ollama port
pub const DEFAULT_PORT: u16 = 11434;

/// Fragments buffered between the HTTP reader and the consumer
const FRAGMENT_CHANNEL_CAPACITY: usize = 64;

/// One line of a chat response
#[derive(Debug, Default, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    details: Option<TagDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct TagDetails {
    #[serde(default)]
    parameter_size: Option<String>,
    #[serde(default)]
    family: Option<String>,
}

impl From<TagModel> for ModelInfo {
    fn from(model: TagModel) -> Self {
        let details = model.details.unwrap_or_default();
        Self {
            name: model.name,
            size: model.size,
            parameter_size: details.parameter_size,
            family: details.family,
        }
    }
}

/// What a single NDJSON line means for the stream
#[derive(Debug, PartialEq, Eq)]
enum LineEvent {
    Fragment(String),
    Done,
    Failed(String),
    Skip,
}

fn parse_line(line: &str) -> LineEvent {
    let line = line.trim();
    if line.is_empty() {
        return LineEvent::Skip;
    }
    match serde_json::from_str::<ChatChunk>(line) {
        Ok(ChatChunk { error: Some(e), .. }) => LineEvent::Failed(e),
        Ok(ChatChunk { done: true, .. }) => LineEvent::Done,
        Ok(ChatChunk {
            message: Some(ChunkMessage { content }),
            ..
        }) if !content.is_empty() => LineEvent::Fragment(content),
        Ok(_) => LineEvent::Skip,
        Err(e) => {
            warn!(error = %e, "Skipping unparsable Ollama line");
            LineEvent::Skip
        }
    }
}

/// Whether an authority (`host`, `host:port`, `[::1]:port`) names a port
fn has_explicit_port(authority: &str) -> bool {
    authority
        .rsplit_once(':')
        .is_some_and(|(host, port)| {
            !host.is_empty() && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
        })
}

/// Ollama backend client
#[derive(Clone, Debug)]
pub struct OllamaBackend {
    /// Base URL without a trailing slash
    base_url: String,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    ///
    /// `host` may be a bare host name, `host:port`, or a URL with a scheme,
    /// following the `OLLAMA_HOST` convention; `port` applies only when the
    /// host names none. The client carries no overall timeout: generation
    /// may legitimately run for minutes.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let base_url = match Self::resolve_base_url(&host, port) {
            Ok(url) => url.as_str().trim_end_matches('/').to_string(),
            Err(e) => {
                warn!(host = %host, error = %e, "Unparsable Ollama host, using it verbatim");
                format!("http://{host}:{port}")
            }
        };
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            base_url,
            http_client,
        }
    }

    /// Resolve a host setting to the backend's base URL
    ///
    /// `port` is added only when `host` carries no port of its own.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidUrl`] if the result is not a valid
    /// URL.
    pub fn resolve_base_url(host: &str, port: u16) -> Result<reqwest::Url, BackendError> {
        let host = host.trim();
        let with_scheme = if host.contains("://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };
        let mut url = reqwest::Url::parse(&with_scheme)
            .map_err(|e| BackendError::InvalidUrl(format!("{host}: {e}")))?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(BackendError::InvalidUrl(format!("{host}: no host")));
        }

        let authority = with_scheme
            .split_once("://")
            .map_or("", |(_, rest)| rest.split('/').next().unwrap_or_default());
        if !has_explicit_port(authority) {
            url.set_port(Some(port))
                .map_err(|()| BackendError::InvalidUrl(format!("{host}: cannot carry a port")))?;
        }
        Ok(url)
    }

    /// Base URL requests are sent to
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get chat endpoint URL
    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url())
    }

    /// Get tags endpoint URL
    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    async fn post_chat(&self, body: &serde_json::Value) -> Result<reqwest::Response, BackendError> {
        let response = self
            .http_client
            .post(self.chat_url())
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }
        Ok(response)
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn describe_image(&self, model: &str, image: &[u8]) -> Result<String, BackendError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let body = serde_json::json!({
            "model": model,
            "messages": [{
                "role": "user",
                "content": DESCRIBE_IMAGE_PROMPT,
                "images": [encoded],
            }],
            "stream": false,
        });

        let response = self.post_chat(&body).await?;
        let chunk: ChatChunk = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        if let Some(error) = chunk.error {
            return Err(BackendError::Model(error));
        }
        let description = chunk.message.map(|m| m.content).unwrap_or_default();
        debug!(model, chars = description.len(), "Image described");
        Ok(description)
    }

    async fn stream_chat(
        &self,
        model: &str,
        messages: Vec<HistoryEntry>,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, BackendError> {
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": true,
        });

        let response = self.post_chat(&body).await?;
        let mut stream = response.bytes_stream();
        let (tx, rx) = mpsc::channel(FRAGMENT_CHANNEL_CAPACITY);
        let model = model.to_string();

        // Spawn task to process stream
        tokio::spawn(async move {
            let mut buffer: Vec<u8> = Vec::new();

            loop {
                let chunk = tokio::select! {
                    () = cancel.cancelled() => {
                        debug!(model = %model, "Ollama stream cancelled");
                        return;
                    }
                    chunk = stream.next() => chunk,
                };

                let Some(chunk) = chunk else {
                    break;
                };
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(BackendError::from(e))).await;
                        return;
                    }
                };
                buffer.extend_from_slice(&bytes);

                // Parse newline-delimited JSON
                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let event = parse_line(&String::from_utf8_lossy(&line));
                    match event {
                        LineEvent::Fragment(text) => {
                            if tx.send(Ok(text)).await.is_err() {
                                // Receiver dropped, stop streaming
                                return;
                            }
                        }
                        LineEvent::Done => return,
                        LineEvent::Failed(message) => {
                            let _ = tx.send(Err(BackendError::Model(message))).await;
                            return;
                        }
                        LineEvent::Skip => {}
                    }
                }
            }

            // Stream ended without done signal; salvage an unterminated line
            match parse_line(&String::from_utf8_lossy(&buffer)) {
                LineEvent::Fragment(text) => {
                    let _ = tx.send(Ok(text)).await;
                }
                LineEvent::Failed(message) => {
                    let _ = tx.send(Err(BackendError::Model(message))).await;
                }
                LineEvent::Done => return,
                LineEvent::Skip => {}
            }
            warn!(model = %model, "Ollama stream ended without done signal");
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError> {
        let response = self
            .http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        Ok(tags.models.into_iter().map(ModelInfo::from).collect())
    }
}
