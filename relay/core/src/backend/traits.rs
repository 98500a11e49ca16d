//! LLM Backend Traits
//!
//! Trait definitions for LLM backends. The relay only ever talks to a
//! backend through [`LlmBackend`], so the concrete runtime (Ollama today)
//! can be swapped without touching the relay.
//!
//! # Design Philosophy
//!
//! The `LlmBackend` trait provides a common interface for:
//! - Describing an attached image (single non-streaming call)
//! - Streaming a chat completion as a lazy sequence of text fragments
//! - Health checking the backend
//! - Querying available models

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::messages::HistoryEntry;

/// Prompt sent alongside an image to obtain its description
pub const DESCRIBE_IMAGE_PROMPT: &str = "Describe this image:";

/// Lazy, single-pass sequence of generated text fragments
///
/// Ends after the backend signals completion. A mid-stream failure is
/// delivered as one `Err` item, after which the sequence ends.
pub type FragmentStream = BoxStream<'static, Result<String, BackendError>>;

/// Errors raised by a backend
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Transport-level failure talking to the backend
    #[error("{0}")]
    Http(String),

    /// Backend answered with a non-success status
    #[error("backend returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, if any
        body: String,
    },

    /// Backend reported an error for the request
    #[error("{0}")]
    Model(String),

    /// Backend answered with something we could not understand
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    /// The configured backend address is not a usable URL
    #[error("invalid backend address: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// Information about an available model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier
    pub name: String,
    /// Model size in bytes (if known)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Parameter count label, e.g. "1.8B" (if known)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_size: Option<String>,
    /// Model family (if known)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
}

impl ModelInfo {
    /// Create model info with only a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            parameter_size: None,
            family: None,
        }
    }
}

/// LLM Backend trait
///
/// Implement this trait to add support for different LLM runtimes.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Get the backend name (e.g., "Ollama")
    fn name(&self) -> &str;

    /// Check if the backend is healthy and reachable
    async fn health_check(&self) -> bool;

    /// Describe an image with a vision model
    ///
    /// Non-streaming; any failure is fatal for the calling request.
    async fn describe_image(&self, model: &str, image: &[u8]) -> Result<String, BackendError>;

    /// Start a streaming chat completion
    ///
    /// Resolves once the backend accepted the request. Fragments are then
    /// pulled from the returned stream. Cancelling `cancel` stops the
    /// backend read and ends the stream.
    async fn stream_chat(
        &self,
        model: &str,
        messages: Vec<HistoryEntry>,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, BackendError>;

    /// List available models
    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError>;
}
