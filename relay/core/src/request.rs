//! Completion Request
//!
//! The unit of work a client sends to the relay: one user turn plus
//! everything the backend needs to answer it. The relay holds no state
//! between requests, so the full history travels on every call.
//!
//! Field names follow the browser client (`pdfdoc`, `ai`); the descriptive
//! names (`pdfText`, `modelConfig`) are accepted as aliases.

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::HistoryEntry;

/// Default chat model
pub const DEFAULT_LLM: &str = "deepseek-r1:1.5b";

/// Default vision model used to describe attached images
pub const DEFAULT_VISION: &str = "moondream:latest";

/// Default response language
pub const DEFAULT_LANGUAGE: &str = "english";

/// Errors from decoding a completion request
#[derive(Debug, Error)]
pub enum RequestError {
    /// Body was not a valid request
    #[error("malformed request body: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Image payload was not valid base64
    #[error("invalid image encoding: {0}")]
    InvalidImage(#[from] base64::DecodeError),
}

/// Model selection for one request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Chat model identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<String>,
    /// Vision model identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision: Option<String>,
    /// Response language
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl ModelConfig {
    /// Config with the stock model choices filled in
    #[must_use]
    pub fn stock() -> Self {
        Self {
            llm: Some(DEFAULT_LLM.to_string()),
            vision: Some(DEFAULT_VISION.to_string()),
            language: Some(DEFAULT_LANGUAGE.to_string()),
        }
    }

    /// Fill unset or blank fields from `fallback`
    #[must_use]
    pub fn or(self, fallback: &ModelConfig) -> Self {
        fn pick(value: Option<String>, fallback: &Option<String>) -> Option<String> {
            value
                .filter(|v| !v.trim().is_empty())
                .or_else(|| fallback.clone())
        }
        Self {
            llm: pick(self.llm, &fallback.llm),
            vision: pick(self.vision, &fallback.vision),
            language: pick(self.language, &fallback.language),
        }
    }
}

/// A completion request as posted to the relay
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Raw user text
    pub prompt: String,
    /// Prior conversation turns
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Base64 image, optionally as a `data:image/...;base64,` URL
    #[serde(default)]
    pub image: Option<String>,
    /// Extracted document text
    #[serde(default, rename = "pdfdoc", alias = "pdfText")]
    pub pdf_text: Option<String>,
    /// Model selection
    #[serde(default, rename = "ai", alias = "modelConfig")]
    pub model_config: ModelConfig,
}

impl CompletionRequest {
    /// Create a request for a bare prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Decode a request from a raw JSON body
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Malformed`] if the body is not a valid request.
    pub fn from_json(body: &[u8]) -> Result<Self, RequestError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Decode the attached image, if any
    ///
    /// Empty strings count as "no image".
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidImage`] if the payload is not base64.
    pub fn image_bytes(&self) -> Result<Option<Vec<u8>>, RequestError> {
        match self.image.as_deref().map(strip_data_url) {
            Some(encoded) if !encoded.is_empty() => Ok(Some(
                base64::engine::general_purpose::STANDARD.decode(encoded)?,
            )),
            _ => Ok(None),
        }
    }

    /// Document text, ignoring blank values
    #[must_use]
    pub fn document_text(&self) -> Option<&str> {
        self.pdf_text.as_deref().filter(|t| !t.is_empty())
    }
}

/// Strip a `data:image/<type>;base64,` prefix
fn strip_data_url(image: &str) -> &str {
    image
        .strip_prefix("data:image/")
        .and_then(|rest| rest.split_once(";base64,"))
        .map_or(image, |(_, payload)| payload)
}
