//! Relay HTTP Client
//!
//! Thin `reqwest` wrapper over the relay daemon's routes. Streaming bodies
//! are handed back raw; decoding them is the consumer's job.

use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use relay_core::{CompletionRequest, ExtractedDocument, ModelInfo};

/// Default relay address
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:3000";

/// Relay route for completions
pub const COMPLETION_PATH: &str = "/api/deep-chat";

/// Raw response body of a completion
pub type ByteStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

/// Errors talking to the relay
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection or transfer failure
    #[error("relay unreachable: {0}")]
    Http(#[from] reqwest::Error),

    /// The relay answered with a non-success status
    #[error("relay returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, as text
        body: String,
    },

    /// A local file could not be read
    #[error("reading {path}: {source}")]
    File {
        /// File involved
        path: String,
        /// Underlying IO error
        source: std::io::Error,
    },
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

/// Client for one relay daemon
#[derive(Clone, Debug)]
pub struct RelayClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl RelayClient {
    /// Client for the relay at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "HTTP client builder failed; using defaults");
                reqwest::Client::new()
            });
        Self {
            base_url,
            http_client,
        }
    }

    /// Relay base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Post a completion request and return its event-stream body
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the request could not be sent or the
    /// relay refused it before streaming.
    pub async fn stream_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<ByteStream, ClientError> {
        debug!(
            url = %self.url(COMPLETION_PATH),
            history = request.history.len(),
            has_image = request.image.is_some(),
            "posting completion request"
        );
        let response = self
            .http_client
            .post(self.url(COMPLETION_PATH))
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.bytes_stream().boxed())
    }

    /// Models installed on the relay's backend
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or a non-success status.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ClientError> {
        let response = self.http_client.get(self.url("/api/models")).send().await?;
        let body: ModelsResponse = check_status(response).await?.json().await?;
        Ok(body.models)
    }

    /// Upload documents for text extraction
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure or when the relay
    /// rejects a document.
    pub async fn upload_documents(
        &self,
        files: Vec<(String, Vec<u8>)>,
    ) -> Result<Vec<ExtractedDocument>, ClientError> {
        let form = files
            .into_iter()
            .fold(reqwest::multipart::Form::new(), |form, (name, bytes)| {
                form.part("files", reqwest::multipart::Part::bytes(bytes).file_name(name))
            });
        let response = self
            .http_client
            .post(self.url("/api/pdf"))
            .multipart(form)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}
