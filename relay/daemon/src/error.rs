//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become HTTP responses with an
//! appropriate status code.
//!
//! Failures before a stream opens are logged with full detail but the caller
//! only sees `{"error":"Internal Server Error"}`, so backend addresses, model
//! names and decoder internals never leak.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use relay_core::{BackendError, DocumentError, RequestError};

/// Body text of every pre-stream failure
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

/// Body text of a method-not-allowed response
pub const METHOD_NOT_ALLOWED_MESSAGE: &str = "Method not allowed";

/// All errors that can occur in the relay request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The request body could not be read (too large, connection lost).
    #[error("reading request body: {0}")]
    Body(#[from] axum::Error),

    /// The request body could not be decoded.
    #[error("request error: {0}")]
    Request(#[from] RequestError),

    /// The backend failed before a stream was opened.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// An uploaded document could not be read.
    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    /// A multipart upload was malformed or too large.
    #[error("bad upload: {0}")]
    Upload(String),

    /// Work handed to the blocking pool did not complete.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The route does not accept this method.
    #[error("method not allowed")]
    MethodNotAllowed,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::MethodNotAllowed => {
                return (StatusCode::METHOD_NOT_ALLOWED, METHOD_NOT_ALLOWED_MESSAGE)
                    .into_response();
            }

            // Client-facing errors: expose the message directly.
            ServerError::Upload(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Document(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),

            // Internal errors: log the full detail, return a generic message.
            ServerError::Body(e) => {
                error!(error = %e, "rejecting request before stream");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    INTERNAL_ERROR_MESSAGE.to_owned(),
                )
            }
            ServerError::Request(e) => {
                error!(error = %e, "rejecting request before stream");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    INTERNAL_ERROR_MESSAGE.to_owned(),
                )
            }
            ServerError::Backend(e) => {
                error!(error = %e, "backend failed before stream");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    INTERNAL_ERROR_MESSAGE.to_owned(),
                )
            }
            ServerError::Task(e) => {
                error!(error = %e, "background task failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    INTERNAL_ERROR_MESSAGE.to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}
