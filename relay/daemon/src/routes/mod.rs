//! Axum router construction.
//!
//! [`build`] assembles the complete application router:
//! - Streaming chat completion (`/api/deep-chat`, `/api/chat`)
//! - Model listing (`/api/ollama-list`, `/api/models`)
//! - Document text extraction (`/api/pdf`)
//! - Health (`/health`)
//!
//! plus a request-logging layer and a raised body limit for inline images.

pub mod chat;
pub mod documents;
pub mod health;
pub mod models;

use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use tracing::info;

use crate::state::AppState;

/// Largest accepted request body (base64 images are big)
pub const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: AppState) -> Router {
    Router::new()
        .merge(chat::router())
        .merge(models::router())
        .merge(documents::router())
        .merge(health::router())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// Log method, path, status and time-to-headers of every request
///
/// For streaming responses the latency covers only the time until the
/// stream opened.
async fn log_requests(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        "request handled"
    );
    response
}
