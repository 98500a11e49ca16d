//! Streaming chat-completion route.
//!
//! `POST /api/deep-chat` (also mounted at `/api/chat`) takes a completion
//! request, optionally has the vision model describe an attached image,
//! composes the prompt and relays the chat model's output as an event
//! stream. Any other method gets `405 Method not allowed` without touching
//! the backend.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use relay_core::request::{DEFAULT_LLM, DEFAULT_VISION};
use relay_core::{build_messages, compose_prompt, system_preamble, CompletionRequest};

use crate::error::ServerError;
use crate::relay::{spawn_relay, FrameStream, RelayOptions};
use crate::routes::MAX_BODY_BYTES;
use crate::state::AppState;

/// Register chat routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/deep-chat",
            post(deep_chat).fallback(method_not_allowed),
        )
        .route("/api/chat", post(deep_chat).fallback(method_not_allowed))
}

/// Any non-POST request to a chat route.
pub async fn method_not_allowed() -> ServerError {
    ServerError::MethodNotAllowed
}

/// Wrap a frame stream in the event-stream response
fn event_stream(frames: FrameStream) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

/// Streaming chat completion (`POST /api/deep-chat`).
///
/// The body is read here rather than by an extractor, so that an oversized,
/// interrupted or malformed request is reported like every other pre-stream
/// failure.
pub async fn deep_chat(State(state): State<AppState>, body: Body) -> Result<Response, ServerError> {
    let span = info_span!("deep_chat", request_id = %Uuid::new_v4());
    relay_completion(state, body).instrument(span).await
}

async fn relay_completion(state: AppState, body: Body) -> Result<Response, ServerError> {
    let body: Bytes = axum::body::to_bytes(body, MAX_BODY_BYTES).await?;
    let request = CompletionRequest::from_json(&body)?;
    let models = request.model_config.clone().or(&state.config.models);
    let llm = models.llm.as_deref().unwrap_or(DEFAULT_LLM);

    debug!(
        llm,
        prompt_len = request.prompt.len(),
        history = request.history.len(),
        has_image = request.image.is_some(),
        has_document = request.document_text().is_some(),
        "chat request"
    );

    let description = match request.image_bytes()? {
        Some(image) => {
            let vision = models.vision.as_deref().unwrap_or(DEFAULT_VISION);
            let description = state.backend.describe_image(vision, &image).await?;
            debug!(vision, chars = description.len(), "image described");
            Some(description)
        }
        None => None,
    };

    let prompt = compose_prompt(
        &request.prompt,
        description.as_deref(),
        request.document_text(),
    );
    let messages = build_messages(
        system_preamble(models.language.as_deref()),
        &request.history,
        prompt,
    );

    let cancel = CancellationToken::new();
    let fragments = state
        .backend
        .stream_chat(llm, messages, cancel.clone())
        .await?;

    info!(llm, backend = state.backend.name(), "stream opened");
    let frames = spawn_relay(fragments, cancel, RelayOptions::from(state.config.as_ref()));
    Ok(event_stream(frames))
}
