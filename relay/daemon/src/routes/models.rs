//! Model listing route.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ServerError;
use crate::state::AppState;

/// Register model listing routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/ollama-list", get(list_models))
        .route("/api/models", get(list_models))
}

/// Models installed on the backend (`GET /api/ollama-list`).
///
/// Returns `{"models": [{"name": ..., "size": ..., ...}]}`.
pub async fn list_models(State(state): State<AppState>) -> Result<Json<Value>, ServerError> {
    let models = state.backend.list_models().await?;
    debug!(count = models.len(), "listed models");
    Ok(Json(json!({ "models": models })))
}
