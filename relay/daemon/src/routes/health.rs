//! Health endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

/// Register health-check routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(get_health))
}

/// Health endpoint (`GET /health`).
///
/// Always 200 while the relay is up; `backend_reachable` reports whether the
/// completion backend answered its own health check.
pub async fn get_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "backend": state.backend.name(),
        "backend_reachable": state.backend.health_check().await,
    }))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
