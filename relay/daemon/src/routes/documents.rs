//! Document text extraction route.
//!
//! `POST /api/pdf` takes a multipart upload with up to ten `files` fields
//! and answers with one `{name, numpages, text}` object per file, in upload
//! order. The `text` is what the client later sends as the request's
//! document field. Extraction runs on the blocking pool.

use axum::extract::{Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use tracing::{debug, info};

use relay_core::ExtractedDocument;

use crate::error::ServerError;
use crate::state::AppState;

/// Upload field carrying documents
pub const FILES_FIELD: &str = "files";

/// Most documents accepted per upload
pub const MAX_FILES: usize = 10;

/// Register document routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/pdf", post(extract_documents))
}

/// Extract text from uploaded documents (`POST /api/pdf`).
pub async fn extract_documents(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Vec<ExtractedDocument>>, ServerError> {
    let mut documents = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::Upload(e.to_string()))?
    {
        if field.name() != Some(FILES_FIELD) {
            debug!(field = ?field.name(), "ignoring upload field");
            continue;
        }
        if documents.len() == MAX_FILES {
            return Err(ServerError::Upload(format!(
                "at most {MAX_FILES} files per upload"
            )));
        }

        let name = field.file_name().unwrap_or("document").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ServerError::Upload(e.to_string()))?;
        let extractor = state.extractor.clone();
        let document =
            tokio::task::spawn_blocking(move || extractor.extract(&name, &bytes)).await??;
        debug!(name = %document.name, pages = document.numpages, "document extracted");
        documents.push(document);
    }

    info!(count = documents.len(), "documents extracted");
    Ok(Json(documents))
}
