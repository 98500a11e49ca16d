//! Shared application state injected into every Axum handler.
//!
//! Nothing here is mutable: the relay keeps no per-request or per-client
//! state between requests.

use std::sync::Arc;

use relay_core::{DocumentExtractor, LlmBackend, PdfExtractor, RelayConfig};

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Completion backend
    pub backend: Arc<dyn LlmBackend>,
    /// Turns uploaded documents into page text
    pub extractor: Arc<dyn DocumentExtractor>,
    /// Resolved configuration
    pub config: Arc<RelayConfig>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("backend", &self.backend.name())
            .field("bind", &self.config.bind)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// State with the PDF (and plain-text) document extractor
    pub fn new(backend: Arc<dyn LlmBackend>, config: RelayConfig) -> Self {
        Self {
            backend,
            extractor: Arc::new(PdfExtractor),
            config: Arc::new(config),
        }
    }

    /// Replace the document extractor
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn DocumentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }
}
