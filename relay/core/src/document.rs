//! Document Text
//!
//! Attached documents reach the model as plain text: each page's text
//! followed by the page separator `^^^`, pages joined by a blank line. The
//! client sends that text as the request's document field and the prompt
//! composer appends it to the user's prompt.
//!
//! Extraction itself sits behind [`DocumentExtractor`]:
//!
//! - [`PdfExtractor`]: PDF files via `lopdf`, one text block per page, and
//!   plain text for everything else
//! - [`PlainTextExtractor`]: UTF-8 text, treating form feeds as page breaks
//!   (the convention of `pdftotext`-style converters)
//!
//! Extraction is CPU-bound and synchronous; async callers run it on the
//! blocking pool.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Marker appended to every page's text
pub const PAGE_SEPARATOR: &str = "^^^";

/// Leading bytes of every PDF file
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Page break inside plain-text documents
const FORM_FEED: char = '\u{0c}';

/// Errors from extracting document text
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    /// The document is in a format this extractor cannot read
    #[error("{name}: unsupported document format ({reason})")]
    Unsupported {
        /// Document name
        name: String,
        /// What was recognized
        reason: String,
    },

    /// The document is not valid UTF-8 text
    #[error("{0}: document is not valid UTF-8 text")]
    NotText(String),

    /// The document claims a format but could not be parsed
    #[error("{name}: malformed document ({reason})")]
    Malformed {
        /// Document name
        name: String,
        /// Parser message
        reason: String,
    },
}

/// Text extracted from one document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    /// Original file name
    pub name: String,
    /// Number of pages
    pub numpages: usize,
    /// Page texts, each followed by [`PAGE_SEPARATOR`]
    pub text: String,
}

impl ExtractedDocument {
    /// Build from per-page texts
    pub fn from_pages<I, S>(name: impl Into<String>, pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pages: Vec<S> = pages.into_iter().collect();
        Self {
            name: name.into(),
            numpages: pages.len(),
            text: join_pages(pages),
        }
    }
}

/// Join page texts, terminating each with [`PAGE_SEPARATOR`]
#[must_use]
pub fn join_pages<I, S>(pages: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    pages
        .into_iter()
        .map(|page| format!("{}{PAGE_SEPARATOR}", page.as_ref()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Turns an uploaded file into page text
pub trait DocumentExtractor: Send + Sync {
    /// Extract the text of `bytes`, named `name`
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError`] if the document cannot be read.
    fn extract(&self, name: &str, bytes: &[u8]) -> Result<ExtractedDocument, DocumentError>;
}

/// Extractor for UTF-8 text with form-feed page breaks
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainTextExtractor;

impl DocumentExtractor for PlainTextExtractor {
    fn extract(&self, name: &str, bytes: &[u8]) -> Result<ExtractedDocument, DocumentError> {
        if bytes.starts_with(PDF_MAGIC) {
            return Err(DocumentError::Unsupported {
                name: name.to_string(),
                reason: "binary PDF".to_string(),
            });
        }
        let text = std::str::from_utf8(bytes).map_err(|_| DocumentError::NotText(name.to_string()))?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let mut pages: Vec<&str> = text.split(FORM_FEED).collect();
        // Converters end the last page with a form feed too
        if pages.len() > 1 && pages.last().is_some_and(|p| p.trim().is_empty()) {
            pages.pop();
        }
        if pages.len() == 1 && pages[0].trim().is_empty() {
            pages.clear();
        }

        Ok(ExtractedDocument::from_pages(name, pages))
    }
}

/// Extractor for PDF files; anything else goes to [`PlainTextExtractor`]
///
/// Pages whose text cannot be extracted (scans, unusual fonts) still count
/// and contribute an empty block.
#[derive(Clone, Copy, Debug, Default)]
pub struct PdfExtractor;

impl DocumentExtractor for PdfExtractor {
    fn extract(&self, name: &str, bytes: &[u8]) -> Result<ExtractedDocument, DocumentError> {
        if !bytes.starts_with(PDF_MAGIC) {
            return PlainTextExtractor.extract(name, bytes);
        }

        let document = lopdf::Document::load_mem(bytes).map_err(|e| DocumentError::Malformed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let pages: Vec<String> = document
            .get_pages()
            .keys()
            .map(|&number| match document.extract_text(&[number]) {
                Ok(text) => text.trim_end().to_string(),
                Err(e) => {
                    warn!(name, page = number, error = %e, "No text on PDF page");
                    String::new()
                }
            })
            .collect();
        debug!(name, pages = pages.len(), "PDF text extracted");

        Ok(ExtractedDocument::from_pages(name, pages))
    }
}
