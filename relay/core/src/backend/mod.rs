//! LLM Backend Integration
//!
//! This module provides abstracted access to LLM backends through a common
//! trait interface. The relay holds an `Arc<dyn LlmBackend>` and never
//! names a concrete backend.
//!
//! # Available Backends
//!
//! - **Ollama**: Local LLM server (default)
//! - **Scripted**: Deterministic in-process backend for tests
//!
//! # Usage
//!
//! ```ignore
//! use relay_core::backend::{LlmBackend, OllamaBackend, DEFAULT_PORT};
//!
//! let backend = OllamaBackend::new("127.0.0.1:11434", DEFAULT_PORT);
//! let mut fragments = backend.stream_chat("llama3.2", messages, cancel).await?;
//! while let Some(fragment) = fragments.next().await { /* ... */ }
//! ```

mod ollama;
mod scripted;
mod traits;

pub use ollama::{OllamaBackend, DEFAULT_HOST, DEFAULT_PORT};
pub use scripted::{BackendCall, ScriptedBackend};
pub use traits::{BackendError, FragmentStream, LlmBackend, ModelInfo, DESCRIBE_IMAGE_PROMPT};
