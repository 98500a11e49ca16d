//! Relay Core - Domain Logic for the deepchat Completion Relay
//!
//! This crate holds everything the relay daemon and the chat client share,
//! independent of any HTTP server framework. The daemon wires it into axum,
//! the client drives it from a terminal, and tests drive it headless.
//!
//! # Architecture
//!
//! ```text
//!   user input ──► composer ──► relay daemon (HTTP) ──► backend (Ollama)
//!                                    │                        │
//!                                    │◄──── fragments ────────┘
//!                                    │  reasoning::MarkerRewriter
//!                                    ▼
//!                              frame::StreamFrame (data: ...\n\n)
//!                                    │
//!                                    ▼
//!                         client consumer ──► store (conversations)
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: LLM backend abstraction (Ollama, scripted test backend)
//! - [`composer`]: Prompt composition and the system preamble
//! - [`config`]: TOML + environment configuration
//! - [`conversation`]: Conversation collection with persistent updates
//! - [`document`]: Document text extraction contract
//! - [`frame`]: Event-stream wire frames
//! - [`messages`]: Chat messages and roles
//! - [`reasoning`]: Reasoning marker rewriting and the reasoning/answer split
//! - [`request`]: The completion request sent to the relay
//! - [`store`]: Injected conversation store (get/set/subscribe)

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod composer;
pub mod config;
pub mod conversation;
pub mod document;
pub mod frame;
pub mod messages;
pub mod reasoning;
pub mod request;
pub mod store;

// Re-exports for convenience
pub use backend::{
    BackendCall, BackendError, FragmentStream, LlmBackend, ModelInfo, OllamaBackend,
    ScriptedBackend,
};
pub use composer::{build_messages, compose_prompt, system_preamble};
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, RelayConfig,
};
pub use conversation::{Conversation, ConversationCollection, ConversationError, ConversationId};
pub use document::{
    join_pages, DocumentError, DocumentExtractor, ExtractedDocument, PdfExtractor, PlainTextExtractor,
};
pub use frame::{FrameDecoder, FrameError, StreamFrame};
pub use messages::{ChatMessage, HistoryEntry, MessageError, MessageId, MessageRole, StreamStatus};
pub use reasoning::{MarkerRewriter, ReasoningSplit};
pub use request::{CompletionRequest, ModelConfig, RequestError};
pub use store::{ConversationStore, JsonFileStore, MemoryStore, StoreError, StoreState};
