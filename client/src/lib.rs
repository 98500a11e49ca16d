//! deepchat Client - Terminal Surface of the Completion Relay
//!
//! Talks to the relay daemon over HTTP, consumes its event stream and keeps
//! conversations in a [`relay_core::ConversationStore`].
//!
//! # Module Overview
//!
//! - [`client`]: `reqwest` wrapper over the relay routes
//! - [`consumer`]: Event-stream decoding into content updates
//! - [`repl`]: Command parsing and plain-text rendering
//! - [`session`]: Conversation turns recorded in the store

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod client;
pub mod consumer;
pub mod repl;
pub mod session;

pub use client::{ClientError, RelayClient, DEFAULT_RELAY_URL};
pub use consumer::{StreamConsumer, StreamObserver, StreamOutcome};
pub use session::{Attachment, ChatSession, SessionError};
