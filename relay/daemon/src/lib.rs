//! Relay Daemon - HTTP Surface of the deepchat Completion Relay
//!
//! An axum server that accepts completion requests, forwards them to the
//! configured LLM backend and relays the output as a live event stream.
//! The binary in `main.rs` only parses arguments, loads configuration and
//! serves [`routes::build`]; everything testable lives here.
//!
//! # Module Overview
//!
//! - [`error`]: `ServerError` and its HTTP mapping
//! - [`relay`]: The per-stream relay task
//! - [`routes`]: Router and handlers
//! - [`state`]: Shared handler state

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod error;
pub mod relay;
pub mod routes;
pub mod state;

pub use error::ServerError;
pub use routes::build;
pub use state::AppState;
