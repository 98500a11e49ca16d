//! Relay Daemon
//!
//! Standalone HTTP server relaying chat completions from a local Ollama
//! instance to chat clients as an event stream.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (127.0.0.1:3000, Ollama at localhost:11434)
//! relay-daemon
//!
//! # Custom listen address and chat model
//! relay-daemon --bind 0.0.0.0:8080 --llm qwen2.5
//!
//! # With verbose logging
//! RUST_LOG=debug relay-daemon
//! ```
//!
//! # Environment Variables
//!
//! - `DEEPCHAT_CONFIG`: Config file path (default: `~/.config/deepchat/relay.toml`)
//! - `DEEPCHAT_BIND`: Listen address
//! - `OLLAMA_HOST` / `OLLAMA_PORT`: Ollama server (default: localhost:11434)
//! - `DEEPCHAT_LLM` / `DEEPCHAT_VISION` / `DEEPCHAT_LANGUAGE`: Default models
//! - `DEEPCHAT_LOG` / `DEEPCHAT_LOG_JSON`: Log filter and format
//! - `RUST_LOG`: Log filter (wins over the configured level)
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: Graceful shutdown (open streams are allowed to finish)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use relay_core::{default_config_path, load_config_from_path, ConfigOverrides, LlmBackend};
use relay_daemon::{build, AppState};

/// Streaming chat-completion relay
#[derive(Debug, Parser)]
#[command(name = "relay-daemon", version, about)]
struct Cli {
    /// Config file (TOML)
    #[arg(long, env = "DEEPCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:3000
    #[arg(long)]
    bind: Option<String>,

    /// Ollama host name or URL
    #[arg(long)]
    ollama_host: Option<String>,

    /// Ollama port
    #[arg(long)]
    ollama_port: Option<u16>,

    /// Default chat model
    #[arg(long)]
    llm: Option<String>,

    /// Default vision model
    #[arg(long)]
    vision: Option<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            bind: self.bind.clone(),
            ollama_host: self.ollama_host.clone(),
            ollama_port: self.ollama_port,
            llm: self.llm.clone(),
            vision: self.vision.clone(),
            log_level: self.log_level.clone(),
            log_json: self.log_json.then_some(true),
        }
    }
}

/// Initialise tracing: `RUST_LOG` first, then the configured level
fn init_tracing(level: &str, json: bool) {
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!("WARN: log level '{level}' is not a valid filter ({e}); falling back to 'info'");
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Configuration: file < env < CLI
    let mut config = load_config_from_path(cli.config.clone().or_else(default_config_path))
        .context("loading configuration")?;
    cli.overrides()
        .apply(&mut config)
        .context("applying command-line overrides")?;

    init_tracing(&config.log_level, config.log_json);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        source = %config.source(),
        "Starting relay daemon"
    );

    let backend = config.ollama_backend();
    if backend.health_check().await {
        info!(url = backend.base_url(), "Ollama reachable");
    } else {
        warn!(
            url = backend.base_url(),
            "Ollama not reachable yet; requests will fail until it is"
        );
    }

    let addr = config.bind_addr()?;
    let state = AppState::new(Arc::new(backend), config);
    let app = build(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Relay daemon stopped");
    Ok(())
}

/// Resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
