//! TOML Configuration File Support
//!
//! Centralized configuration loading for the relay, supporting a TOML
//! configuration file at `~/.config/deepchat/relay.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (when applicable)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! The configuration file follows XDG Base Directory specification:
//! - `$XDG_CONFIG_HOME/deepchat/relay.toml` (typically `~/.config/deepchat/relay.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:3000"
//!
//! [ollama]
//! host = "localhost"
//! port = 11434
//!
//! [models]
//! llm = "deepseek-r1:1.5b"
//! vision = "moondream:latest"
//! language = "english"
//!
//! [relay]
//! split_markers_across_fragments = true
//! channel_capacity = 32
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{OllamaBackend, DEFAULT_HOST, DEFAULT_PORT};
use crate::request::ModelConfig;

/// Default listen address of the relay daemon
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// Default capacity of the per-stream frame channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Listen address, e.g. "127.0.0.1:3000"
    pub bind: Option<String>,
}

/// Ollama section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaToml {
    /// Ollama host name or URL
    pub host: Option<String>,
    /// Ollama port
    pub port: Option<u16>,
}

/// Relay section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Rewrite reasoning markers that straddle fragment boundaries
    pub split_markers_across_fragments: Option<bool>,
    /// Frames buffered between the relay task and the response body
    pub channel_capacity: Option<usize>,
}

/// Logging section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingToml {
    /// Default log filter when `RUST_LOG` is unset
    pub level: Option<String>,
    /// Emit JSON log lines
    pub json: Option<bool>,
}

/// Root TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepchatToml {
    /// Server settings
    pub server: ServerToml,
    /// Ollama settings
    pub ollama: OllamaToml,
    /// Default model selection
    pub models: ModelConfig,
    /// Relay behaviour
    pub relay: RelayToml,
    /// Logging settings
    pub logging: LoggingToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved relay configuration
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Listen address
    pub bind: String,
    /// Ollama host name or URL
    pub ollama_host: String,
    /// Ollama port
    pub ollama_port: u16,
    /// Models used when a request leaves them unset
    pub models: ModelConfig,
    /// Rewrite reasoning markers that straddle fragment boundaries
    pub split_markers_across_fragments: bool,
    /// Frames buffered between the relay task and the response body
    pub channel_capacity: usize,
    /// Default log filter
    pub log_level: String,
    /// Emit JSON log lines
    pub log_json: bool,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    /// Source of the configuration
    source: ConfigSource,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            ollama_host: DEFAULT_HOST.to_string(),
            ollama_port: DEFAULT_PORT,
            models: ModelConfig::stock(),
            split_markers_across_fragments: true,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            log_level: "info".to_string(),
            log_json: false,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelayConfig {
    /// Create a new config with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the configuration source
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Parsed listen address
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if `bind` is not `host:port`.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|e| ConfigError::ValidationError(format!("bind '{}': {e}", self.bind)))
    }

    /// Check the resolved values
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        if self.ollama_host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "ollama host must not be empty".to_string(),
            ));
        }
        if self.ollama_port == 0 {
            return Err(ConfigError::ValidationError(
                "ollama port must not be 0".to_string(),
            ));
        }
        OllamaBackend::resolve_base_url(&self.ollama_host, self.ollama_port)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        if self.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "relay channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Backend described by this configuration
    #[must_use]
    pub fn ollama_backend(&self) -> OllamaBackend {
        OllamaBackend::new(self.ollama_host.clone(), self.ollama_port)
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/deepchat/relay.toml` or `~/.config/deepchat/relay.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("deepchat").join("relay.toml"))
}

/// Load configuration from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed,
/// or if the resulting values are invalid.
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the environment
///
/// A missing file is not an error; defaults are used instead.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed,
/// or if the resulting values are invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // Start with defaults
    let mut config = RelayConfig::default();

    // Try to load from file
    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: DeepchatToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    // Apply environment variables (overrides file values)
    apply_env_config(&mut config, env)?;

    config.validate()?;
    Ok(config)
}

fn apply_toml_config(config: &mut RelayConfig, toml: DeepchatToml) {
    if let Some(bind) = toml.server.bind {
        config.bind = bind;
    }

    if let Some(host) = toml.ollama.host {
        config.ollama_host = host;
    }
    if let Some(port) = toml.ollama.port {
        config.ollama_port = port;
    }

    config.models = toml.models.or(&config.models);

    if let Some(split) = toml.relay.split_markers_across_fragments {
        config.split_markers_across_fragments = split;
    }
    if let Some(capacity) = toml.relay.channel_capacity {
        config.channel_capacity = capacity;
    }

    if let Some(level) = toml.logging.level {
        config.log_level = level;
    }
    if let Some(json) = toml.logging.json {
        config.log_json = json;
    }
}

fn parse_flag(value: &str) -> bool {
    value != "0" && !value.eq_ignore_ascii_case("false")
}

fn apply_env_config<F>(config: &mut RelayConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(bind) = env("DEEPCHAT_BIND") {
        config.bind = bind;
        config.source = ConfigSource::Env;
    }

    if let Some(host) = env("OLLAMA_HOST") {
        config.ollama_host = host;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = env("OLLAMA_PORT") {
        config.ollama_port = port
            .parse()
            .map_err(|e| ConfigError::ValidationError(format!("OLLAMA_PORT '{port}': {e}")))?;
        config.source = ConfigSource::Env;
    }

    let models = ModelConfig {
        llm: env("DEEPCHAT_LLM"),
        vision: env("DEEPCHAT_VISION"),
        language: env("DEEPCHAT_LANGUAGE"),
    };
    if models != ModelConfig::default() {
        config.models = models.or(&config.models);
        config.source = ConfigSource::Env;
    }

    if let Some(level) = env("DEEPCHAT_LOG") {
        config.log_level = level;
        config.source = ConfigSource::Env;
    }
    if let Some(json) = env("DEEPCHAT_LOG_JSON") {
        config.log_json = parse_flag(&json);
        config.source = ConfigSource::Env;
    }

    Ok(())
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// CLI overrides for configuration values
///
/// These values take highest priority and override both file and env settings.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Override listen address
    pub bind: Option<String>,
    /// Override Ollama host
    pub ollama_host: Option<String>,
    /// Override Ollama port
    pub ollama_port: Option<u16>,
    /// Override default chat model
    pub llm: Option<String>,
    /// Override default vision model
    pub vision: Option<String>,
    /// Override log filter
    pub log_level: Option<String>,
    /// Force JSON log output
    pub log_json: Option<bool>,
}

impl ConfigOverrides {
    /// Create empty overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listen address override
    #[must_use]
    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = Some(bind.into());
        self
    }

    /// Set default chat model override
    #[must_use]
    pub fn with_llm(mut self, model: impl Into<String>) -> Self {
        self.llm = Some(model.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.bind.is_none()
            && self.ollama_host.is_none()
            && self.ollama_port.is_none()
            && self.llm.is_none()
            && self.vision.is_none()
            && self.log_level.is_none()
            && self.log_json.is_none()
    }

    /// Apply overrides to a configuration and re-validate it
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if an override is invalid.
    pub fn apply(&self, config: &mut RelayConfig) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Ok(());
        }
        config.source = ConfigSource::Cli;

        if let Some(ref bind) = self.bind {
            config.bind.clone_from(bind);
        }
        if let Some(ref host) = self.ollama_host {
            config.ollama_host.clone_from(host);
        }
        if let Some(port) = self.ollama_port {
            config.ollama_port = port;
        }
        config.models = ModelConfig {
            llm: self.llm.clone(),
            vision: self.vision.clone(),
            language: None,
        }
        .or(&config.models);
        if let Some(ref level) = self.log_level {
            config.log_level.clone_from(level);
        }
        if let Some(json) = self.log_json {
            config.log_json = json;
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
