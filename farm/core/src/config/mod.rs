//! TOML Configuration File Support
//!
//! This module provides configuration loading for the farm router, from a
//! TOML file at `~/.config/neural-farm/farm.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! port = 8899
//!
//! [health]
//! interval_ms = 20000
//! probe_timeout_ms = 5000
//!
//! [upstream]
//! request_timeout_ms = 120000
//! default_max_tokens = 1024
//!
//! [queue]
//! capacity = 10
//! timeout_ms = 60000
//!
//! [[nodes]]
//! name = "mac"
//! host = "127.0.0.1"
//! port = 8890
//! protocol = "openai"
//! tier = "smart"
//! parallel = 2
//!
//! [[nodes]]
//! name = "iphone"
//! host = "10.0.0.7"
//! port = 8889
//! protocol = "simple-chat"
//! tier = "primary"
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::routing::{NodeSpec, NodeTier, Protocol};

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

/// Server section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Listening port
    pub port: Option<u16>,
}

/// Health section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthToml {
    /// Milliseconds between probing rounds
    pub interval_ms: Option<u64>,
    /// Per-request probe timeout in milliseconds
    pub probe_timeout_ms: Option<u64>,
}

/// Upstream section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamToml {
    /// Upstream request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,
    /// `max_tokens` used when the caller sends none
    pub default_max_tokens: Option<u32>,
}

/// Queue section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueToml {
    /// Maximum number of waiting requests
    pub capacity: Option<usize>,
    /// How long a request may wait, in milliseconds
    pub timeout_ms: Option<u64>,
}

/// Root of the TOML configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FarmToml {
    /// Server settings
    pub server: ServerToml,
    /// Health monitor settings
    pub health: HealthToml,
    /// Upstream request settings
    pub upstream: UpstreamToml,
    /// Request queue settings
    pub queue: QueueToml,
    /// Farm nodes; replaces the default node list when present
    pub nodes: Option<Vec<NodeSpec>>,
}

// =============================================================================
// Loaded Configuration
// =============================================================================

/// Complete farm configuration
#[derive(Clone, Debug)]
pub struct FarmConfig {
    /// Listening port
    pub port: u16,
    /// Farm nodes
    pub nodes: Vec<NodeSpec>,
    /// Time between probing rounds
    pub health_interval: Duration,
    /// Per-request probe timeout
    pub probe_timeout: Duration,
    /// Upstream request timeout
    pub request_timeout: Duration,
    /// `max_tokens` used when the caller sends none
    pub default_max_tokens: u32,
    /// Maximum number of waiting requests
    pub queue_capacity: usize,
    /// How long a request may wait for capacity
    pub queue_timeout: Duration,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            port: 8899,
            nodes: vec![
                NodeSpec::new("local", "127.0.0.1", 8890, Protocol::OpenAi, NodeTier::Smart)
                    .with_parallel(2),
            ],
            health_interval: Duration::from_secs(20),
            probe_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(120),
            default_max_tokens: 1024,
            queue_capacity: 10,
            queue_timeout: Duration::from_secs(60),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl FarmConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check the configuration for values the router cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.port == 0 {
            return invalid("server port must be non-zero".into());
        }
        if self.nodes.is_empty() {
            return invalid("at least one node must be configured".into());
        }

        let mut names = HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() {
                return invalid("node names must not be empty".into());
            }
            if !names.insert(node.name.as_str()) {
                return invalid(format!("duplicate node name '{}'", node.name));
            }
            if node.parallel == 0 {
                return invalid(format!("node '{}' needs parallel >= 1", node.name));
            }
            if node.port == 0 {
                return invalid(format!("node '{}' needs a non-zero port", node.name));
            }
        }

        let durations = [
            ("health interval", self.health_interval),
            ("probe timeout", self.probe_timeout),
            ("request timeout", self.request_timeout),
            ("queue timeout", self.queue_timeout),
        ];
        for (what, value) in durations {
            if value.is_zero() {
                return invalid(format!("{what} must be non-zero"));
            }
        }
        if self.queue_capacity == 0 {
            return invalid("queue capacity must be non-zero".into());
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/neural-farm/farm.toml` or
/// `~/.config/neural-farm/farm.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("neural-farm").join("farm.toml"))
}

/// Load configuration from the default path, the environment and defaults
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<FarmConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<FarmConfig, ConfigError> {
    load_with_env(path, |key| std::env::var(key).ok())
}

fn load_with_env<F>(path: Option<PathBuf>, env: F) -> Result<FarmConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = FarmConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: FarmToml = toml::from_str(&toml_content)?;
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

    apply_env_config(&mut config, env);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut FarmConfig, toml: FarmToml) {
    if let Some(port) = toml.server.port {
        config.port = port;
    }
    if let Some(ms) = toml.health.interval_ms {
        config.health_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.health.probe_timeout_ms {
        config.probe_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.upstream.request_timeout_ms {
        config.request_timeout = Duration::from_millis(ms);
    }
    if let Some(tokens) = toml.upstream.default_max_tokens {
        config.default_max_tokens = tokens;
    }
    if let Some(capacity) = toml.queue.capacity {
        config.queue_capacity = capacity;
    }
    if let Some(ms) = toml.queue.timeout_ms {
        config.queue_timeout = Duration::from_millis(ms);
    }
    if let Some(nodes) = toml.nodes {
        config.nodes = nodes;
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut FarmConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let parsed = |key: &str| -> Option<u64> {
        let raw = env(key)?;
        match raw.trim().parse::<u64>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(var = key, value = %raw, "ignoring non-numeric environment value");
                None
            }
        }
    };

    if let Some(port) = parsed("FARM_PORT").and_then(|v| u16::try_from(v).ok()) {
        config.port = port;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parsed("FARM_HEALTH_INTERVAL_MS") {
        config.health_interval = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parsed("FARM_PROBE_TIMEOUT_MS") {
        config.probe_timeout = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parsed("FARM_REQUEST_TIMEOUT_MS") {
        config.request_timeout = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(tokens) = parsed("FARM_DEFAULT_MAX_TOKENS").and_then(|v| u32::try_from(v).ok()) {
        config.default_max_tokens = tokens;
        config.source = ConfigSource::Env;
    }
    if let Some(capacity) = parsed("FARM_QUEUE_CAPACITY").and_then(|v| usize::try_from(v).ok()) {
        config.queue_capacity = capacity;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parsed("FARM_QUEUE_TIMEOUT_MS") {
        config.queue_timeout = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Overrides
// =============================================================================

/// Configuration overrides from the command line
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Listening port override
    pub port: Option<u16>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listening port override
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut FarmConfig) {
        if let Some(port) = self.port {
            config.port = port;
            config.source = ConfigSource::Cli;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
