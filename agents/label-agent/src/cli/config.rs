//! Configuration module
//!
//! Handles loading and validating agent configuration from TOML files.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::agent::batch::DEFAULT_BATCH_LIMIT;

/// Main configuration structure for the Label Agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name the controller knows this agent by
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    /// File holding the labels this agent should advertise
    #[serde(default = "default_labels_file")]
    pub labels_file: PathBuf,

    /// Controller connection settings
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Label file watcher settings
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Controller connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Base URL of the controller
    #[serde(default = "default_controller_url")]
    pub url: String,

    /// Username for basic authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Password or API token for basic authentication
    #[serde(default)]
    pub password: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Attempts per label request before giving up
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Delay between attempts in milliseconds
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Skip TLS certificate verification
    #[serde(default)]
    pub disable_tls_verification: bool,
}

/// Label file watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Seconds between label file checks
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Size in characters past which a label batch is sent
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    /// Push the label file to the controller once at startup
    #[serde(default = "default_true")]
    pub sync_on_startup: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_agent_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn default_labels_file() -> PathBuf {
    PathBuf::from("labels.txt")
}

fn default_controller_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    2000
}

fn default_poll_interval() -> u64 {
    10
}

fn default_batch_limit() -> usize {
    DEFAULT_BATCH_LIMIT
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            url: default_controller_url(),
            username: None,
            password: None,
            timeout_secs: default_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff(),
            disable_tls_verification: false,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            batch_limit: default_batch_limit(),
            sync_on_startup: default_true(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            agent_name: default_agent_name(),
            labels_file: default_labels_file(),
            controller: ControllerConfig::default(),
            watcher: WatcherConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Reject settings the agent cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.agent_name.trim().is_empty() {
            bail!("agent_name must not be empty");
        }
        if self.controller.url.trim().is_empty() {
            bail!("controller.url must not be empty");
        }
        if self.watcher.poll_interval_secs == 0 {
            bail!("watcher.poll_interval_secs must be greater than zero");
        }
        if self.watcher.batch_limit == 0 {
            bail!("watcher.batch_limit must be greater than zero");
        }
        Ok(())
    }
}
