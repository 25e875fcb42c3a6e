//! Engine configuration types for Stepwise.
//!
//! `EngineConfig` represents the top-level `config.toml`. Every field has a
//! default so an empty or missing file yields a working configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the Stepwise engine and its server.
///
/// Loaded from `~/.stepwise/config.toml` (or the path given on the command line).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SQLite database URL. Defaults to `sqlite://{data_dir}/stepwise.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub engine: EngineSettings,
}

/// HTTP server bind address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4002
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Caller-side polling used by synchronous-style run triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_interval_ms() -> u64 {
    2_000
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Run controller behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Re-drive pending and running runs when the server starts.
    #[serde(default = "default_resume_on_startup")]
    pub resume_on_startup: bool,
    /// Capacity of the run event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Directory scanned for simple-workflow YAML files at startup.
    /// Defaults to `{data_dir}/workflows`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflows_dir: Option<PathBuf>,
}

fn default_resume_on_startup() -> bool {
    true
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            resume_on_startup: default_resume_on_startup(),
            event_capacity: default_event_capacity(),
            workflows_dir: None,
        }
    }
}
