//! Configuration file handling

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Debug adapter configurations, keyed by debugger name
    #[serde(default)]
    pub adapters: HashMap<String, AdapterConfig>,

    /// Default settings
    #[serde(default)]
    pub defaults: Defaults,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Stepping engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Configuration for a debug adapter
#[derive(Debug, Deserialize, Clone)]
pub struct AdapterConfig {
    /// Path to the adapter executable
    pub path: PathBuf,

    /// Additional arguments to pass to the adapter. Replaces the
    /// backend's default arguments when non-empty.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Default settings
#[derive(Debug, Deserialize)]
pub struct Defaults {
    /// Default debugger to use
    #[serde(default = "default_debugger")]
    pub debugger: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            debugger: default_debugger(),
        }
    }
}

fn default_debugger() -> String {
    "lldb".to_string()
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Timeout for adapter startup (initialize, launch, initialized event)
    #[serde(default = "default_adapter_init")]
    pub adapter_init_secs: u64,

    /// Timeout for individual DAP requests
    #[serde(default = "default_request")]
    pub request_secs: u64,

    /// How long the engine waits for the debuggee to stop after step/go
    #[serde(default = "default_stop")]
    pub stop_secs: u64,

    /// How long the parent waits for the sandbox process
    #[serde(default = "default_sandbox")]
    pub sandbox_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            adapter_init_secs: default_adapter_init(),
            request_secs: default_request(),
            stop_secs: default_stop(),
            sandbox_secs: default_sandbox(),
        }
    }
}

fn default_adapter_init() -> u64 {
    10
}
fn default_request() -> u64 {
    30
}
fn default_stop() -> u64 {
    60
}
fn default_sandbox() -> u64 {
    600
}

/// Stepping engine configuration
#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    /// Interval between run-state polls while the debuggee is running
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Step limit applied when a run does not configure one
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_steps: default_max_steps(),
        }
    }
}

fn default_poll_interval() -> u64 {
    10
}
fn default_max_steps() -> u64 {
    1000
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    super::Error::FileRead {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    }
                })?;
                return Self::parse(&content);
            }
        }
        Ok(Self::default())
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Get the explicitly configured adapter for a debugger, if any
    pub fn get_adapter(&self, name: &str) -> Option<AdapterConfig> {
        self.adapters.get(name).cloned()
    }
}
