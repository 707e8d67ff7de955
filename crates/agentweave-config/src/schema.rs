//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    #[serde(default)]
    pub broker: BrokerSettings,

    #[serde(default)]
    pub state: StateSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// `<config dir>/agentweave/config.toml`, when the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("agentweave").join("config.toml"))
    }
}

/// Defaults applied to every agent the process creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_timeout_secs: Option<u64>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            task_timeout_secs: None,
        }
    }
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_max_concurrent_tasks() -> usize {
    1
}

/// Workflow orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Sender id of task assignments.
    #[serde(default = "default_orchestrator_id")]
    pub id: String,

    /// Concurrency limit for workflows that declare none.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_step_timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_retry: Option<RetrySettings>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            id: default_orchestrator_id(),
            max_concurrency: default_max_concurrency(),
            default_step_timeout_secs: None,
            default_retry: None,
        }
    }
}

fn default_orchestrator_id() -> String {
    "orchestrator".to_string()
}

fn default_max_concurrency() -> usize {
    4
}

/// Retry policy for steps that declare none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Message broker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerSettings {
    /// Per-subscription backlog above which a warning is logged.
    #[serde(default = "default_queue_warn_threshold")]
    pub queue_warn_threshold: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            queue_warn_threshold: default_queue_warn_threshold(),
        }
    }
}

fn default_queue_warn_threshold() -> usize {
    1000
}

/// State storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    Memory,
    File,
}

/// State store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSettings {
    #[serde(default)]
    pub backend: StateBackend,

    /// Directory of the file backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Buffered state events per subscriber.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            backend: StateBackend::default(),
            path: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl StateSettings {
    /// Configured path, or `<data dir>/agentweave/state`.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| dirs::data_local_dir().map(|dir| dir.join("agentweave").join("state")))
    }
}

fn default_event_capacity() -> usize {
    1024
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,

    /// Write daily rolling log files here in addition to stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directory: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
