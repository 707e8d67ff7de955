//! Agent protocol definitions.
//!
//! An agent is a single runtime type parameterized by an [`AgentBehavior`]
//! strategy object. The behavior supplies the task execution hook and the
//! lifecycle callbacks; the runtime (in `agentweave-core`) owns the state
//! machine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::AgentError;
use crate::message::{MessageHandler, MessageType};
use crate::task::{Task, TaskResult};
use crate::types::Metadata;

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Initializing,
    Idle,
    Busy,
    Paused,
    Error,
    Terminated,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Initializing => "INITIALIZING",
            AgentStatus::Idle => "IDLE",
            AgentStatus::Busy => "BUSY",
            AgentStatus::Paused => "PAUSED",
            AgentStatus::Error => "ERROR",
            AgentStatus::Terminated => "TERMINATED",
        }
    }

    /// Whether the agent can accept new task assignments in this status.
    pub fn accepts_tasks(&self) -> bool {
        matches!(self, AgentStatus::Idle | AgentStatus::Busy | AgentStatus::Error)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent ID.
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Free-form type tag.
    #[serde(rename = "type")]
    pub agent_type: String,

    /// Declared capabilities.
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Maximum number of tasks executing at once.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Upper bound for a single `execute_task` call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_timeout_ms: Option<u64>,

    #[serde(default)]
    pub metadata: Metadata,
}

fn default_max_concurrent_tasks() -> usize {
    1
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

impl AgentConfig {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        agent_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            agent_type: agent_type.into(),
            capabilities: Vec::new(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            task_timeout_ms: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn with_heartbeat_interval_ms(mut self, interval_ms: u64) -> Self {
        self.heartbeat_interval_ms = interval_ms;
        self
    }

    pub fn with_task_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.task_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Returns the subset of `required` this agent does not declare.
    pub fn missing_capabilities(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|cap| !self.has_capability(cap))
            .cloned()
            .collect()
    }

    /// Apply overrides on top of this configuration.
    ///
    /// The id is never overridden. Metadata entries are merged key by key.
    pub fn merge(&mut self, overrides: AgentOverrides) {
        if let Some(name) = overrides.name {
            self.name = name;
        }
        if let Some(capabilities) = overrides.capabilities {
            self.capabilities = capabilities;
        }
        if let Some(max) = overrides.max_concurrent_tasks {
            self.max_concurrent_tasks = max;
        }
        if let Some(interval) = overrides.heartbeat_interval_ms {
            self.heartbeat_interval_ms = interval;
        }
        if overrides.task_timeout_ms.is_some() {
            self.task_timeout_ms = overrides.task_timeout_ms;
        }
        self.metadata.extend(overrides.metadata);
    }
}

/// Partial configuration applied by `initialize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentOverrides {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub max_concurrent_tasks: Option<usize>,
    #[serde(default)]
    pub heartbeat_interval_ms: Option<u64>,
    #[serde(default)]
    pub task_timeout_ms: Option<u64>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Mutable runtime metadata of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub status: AgentStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_tasks: Vec<String>,
    #[serde(default)]
    pub completed_tasks: u64,
    #[serde(default)]
    pub failed_tasks: u64,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            status: AgentStatus::Initializing,
            started_at: None,
            last_heartbeat: None,
            current_tasks: Vec::new(),
            completed_tasks: 0,
            failed_tasks: 0,
        }
    }
}

/// Persisted view of an agent: identity plus runtime metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub config: AgentConfig,
    pub state: AgentState,
}

/// Events emitted by an agent runtime.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Emitted on every status change and on every heartbeat.
    StateChanged {
        agent_id: String,
        previous: AgentStatus,
        state: AgentState,
    },
    TaskStarted {
        agent_id: String,
        task_id: String,
    },
    TaskCompleted {
        agent_id: String,
        task_id: String,
        success: bool,
    },
    TaskFailed {
        agent_id: String,
        task_id: String,
        error: String,
    },
}

impl AgentEvent {
    pub fn agent_id(&self) -> &str {
        match self {
            AgentEvent::StateChanged { agent_id, .. }
            | AgentEvent::TaskStarted { agent_id, .. }
            | AgentEvent::TaskCompleted { agent_id, .. }
            | AgentEvent::TaskFailed { agent_id, .. } => agent_id,
        }
    }
}

/// Signal for cooperative cancellation of a running task.
#[derive(Debug, Default)]
pub struct AbortSignal {
    aborted: AtomicBool,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Relaxed)
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Relaxed);
    }
}

/// Context handed to [`AgentBehavior::execute_task`].
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub agent_id: String,
    /// Attempt number of this execution, starting at 1.
    pub attempt: u32,
    pub abort_signal: Arc<AbortSignal>,
}

impl TaskContext {
    pub fn new(agent_id: impl Into<String>, attempt: u32) -> Self {
        Self {
            agent_id: agent_id.into(),
            attempt,
            abort_signal: Arc::new(AbortSignal::new()),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.abort_signal.is_aborted()
    }
}

/// Sink through which a behavior declares its message handlers.
pub trait HandlerRegistrar: Send {
    fn register_handler(&mut self, message_type: MessageType, handler: Arc<dyn MessageHandler>);
}

/// Domain logic of an agent.
///
/// This is the only seam through which concrete work (LLM calls, search,
/// and so on) enters the runtime. Every lifecycle hook defaults to a no-op.
#[async_trait]
pub trait AgentBehavior: Send + Sync {
    /// Execute one task.
    ///
    /// Returning `Ok` with an unsuccessful [`TaskResult`] reports a handled
    /// failure. Returning `Err` reports an execution error; the runtime
    /// moves the agent to `ERROR` and re-raises it.
    async fn execute_task(&self, task: &Task, ctx: &TaskContext) -> Result<TaskResult, AgentError>;

    /// Register message handlers. Called once by `initialize`.
    fn setup_message_handlers(&self, registrar: &mut dyn HandlerRegistrar) {
        let _ = registrar;
    }

    async fn on_initialize(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn on_start(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn on_pause(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn on_resume(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn on_terminate(&self) -> Result<(), AgentError> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
