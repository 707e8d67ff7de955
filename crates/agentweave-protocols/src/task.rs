//! Task data model.
//!
//! A task has an immutable [`TaskConfig`], mutable [`TaskMetadata`] and an
//! optional [`TaskResult`] once it reaches a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TaskError;
use crate::types::generate_id;

/// Scheduling priority of a task.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Execution status of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Assigned => "ASSIGNED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Legal forward transitions. Terminal statuses never move.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (Pending, Assigned | InProgress | Cancelled) => true,
            (Assigned, InProgress | Cancelled | Failed) => true,
            (InProgress, Completed | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable task descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub id: String,

    #[serde(rename = "type")]
    pub task_type: String,

    #[serde(default)]
    pub priority: TaskPriority,

    /// Retry budget. Zero means a single attempt.
    #[serde(default)]
    pub retry_attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub required_capabilities: Vec<String>,

    /// Task input handed to the executing agent.
    #[serde(default)]
    pub input: serde_json::Value,
}

impl TaskConfig {
    pub fn new(id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            priority: TaskPriority::default(),
            retry_attempts: 0,
            timeout_ms: None,
            dependencies: Vec::new(),
            required_capabilities: Vec::new(),
            input: serde_json::Value::Null,
        }
    }

    /// Create a config with a generated id.
    pub fn of_type(task_type: impl Into<String>) -> Self {
        Self::new(generate_id(), task_type)
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_required_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

/// Mutable execution state of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub status: TaskStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Attempt number, starting at 1 for the first execution.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Progress in `0.0..=1.0`.
    #[serde(default)]
    pub progress: f32,
}

fn default_attempts() -> u32 {
    1
}

impl Default for TaskMetadata {
    fn default() -> Self {
        Self {
            status: TaskStatus::Pending,
            assigned_agent: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            attempts: default_attempts(),
            last_error: None,
            progress: 0.0,
        }
    }
}

/// Outcome of a task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,

    #[serde(default)]
    pub data: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub config: TaskConfig,
    pub metadata: TaskMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
}

impl Task {
    pub fn new(config: TaskConfig) -> Self {
        Self {
            config,
            metadata: TaskMetadata::default(),
            result: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn status(&self) -> TaskStatus {
        self.metadata.status
    }

    pub fn assign(&mut self, agent_id: impl Into<String>) -> Result<(), TaskError> {
        self.transition(TaskStatus::Assigned)?;
        self.metadata.assigned_agent = Some(agent_id.into());
        Ok(())
    }

    /// Move to `next`, stamping start/completion times.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), TaskError> {
        let current = self.metadata.status;
        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            return Err(TaskError::InvalidTransition {
                task_id: self.config.id.clone(),
                from: current,
                to: next,
            });
        }
        let now = Utc::now();
        if next == TaskStatus::InProgress {
            self.metadata.started_at = Some(now);
        }
        if next.is_terminal() {
            self.metadata.completed_at = Some(now);
            if next == TaskStatus::Completed {
                self.metadata.progress = 1.0;
            }
        }
        self.metadata.status = next;
        Ok(())
    }

    pub fn set_progress(&mut self, progress: f32) {
        self.metadata.progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };
    }

    /// Attach a result and move to the matching terminal status.
    pub fn attach_result(&mut self, result: TaskResult) -> Result<(), TaskError> {
        let next = if result.success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        if self.metadata.status == TaskStatus::Pending || self.metadata.status == TaskStatus::Assigned
        {
            self.transition(TaskStatus::InProgress)?;
        }
        self.transition(next)?;
        if let Some(error) = &result.error {
            self.metadata.last_error = Some(error.clone());
        }
        self.result = Some(result);
        Ok(())
    }

    /// Reset the same record for another attempt.
    pub fn prepare_retry(&mut self) {
        self.metadata.attempts += 1;
        self.metadata.status = TaskStatus::Pending;
        self.metadata.started_at = None;
        self.metadata.completed_at = None;
        self.metadata.progress = 0.0;
        self.result = None;
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
