//! Message types and typed payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::agent::AgentStatus;
use crate::task::{Task, TaskResult, TaskStatus};
use crate::workflow::{StepStatus, WorkflowStatus};

/// Routing type of a message.
///
/// The built-in set is closed; agents may add their own via `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    TaskAssignment,
    TaskStatusUpdate,
    TaskResult,
    AgentStatusUpdate,
    AgentHeartbeat,
    WorkflowStatusUpdate,
    WorkflowStepUpdate,
    Error,
    Command,
    Custom(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::TaskAssignment => "TASK_ASSIGNMENT",
            MessageType::TaskStatusUpdate => "TASK_STATUS_UPDATE",
            MessageType::TaskResult => "TASK_RESULT",
            MessageType::AgentStatusUpdate => "AGENT_STATUS_UPDATE",
            MessageType::AgentHeartbeat => "AGENT_HEARTBEAT",
            MessageType::WorkflowStatusUpdate => "WORKFLOW_STATUS_UPDATE",
            MessageType::WorkflowStepUpdate => "WORKFLOW_STEP_UPDATE",
            MessageType::Error => "ERROR",
            MessageType::Command => "COMMAND",
            MessageType::Custom(name) => name,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, MessageType::Custom(_))
    }
}

impl From<String> for MessageType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "TASK_ASSIGNMENT" => MessageType::TaskAssignment,
            "TASK_STATUS_UPDATE" => MessageType::TaskStatusUpdate,
            "TASK_RESULT" => MessageType::TaskResult,
            "AGENT_STATUS_UPDATE" => MessageType::AgentStatusUpdate,
            "AGENT_HEARTBEAT" => MessageType::AgentHeartbeat,
            "WORKFLOW_STATUS_UPDATE" => MessageType::WorkflowStatusUpdate,
            "WORKFLOW_STEP_UPDATE" => MessageType::WorkflowStepUpdate,
            "ERROR" => MessageType::Error,
            "COMMAND" => MessageType::Command,
            _ => MessageType::Custom(value),
        }
    }
}

impl From<&str> for MessageType {
    fn from(value: &str) -> Self {
        MessageType::from(value.to_string())
    }
}

impl From<MessageType> for String {
    fn from(value: MessageType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control commands addressed to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentCommand {
    /// Cooperative cancellation of one in-flight task.
    CancelTask { task_id: String },
    Pause,
    Resume,
    Stop,
}

/// Typed message body. The variant must agree with the message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessagePayload {
    TaskAssignment {
        task: Task,
    },
    TaskStatusUpdate {
        task_id: String,
        status: TaskStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<f32>,
    },
    TaskResult {
        task_id: String,
        agent_id: String,
        /// Attempt the result belongs to.
        attempt: u32,
        result: TaskResult,
    },
    AgentStatusUpdate {
        agent_id: String,
        status: AgentStatus,
    },
    AgentHeartbeat {
        agent_id: String,
        at: DateTime<Utc>,
    },
    WorkflowStatusUpdate {
        workflow_id: String,
        status: WorkflowStatus,
        #[serde(default)]
        stalled: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    WorkflowStepUpdate {
        workflow_id: String,
        step_id: String,
        status: StepStatus,
        attempt: u32,
    },
    Error {
        code: String,
        message: String,
    },
    Command(AgentCommand),
    /// Domain payload for custom message types.
    Custom(serde_json::Value),
}

impl MessagePayload {
    /// The message type implied by this payload, `None` for custom bodies.
    pub fn message_type(&self) -> Option<MessageType> {
        let ty = match self {
            MessagePayload::TaskAssignment { .. } => MessageType::TaskAssignment,
            MessagePayload::TaskStatusUpdate { .. } => MessageType::TaskStatusUpdate,
            MessagePayload::TaskResult { .. } => MessageType::TaskResult,
            MessagePayload::AgentStatusUpdate { .. } => MessageType::AgentStatusUpdate,
            MessagePayload::AgentHeartbeat { .. } => MessageType::AgentHeartbeat,
            MessagePayload::WorkflowStatusUpdate { .. } => MessageType::WorkflowStatusUpdate,
            MessagePayload::WorkflowStepUpdate { .. } => MessageType::WorkflowStepUpdate,
            MessagePayload::Error { .. } => MessageType::Error,
            MessagePayload::Command(_) => MessageType::Command,
            MessagePayload::Custom(_) => return None,
        };
        Some(ty)
    }
}
