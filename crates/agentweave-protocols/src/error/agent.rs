//! Agent errors.

use thiserror::Error;

use super::{MessageError, StateError, TaskError};
use crate::agent::AgentStatus;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent not found: {0}")]
    NotFound(String),

    #[error("Agent already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Agent is already running")]
    AlreadyRunning,

    #[error("Agent is not running")]
    NotRunning,

    #[error("Agent is not paused")]
    NotPaused,

    #[error("Agent has been terminated")]
    Terminated,

    #[error("Cannot {operation} while agent is {status}")]
    InvalidState {
        operation: &'static str,
        status: AgentStatus,
    },

    #[error("Missing capabilities: {}", .0.join(", "))]
    MissingCapabilities(Vec<String>),

    #[error("Task execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Task timed out after {0} ms")]
    Timeout(u64),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("State error: {0}")]
    State(#[from] StateError),
}
