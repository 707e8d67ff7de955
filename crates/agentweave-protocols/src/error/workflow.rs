//! Workflow orchestration errors.

use thiserror::Error;

use super::{MessageError, StateError};
use crate::workflow::WorkflowStatus;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Invalid workflow: {0}")]
    Validation(String),

    #[error("Dependency cycle between steps: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("Workflow already active: {0}")]
    AlreadyActive(String),

    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Cannot {operation} workflow {workflow_id} in status {status}")]
    InvalidState {
        operation: &'static str,
        workflow_id: String,
        status: WorkflowStatus,
    },

    #[error("Invalid workflow task id: {0}")]
    InvalidTaskId(String),

    #[error("Timed out waiting for workflow {0}")]
    WaitTimeout(String),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display() {
        let err = WorkflowError::Cycle(vec!["a".to_string(), "b".to_string()]);
        assert!(err.to_string().contains("a, b"));
    }

    #[test]
    fn test_invalid_state_display() {
        let err = WorkflowError::InvalidState {
            operation: "resume",
            workflow_id: "wf-1".to_string(),
            status: WorkflowStatus::Completed,
        };
        assert_eq!(
            err.to_string(),
            "Cannot resume workflow wf-1 in status COMPLETED"
        );
    }

    #[test]
    fn test_state_error_from() {
        let err = WorkflowError::from(StateError::Closed);
        assert!(matches!(err, WorkflowError::State(StateError::Closed)));
    }
}
