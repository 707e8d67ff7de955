//! Inbound results and the timer event loop.

use async_trait::async_trait;
use std::sync::Weak;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use agentweave_protocols::{Message, MessageError, MessageHandler, MessagePayload, WorkflowError};

use super::{Inner, WorkflowOrchestrator};

/// Deferred work processed by the orchestrator's event loop.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Event {
    StepTimeout {
        workflow_id: String,
        step_id: String,
        attempt: u32,
        timeout_ms: u64,
    },
    DispatchFailed {
        workflow_id: String,
        step_id: String,
        attempt: u32,
        error: String,
    },
    RetryDue {
        workflow_id: String,
        step_id: String,
        attempt: u32,
    },
    WorkflowTimeout {
        workflow_id: String,
        timeout_ms: u64,
    },
    /// Re-run dispatch after an agent slot freed elsewhere.
    Pump { workflow_id: String },
}

pub(super) fn spawn_event_loop(
    inner: Weak<Inner>,
    mut receiver: mpsc::UnboundedReceiver<Event>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = receiver.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            let Some(inner) = inner.upgrade() else { break };
            WorkflowOrchestrator { inner }.process(event).await;
        }
        debug!("Orchestrator event loop stopped");
    });
}

impl WorkflowOrchestrator {
    async fn process(&self, event: Event) {
        let outcome = match event {
            Event::StepTimeout {
                workflow_id,
                step_id,
                attempt,
                timeout_ms,
            } => {
                let error = format!("Step {step_id} timed out after {timeout_ms}ms");
                self.fail_attempt(&workflow_id, &step_id, attempt, error, true)
                    .await
            }
            Event::DispatchFailed {
                workflow_id,
                step_id,
                attempt,
                error,
            } => {
                self.fail_attempt(&workflow_id, &step_id, attempt, error, false)
                    .await
            }
            Event::RetryDue {
                workflow_id,
                step_id,
                attempt,
            } => self.retry_due(&workflow_id, &step_id, attempt).await,
            Event::WorkflowTimeout {
                workflow_id,
                timeout_ms,
            } => self.workflow_timed_out(&workflow_id, timeout_ms).await,
            Event::Pump { workflow_id } => self.pump(&workflow_id).await,
        };

        match outcome {
            Ok(()) => {}
            Err(WorkflowError::NotFound(id)) => debug!("Event for unknown workflow {}", id),
            Err(e) => error!("Orchestrator event failed: {}", e),
        }
    }
}

/// Receives `TASK_RESULT` messages addressed to the orchestrator.
pub(super) struct ResultHandler {
    inner: Weak<Inner>,
}

impl ResultHandler {
    pub(super) fn new(inner: Weak<Inner>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl MessageHandler for ResultHandler {
    async fn handle(&self, message: &Message) -> Result<(), MessageError> {
        let MessagePayload::TaskResult {
            task_id,
            agent_id,
            attempt,
            result,
        } = &message.payload
        else {
            return Err(MessageError::Validation(
                "TASK_RESULT without a result".to_string(),
            ));
        };
        let Some(inner) = self.inner.upgrade() else {
            return Ok(());
        };

        debug!("Result for {} from {} (attempt {})", task_id, agent_id, attempt);
        let orchestrator = WorkflowOrchestrator { inner };
        match orchestrator
            .handle_result(task_id, *attempt, result.clone())
            .await
        {
            Ok(()) => Ok(()),
            Err(WorkflowError::NotFound(id)) => {
                warn!("Result {} for unknown workflow {}", task_id, id);
                Ok(())
            }
            Err(e) => Err(MessageError::Handler(e.to_string())),
        }
    }
}
