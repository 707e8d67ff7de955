//! Side effects collected while a workflow is mutated.

use std::time::Duration;
use tracing::{debug, error, warn};

use agentweave_core::AgentDescriptor;
use agentweave_protocols::{AgentCommand, Message, MessagePayload, Task};

use super::events::Event;
use super::{Progress, WorkflowOrchestrator};

/// An assignment to publish.
pub(super) struct Dispatch {
    pub(super) step_id: String,
    pub(super) agent_id: String,
    pub(super) attempt: u32,
    pub(super) task: Task,
    pub(super) timeout_ms: Option<u64>,
}

/// A re-dispatch due after a backoff delay.
struct Retry {
    step_id: String,
    attempt: u32,
    delay: Duration,
}

#[derive(Default)]
pub(super) struct Effects {
    dispatches: Vec<Dispatch>,
    retries: Vec<Retry>,
    /// `(agent_id, task_id)` pairs to send a cancel command for.
    cancels: Vec<(String, String)>,
    announcements: Vec<MessagePayload>,
    reserved: Vec<String>,
    released: Vec<String>,
    pub(super) progress: Option<Progress>,
}

impl Effects {
    pub(super) fn dispatch(&mut self, dispatch: Dispatch) {
        self.dispatches.push(dispatch);
    }

    pub(super) fn retry(&mut self, step_id: &str, attempt: u32, delay: Duration) {
        self.retries.push(Retry {
            step_id: step_id.to_string(),
            attempt,
            delay,
        });
    }

    pub(super) fn cancel_task(&mut self, agent_id: &str, task_id: String) {
        self.cancels.push((agent_id.to_string(), task_id));
    }

    pub(super) fn announce(&mut self, payload: MessagePayload) {
        self.announcements.push(payload);
    }
}

impl WorkflowOrchestrator {
    /// Take one of the agent's slots if it has a free one.
    pub(super) fn try_reserve(&self, agent: &AgentDescriptor, fx: &mut Effects) -> bool {
        let mut load = self.inner.load.lock();
        let used = load.entry(agent.id.clone()).or_insert(0);
        if *used >= agent.max_concurrent_tasks.max(1) {
            return false;
        }
        *used += 1;
        fx.reserved.push(agent.id.clone());
        true
    }

    pub(super) fn release_slot(&self, agent_id: &str, fx: &mut Effects) {
        if let Some(used) = self.inner.load.lock().get_mut(agent_id) {
            *used = used.saturating_sub(1);
        }
        fx.released.push(agent_id.to_string());
    }

    /// Undo the slot bookkeeping of a discarded mutation.
    pub(super) fn rollback_slots(&self, fx: &Effects) {
        let mut load = self.inner.load.lock();
        for agent_id in &fx.reserved {
            if let Some(used) = load.get_mut(agent_id) {
                *used = used.saturating_sub(1);
            }
        }
        for agent_id in &fx.released {
            *load.entry(agent_id.clone()).or_insert(0) += 1;
        }
    }

    /// Deliver `event` after `delay` unless the workflow settles first.
    pub(super) fn schedule(&self, workflow_id: &str, delay: Duration, event: Event) {
        let Some(token) = self
            .inner
            .active
            .get(workflow_id)
            .map(|active| active.timers.clone())
        else {
            debug!("Workflow {} is not active; timer dropped", workflow_id);
            return;
        };
        let events = self.inner.events.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = events.send(event);
                }
            }
        });
    }

    fn publish_event(&self, event: Event) {
        if self.inner.events.send(event).is_err() {
            debug!("Orchestrator event loop stopped; event dropped");
        }
    }

    pub(super) async fn apply_effects(&self, workflow_id: &str, fx: Effects) {
        let broker = &self.inner.broker;

        for payload in fx.announcements {
            if let Err(e) = broker.publish(Message::new(self.id(), payload)).await {
                warn!("Workflow {} update not published: {}", workflow_id, e);
            }
        }

        for (agent_id, task_id) in fx.cancels {
            let command = Message::new(
                self.id(),
                MessagePayload::Command(AgentCommand::CancelTask {
                    task_id: task_id.clone(),
                }),
            )
            .to(agent_id.clone());
            if let Err(e) = broker.publish(command).await {
                debug!("Cancel of {} not delivered to {}: {}", task_id, agent_id, e);
            }
        }

        for dispatch in fx.dispatches {
            let Dispatch {
                step_id,
                agent_id,
                attempt,
                task,
                timeout_ms,
            } = dispatch;
            let message =
                Message::new(self.id(), MessagePayload::TaskAssignment { task }).to(agent_id.clone());
            match broker.publish(message).await {
                Ok(()) => {
                    debug!(
                        "Dispatched {}:{} to {} (attempt {})",
                        workflow_id, step_id, agent_id, attempt
                    );
                    if let Some(timeout_ms) = timeout_ms {
                        self.schedule(
                            workflow_id,
                            Duration::from_millis(timeout_ms),
                            Event::StepTimeout {
                                workflow_id: workflow_id.to_string(),
                                step_id,
                                attempt,
                                timeout_ms,
                            },
                        );
                    }
                }
                Err(e) => {
                    error!(
                        "Dispatch of {}:{} to {} failed: {}",
                        workflow_id, step_id, agent_id, e
                    );
                    self.publish_event(Event::DispatchFailed {
                        workflow_id: workflow_id.to_string(),
                        step_id,
                        attempt,
                        error: e.to_string(),
                    });
                }
            }
        }

        for retry in fx.retries {
            self.schedule(
                workflow_id,
                retry.delay,
                Event::RetryDue {
                    workflow_id: workflow_id.to_string(),
                    step_id: retry.step_id,
                    attempt: retry.attempt,
                },
            );
        }

        // Freed slots may unblock steps deferred by other workflows.
        // Stalled workflows have nothing left to dispatch.
        if !fx.released.is_empty() {
            let others: Vec<String> = self
                .inner
                .active
                .iter()
                .filter(|entry| entry.key() != workflow_id)
                .filter(|entry| !entry.progress.borrow().is_settled())
                .map(|entry| entry.key().clone())
                .collect();
            for other in others {
                self.publish_event(Event::Pump { workflow_id: other });
            }
        }

        if let Some(progress) = fx.progress {
            if let Some(active) = self.inner.active.get(workflow_id) {
                active.progress.send_if_modified(|current| {
                    let changed = *current != progress;
                    *current = progress;
                    changed
                });
            }
            if progress.status.is_terminal() {
                if let Some((_, active)) = self.inner.active.remove(workflow_id) {
                    active.timers.cancel();
                }
            } else if progress.stalled {
                // Stays registered until the caller cancels it.
                if let Some(active) = self.inner.active.get(workflow_id) {
                    active.timers.cancel();
                }
            }
        }
    }

    /// Broadcast a state-store failure for outer layers to act on.
    pub(super) async fn report_state_error(&self, workflow_id: &str, error: &str) {
        error!("State store failure for workflow {}: {}", workflow_id, error);
        let payload = MessagePayload::Error {
            code: "STATE_ERROR".to_string(),
            message: format!("workflow {workflow_id}: {error}"),
        };
        if let Err(e) = self.inner.broker.publish(Message::new(self.id(), payload)).await {
            warn!("State error report not published: {}", e);
        }
    }
}
