//! Task execution bound to the agent lifecycle.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use agentweave_protocols::{
    AbortSignal, AgentError, AgentEvent, AgentStatus, Task, TaskContext, TaskError, TaskResult,
    TaskStatus,
};

use super::runtime::Agent;

/// How a finished execution is booked.
#[derive(Clone, Copy)]
enum Outcome {
    Succeeded,
    /// `execute_task` returned an unsuccessful result.
    Rejected,
    /// `execute_task` raised an error.
    Errored,
}

/// Result of one execution plus whether it was cancelled meanwhile.
pub(super) struct Execution {
    pub(super) result: Result<TaskResult, AgentError>,
    pub(super) cancelled: bool,
}

impl Agent {
    /// Execute one task.
    ///
    /// The task is tracked while it runs and removed afterwards. Execution
    /// errors (including timeouts) move the agent to ERROR and are returned
    /// to the caller; the agent keeps accepting tasks.
    pub async fn handle_task(&self, task: Task) -> Result<TaskResult, AgentError> {
        self.execute(task).await.result
    }

    pub(super) async fn execute(&self, task: Task) -> Execution {
        match self.try_execute(task).await {
            Ok(execution) => execution,
            Err(e) => Execution {
                result: Err(e),
                cancelled: false,
            },
        }
    }

    async fn try_execute(&self, task: Task) -> Result<Execution, AgentError> {
        self.ensure_not_terminated()?;
        let status = self.status();
        if !status.accepts_tasks() {
            return Err(AgentError::InvalidState {
                operation: "handle task",
                status,
            });
        }

        let (agent_id, missing, timeout_ms) = {
            let config = self.inner.config.read();
            (
                config.id.clone(),
                config.missing_capabilities(&task.config.required_capabilities),
                task.config.timeout_ms.or(config.task_timeout_ms),
            )
        };
        if !missing.is_empty() {
            warn!(
                "Agent {} rejected task {}: missing capabilities {:?}",
                agent_id,
                task.id(),
                missing
            );
            return Err(AgentError::MissingCapabilities(missing));
        }

        let task_id = task.id().to_string();
        let attempt = task.metadata.attempts;
        let mut tracked = task;
        tracked.assign(agent_id.clone())?;
        tracked.transition(TaskStatus::InProgress)?;
        let snapshot = tracked.clone();
        let superseded = {
            let mut tasks = self.inner.tasks.lock();
            let tracked_attempt = tasks.get_task(&task_id).map(|t| t.metadata.attempts);
            let superseded = match tracked_attempt {
                Some(existing) if existing >= attempt => {
                    return Err(TaskError::AlreadyExists(task_id).into());
                }
                Some(_) => tasks.remove_task(&task_id).is_some(),
                None => false,
            };
            tasks.add_task(tracked)?;
            superseded
        };

        let signal = Arc::new(AbortSignal::new());
        let previous_signal = self
            .inner
            .aborts
            .lock()
            .insert(task_id.clone(), signal.clone());
        if superseded {
            // The older attempt keeps running until it observes its signal
            // but no longer owns the task entry.
            if let Some(old) = previous_signal {
                old.abort();
            }
            remove_one(&mut self.inner.state.write().current_tasks, &task_id);
            info!(
                "Agent {} superseded task {} with attempt {}",
                agent_id, task_id, attempt
            );
        }

        let previous = {
            let mut state = self.inner.state.write();
            state.current_tasks.push(task_id.clone());
            let previous = state.status;
            if previous != AgentStatus::Paused {
                state.status = AgentStatus::Busy;
            }
            previous
        };
        self.emit(AgentEvent::TaskStarted {
            agent_id: agent_id.clone(),
            task_id: task_id.clone(),
        });
        self.state_changed(previous).await;
        debug!("Agent {} executing task {} (attempt {})", agent_id, task_id, attempt);

        let ctx = TaskContext {
            agent_id: agent_id.clone(),
            attempt,
            abort_signal: signal.clone(),
        };
        let execution = self.inner.behavior.execute_task(&snapshot, &ctx);
        let result = match timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), execution).await {
                Ok(result) => result,
                Err(_) => Err(AgentError::Timeout(ms)),
            },
            None => execution.await,
        };

        let outcome = match &result {
            Ok(r) if r.success => Outcome::Succeeded,
            Ok(_) => Outcome::Rejected,
            Err(_) => Outcome::Errored,
        };
        let recorded = match &result {
            Ok(r) => r.clone(),
            Err(e) => TaskResult::failure(e.to_string()),
        };
        self.finish_task(&task_id, attempt, &signal, recorded, outcome)
            .await;

        match &result {
            Ok(r) => self.emit(AgentEvent::TaskCompleted {
                agent_id,
                task_id,
                success: r.success,
            }),
            Err(e) => {
                warn!("Agent {} task {} failed: {}", agent_id, task_id, e);
                self.emit(AgentEvent::TaskFailed {
                    agent_id,
                    task_id,
                    error: e.to_string(),
                });
            }
        }
        Ok(Execution {
            result,
            cancelled: signal.is_aborted(),
        })
    }

    /// Book the outcome, drop the task from the active set and recompute
    /// the status.
    ///
    /// An attempt superseded by a newer one only books its outcome; the
    /// task entry belongs to the newer attempt.
    async fn finish_task(
        &self,
        task_id: &str,
        attempt: u32,
        signal: &Arc<AbortSignal>,
        result: TaskResult,
        outcome: Outcome,
    ) {
        let owner = {
            let mut tasks = self.inner.tasks.lock();
            let owner = tasks
                .get_task(task_id)
                .is_some_and(|t| t.metadata.attempts == attempt);
            if owner {
                let cancelled = tasks
                    .get_task(task_id)
                    .is_some_and(|t| t.status() == TaskStatus::Cancelled);
                if !cancelled {
                    if let Err(e) = tasks.set_task_result(task_id, result) {
                        debug!("Could not attach result to {}: {}", task_id, e);
                    }
                }
                tasks.remove_task(task_id);
            }
            owner
        };
        {
            let mut aborts = self.inner.aborts.lock();
            if aborts.get(task_id).is_some_and(|s| Arc::ptr_eq(s, signal)) {
                aborts.remove(task_id);
            }
        }

        let previous = {
            let mut state = self.inner.state.write();
            if owner {
                remove_one(&mut state.current_tasks, task_id);
            }
            let previous = state.status;
            match outcome {
                Outcome::Succeeded => state.completed_tasks += 1,
                Outcome::Rejected | Outcome::Errored => state.failed_tasks += 1,
            }
            state.status = match (previous, outcome) {
                (AgentStatus::Paused | AgentStatus::Terminated, _) => previous,
                (_, Outcome::Errored) => AgentStatus::Error,
                _ => self.idle_or_busy(&state),
            };
            previous
        };
        self.state_changed(previous).await;
    }

    /// Cooperatively cancel an in-flight task.
    ///
    /// The task keeps running until it observes its abort signal; its
    /// result is not attached. Returns whether the task was found.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        let Some(signal) = self.inner.aborts.lock().get(task_id).cloned() else {
            return false;
        };
        signal.abort();
        if let Err(e) = self
            .inner
            .tasks
            .lock()
            .update_task_status(task_id, TaskStatus::Cancelled)
        {
            debug!("Cancel of {} not recorded: {}", task_id, e);
        }
        info!("Agent {} cancelled task {}", self.id(), task_id);
        true
    }
}

fn remove_one(ids: &mut Vec<String>, task_id: &str) {
    if let Some(pos) = ids.iter().position(|id| id == task_id) {
        ids.remove(pos);
    }
}
