//! Scheduling rules: ready-set dispatch, result application, retry and
//! failure policy.

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use agentweave_protocols::{
    FailureStrategy, MessagePayload, RetryStrategy, StepStatus, Task, TaskResult, Workflow,
    WorkflowError, WorkflowStatus, WorkflowStep, WorkflowStepResult, compose_task_id,
    split_task_id,
};

use super::WorkflowOrchestrator;
use super::effects::{Dispatch, Effects};
use crate::dag;

/// Why a result or timer no longer applies to its step.
fn stale_reason(workflow: &Workflow, step_id: &str, attempt: u32) -> Option<&'static str> {
    if workflow.status().is_terminal() {
        return Some("workflow finished");
    }
    if !workflow.metadata.pending_steps.contains(step_id) {
        return Some("step not in flight");
    }
    match workflow.metadata.step_results.get(step_id) {
        Some(result) if result.attempts != attempt => Some("superseded attempt"),
        Some(result) if result.status != StepStatus::InProgress => Some("attempt not running"),
        Some(_) => None,
        None => Some("step never dispatched"),
    }
}

/// The step's own input plus an `upstream` object holding the result data
/// of each completed dependency.
fn with_upstream(input: Value, upstream: Map<String, Value>) -> Value {
    match input {
        Value::Object(mut map) => {
            map.insert("upstream".to_string(), Value::Object(upstream));
            Value::Object(map)
        }
        Value::Null => serde_json::json!({ "upstream": upstream }),
        other => serde_json::json!({ "value": other, "upstream": upstream }),
    }
}

impl WorkflowOrchestrator {
    pub(super) fn set_status(&self, wf: &mut Workflow, status: WorkflowStatus, fx: &mut Effects) {
        if wf.metadata.status == status {
            return;
        }
        debug!("Workflow {} {} -> {}", wf.id(), wf.metadata.status, status);
        wf.metadata.status = status;
        self.announce_status(wf, fx);
    }

    fn announce_status(&self, wf: &Workflow, fx: &mut Effects) {
        fx.announce(MessagePayload::WorkflowStatusUpdate {
            workflow_id: wf.id().to_string(),
            status: wf.metadata.status,
            stalled: wf.metadata.stalled,
            error: wf.metadata.error.clone(),
        });
    }

    fn announce_step(&self, wf: &Workflow, step_id: &str, fx: &mut Effects) {
        if let Some(result) = wf.metadata.step_results.get(step_id) {
            fx.announce(MessagePayload::WorkflowStepUpdate {
                workflow_id: wf.id().to_string(),
                step_id: step_id.to_string(),
                status: result.status,
                attempt: result.attempts,
            });
        }
    }

    fn retry_for(&self, wf: &Workflow, step: &WorkflowStep) -> RetryStrategy {
        step.retry_strategy
            .clone()
            .or_else(|| wf.config.retry_strategy.clone())
            .or_else(|| self.inner.config.default_retry.clone())
            .unwrap_or_default()
    }

    fn concurrency_limit(&self, wf: &Workflow) -> usize {
        if wf.config.max_concurrency > 0 {
            wf.config.max_concurrency
        } else {
            self.inner.config.max_concurrency
        }
    }

    fn build_task(&self, wf: &Workflow, step: &WorkflowStep, attempt: u32) -> Task {
        let mut upstream = Map::new();
        for dep in &step.dependencies {
            let data = wf.metadata.step_results.get(dep).map(|r| r.data.clone());
            if let (Some(dep_step), Some(data)) = (wf.config.step(dep), data) {
                upstream.insert(dep_step.output_key().to_string(), data);
            }
        }

        let mut config = step.task.clone();
        config.id = compose_task_id(wf.id(), &step.id);
        config.input = with_upstream(config.input, upstream);
        let mut task = Task::new(config);
        task.metadata.attempts = attempt;
        task
    }

    /// Dispatch every ready step the concurrency limits allow.
    ///
    /// Steps whose agent is unknown or lacks a required capability fail
    /// at once, without retry. Steps blocked only by agent slots stay
    /// ready and are picked up once a slot frees.
    pub(super) fn dispatch_ready(&self, wf: &mut Workflow, fx: &mut Effects) {
        let limit = self.concurrency_limit(wf);
        for step_id in dag::ready_steps(wf) {
            if wf.status() != WorkflowStatus::InProgress {
                return;
            }
            if limit > 0 && wf.metadata.pending_steps.len() >= limit {
                debug!("Workflow {} at concurrency limit {}", wf.id(), limit);
                return;
            }
            let Some(step) = wf.config.step(&step_id).cloned() else {
                continue;
            };

            let Some(agent) = self.inner.agents.get(&step.agent_id) else {
                let reason = format!("No agent registered with id {}", step.agent_id);
                self.step_failed(wf, &step, reason, fx);
                continue;
            };
            let missing = agent.missing_capabilities(&step.task.required_capabilities);
            if !missing.is_empty() {
                let reason = format!(
                    "Agent {} lacks capabilities: {}",
                    step.agent_id,
                    missing.join(", ")
                );
                self.step_failed(wf, &step, reason, fx);
                continue;
            }
            if !self.try_reserve(&agent, fx) {
                debug!(
                    "Step {} of {} deferred: agent {} has no free slot",
                    step.id,
                    wf.id(),
                    agent.id
                );
                continue;
            }

            wf.metadata.pending_steps.insert(step.id.clone());
            self.start_attempt(wf, &step, 1, fx);
        }
    }

    /// Mark `attempt` of an in-flight step as running and queue its
    /// assignment.
    fn start_attempt(&self, wf: &mut Workflow, step: &WorkflowStep, attempt: u32, fx: &mut Effects) {
        let entry = wf
            .metadata
            .step_results
            .entry(step.id.clone())
            .or_insert_with(|| WorkflowStepResult::new(&step.id, StepStatus::Pending));
        entry.status = StepStatus::InProgress;
        entry.attempts = attempt;
        entry.started_at = Some(Utc::now());
        entry.completed_at = None;
        wf.metadata.current_step = Some(step.id.clone());
        self.announce_step(wf, &step.id, fx);

        let timeout_ms = step
            .timeout_ms
            .or(step.task.timeout_ms)
            .or(self.inner.config.default_step_timeout_ms);
        let mut task = self.build_task(wf, step, attempt);
        // The agent enforces the same limit so a hung attempt frees its slot.
        if task.config.timeout_ms.is_none() {
            task.config.timeout_ms = timeout_ms;
        }
        fx.dispatch(Dispatch {
            step_id: step.id.clone(),
            agent_id: step.agent_id.clone(),
            attempt,
            task,
            timeout_ms,
        });
    }

    fn step_succeeded(&self, wf: &mut Workflow, step: &WorkflowStep, data: Value, fx: &mut Effects) {
        wf.metadata.pending_steps.remove(&step.id);
        self.release_slot(&step.agent_id, fx);
        if let Some(entry) = wf.metadata.step_results.get_mut(&step.id) {
            entry.status = StepStatus::Completed;
            entry.completed_at = Some(Utc::now());
            entry.data = data;
            entry.error = None;
        }
        info!("Step {} of workflow {} completed", step.id, wf.id());
        self.announce_step(wf, &step.id, fx);
    }

    /// An in-flight attempt failed: retry while attempts remain, otherwise
    /// fail the step for good.
    fn attempt_failed(&self, wf: &mut Workflow, step: &WorkflowStep, error: String, fx: &mut Effects) {
        let attempts = wf
            .metadata
            .step_results
            .get(&step.id)
            .map_or(1, |r| r.attempts);
        let retry = self.retry_for(wf, step);

        if retry.allows_another_attempt(attempts) {
            let delay = retry.delay_for_attempt(attempts);
            if let Some(entry) = wf.metadata.step_results.get_mut(&step.id) {
                entry.status = StepStatus::Retrying;
                entry.attempts = attempts + 1;
                entry.error = Some(error.clone());
            }
            warn!(
                "Step {} of workflow {} failed on attempt {}: {}; retrying in {:?}",
                step.id,
                wf.id(),
                attempts,
                error,
                delay
            );
            self.announce_step(wf, &step.id, fx);
            fx.retry(&step.id, attempts + 1, delay);
            return;
        }

        wf.metadata.pending_steps.remove(&step.id);
        self.release_slot(&step.agent_id, fx);
        self.step_failed(wf, step, error, fx);
    }

    /// Record a permanent step failure and apply its failure strategy.
    fn step_failed(&self, wf: &mut Workflow, step: &WorkflowStep, error: String, fx: &mut Effects) {
        let entry = wf
            .metadata
            .step_results
            .entry(step.id.clone())
            .or_insert_with(|| WorkflowStepResult::new(&step.id, StepStatus::Failed));
        entry.status = StepStatus::Failed;
        entry.completed_at = Some(Utc::now());
        entry.error = Some(error.clone());
        self.announce_step(wf, &step.id, fx);

        match step.failure_strategy {
            FailureStrategy::FailWorkflow => {
                error!("Step {} failed workflow {}: {}", step.id, wf.id(), error);
                self.finish(wf, WorkflowStatus::Failed, Some(error), fx);
            }
            FailureStrategy::Continue => {
                warn!(
                    "Step {} of workflow {} failed, continuing: {}",
                    step.id,
                    wf.id(),
                    error
                );
            }
        }
    }

    /// Complete the workflow, or flag it stalled, once nothing can run.
    ///
    /// Stranded steps (downstream of a failed CONTINUE step) are marked
    /// SKIPPED and never dispatched; the workflow stays IN_PROGRESS.
    pub(super) fn settle(&self, wf: &mut Workflow, fx: &mut Effects) {
        if wf.status() != WorkflowStatus::InProgress || !wf.metadata.pending_steps.is_empty() {
            return;
        }
        if !dag::ready_steps(wf).is_empty() {
            return;
        }

        let all_completed = wf
            .config
            .steps
            .iter()
            .all(|step| wf.step_status(&step.id) == Some(StepStatus::Completed));
        if all_completed {
            self.finish(wf, WorkflowStatus::Completed, None, fx);
            return;
        }
        if wf.metadata.stalled {
            return;
        }

        let stranded = dag::unsettled_steps(wf);
        let now = Utc::now();
        for step_id in &stranded {
            let entry = wf
                .metadata
                .step_results
                .entry(step_id.clone())
                .or_insert_with(|| WorkflowStepResult::new(step_id, StepStatus::Skipped));
            entry.status = StepStatus::Skipped;
            entry.completed_at = Some(now);
            entry.error = Some("upstream step failed".to_string());
            self.announce_step(wf, step_id, fx);
        }
        wf.metadata.stalled = true;
        warn!(
            "Workflow {} stalled after failed steps; skipped: [{}]",
            wf.id(),
            stranded.join(", ")
        );
        self.announce_status(wf, fx);
    }

    /// Move to a terminal status. Steps still in flight are cancelled.
    pub(super) fn finish(
        &self,
        wf: &mut Workflow,
        status: WorkflowStatus,
        error: Option<String>,
        fx: &mut Effects,
    ) {
        let now = Utc::now();
        let in_flight = std::mem::take(&mut wf.metadata.pending_steps);
        for step_id in in_flight {
            let agent_id = wf.config.step(&step_id).map(|s| s.agent_id.clone());
            if let Some(entry) = wf.metadata.step_results.get_mut(&step_id) {
                entry.status = StepStatus::Cancelled;
                entry.completed_at = Some(now);
            }
            self.announce_step(wf, &step_id, fx);
            if let Some(agent_id) = agent_id {
                self.release_slot(&agent_id, fx);
                fx.cancel_task(&agent_id, compose_task_id(wf.id(), &step_id));
            }
        }

        wf.metadata.end_time = Some(now);
        if error.is_some() {
            wf.metadata.error = error;
        }
        self.set_status(wf, status, fx);
        info!("Workflow {} finished: {}", wf.id(), status);
    }

    /// Apply a `TASK_RESULT` for a dispatched step.
    ///
    /// Results for settled steps or superseded attempts are ignored, so
    /// applying the same result twice changes nothing.
    pub(super) async fn handle_result(
        &self,
        task_id: &str,
        attempt: u32,
        result: TaskResult,
    ) -> Result<(), WorkflowError> {
        let (workflow_id, step_id) = split_task_id(task_id)?;
        self.update(workflow_id, |wf, fx| {
            if let Some(reason) = stale_reason(wf, step_id, attempt) {
                warn!(
                    "Ignoring result for {} attempt {}: {}",
                    task_id, attempt, reason
                );
                return Ok(());
            }
            let Some(step) = wf.config.step(step_id).cloned() else {
                return Ok(());
            };

            if result.success {
                self.step_succeeded(wf, &step, result.data, fx);
            } else {
                let error = result
                    .error
                    .unwrap_or_else(|| "task reported failure".to_string());
                self.attempt_failed(wf, &step, error, fx);
            }
            self.dispatch_ready(wf, fx);
            self.settle(wf, fx);
            Ok(())
        })
        .await
    }

    /// Fail the running attempt of a step (timeout, undeliverable
    /// assignment). With `cancel_running` the agent is told to drop the
    /// attempt it may still be executing.
    pub(super) async fn fail_attempt(
        &self,
        workflow_id: &str,
        step_id: &str,
        attempt: u32,
        error: String,
        cancel_running: bool,
    ) -> Result<(), WorkflowError> {
        self.update(workflow_id, |wf, fx| {
            if let Some(reason) = stale_reason(wf, step_id, attempt) {
                debug!(
                    "Ignoring failure of {}:{} attempt {}: {}",
                    workflow_id, step_id, attempt, reason
                );
                return Ok(());
            }
            let Some(step) = wf.config.step(step_id).cloned() else {
                return Ok(());
            };
            warn!("Step {} of workflow {}: {}", step_id, workflow_id, error);
            if cancel_running {
                fx.cancel_task(&step.agent_id, compose_task_id(workflow_id, step_id));
            }
            self.attempt_failed(wf, &step, error, fx);
            self.dispatch_ready(wf, fx);
            self.settle(wf, fx);
            Ok(())
        })
        .await
    }

    /// Re-dispatch a step whose backoff elapsed. Held back while paused.
    pub(super) async fn retry_due(
        &self,
        workflow_id: &str,
        step_id: &str,
        attempt: u32,
    ) -> Result<(), WorkflowError> {
        self.update(workflow_id, |wf, fx| {
            if wf.status() != WorkflowStatus::InProgress
                || !wf.metadata.pending_steps.contains(step_id)
            {
                return Ok(());
            }
            let due = wf
                .metadata
                .step_results
                .get(step_id)
                .is_some_and(|r| r.status == StepStatus::Retrying && r.attempts == attempt);
            if !due {
                return Ok(());
            }
            if let Some(step) = wf.config.step(step_id).cloned() {
                info!(
                    "Retrying step {} of workflow {} (attempt {})",
                    step_id, workflow_id, attempt
                );
                self.start_attempt(wf, &step, attempt, fx);
            }
            Ok(())
        })
        .await
    }

    pub(super) async fn workflow_timed_out(
        &self,
        workflow_id: &str,
        timeout_ms: u64,
    ) -> Result<(), WorkflowError> {
        self.update(workflow_id, |wf, fx| {
            if wf.status().is_terminal() {
                return Ok(());
            }
            let error = format!("Workflow timed out after {timeout_ms}ms");
            error!("Workflow {}: {}", workflow_id, error);
            self.finish(wf, WorkflowStatus::Failed, Some(error), fx);
            Ok(())
        })
        .await
    }

    /// Dispatch steps that were waiting for an agent slot.
    pub(super) async fn pump(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        self.update(workflow_id, |wf, fx| {
            self.dispatch_ready(wf, fx);
            self.settle(wf, fx);
            Ok(())
        })
        .await
    }
}
