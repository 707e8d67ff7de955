//! Step graph analysis: validation and ready-set computation.

use std::collections::{HashMap, HashSet, VecDeque};

use agentweave_protocols::workflow::TASK_ID_SEPARATOR;
use agentweave_protocols::{StepStatus, Workflow, WorkflowConfig, WorkflowError};

/// Whether a step in this status will never run again.
pub fn is_settled(status: StepStatus) -> bool {
    matches!(
        status,
        StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped | StepStatus::Cancelled
    )
}

/// Check that the step graph is well formed and acyclic.
pub fn validate(config: &WorkflowConfig) -> Result<(), WorkflowError> {
    if config.steps.is_empty() {
        return Err(WorkflowError::Validation(format!(
            "workflow '{}' has no steps",
            config.name
        )));
    }

    let mut ids = HashSet::new();
    for step in &config.steps {
        if step.id.is_empty() {
            return Err(WorkflowError::Validation("step id must not be empty".to_string()));
        }
        if step.id.contains(TASK_ID_SEPARATOR) {
            return Err(WorkflowError::Validation(format!(
                "step id '{}' must not contain '{}'",
                step.id, TASK_ID_SEPARATOR
            )));
        }
        if step.agent_id.is_empty() {
            return Err(WorkflowError::Validation(format!(
                "step '{}' has no agent",
                step.id
            )));
        }
        if !ids.insert(step.id.as_str()) {
            return Err(WorkflowError::Validation(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
    }

    for step in &config.steps {
        for dep in &step.dependencies {
            if !ids.contains(dep.as_str()) {
                return Err(WorkflowError::Validation(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                )));
            }
        }
    }

    topological_order(config).map(|_| ())
}

/// Step ids in an order where every step follows its dependencies.
///
/// Ties keep declaration order. Fails with the steps left on a cycle.
pub fn topological_order(config: &WorkflowConfig) -> Result<Vec<String>, WorkflowError> {
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in &config.steps {
        indegree.entry(step.id.as_str()).or_insert(0);
        for dep in &step.dependencies {
            *indegree.entry(step.id.as_str()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(step.id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = config
        .steps
        .iter()
        .map(|s| s.id.as_str())
        .filter(|id| indegree.get(id) == Some(&0))
        .collect();
    let mut order = Vec::with_capacity(config.steps.len());

    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        for next in dependents.get(id).into_iter().flatten() {
            if let Some(degree) = indegree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*next);
                }
            }
        }
    }

    if order.len() < config.steps.len() {
        let mut cycle: Vec<String> = indegree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        cycle.sort();
        return Err(WorkflowError::Cycle(cycle));
    }
    Ok(order)
}

/// Steps that may be dispatched now, in declaration order.
///
/// A step is ready when it has not run to a settled status, is not already
/// dispatched, and every dependency has COMPLETED.
pub fn ready_steps(workflow: &Workflow) -> Vec<String> {
    let completed = workflow.completed_steps();
    workflow
        .config
        .steps
        .iter()
        .filter(|step| !workflow.metadata.pending_steps.contains(&step.id))
        .filter(|step| !workflow.step_status(&step.id).is_some_and(is_settled))
        .filter(|step| {
            step.dependencies
                .iter()
                .all(|dep| completed.contains(dep.as_str()))
        })
        .map(|step| step.id.clone())
        .collect()
}

/// Steps that have neither settled nor been dispatched.
///
/// When nothing is ready or pending these can never run.
pub fn unsettled_steps(workflow: &Workflow) -> Vec<String> {
    workflow
        .config
        .steps
        .iter()
        .filter(|step| !workflow.metadata.pending_steps.contains(&step.id))
        .filter(|step| !workflow.step_status(&step.id).is_some_and(is_settled))
        .map(|step| step.id.clone())
        .collect()
}

#[cfg(test)]
#[path = "dag_tests.rs"]
mod tests;
