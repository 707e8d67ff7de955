//! Workflow definition input format.
//!
//! A [`WorkflowDefinition`] is the plain-data shape callers write by hand
//! (JSON or TOML). [`WorkflowDefinition::into_config`] evaluates step
//! conditions and produces the [`WorkflowConfig`] the orchestrator runs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use agentweave_protocols::{
    FailureStrategy, RetryStrategy, TaskPriority, WorkflowConfig, WorkflowError, WorkflowStep,
};

use crate::condition::ConditionEvaluator;
use crate::dag;

/// What a failing step does to its workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    Continue,
    FailWorkflow,
}

impl From<ErrorPolicy> for FailureStrategy {
    fn from(policy: ErrorPolicy) -> Self {
        match policy {
            ErrorPolicy::Continue => FailureStrategy::Continue,
            ErrorPolicy::FailWorkflow => FailureStrategy::FailWorkflow,
        }
    }
}

/// One step of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub agent_id: String,

    pub task_type: String,

    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Step is dropped when this evaluates to false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Key under which the result data is handed to dependents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<ErrorPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryStrategy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,

    #[serde(default)]
    pub required_capabilities: Vec<String>,
}

impl StepDefinition {
    fn into_step(self, dropped: &HashSet<String>) -> WorkflowStep {
        let mut step = WorkflowStep::new(self.id, self.agent_id, self.task_type);
        if let Some(name) = self.name {
            step.name = name;
        }
        step.dependencies = self
            .dependencies
            .into_iter()
            .filter(|dep| !dropped.contains(dep))
            .collect();
        step.output_key = self.on_success;
        step.failure_strategy = self.on_error.map(Into::into).unwrap_or_default();
        step.timeout_ms = self.timeout_ms;
        step.retry_strategy = self.retry;
        if let Some(input) = self.input {
            step.task.input = input;
        }
        if let Some(priority) = self.priority {
            step.task.priority = priority;
        }
        step.task.required_capabilities = self.required_capabilities;
        step
    }
}

/// A workflow as written by its author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub max_concurrency: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Default retry policy for steps that declare none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryStrategy>,

    pub steps: Vec<StepDefinition>,

    /// Values step conditions are evaluated against.
    #[serde(default)]
    pub initial_state: Map<String, Value>,
}

impl WorkflowDefinition {
    pub fn from_json_str(content: &str) -> Result<Self, WorkflowError> {
        serde_json::from_str(content)
            .map_err(|e| WorkflowError::Validation(format!("invalid JSON definition: {e}")))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, WorkflowError> {
        toml::from_str(content)
            .map_err(|e| WorkflowError::Validation(format!("invalid TOML definition: {e}")))
    }

    /// Load a definition file. `.json` files are parsed as JSON, anything
    /// else as TOML.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, WorkflowError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            WorkflowError::Validation(format!("cannot read {}: {e}", path.display()))
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    /// Evaluate conditions and build a validated [`WorkflowConfig`].
    ///
    /// Steps whose condition is false are dropped and removed from the
    /// dependency lists of the remaining steps.
    pub async fn into_config(
        self,
        evaluator: &dyn ConditionEvaluator,
    ) -> Result<WorkflowConfig, WorkflowError> {
        let mut dropped = HashSet::new();
        let mut kept = Vec::with_capacity(self.steps.len());
        for step in self.steps {
            if let Some(condition) = &step.condition {
                if !evaluator.evaluate(condition, &self.initial_state).await? {
                    info!("Step {} dropped: condition `{}` is false", step.id, condition);
                    dropped.insert(step.id.clone());
                    continue;
                }
            }
            kept.push(step);
        }

        let mut config = WorkflowConfig::new(self.name)
            .with_id(self.id)
            .with_max_concurrency(self.max_concurrency);
        config.timeout_ms = self.timeout_ms;
        config.retry_strategy = self.retry;
        config.steps = kept
            .into_iter()
            .map(|step| step.into_step(&dropped))
            .collect();

        dag::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
#[path = "definition_tests.rs"]
mod tests;
