//! # AgentWeave Orchestrator
//!
//! Runs workflows: DAGs of steps, each step a task owned by one agent.
//!
//! The [`WorkflowOrchestrator`] dispatches every step whose dependencies
//! have completed as a `TASK_ASSIGNMENT`, demultiplexes `TASK_RESULT`
//! replies by their composite `<workflow>:<step>` task id, and applies
//! retry, timeout and failure-strategy policy. All workflow state lives in
//! a [`StateStore`](agentweave_protocols::StateStore).

pub mod condition;
pub mod dag;
pub mod definition;
pub mod orchestrator;

pub use condition::{ConditionEvaluator, SimpleConditionEvaluator};
pub use definition::{ErrorPolicy, StepDefinition, WorkflowDefinition};
pub use orchestrator::{OrchestratorConfig, WorkflowOrchestrator};
