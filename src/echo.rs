//! Built-in agent used by `run`.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use agentweave_protocols::{AgentBehavior, AgentError, Task, TaskContext, TaskResult};

/// Answers every task with its own input.
///
/// Input keys understood: `delay_ms` (simulated work, abortable) and
/// `fail` (report a handled failure).
pub(crate) struct EchoBehavior;

#[async_trait]
impl AgentBehavior for EchoBehavior {
    async fn execute_task(&self, task: &Task, ctx: &TaskContext) -> Result<TaskResult, AgentError> {
        let input = &task.config.input;
        if let Some(delay_ms) = input.get("delay_ms").and_then(|v| v.as_u64()) {
            let deadline = tokio::time::Instant::now() + Duration::from_millis(delay_ms);
            while tokio::time::Instant::now() < deadline {
                if ctx.is_aborted() {
                    return Ok(TaskResult::failure("aborted"));
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        if input.get("fail").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Ok(TaskResult::failure(format!(
                "{} failed on request",
                task.config.task_type
            )));
        }

        Ok(TaskResult::success(json!({
            "agent": ctx.agent_id,
            "task_type": task.config.task_type,
            "input": input,
        })))
    }
}
