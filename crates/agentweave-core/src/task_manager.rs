//! Per-agent task bookkeeping.
//!
//! A plain map with no locking of its own: each agent owns exactly one
//! manager and serializes access to it.

use std::collections::HashMap;

use agentweave_protocols::{Task, TaskError, TaskResult, TaskStatus};

#[derive(Debug, Default)]
pub struct TaskManager {
    tasks: HashMap<String, Task>,
    /// Insertion order of task ids.
    order: Vec<String>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, task: Task) -> Result<(), TaskError> {
        let id = task.id().to_string();
        if self.tasks.contains_key(&id) {
            return Err(TaskError::AlreadyExists(id));
        }
        self.order.push(id.clone());
        self.tasks.insert(id, task);
        Ok(())
    }

    pub fn remove_task(&mut self, task_id: &str) -> Option<Task> {
        let task = self.tasks.remove(task_id)?;
        self.order.retain(|id| id != task_id);
        Some(task)
    }

    pub fn get_task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    /// Copies of all tasks, oldest first.
    pub fn get_all_tasks(&self) -> Vec<Task> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect()
    }

    /// Ids of tasks that have not reached a terminal status, oldest first.
    pub fn get_current_tasks(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| {
                self.tasks
                    .get(id.as_str())
                    .is_some_and(|t| !t.status().is_terminal())
            })
            .cloned()
            .collect()
    }

    pub fn update_task_status(&mut self, task_id: &str, status: TaskStatus) -> Result<(), TaskError> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?
            .transition(status)
    }

    pub fn set_task_progress(&mut self, task_id: &str, progress: f32) -> Result<(), TaskError> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?
            .set_progress(progress);
        Ok(())
    }

    pub fn set_task_result(&mut self, task_id: &str, result: TaskResult) -> Result<(), TaskError> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?
            .attach_result(result)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
#[path = "task_manager_tests.rs"]
mod tests;
