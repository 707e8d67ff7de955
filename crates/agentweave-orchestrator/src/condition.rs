//! Step conditions evaluated against a workflow's initial state.

use async_trait::async_trait;
use serde_json::{Map, Value};

use agentweave_protocols::WorkflowError;

/// Trait for evaluating step conditions.
#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    /// Evaluate a condition expression against `state`.
    async fn evaluate(&self, condition: &str, state: &Map<String, Value>)
    -> Result<bool, WorkflowError>;
}

/// Default evaluator.
///
/// Understands `path == value`, `path != value`, `path` (truthiness) and
/// `!path`. Paths may descend into objects with dots (`user.role`).
pub struct SimpleConditionEvaluator;

fn lookup<'a>(state: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut value = state.get(parts.next()?)?;
    for part in parts {
        value = value.get(part)?;
    }
    Some(value)
}

fn equals(value: &Value, expected: &str) -> bool {
    value.as_str().is_some_and(|v| v == expected) || value.to_string().trim_matches('"') == expected
}

fn truthy(value: &Value) -> bool {
    value
        .as_bool()
        .unwrap_or_else(|| !value.is_null() && value.as_str().is_none_or(|s| !s.is_empty()))
}

#[async_trait]
impl ConditionEvaluator for SimpleConditionEvaluator {
    async fn evaluate(
        &self,
        condition: &str,
        state: &Map<String, Value>,
    ) -> Result<bool, WorkflowError> {
        let condition = condition.trim();
        if condition.is_empty() {
            return Err(WorkflowError::Validation("empty step condition".to_string()));
        }

        if let Some((left, right)) = condition.split_once("!=") {
            let right = right.trim().trim_matches('"');
            return Ok(lookup(state, left.trim()).is_none_or(|v| !equals(v, right)));
        }

        if let Some((left, right)) = condition.split_once("==") {
            let right = right.trim().trim_matches('"');
            return Ok(lookup(state, left.trim()).is_some_and(|v| equals(v, right)));
        }

        if let Some(path) = condition.strip_prefix('!') {
            return Ok(!lookup(state, path.trim()).is_some_and(truthy));
        }

        Ok(lookup(state, condition).is_some_and(truthy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> Map<String, Value> {
        match json!({
            "status": "active",
            "enabled": true,
            "disabled": false,
            "retries": 3,
            "empty": "",
            "user": { "role": "admin" }
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_equality() {
        let evaluator = SimpleConditionEvaluator;
        let state = state();
        assert!(evaluator.evaluate("status == active", &state).await.unwrap());
        assert!(evaluator.evaluate("status == \"active\"", &state).await.unwrap());
        assert!(!evaluator.evaluate("status == inactive", &state).await.unwrap());
        assert!(evaluator.evaluate("retries == 3", &state).await.unwrap());
        assert!(!evaluator.evaluate("missing == x", &state).await.unwrap());
    }

    #[tokio::test]
    async fn test_inequality() {
        let evaluator = SimpleConditionEvaluator;
        let state = state();
        assert!(evaluator.evaluate("status != inactive", &state).await.unwrap());
        assert!(!evaluator.evaluate("status != active", &state).await.unwrap());
        assert!(evaluator.evaluate("missing != x", &state).await.unwrap());
    }

    #[tokio::test]
    async fn test_truthiness() {
        let evaluator = SimpleConditionEvaluator;
        let state = state();
        assert!(evaluator.evaluate("enabled", &state).await.unwrap());
        assert!(!evaluator.evaluate("disabled", &state).await.unwrap());
        assert!(!evaluator.evaluate("empty", &state).await.unwrap());
        assert!(evaluator.evaluate("retries", &state).await.unwrap());
        assert!(!evaluator.evaluate("missing", &state).await.unwrap());
        assert!(evaluator.evaluate("!disabled", &state).await.unwrap());
        assert!(evaluator.evaluate("!missing", &state).await.unwrap());
    }

    #[tokio::test]
    async fn test_nested_paths() {
        let evaluator = SimpleConditionEvaluator;
        let state = state();
        assert!(evaluator.evaluate("user.role == admin", &state).await.unwrap());
        assert!(!evaluator.evaluate("user.name", &state).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_condition_rejected() {
        let evaluator = SimpleConditionEvaluator;
        assert!(evaluator.evaluate("  ", &state()).await.is_err());
    }
}
