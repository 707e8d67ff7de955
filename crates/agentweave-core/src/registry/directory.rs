//! Directory of agents known to a dispatcher.

use serde_json::Value;
use std::sync::Arc;

use agentweave_protocols::{AgentConfig, AgentError};

use super::base::{BaseRegistry, Registerable};

/// What a dispatcher needs to know about an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDescriptor {
    pub id: String,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub max_concurrent_tasks: usize,
}

impl AgentDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_type: String::new(),
            capabilities: Vec::new(),
            max_concurrent_tasks: 1,
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn missing_capabilities(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|cap| !self.capabilities.contains(cap))
            .cloned()
            .collect()
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "type": self.agent_type,
            "capabilities": self.capabilities,
            "max_concurrent_tasks": self.max_concurrent_tasks,
        })
    }
}

impl From<&AgentConfig> for AgentDescriptor {
    fn from(config: &AgentConfig) -> Self {
        Self {
            id: config.id.clone(),
            agent_type: config.agent_type.clone(),
            capabilities: config.capabilities.clone(),
            max_concurrent_tasks: config.max_concurrent_tasks,
        }
    }
}

impl Registerable for AgentDescriptor {
    fn registry_id(&self) -> &str {
        &self.id
    }
}

/// Registry of [`AgentDescriptor`]s.
#[derive(Default)]
pub struct AgentDirectory {
    inner: BaseRegistry<AgentDescriptor>,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: AgentDescriptor) -> Result<(), AgentError> {
        self.inner.register(Arc::new(descriptor))
    }

    /// Register or refresh a descriptor.
    pub fn upsert(&self, descriptor: AgentDescriptor) {
        self.inner.upsert(Arc::new(descriptor));
    }

    pub fn unregister(&self, id: &str) -> Result<(), AgentError> {
        self.inner.unregister(id).map(|_| ())
    }

    pub fn get(&self, id: &str) -> Option<Arc<AgentDescriptor>> {
        self.inner.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.contains(id)
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.inner.list_ids()
    }

    /// Ids of agents declaring every capability in `required`.
    pub fn find_capable(&self, required: &[String]) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .iter()
            .filter(|d| d.missing_capabilities(required).is_empty())
            .map(|d| d.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
