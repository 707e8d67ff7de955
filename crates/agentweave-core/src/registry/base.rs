//! Generic id-keyed registry.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

use agentweave_protocols::AgentError;

/// Items that can be stored in a [`BaseRegistry`].
pub trait Registerable: Send + Sync {
    fn registry_id(&self) -> &str;
}

/// Thread-safe registry with duplicate checking.
pub struct BaseRegistry<T: ?Sized + Registerable> {
    items: DashMap<String, Arc<T>>,
}

impl<T: ?Sized + Registerable> BaseRegistry<T> {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
        }
    }

    /// Fails if an item with the same id is already registered.
    pub fn register(&self, item: Arc<T>) -> Result<(), AgentError> {
        match self.items.entry(item.registry_id().to_string()) {
            Entry::Occupied(entry) => Err(AgentError::AlreadyRegistered(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(item);
                Ok(())
            }
        }
    }

    /// Insert or replace an item.
    pub fn upsert(&self, item: Arc<T>) -> Option<Arc<T>> {
        self.items.insert(item.registry_id().to_string(), item)
    }

    pub fn unregister(&self, id: &str) -> Result<Arc<T>, AgentError> {
        self.items
            .remove(id)
            .map(|(_, item)| item)
            .ok_or_else(|| AgentError::NotFound(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.items.get(id).map(|item| item.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.items.iter().map(|item| item.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Arc<T>> + '_ {
        self.items.iter().map(|entry| entry.value().clone())
    }
}

impl<T: ?Sized + Registerable> Default for BaseRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
