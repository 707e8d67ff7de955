//! In-memory storage adapter.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use agentweave_protocols::{StateError, StorageAdapter};

use crate::pattern::KeyPattern;

/// Storage adapter backed by an ordered in-process map.
#[derive(Default)]
pub struct MemoryStorageAdapter {
    entries: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl MemoryStorageAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorageAdapter {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StateError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), StateError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StateError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn list(&self, pattern: &str) -> Result<Vec<String>, StateError> {
        let pattern = KeyPattern::new(pattern)?;
        let entries = self.entries.read().await;
        Ok(entries
            .keys()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentweave_protocols::QueryOptions;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_delete() {
        let adapter = MemoryStorageAdapter::new();
        assert!(adapter.get("agent:a").await.unwrap().is_none());

        adapter.set("agent:a", json!({"status": "IDLE"})).await.unwrap();
        assert_eq!(
            adapter.get("agent:a").await.unwrap(),
            Some(json!({"status": "IDLE"}))
        );
        assert_eq!(adapter.len().await, 1);

        assert!(adapter.delete("agent:a").await.unwrap());
        assert!(!adapter.delete("agent:a").await.unwrap());
        assert!(adapter.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_pattern_sorted() {
        let adapter = MemoryStorageAdapter::new();
        for key in ["task:b", "agent:x", "task:a"] {
            adapter.set(key, json!(1)).await.unwrap();
        }
        assert_eq!(adapter.list("task:*").await.unwrap(), vec!["task:a", "task:b"]);
        assert_eq!(adapter.list("*").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_default_query() {
        let adapter = MemoryStorageAdapter::new();
        adapter.set("task:1", json!({"status": "FAILED"})).await.unwrap();
        adapter.set("task:2", json!({"status": "COMPLETED"})).await.unwrap();
        adapter.set("task:3", json!({"status": "FAILED"})).await.unwrap();

        let failed = adapter
            .query(&QueryOptions::pattern("task:*").where_eq("/status", json!("FAILED")))
            .await
            .unwrap();
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].0, "task:1");

        let page = adapter
            .query(&QueryOptions::pattern("task:*").with_offset(1).with_limit(1))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].0, "task:2");
    }

    #[tokio::test]
    async fn test_transactions_unsupported() {
        let adapter = MemoryStorageAdapter::new();
        assert!(matches!(
            adapter.begin_transaction().await,
            Err(StateError::TransactionsUnsupported)
        ));
    }
}
