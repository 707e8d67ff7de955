//! State store protocol definitions.
//!
//! The state store is the single source of truth for agent, task and
//! workflow snapshots. Every mutation emits a [`StateEvent`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::StateError;
use crate::types::Metadata;

/// Kind of entity a state key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Agent,
    Task,
    Workflow,
}

impl EntityType {
    /// Key namespace prefix.
    pub fn prefix(&self) -> &'static str {
        match self {
            EntityType::Agent => "agent",
            EntityType::Task => "task",
            EntityType::Workflow => "workflow",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "agent" => Some(EntityType::Agent),
            "task" => Some(EntityType::Task),
            "workflow" => Some(EntityType::Workflow),
            _ => None,
        }
    }
}

/// Namespaced key, rendered as `"<entity>:<id>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey {
    pub entity_type: EntityType,
    pub id: String,
}

impl StateKey {
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            entity_type,
            id: id.into(),
        }
    }

    pub fn agent(id: impl Into<String>) -> Self {
        Self::new(EntityType::Agent, id)
    }

    pub fn task(id: impl Into<String>) -> Self {
        Self::new(EntityType::Task, id)
    }

    pub fn workflow(id: impl Into<String>) -> Self {
        Self::new(EntityType::Workflow, id)
    }

    /// Glob pattern matching every key of `entity_type`.
    pub fn pattern(entity_type: EntityType) -> String {
        format!("{}:*", entity_type.prefix())
    }

    pub fn parse(raw: &str) -> Result<Self, StateError> {
        let (prefix, id) = raw
            .split_once(':')
            .ok_or_else(|| StateError::InvalidKey(raw.to_string()))?;
        let entity_type =
            EntityType::from_prefix(prefix).ok_or_else(|| StateError::InvalidKey(raw.to_string()))?;
        if id.is_empty() {
            return Err(StateError::InvalidKey(raw.to_string()));
        }
        Ok(Self::new(entity_type, id))
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type.prefix(), self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateEventType {
    Created,
    Updated,
    Deleted,
}

/// Change notification emitted on every state mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEvent {
    #[serde(rename = "type")]
    pub event_type: StateEventType,
    pub timestamp: DateTime<Utc>,
    pub entity_id: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub previous_state: Option<serde_json::Value>,
    #[serde(default)]
    pub current_state: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl StateEvent {
    /// Build the event describing a change of `key` from `previous` to
    /// `current`.
    pub fn for_change(
        key: &StateKey,
        previous: Option<serde_json::Value>,
        current: Option<serde_json::Value>,
    ) -> Self {
        let event_type = match (&previous, &current) {
            (None, Some(_)) => StateEventType::Created,
            (_, None) => StateEventType::Deleted,
            _ => StateEventType::Updated,
        };
        Self {
            event_type,
            timestamp: Utc::now(),
            entity_id: key.id.clone(),
            entity_type: key.entity_type,
            previous_state: previous,
            current_state: current,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Subscription filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub entity_type: Option<EntityType>,
    pub event_type: Option<StateEventType>,
    pub entity_id: Option<String>,
}

impl EventFilter {
    /// Matches every event.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn entity(entity_type: EntityType) -> Self {
        Self {
            entity_type: Some(entity_type),
            ..Default::default()
        }
    }

    pub fn with_event_type(mut self, event_type: StateEventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn with_entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    pub fn matches(&self, event: &StateEvent) -> bool {
        self.entity_type.is_none_or(|t| t == event.entity_type)
            && self.event_type.is_none_or(|t| t == event.event_type)
            && self
                .entity_id
                .as_deref()
                .is_none_or(|id| id == event.entity_id)
    }
}

/// Receiver of filtered state events.
pub struct StateSubscription {
    receiver: broadcast::Receiver<StateEvent>,
    filter: EventFilter,
}

impl StateSubscription {
    pub fn new(receiver: broadcast::Receiver<StateEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Next matching event. Returns `None` once the store is dropped.
    ///
    /// Events missed because the receiver lagged are skipped.
    pub async fn recv(&mut self) -> Option<StateEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<StateEvent> {
        use broadcast::error::TryRecvError;
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = StateEvent> + Send + Unpin {
        let filter = self.filter;
        BroadcastStream::new(self.receiver)
            .filter_map(move |item| item.ok().filter(|event| filter.matches(event)))
    }
}

/// Options for [`StorageAdapter::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// Glob pattern over keys.
    pub pattern: String,
    /// JSON pointer equality filters, all of which must match.
    pub filters: Vec<(String, serde_json::Value)>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            pattern: "*".to_string(),
            filters: Vec::new(),
            offset: 0,
            limit: None,
        }
    }
}

impl QueryOptions {
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Default::default()
        }
    }

    pub fn where_eq(mut self, pointer: impl Into<String>, value: serde_json::Value) -> Self {
        self.filters.push((pointer.into(), value));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn matches(&self, value: &serde_json::Value) -> bool {
        self.filters
            .iter()
            .all(|(pointer, expected)| value.pointer(pointer) == Some(expected))
    }
}

/// Transaction identifier.
pub type TransactionId = String;

/// Exclusive per-entity lock guard.
pub type EntityLock = tokio::sync::OwnedMutexGuard<()>;

/// Key/value persistence backend consumed by state stores.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StateError>;

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), StateError>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StateError>;

    /// Keys matching a glob pattern, sorted.
    async fn list(&self, pattern: &str) -> Result<Vec<String>, StateError>;

    async fn query(
        &self,
        options: &QueryOptions,
    ) -> Result<Vec<(String, serde_json::Value)>, StateError> {
        let mut rows = Vec::new();
        for key in self.list(&options.pattern).await? {
            if let Some(value) = self.get(&key).await? {
                if options.matches(&value) {
                    rows.push((key, value));
                }
            }
        }
        let limit = options.limit.unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(options.offset).take(limit).collect())
    }

    async fn begin_transaction(&self) -> Result<TransactionId, StateError> {
        Err(StateError::TransactionsUnsupported)
    }

    async fn commit_transaction(&self, id: &str) -> Result<(), StateError> {
        let _ = id;
        Err(StateError::TransactionsUnsupported)
    }

    async fn rollback_transaction(&self, id: &str) -> Result<(), StateError> {
        let _ = id;
        Err(StateError::TransactionsUnsupported)
    }

    async fn close(&self) -> Result<(), StateError> {
        Ok(())
    }
}

/// Entity state snapshots with change events, locks and transactions.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_state(&self, key: &StateKey) -> Result<Option<serde_json::Value>, StateError>;

    /// Replace the state of `key` and emit the resulting event.
    async fn set_state(
        &self,
        key: &StateKey,
        value: serde_json::Value,
    ) -> Result<StateEvent, StateError>;

    /// Remove `key`. Returns the emitted event, if the key existed.
    async fn delete_state(&self, key: &StateKey) -> Result<Option<StateEvent>, StateError>;

    async fn list_states(
        &self,
        entity_type: EntityType,
    ) -> Result<Vec<(StateKey, serde_json::Value)>, StateError>;

    fn subscribe(&self, filter: EventFilter) -> StateSubscription;

    /// Serialize read-modify-write cycles on one entity.
    async fn lock(&self, key: &StateKey) -> EntityLock;

    async fn begin_transaction(&self) -> Result<TransactionId, StateError>;

    async fn set_in_transaction(
        &self,
        tx: &str,
        key: &StateKey,
        value: serde_json::Value,
    ) -> Result<(), StateError>;

    async fn delete_in_transaction(&self, tx: &str, key: &StateKey) -> Result<(), StateError>;

    /// Apply buffered writes in order. Either all apply or none do.
    async fn commit(&self, tx: &str) -> Result<Vec<StateEvent>, StateError>;

    async fn rollback(&self, tx: &str) -> Result<(), StateError>;
}

/// Typed helpers over [`StateStore`].
#[async_trait]
pub trait StateStoreExt: StateStore {
    async fn load<T: DeserializeOwned + Send>(&self, key: &StateKey) -> Result<Option<T>, StateError> {
        match self.get_state(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn save<T: Serialize + Sync>(&self, key: &StateKey, value: &T) -> Result<StateEvent, StateError> {
        let value = serde_json::to_value(value)?;
        self.set_state(key, value).await
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
