//! Reference state store.
//!
//! Writes go through a single gate so the `previous_state` recorded in each
//! event is exact. Read-modify-write cycles on one entity are serialized by
//! callers through [`StateStore::lock`].

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use agentweave_protocols::{
    EntityLock, EntityType, EventFilter, Metadata, StateError, StateEvent, StateKey, StateStore,
    StateSubscription, StorageAdapter, TransactionId, generate_id,
};

use crate::memory::MemoryStorageAdapter;

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum PendingWrite {
    Set(StateKey, serde_json::Value),
    Delete(StateKey),
}

impl PendingWrite {
    fn key(&self) -> &StateKey {
        match self {
            PendingWrite::Set(key, _) | PendingWrite::Delete(key) => key,
        }
    }
}

/// Event-emitting [`StateStore`] over any [`StorageAdapter`].
pub struct StateManager {
    adapter: Arc<dyn StorageAdapter>,
    events: broadcast::Sender<StateEvent>,
    locks: DashMap<StateKey, Arc<tokio::sync::Mutex<()>>>,
    write_gate: tokio::sync::Mutex<()>,
    transactions: Mutex<HashMap<TransactionId, Vec<PendingWrite>>>,
    closed: AtomicBool,
}

impl StateManager {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self::with_capacity(adapter, DEFAULT_EVENT_CAPACITY)
    }

    /// `capacity` bounds how many events a slow subscriber may lag behind.
    pub fn with_capacity(adapter: Arc<dyn StorageAdapter>, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            adapter,
            events,
            locks: DashMap::new(),
            write_gate: tokio::sync::Mutex::new(()),
            transactions: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Store backed by a fresh [`MemoryStorageAdapter`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorageAdapter::new()))
    }

    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    /// Shallow-merge `patch` into the current object state of `key`.
    ///
    /// Non-object values replace the state wholesale. Takes the entity lock,
    /// so it must not be called while holding it.
    pub async fn merge_state(
        &self,
        key: &StateKey,
        patch: serde_json::Value,
    ) -> Result<StateEvent, StateError> {
        let _guard = self.lock(key).await;
        let merged = match (self.get_state(key).await?, patch) {
            (Some(serde_json::Value::Object(mut current)), serde_json::Value::Object(patch)) => {
                current.extend(patch);
                serde_json::Value::Object(current)
            }
            (_, patch) => patch,
        };
        self.set_state(key, merged).await
    }

    pub async fn close(&self) -> Result<(), StateError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.transactions.lock().clear();
        self.adapter.close().await
    }

    fn ensure_open(&self) -> Result<(), StateError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StateError::Closed)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: StateEvent) {
        debug!(
            "state {:?} {}:{}",
            event.event_type,
            event.entity_type.prefix(),
            event.entity_id
        );
        // No receivers is not an error.
        let _ = self.events.send(event);
    }

    async fn apply(&self, write: &PendingWrite) -> Result<Option<StateEvent>, StateError> {
        let key = write.key();
        let raw = key.to_string();
        let previous = self.adapter.get(&raw).await?;
        match write {
            PendingWrite::Set(_, value) => {
                self.adapter.set(&raw, value.clone()).await?;
                Ok(Some(StateEvent::for_change(key, previous, Some(value.clone()))))
            }
            PendingWrite::Delete(_) => {
                if previous.is_none() {
                    return Ok(None);
                }
                self.adapter.delete(&raw).await?;
                Ok(Some(StateEvent::for_change(key, previous, None)))
            }
        }
    }

    async fn restore(&self, key: &StateKey, previous: Option<serde_json::Value>) {
        let raw = key.to_string();
        let result = match previous {
            Some(value) => self.adapter.set(&raw, value).await,
            None => self.adapter.delete(&raw).await.map(|_| ()),
        };
        if let Err(e) = result {
            error!("Failed to restore {} during rollback: {}", raw, e);
        }
    }

    fn with_transaction<R>(
        &self,
        tx: &str,
        f: impl FnOnce(&mut Vec<PendingWrite>) -> R,
    ) -> Result<R, StateError> {
        let mut transactions = self.transactions.lock();
        let writes = transactions
            .get_mut(tx)
            .ok_or_else(|| StateError::TransactionNotFound(tx.to_string()))?;
        Ok(f(writes))
    }
}

#[async_trait]
impl StateStore for StateManager {
    async fn get_state(&self, key: &StateKey) -> Result<Option<serde_json::Value>, StateError> {
        self.ensure_open()?;
        self.adapter.get(&key.to_string()).await
    }

    async fn set_state(
        &self,
        key: &StateKey,
        value: serde_json::Value,
    ) -> Result<StateEvent, StateError> {
        self.ensure_open()?;
        let write = PendingWrite::Set(key.clone(), value);
        let event = {
            let _gate = self.write_gate.lock().await;
            self.apply(&write).await?
        };
        let event = event.ok_or_else(|| StateError::Storage(format!("no event for {}", key)))?;
        self.emit(event.clone());
        Ok(event)
    }

    async fn delete_state(&self, key: &StateKey) -> Result<Option<StateEvent>, StateError> {
        self.ensure_open()?;
        let event = {
            let _gate = self.write_gate.lock().await;
            self.apply(&PendingWrite::Delete(key.clone())).await?
        };
        if let Some(event) = &event {
            self.emit(event.clone());
            self.locks.remove(key);
        }
        Ok(event)
    }

    async fn list_states(
        &self,
        entity_type: EntityType,
    ) -> Result<Vec<(StateKey, serde_json::Value)>, StateError> {
        self.ensure_open()?;
        let mut states = Vec::new();
        for raw in self.adapter.list(&StateKey::pattern(entity_type)).await? {
            let key = match StateKey::parse(&raw) {
                Ok(key) => key,
                Err(e) => {
                    warn!("Skipping malformed state key: {}", e);
                    continue;
                }
            };
            if let Some(value) = self.adapter.get(&raw).await? {
                states.push((key, value));
            }
        }
        Ok(states)
    }

    fn subscribe(&self, filter: EventFilter) -> StateSubscription {
        StateSubscription::new(self.events.subscribe(), filter)
    }

    async fn lock(&self, key: &StateKey) -> EntityLock {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    async fn begin_transaction(&self) -> Result<TransactionId, StateError> {
        self.ensure_open()?;
        let id = generate_id();
        self.transactions.lock().insert(id.clone(), Vec::new());
        debug!("Transaction {} started", id);
        Ok(id)
    }

    async fn set_in_transaction(
        &self,
        tx: &str,
        key: &StateKey,
        value: serde_json::Value,
    ) -> Result<(), StateError> {
        self.with_transaction(tx, |writes| {
            writes.push(PendingWrite::Set(key.clone(), value));
        })
    }

    async fn delete_in_transaction(&self, tx: &str, key: &StateKey) -> Result<(), StateError> {
        self.with_transaction(tx, |writes| {
            writes.push(PendingWrite::Delete(key.clone()));
        })
    }

    async fn commit(&self, tx: &str) -> Result<Vec<StateEvent>, StateError> {
        self.ensure_open()?;
        let writes = self
            .transactions
            .lock()
            .remove(tx)
            .ok_or_else(|| StateError::TransactionNotFound(tx.to_string()))?;

        let gate = self.write_gate.lock().await;
        let mut applied: Vec<(StateKey, Option<serde_json::Value>)> = Vec::new();
        let mut events = Vec::new();

        for write in &writes {
            let key = write.key();
            let previous = match self.adapter.get(&key.to_string()).await {
                Ok(previous) => previous,
                Err(e) => {
                    self.undo(applied).await;
                    return Err(e);
                }
            };
            match self.apply(write).await {
                Ok(event) => {
                    applied.push((key.clone(), previous));
                    events.extend(event);
                }
                Err(e) => {
                    warn!("Transaction {} failed, rolling back: {}", tx, e);
                    // The failed write may have partially landed.
                    applied.push((key.clone(), previous));
                    self.undo(applied).await;
                    return Err(e);
                }
            }
        }
        drop(gate);

        let mut metadata = Metadata::new();
        metadata.insert("transaction_id".to_string(), serde_json::json!(tx));
        let events: Vec<StateEvent> = events
            .into_iter()
            .map(|event| event.with_metadata(metadata.clone()))
            .collect();
        for event in &events {
            self.emit(event.clone());
        }
        debug!("Transaction {} committed ({} writes)", tx, writes.len());
        Ok(events)
    }

    async fn rollback(&self, tx: &str) -> Result<(), StateError> {
        if self.transactions.lock().remove(tx).is_none() {
            return Err(StateError::TransactionNotFound(tx.to_string()));
        }
        debug!("Transaction {} rolled back", tx);
        Ok(())
    }
}

impl StateManager {
    async fn undo(&self, applied: Vec<(StateKey, Option<serde_json::Value>)>) {
        for (key, previous) in applied.into_iter().rev() {
            self.restore(&key, previous).await;
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
