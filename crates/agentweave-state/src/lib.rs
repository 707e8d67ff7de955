//! # AgentWeave State
//!
//! Reference [`StateStore`](agentweave_protocols::StateStore) implementation
//! and the storage adapters behind it.
//!
//! - [`StateManager`] - event-emitting store with per-entity locks and
//!   buffered transactions
//! - [`MemoryStorageAdapter`] - in-process map, used by default and in tests
//! - [`FileStorageAdapter`] - one JSON file per key under a directory

pub mod file;
pub mod manager;
pub mod memory;

mod pattern;

pub use file::FileStorageAdapter;
pub use manager::{DEFAULT_EVENT_CAPACITY, StateManager};
pub use memory::MemoryStorageAdapter;
