//! # AgentWeave Protocols
//!
//! Core protocol definitions (types and traits) for the AgentWeave framework.
//! Contains only interface definitions and plain data - no runtimes.
//!
//! ## Core Traits
//!
//! - [`AgentBehavior`] - Domain logic plugged into an agent runtime
//! - [`MessageHandler`] - Receiver side of the message fabric
//! - [`MessageBroker`] - Addressable publish/subscribe fabric
//! - [`MessageSerializer`] - Lossless wire encoding of messages
//! - [`StorageAdapter`] - Key/value persistence backend
//! - [`StateStore`] - Entity state snapshots with change events

pub mod agent;
pub mod error;
pub mod message;
pub mod state;
pub mod task;
pub mod types;
pub mod workflow;

pub use agent::{
    AbortSignal, AgentBehavior, AgentConfig, AgentEvent, AgentOverrides, AgentSnapshot,
    AgentState, AgentStatus, HandlerRegistrar, TaskContext,
};
pub use error::{AgentError, MessageError, StateError, TaskError, WorkflowError};
pub use message::{
    AgentCommand, Message, MessageBroker, MessageFilter, MessageHandler, MessagePayload,
    MessageSerializer, MessageTransform, MessageType, Subscription, SubscriptionId,
};
pub use state::{
    EntityLock, EntityType, EventFilter, QueryOptions, StateEvent, StateEventType, StateKey,
    StateStore, StateStoreExt, StateSubscription, StorageAdapter, TransactionId,
};
pub use task::{Task, TaskConfig, TaskMetadata, TaskPriority, TaskResult, TaskStatus};
pub use types::*;
pub use workflow::{
    FailureStrategy, RetryStrategy, StepStatus, Workflow, WorkflowConfig, WorkflowMetadata,
    WorkflowStatus, WorkflowStep, WorkflowStepResult, compose_task_id, split_task_id,
};
