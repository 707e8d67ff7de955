//! # AgentWeave Core
//!
//! Runtime building blocks shared by agents and the orchestrator:
//!
//! - [`Agent`] - lifecycle state machine around an
//!   [`AgentBehavior`](agentweave_protocols::AgentBehavior)
//! - [`TaskManager`] - per-agent registry of in-flight tasks
//! - [`MessageRouter`] / [`MessageManager`] - local handler fan-out
//! - [`InMemoryBroker`] - addressable publish/subscribe fabric
//! - [`JsonMessageSerializer`] - wire encoding of messages
//! - [`AgentDirectory`] - registry of agent descriptors used for dispatch

pub mod agent;
pub mod messaging;
pub mod registry;
pub mod task_manager;

pub use agent::Agent;
pub use messaging::{
    BrokerConfig, BrokerStats, HandlerId, InMemoryBroker, JsonMessageSerializer, MessageManager,
    MessageRouter,
};
pub use registry::{AgentDescriptor, AgentDirectory, BaseRegistry, Registerable};
pub use task_manager::TaskManager;
