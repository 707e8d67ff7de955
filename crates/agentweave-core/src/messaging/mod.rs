//! Message fabric: local routing, per-agent dispatch and the in-memory
//! broker.

mod broker;
mod manager;
mod router;
mod serializer;

pub use broker::{BrokerConfig, BrokerStats, InMemoryBroker};
pub use manager::MessageManager;
pub use router::{HandlerId, MessageRouter};
pub use serializer::JsonMessageSerializer;
