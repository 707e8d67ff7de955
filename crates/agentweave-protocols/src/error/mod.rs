//! Error types for the AgentWeave protocol layer.

mod agent;
mod message;
mod state;
mod task;
mod workflow;

pub use agent::*;
pub use message::*;
pub use state::*;
pub use task::*;
pub use workflow::*;
