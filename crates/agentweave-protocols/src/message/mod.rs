//! Message protocol definitions.
//!
//! Messages are the only way agents and the orchestrator talk to each
//! other. A [`Message`] is immutable once published; transforms produce a
//! new value instead of editing the original.

mod broker;
mod envelope;
mod payload;

pub use broker::*;
pub use envelope::*;
pub use payload::*;
