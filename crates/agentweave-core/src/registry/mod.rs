//! Registries keyed by id.

mod base;
mod directory;

pub use base::{BaseRegistry, Registerable};
pub use directory::{AgentDescriptor, AgentDirectory};
