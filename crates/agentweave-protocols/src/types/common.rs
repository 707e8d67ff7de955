//! Common utility types.

use std::collections::HashMap;

/// Unique identifier type.
pub type Id = String;

/// Metadata map type.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Generate a fresh random identifier.
pub fn generate_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}
