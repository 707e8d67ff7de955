//! Glob matching over storage keys.

use agentweave_protocols::StateError;

pub(crate) struct KeyPattern(glob::Pattern);

impl KeyPattern {
    pub(crate) fn new(pattern: &str) -> Result<Self, StateError> {
        glob::Pattern::new(pattern)
            .map(KeyPattern)
            .map_err(|e| StateError::InvalidPattern(format!("{}: {}", pattern, e)))
    }

    pub(crate) fn matches(&self, key: &str) -> bool {
        self.0.matches(key)
    }
}
