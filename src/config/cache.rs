//! Cache configuration

use serde::Deserialize;

use crate::domain::cache::DEFAULT_REVISION_FIELDS;

use super::error::ValidationError;

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Buffer size of the collection change broadcast
    #[serde(default = "default_change_capacity")]
    pub change_channel_capacity: usize,

    /// Entity fields read as a revision, first present wins
    #[serde(default = "default_revision_fields")]
    pub revision_fields: Vec<String>,
}

impl CacheConfig {
    /// Validate cache configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.change_channel_capacity == 0 {
            return Err(ValidationError::InvalidChannelCapacity);
        }
        if self.revision_fields.iter().all(|f| f.trim().is_empty()) {
            return Err(ValidationError::NoRevisionFields);
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            change_channel_capacity: default_change_capacity(),
            revision_fields: default_revision_fields(),
        }
    }
}

fn default_change_capacity() -> usize {
    256
}

fn default_revision_fields() -> Vec<String> {
    DEFAULT_REVISION_FIELDS.iter().map(|f| f.to_string()).collect()
}
