//! Strongly-typed identifier value objects.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::ValidationError;

const PLACEHOLDER_PREFIX: &str = "tmp-";

/// The single normalized key identifying an entity across all cache operations.
///
/// Always compared as a string, so an entity referenced as numeric `5` and as
/// `"5"` lands in the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalId(String);

impl CanonicalId {
    /// Creates a CanonicalId from an already-normalized string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a locally-unique placeholder id for an optimistic entity.
    pub fn placeholder() -> Self {
        Self(format!("{}{}", PLACEHOLDER_PREFIX, Uuid::new_v4()))
    }

    /// True for ids minted by [`CanonicalId::placeholder`].
    pub fn is_placeholder(&self) -> bool {
        self.0.starts_with(PLACEHOLDER_PREFIX)
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CanonicalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Account scope (per doctor) whose push events a client receives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a tenant id, rejecting blank values.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::empty_field("tenant_id"));
        }
        Ok(Self(id))
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one handler registration in the subscription registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Unique identifier for one physical push-channel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new random connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_ids_are_unique_and_recognizable() {
        let a = CanonicalId::placeholder();
        let b = CanonicalId::placeholder();
        assert_ne!(a, b);
        assert!(a.is_placeholder());
        assert!(!CanonicalId::new("42").is_placeholder());
    }

    #[test]
    fn canonical_id_serializes_as_plain_string() {
        let id = CanonicalId::new("42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"42\"");
    }

    #[test]
    fn tenant_id_rejects_blank() {
        assert!(TenantId::new("   ").is_err());
        assert_eq!(TenantId::new("doctor-9").unwrap().as_str(), "doctor-9");
    }

    #[test]
    fn connection_id_display_is_uuid() {
        assert_eq!(ConnectionId::new().to_string().len(), 36);
    }
}
