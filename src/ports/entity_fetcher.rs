//! EntityFetcher port - Interface to the on-demand REST collaborator.
//!
//! Request construction and authentication live behind this trait; the
//! core only consumes ordered snapshots, single lookups, and the
//! authoritative entity returned by a mutation.

use async_trait::async_trait;

use crate::domain::cache::{Entity, ResourceKind};
use crate::domain::foundation::CanonicalId;

/// Errors returned by the fetch collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: ResourceKind, id: String },

    #[error("Request for {kind} failed: {message}")]
    Request { kind: ResourceKind, message: String },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Malformed {kind} payload: {message}")]
    Malformed { kind: ResourceKind, message: String },
}

impl FetchError {
    pub fn request(kind: ResourceKind, message: impl Into<String>) -> Self {
        FetchError::Request {
            kind,
            message: message.into(),
        }
    }
}

/// Port for fetching and mutating entities over REST.
#[async_trait]
pub trait EntityFetcher: Send + Sync {
    /// Full, ordered snapshot of a kind.
    async fn fetch_all(&self, kind: ResourceKind) -> Result<Vec<Entity>, FetchError>;

    /// Single entity; `FetchError::NotFound` when the server has none.
    async fn fetch_one(&self, kind: ResourceKind, id: &CanonicalId) -> Result<Entity, FetchError>;

    /// Apply a mutation, returning the authoritative post-mutation entity.
    async fn mutate(&self, kind: ResourceKind, payload: Entity) -> Result<Entity, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time check that trait is object-safe
    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn EntityFetcher) {}

    #[test]
    fn not_found_names_kind_and_id() {
        let err = FetchError::NotFound {
            kind: ResourceKind::Patients,
            id: "12".to_string(),
        };
        assert_eq!(err.to_string(), "patients '12' not found");
    }
}
