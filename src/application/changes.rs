//! Collection change notifications.

use serde::Serialize;

use crate::domain::cache::ResourceKind;
use crate::domain::foundation::{CanonicalId, Timestamp};

/// What happened to a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Change {
    /// A snapshot replaced the whole collection.
    Replaced,
    /// One entity was inserted or merged.
    Upserted(CanonicalId),
    /// The entity disappeared from an authoritative snapshot, or an
    /// optimistic placeholder was re-keyed to its server id.
    Removed(CanonicalId),
    /// An unconfirmed local change was discarded.
    RolledBack(CanonicalId),
}

/// Published on the service's broadcast channel after every applied mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionChange {
    pub kind: ResourceKind,
    pub change: Change,
    pub at: Timestamp,
}

impl CollectionChange {
    pub fn new(kind: ResourceKind, change: Change) -> Self {
        Self {
            kind,
            change,
            at: Timestamp::now(),
        }
    }
}
