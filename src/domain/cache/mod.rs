//! Client-side entity cache.
//!
//! Pure, transport-agnostic logic: identity normalization, the ordered
//! collection, the upsert merger every mutation funnels through, the
//! optimistic entry lifecycle and the load guard.

mod collection;
mod entity;
mod identity;
mod lifecycle;
mod load_guard;
mod merger;
mod resource;

pub use collection::{CachedEntry, Collection};
pub use entity::{Entity, Revision};
pub use identity::{IdentityError, IdentityNormalizer};
pub use lifecycle::EntryState;
pub use load_guard::{FetchTicket, LoadGuard, LoadState};
pub use merger::{
    EntityUpsertMerger, OptimisticEdit, ReplaceOutcome, RollbackOutcome, UpsertOutcome, DEFAULT_REVISION_FIELDS,
};
pub use resource::{ResourceKind, Topic, TopicPhase};
