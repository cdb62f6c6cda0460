//! Application layer - the service UI surfaces talk to.
//!
//! Orchestrates the cache domain, the shared push connection and the REST
//! collaborator behind one entry point.

mod cache_sync;
mod changes;
mod metrics;
mod subscription;

pub use cache_sync::{CacheSyncService, LoadOutcome};
pub use changes::{Change, CollectionChange};
pub use metrics::MetricsSnapshot;
pub use subscription::{ResourceHandlers, ResourceSubscription};
