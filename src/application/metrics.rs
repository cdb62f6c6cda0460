//! Counters for applied and dropped cache events.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time copy of [`SyncMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Snapshots, push events and optimistic changes that reached a collection
    pub applied: u64,
    /// Entities dropped for lacking every identifier field
    pub identity_drops: u64,
    /// Updates dropped because no cached entry existed
    pub merge_conflicts: u64,
    /// Entities ignored because the cache held a newer revision
    pub stale_discards: u64,
    /// Fetch results discarded because a newer fetch superseded them
    pub stale_fetches: u64,
    /// Push payloads that were not JSON objects or arrays as expected
    pub malformed_payloads: u64,
}

#[derive(Debug, Default)]
pub(crate) struct SyncMetrics {
    applied: AtomicU64,
    identity_drops: AtomicU64,
    merge_conflicts: AtomicU64,
    stale_discards: AtomicU64,
    stale_fetches: AtomicU64,
    malformed_payloads: AtomicU64,
}

impl SyncMetrics {
    pub(crate) fn applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn identity_drops(&self, count: usize) {
        self.identity_drops.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn merge_conflict(&self) {
        self.merge_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stale_discards(&self, count: usize) {
        self.stale_discards.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn stale_fetch(&self) {
        self.stale_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn malformed_payload(&self) {
        self.malformed_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            applied: self.applied.load(Ordering::Relaxed),
            identity_drops: self.identity_drops.load(Ordering::Relaxed),
            merge_conflicts: self.merge_conflicts.load(Ordering::Relaxed),
            stale_discards: self.stale_discards.load(Ordering::Relaxed),
            stale_fetches: self.stale_fetches.load(Ordering::Relaxed),
            malformed_payloads: self.malformed_payloads.load(Ordering::Relaxed),
        }
    }
}
