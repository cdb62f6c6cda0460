//! Per-resource latch against duplicate initial fetches.
//!
//! Each resource key moves through [`LoadState`]:
//!
//! ```text
//! NotStarted --begin--> InFlight --success--> Loaded
//!                       InFlight --failure--> Failed --begin--> InFlight
//!                       InFlight --invalidate--> NotStarted
//! Loaded --refresh--> InFlight
//! ```
//!
//! Every fetch start bumps a generation counter. A fetch whose generation is
//! no longer current when it resolves is stale and its result must be
//! discarded.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::domain::foundation::StateMachine;

/// Load progress of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    NotStarted,
    InFlight,
    Loaded,
    Failed,
}

impl StateMachine for LoadState {
    fn can_transition_to(&self, target: &Self) -> bool {
        use LoadState::*;
        matches!(
            (self, target),
            (NotStarted, InFlight)
                | (InFlight, InFlight)
                | (InFlight, Loaded)
                | (InFlight, Failed)
                | (InFlight, NotStarted)
                | (Failed, InFlight)
                | (Loaded, InFlight)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use LoadState::*;
        match self {
            NotStarted => vec![InFlight],
            InFlight => vec![InFlight, Loaded, Failed, NotStarted],
            Loaded => vec![InFlight],
            Failed => vec![InFlight],
        }
    }
}

/// Proof that a fetch was admitted, tagged with its generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    key: String,
    generation: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    state: LoadState,
    generation: u64,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            state: LoadState::NotStarted,
            generation: 0,
        }
    }
}

/// Admits at most one initial fetch per resource key.
#[derive(Debug, Default)]
pub struct LoadGuard {
    slots: Mutex<HashMap<String, Slot>>,
}

impl LoadGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// True exactly once until [`LoadGuard::release`] is called.
    pub fn try_acquire(&self, key: &str) -> bool {
        self.begin(key).is_some()
    }

    /// Admits a fetch when nothing is loaded or in flight.
    pub fn begin(&self, key: &str) -> Option<FetchTicket> {
        let mut slots = self.lock();
        let slot = slots.entry(key.to_string()).or_default();
        if !matches!(slot.state, LoadState::NotStarted | LoadState::Failed) {
            tracing::trace!(key, state = ?slot.state, "Load already admitted");
            return None;
        }
        Some(Self::start(key, slot))
    }

    /// Starts a new generation regardless of state, superseding any fetch in flight.
    pub fn begin_refresh(&self, key: &str) -> FetchTicket {
        let mut slots = self.lock();
        let slot = slots.entry(key.to_string()).or_default();
        Self::start(key, slot)
    }

    /// Ends the current fetch for `key`.
    ///
    /// Success holds the guard for the rest of the session; failure lets a
    /// later [`LoadGuard::try_acquire`] through again.
    pub fn release(&self, key: &str, success: bool) {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(key) else {
            tracing::debug!(key, "Release for a key that was never acquired");
            return;
        };
        Self::finish(key, slot, success);
    }

    /// Ends the fetch behind `ticket` if it is still current.
    ///
    /// Returns false when a newer fetch started or the key was invalidated;
    /// the caller must discard the result.
    pub fn complete(&self, ticket: &FetchTicket, success: bool) -> bool {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(&ticket.key) else {
            return false;
        };
        if slot.generation != ticket.generation {
            tracing::debug!(
                key = %ticket.key,
                generation = ticket.generation,
                current = slot.generation,
                "Discarding stale fetch"
            );
            return false;
        }
        Self::finish(&ticket.key, slot, success);
        true
    }

    /// Supersedes any in-flight fetch so its result is discarded.
    pub fn invalidate(&self, key: &str) {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(key) else {
            return;
        };
        slot.generation += 1;
        if slot.state == LoadState::InFlight {
            slot.state = LoadState::NotStarted;
        }
    }

    /// Returns `key` to `NotStarted` from any state and supersedes any fetch
    /// in flight, so the next `begin` or `try_acquire` is admitted.
    pub fn reset(&self, key: &str) {
        let mut slots = self.lock();
        if let Some(slot) = slots.get_mut(key) {
            slot.generation += 1;
            slot.state = LoadState::NotStarted;
        }
    }

    pub fn state(&self, key: &str) -> LoadState {
        self.lock()
            .get(key)
            .map(|slot| slot.state)
            .unwrap_or(LoadState::NotStarted)
    }

    fn start(key: &str, slot: &mut Slot) -> FetchTicket {
        slot.state = LoadState::InFlight;
        slot.generation += 1;
        tracing::debug!(key, generation = slot.generation, "Fetch admitted");
        FetchTicket {
            key: key.to_string(),
            generation: slot.generation,
        }
    }

    fn finish(key: &str, slot: &mut Slot, success: bool) {
        let target = if success {
            LoadState::Loaded
        } else {
            LoadState::Failed
        };
        match slot.state.transition_to(target) {
            Ok(next) => slot.state = next,
            Err(err) => tracing::debug!(key, %err, "Ignoring release"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
