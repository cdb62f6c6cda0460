//! In-memory REST collaborator for testing.
//!
//! Holds one server-side record list per kind. Tests can queue scripted
//! snapshots, hold a call open behind a [`FetchGate`] to reproduce slow
//! responses, and inject failures.
//!
//! # Security Note
//!
//! This adapter is for **testing only**. It uses `.expect()` on lock
//! operations which will panic if locks are poisoned.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::oneshot;

use crate::domain::cache::{Entity, IdentityNormalizer, ResourceKind};
use crate::domain::foundation::CanonicalId;
use crate::ports::{EntityFetcher, FetchError};

/// Releases a call held open by the fetcher.
///
/// Dropping the gate also releases the call.
#[derive(Debug)]
pub struct FetchGate {
    sender: oneshot::Sender<()>,
}

impl FetchGate {
    pub fn release(self) {
        let _ = self.sender.send(());
    }
}

struct Scripted {
    entities: Option<Vec<Entity>>,
    gate: Option<oneshot::Receiver<()>>,
}

#[derive(Default)]
struct FetcherState {
    records: HashMap<ResourceKind, Vec<Entity>>,
    scripted: HashMap<ResourceKind, VecDeque<Scripted>>,
    held_mutations: HashMap<ResourceKind, VecDeque<oneshot::Receiver<()>>>,
    failures: HashMap<ResourceKind, VecDeque<FetchError>>,
    fetch_all_calls: HashMap<ResourceKind, usize>,
    mutations: Vec<(ResourceKind, Entity)>,
    next_id: u64,
}

/// In-memory entity fetcher.
///
/// # Panics
///
/// Methods may panic if internal locks are poisoned. This is acceptable
/// for test code but this adapter should NOT be used in production.
pub struct InMemoryFetcher {
    state: Mutex<FetcherState>,
    normalizer: IdentityNormalizer,
}

impl InMemoryFetcher {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FetcherState {
                next_id: 1000,
                ..FetcherState::default()
            }),
            normalizer: IdentityNormalizer::default(),
        }
    }

    /// Replaces the server-side records for `kind`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn set_records(&self, kind: ResourceKind, entities: Vec<Entity>) {
        self.lock().records.insert(kind, entities);
    }

    /// Queues a one-off snapshot returned by the next `fetch_all` of `kind`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn queue_snapshot(&self, kind: ResourceKind, entities: Vec<Entity>) {
        self.script(kind, Some(entities), None);
    }

    /// Holds the next `fetch_all` of `kind` open until the gate is released.
    ///
    /// The call resolves with `entities` if given, otherwise with whatever
    /// the records held when the call started.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn hold_next_fetch(&self, kind: ResourceKind, entities: Option<Vec<Entity>>) -> FetchGate {
        let (sender, receiver) = oneshot::channel();
        self.script(kind, entities, Some(receiver));
        FetchGate { sender }
    }

    /// Holds the next `mutate` of `kind` open until the gate is released.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn hold_next_mutation(&self, kind: ResourceKind) -> FetchGate {
        let (sender, receiver) = oneshot::channel();
        self.lock()
            .held_mutations
            .entry(kind)
            .or_default()
            .push_back(receiver);
        FetchGate { sender }
    }

    /// Makes the next call of any operation on `kind` fail with `error`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn fail_next(&self, kind: ResourceKind, error: FetchError) {
        self.lock().failures.entry(kind).or_default().push_back(error);
    }

    /// Number of `fetch_all` calls made for `kind`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn fetch_all_count(&self, kind: ResourceKind) -> usize {
        self.lock().fetch_all_calls.get(&kind).copied().unwrap_or(0)
    }

    /// Every mutation payload received, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn mutations(&self) -> Vec<(ResourceKind, Entity)> {
        self.lock().mutations.clone()
    }

    fn script(&self, kind: ResourceKind, entities: Option<Vec<Entity>>, gate: Option<oneshot::Receiver<()>>) {
        self.lock()
            .scripted
            .entry(kind)
            .or_default()
            .push_back(Scripted { entities, gate });
    }

    fn take_failure(state: &mut FetcherState, kind: ResourceKind) -> Result<(), FetchError> {
        match state.failures.get_mut(&kind).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FetcherState> {
        self.state
            .lock()
            .expect("InMemoryFetcher: state lock poisoned")
    }
}

impl Default for InMemoryFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityFetcher for InMemoryFetcher {
    async fn fetch_all(&self, kind: ResourceKind) -> Result<Vec<Entity>, FetchError> {
        let (entities, gate) = {
            let mut state = self.lock();
            *state.fetch_all_calls.entry(kind).or_default() += 1;
            Self::take_failure(&mut state, kind)?;
            let scripted = state.scripted.get_mut(&kind).and_then(VecDeque::pop_front);
            match scripted {
                Some(Scripted { entities, gate }) => {
                    let entities = entities
                        .unwrap_or_else(|| state.records.get(&kind).cloned().unwrap_or_default());
                    (entities, gate)
                }
                None => (state.records.get(&kind).cloned().unwrap_or_default(), None),
            }
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Ok(entities)
    }

    async fn fetch_one(&self, kind: ResourceKind, id: &CanonicalId) -> Result<Entity, FetchError> {
        let mut state = self.lock();
        Self::take_failure(&mut state, kind)?;
        state
            .records
            .get(&kind)
            .and_then(|records| {
                records
                    .iter()
                    .find(|e| self.normalizer.normalize(kind, e).ok().as_ref() == Some(id))
            })
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                kind,
                id: id.to_string(),
            })
    }

    async fn mutate(&self, kind: ResourceKind, payload: Entity) -> Result<Entity, FetchError> {
        let gate = {
            let mut state = self.lock();
            state.mutations.push((kind, payload.clone()));
            state.held_mutations.get_mut(&kind).and_then(VecDeque::pop_front)
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let mut state = self.lock();
        Self::take_failure(&mut state, kind)?;
        let mut saved = payload;
        let id = match self.normalizer.normalize(kind, &saved) {
            Ok(id) => id,
            Err(_) => {
                state.next_id += 1;
                saved.set("id", json!(state.next_id));
                CanonicalId::new(state.next_id.to_string())
            }
        };

        let records = state.records.entry(kind).or_default();
        let existing = records
            .iter_mut()
            .find(|e| self.normalizer.normalize(kind, e).ok().as_ref() == Some(&id));
        match existing {
            Some(record) => {
                record.merge_from(&saved);
                Ok(record.clone())
            }
            None => {
                records.push(saved.clone());
                Ok(saved)
            }
        }
    }
}
