//! CacheSyncService - the upward interface of the synchronization core.
//!
//! Owns one [`Collection`] per resource kind and routes every way a
//! collection can change through the [`EntityUpsertMerger`]:
//!
//! ```text
//! REST snapshot ──┐
//! push list ──────┤
//! push create ────┼──► EntityUpsertMerger ──► Collection ──► CollectionChange
//! push update ────┤
//! optimistic ─────┘
//! ```
//!
//! Push events arrive on the transport's delivery context, REST responses
//! on whichever task awaited them. A single collection lock serializes all
//! of them, so interleavings reduce to the merge rule.

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use secrecy::SecretString;
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, watch};

use crate::adapters::realtime::{ConnectionManager, ConnectionStatus, PushHandler};
use crate::config::{ConfigError, SyncConfig};
use crate::domain::cache::{
    Collection, Entity, EntityUpsertMerger, EntryState, FetchTicket, IdentityNormalizer, LoadGuard,
    LoadState, OptimisticEdit, ReplaceOutcome, ResourceKind, RollbackOutcome, Topic, TopicPhase,
    UpsertOutcome,
};
use crate::domain::foundation::{CanonicalId, SyncError, TenantId};
use crate::ports::{EntityFetcher, PushTransport};

use super::changes::{Change, CollectionChange};
use super::metrics::{MetricsSnapshot, SyncMetrics};
use super::subscription::{ResourceHandlers, ResourceSubscription};

const DEFAULT_CHANGE_CAPACITY: usize = 256;

/// Result of a guarded or refreshing snapshot load.
#[derive(Debug)]
pub enum LoadOutcome {
    /// The snapshot was applied.
    Loaded(ReplaceOutcome),
    /// The guard refused the load; the state it was in.
    Skipped(LoadState),
    /// A newer fetch or a subscription close superseded this one.
    Discarded,
}

impl LoadOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded(_))
    }
}

/// Client-side cache kept in sync with REST snapshots and push events.
pub struct CacheSyncService {
    connections: Arc<ConnectionManager>,
    merger: EntityUpsertMerger,
    collections: RwLock<HashMap<ResourceKind, Collection>>,
    guard: LoadGuard,
    interest: Mutex<HashMap<ResourceKind, usize>>,
    changes: broadcast::Sender<CollectionChange>,
    metrics: SyncMetrics,
    tenant: TenantId,
    auth_token: Option<SecretString>,
}

impl CacheSyncService {
    pub fn new(connections: Arc<ConnectionManager>, tenant: TenantId) -> Self {
        let (changes, _) = broadcast::channel(DEFAULT_CHANGE_CAPACITY);
        Self {
            connections,
            merger: EntityUpsertMerger::default(),
            collections: RwLock::new(HashMap::new()),
            guard: LoadGuard::new(),
            interest: Mutex::new(HashMap::new()),
            changes,
            metrics: SyncMetrics::default(),
            tenant,
            auth_token: None,
        }
    }

    pub fn with_merger(mut self, merger: EntityUpsertMerger) -> Self {
        self.merger = merger;
        self
    }

    pub fn with_auth_token(mut self, token: SecretString) -> Self {
        self.auth_token = Some(token);
        self
    }

    pub fn with_change_capacity(mut self, capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        self.changes = changes;
        self
    }

    /// Wires a service from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if the configuration is invalid.
    pub fn from_config(
        config: &SyncConfig,
        transport: Arc<dyn PushTransport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let tenant = config.session.tenant()?;
        let connections = Arc::new(ConnectionManager::new(
            transport,
            config.connection.connect_timeout(),
        ));
        let merger = EntityUpsertMerger::new(
            IdentityNormalizer::default(),
            config.cache.revision_fields.clone(),
        );

        let mut service = Self::new(connections, tenant)
            .with_merger(merger)
            .with_change_capacity(config.cache.change_channel_capacity);
        service.auth_token = config.session.auth_token.clone();
        Ok(service)
    }

    // === Subscriptions ===

    /// Connects, joins the tenant room and attaches list, create and update
    /// handlers for `kind`.
    ///
    /// Every push event is merged before the matching callback sees it.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Transport` if the connection or room join fails;
    /// no lease is held in that case.
    pub async fn subscribe_to_resource(
        self: &Arc<Self>,
        kind: ResourceKind,
        handlers: ResourceHandlers,
    ) -> Result<ResourceSubscription, SyncError> {
        let lease = self.connections.connect(self.auth_token.as_ref()).await?;
        if let Err(err) = self.connections.join_room(&self.tenant).await {
            tracing::warn!(kind = %kind, tenant = %self.tenant, error = %err, "Room join failed");
            self.connections.disconnect(&lease).await;
            return Err(err.into());
        }

        let disposers = TopicPhase::ALL
            .into_iter()
            .map(|phase| {
                let service = Arc::downgrade(self);
                let handlers = handlers.clone();
                let handler: Arc<dyn PushHandler> = Arc::new(move |_: &Topic, payload: &JsonValue| {
                    if let Some(service) = service.upgrade() {
                        service.on_push(kind, phase, payload, &handlers);
                    }
                });
                self.connections.subscribe(kind.topic(phase), handler)
            })
            .collect();

        *self.lock_interest().entry(kind).or_default() += 1;
        tracing::info!(kind = %kind, tenant = %self.tenant, "Subscribed to resource");
        Ok(ResourceSubscription::new(kind, Arc::clone(self), disposers, lease))
    }

    pub(crate) fn release_interest(&self, kind: ResourceKind) {
        let mut interest = self.lock_interest();
        let remaining = match interest.get_mut(&kind) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            interest.remove(&kind);
            self.guard.invalidate(kind.as_str());
        }
    }

    // === Loading ===

    /// Fetches the initial snapshot for `kind` at most once.
    ///
    /// Repeated calls while a load is in flight or after it succeeded are
    /// skipped. A failed load lets the next call through.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Fetch` when the current fetch fails.
    pub async fn load_once(
        &self,
        kind: ResourceKind,
        fetcher: &dyn EntityFetcher,
    ) -> Result<LoadOutcome, SyncError> {
        let Some(ticket) = self.guard.begin(kind.as_str()) else {
            return Ok(LoadOutcome::Skipped(self.guard.state(kind.as_str())));
        };
        self.run_fetch(kind, fetcher, ticket).await
    }

    /// Fetches a fresh snapshot, superseding any fetch still in flight.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Fetch` when the fetch fails.
    pub async fn refresh(
        &self,
        kind: ResourceKind,
        fetcher: &dyn EntityFetcher,
    ) -> Result<LoadOutcome, SyncError> {
        let ticket = self.guard.begin_refresh(kind.as_str());
        self.run_fetch(kind, fetcher, ticket).await
    }

    /// Lets the next `load_once` of `kind` fetch again, e.g. after the
    /// signed-in account changed. A fetch still in flight is discarded.
    /// Cached entities stay until that load replaces them.
    pub fn reset_load(&self, kind: ResourceKind) {
        tracing::debug!(kind = %kind, "Load guard reset");
        self.guard.reset(kind.as_str());
    }

    /// Re-reads one entity and merges it into the cache.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Fetch` (including `NotFound`) with the collection
    /// unchanged, or `SyncError::Identity` if the response has no id.
    pub async fn reload_entity(
        &self,
        kind: ResourceKind,
        id: &CanonicalId,
        fetcher: &dyn EntityFetcher,
    ) -> Result<UpsertOutcome, SyncError> {
        let entity = fetcher.fetch_one(kind, id).await.map_err(|err| {
            tracing::debug!(kind = %kind, id = %id, error = %err, "Entity reload failed");
            SyncError::from(err)
        })?;
        let outcome =
            self.with_collection(kind, |collection| self.merger.upsert(collection, entity))?;
        self.record_upsert(kind, &outcome);
        Ok(outcome)
    }

    async fn run_fetch(
        &self,
        kind: ResourceKind,
        fetcher: &dyn EntityFetcher,
        ticket: FetchTicket,
    ) -> Result<LoadOutcome, SyncError> {
        let fetched = fetcher.fetch_all(kind).await;

        let entities = match fetched {
            Ok(entities) => entities,
            Err(err) => {
                if !self.guard.complete(&ticket, false) {
                    self.metrics.stale_fetch();
                    return Ok(LoadOutcome::Discarded);
                }
                tracing::warn!(kind = %kind, error = %err, "Snapshot fetch failed");
                return Err(err.into());
            }
        };

        let outcome = {
            let mut collections = self.write_collections();
            if !self.guard.complete(&ticket, true) {
                self.metrics.stale_fetch();
                return Ok(LoadOutcome::Discarded);
            }
            let collection = collections.entry(kind).or_insert_with(|| Collection::new(kind));
            self.merger.replace_all(collection, entities)
        };
        self.record_replace(kind, &outcome);
        Ok(LoadOutcome::Loaded(outcome))
    }

    // === Optimistic updates ===

    /// Shows a local change immediately, before the server confirms it.
    ///
    /// Returns the handle to confirm or roll back exactly this change with.
    /// Its id is the entity's own id when it has one, otherwise a placeholder.
    pub fn apply_optimistic(
        &self,
        kind: ResourceKind,
        local: Entity,
    ) -> Result<OptimisticEdit, SyncError> {
        let edit = self.with_collection(kind, |collection| {
            self.merger.apply_optimistic(collection, local)
        })?;
        tracing::debug!(kind = %kind, id = %edit.id(), "Applied optimistic change");
        self.metrics.applied();
        self.publish(kind, Change::Upserted(edit.id().clone()));
        Ok(edit)
    }

    /// Settles one optimistic change with the server's authoritative entity.
    pub fn confirm_optimistic(
        &self,
        kind: ResourceKind,
        edit: &OptimisticEdit,
        authoritative: Entity,
    ) -> Result<UpsertOutcome, SyncError> {
        let (outcome, rekeyed) = self.with_collection(kind, |collection| {
            let held = collection.contains(edit.id());
            let outcome = self.merger.confirm_optimistic(collection, edit, authoritative)?;
            Ok::<_, SyncError>((outcome, held && !collection.contains(edit.id())))
        })?;
        if rekeyed {
            self.publish(kind, Change::Removed(edit.id().clone()));
        }
        tracing::debug!(
            kind = %kind,
            local_id = %edit.id(),
            id = %outcome.id(),
            "Confirmed optimistic change"
        );
        self.record_upsert(kind, &outcome);
        Ok(outcome)
    }

    /// Discards one unconfirmed local change.
    pub fn rollback_optimistic(
        &self,
        kind: ResourceKind,
        edit: &OptimisticEdit,
    ) -> Result<RollbackOutcome, SyncError> {
        let outcome = self.with_collection(kind, |collection| {
            self.merger.rollback_optimistic(collection, edit)
        })?;
        tracing::debug!(kind = %kind, id = %outcome.id(), "Rolled back optimistic change");
        self.publish(kind, Change::RolledBack(outcome.id().clone()));
        Ok(outcome)
    }

    /// Applies `payload` optimistically, sends it through `fetcher`, then
    /// confirms with the server's answer or rolls back on failure.
    ///
    /// Returns the entity's authoritative id.
    ///
    /// # Errors
    ///
    /// Returns the mutation's `SyncError::Fetch` after rolling back.
    pub async fn mutate_optimistically(
        &self,
        kind: ResourceKind,
        fetcher: &dyn EntityFetcher,
        payload: Entity,
    ) -> Result<CanonicalId, SyncError> {
        let edit = self.apply_optimistic(kind, payload.clone())?;
        match fetcher.mutate(kind, payload).await {
            Ok(authoritative) => {
                let outcome = self.confirm_optimistic(kind, &edit, authoritative)?;
                Ok(outcome.id().clone())
            }
            Err(err) => {
                tracing::warn!(kind = %kind, id = %edit.id(), error = %err, "Mutation failed; rolling back");
                if let Err(rollback) = self.rollback_optimistic(kind, &edit) {
                    tracing::warn!(kind = %kind, id = %edit.id(), error = %rollback, "Rollback failed");
                }
                Err(err.into())
            }
        }
    }

    // === Queries ===

    /// Rendered entities of `kind` in collection order.
    pub fn get_collection(&self, kind: ResourceKind) -> Vec<Entity> {
        self.read_collections()
            .get(&kind)
            .map(Collection::to_vec)
            .unwrap_or_default()
    }

    pub fn get_entity(&self, kind: ResourceKind, id: &CanonicalId) -> Option<Entity> {
        self.read_collections()
            .get(&kind)
            .and_then(|collection| collection.get(id).cloned())
    }

    pub fn entry_state(&self, kind: ResourceKind, id: &CanonicalId) -> Option<EntryState> {
        self.read_collections()
            .get(&kind)
            .and_then(|collection| collection.entry(id).map(|entry| entry.state()))
    }

    pub fn load_state(&self, kind: ResourceKind) -> LoadState {
        self.guard.state(kind.as_str())
    }

    /// True when the cache may lag the server because the push channel is
    /// not connected. Cached data stays readable.
    pub fn is_stale(&self) -> bool {
        !self.connections.is_connected()
    }

    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.connections.status()
    }

    pub fn changes(&self) -> broadcast::Receiver<CollectionChange> {
        self.changes.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    // === Push handling ===

    fn on_push(&self, kind: ResourceKind, phase: TopicPhase, payload: &JsonValue, handlers: &ResourceHandlers) {
        match phase {
            TopicPhase::List => {
                let Some(entities) = self.parse_list(kind, payload) else {
                    return;
                };
                let outcome = self.with_collection(kind, |collection| self.merger.replace_all(collection, entities));
                self.record_replace(kind, &outcome);
                if let Some(callback) = &handlers.on_snapshot {
                    callback(&self.get_collection(kind));
                }
            }
            TopicPhase::Created => {
                let Some(entity) = self.parse_entity(kind, payload) else {
                    return;
                };
                let merged = self.with_collection(kind, |collection| self.merger.upsert(collection, entity));
                match merged {
                    Ok(outcome) => {
                        if let (Some(callback), Some(view)) = (&handlers.on_create, self.after_push(kind, &outcome)) {
                            callback(&view);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(kind = %kind, error = %err, "Dropping pushed create without identity");
                        self.metrics.identity_drops(1);
                    }
                }
            }
            TopicPhase::Updated => {
                let Some(entity) = self.parse_entity(kind, payload) else {
                    return;
                };
                let merged = self.with_collection(kind, |collection| self.merger.update_existing(collection, entity));
                match merged {
                    Ok(outcome) => {
                        if let (Some(callback), Some(view)) = (&handlers.on_update, self.after_push(kind, &outcome)) {
                            callback(&view);
                        }
                    }
                    Err(SyncError::MergeConflict { kind, id }) => {
                        tracing::warn!(kind = %kind, id = %id, "Dropping update for uncached entity");
                        self.metrics.merge_conflict();
                    }
                    Err(err) => {
                        tracing::warn!(kind = %kind, error = %err, "Dropping pushed update");
                        self.metrics.identity_drops(1);
                    }
                }
            }
        }
    }

    /// Records an upsert from a push and returns the entity to hand to
    /// callbacks, unless the event was stale.
    fn after_push(&self, kind: ResourceKind, outcome: &UpsertOutcome) -> Option<Entity> {
        self.record_upsert(kind, outcome);
        match outcome {
            UpsertOutcome::Stale(_) => None,
            _ => self.get_entity(kind, outcome.id()),
        }
    }

    fn parse_list(&self, kind: ResourceKind, payload: &JsonValue) -> Option<Vec<Entity>> {
        let JsonValue::Array(rows) = payload else {
            tracing::warn!(kind = %kind, "Pushed list payload is not an array");
            self.metrics.malformed_payload();
            return None;
        };
        let entities = rows
            .iter()
            .filter_map(|row| {
                let entity = Entity::from_value(row.clone());
                if entity.is_none() {
                    tracing::warn!(kind = %kind, "Skipping non-object row in pushed list");
                    self.metrics.malformed_payload();
                }
                entity
            })
            .collect();
        Some(entities)
    }

    fn parse_entity(&self, kind: ResourceKind, payload: &JsonValue) -> Option<Entity> {
        let entity = Entity::from_value(payload.clone());
        if entity.is_none() {
            tracing::warn!(kind = %kind, "Pushed entity payload is not an object");
            self.metrics.malformed_payload();
        }
        entity
    }

    // === Bookkeeping ===

    fn record_upsert(&self, kind: ResourceKind, outcome: &UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Merged(id) => {
                tracing::trace!(kind = %kind, id = %id, "Entity merged");
                self.metrics.applied();
                self.publish(kind, Change::Upserted(id.clone()));
            }
            UpsertOutcome::Unchanged(_) => {}
            UpsertOutcome::Stale(id) => {
                tracing::debug!(kind = %kind, id = %id, "Discarding entity older than cached revision");
                self.metrics.stale_discards(1);
            }
        }
    }

    fn record_replace(&self, kind: ResourceKind, outcome: &ReplaceOutcome) {
        for rejected in &outcome.rejected {
            tracing::warn!(kind = %kind, error = %rejected, "Dropping snapshot row without identity");
        }
        self.metrics.identity_drops(outcome.rejected.len());
        self.metrics.stale_discards(outcome.stale.len());
        self.metrics.applied();

        tracing::info!(
            kind = %kind,
            inserted = outcome.inserted.len(),
            updated = outcome.updated.len(),
            removed = outcome.removed.len(),
            rejected = outcome.rejected.len(),
            kept_local = outcome.kept_local.len(),
            "Snapshot applied"
        );
        self.publish(kind, Change::Replaced);
        for id in &outcome.removed {
            self.publish(kind, Change::Removed(id.clone()));
        }
    }

    fn publish(&self, kind: ResourceKind, change: Change) {
        // No receivers is fine; renderers may not be listening yet.
        let _ = self.changes.send(CollectionChange::new(kind, change));
    }

    fn with_collection<R>(&self, kind: ResourceKind, f: impl FnOnce(&mut Collection) -> R) -> R {
        let mut collections = self.write_collections();
        let collection = collections.entry(kind).or_insert_with(|| Collection::new(kind));
        f(collection)
    }

    fn read_collections(&self) -> RwLockReadGuard<'_, HashMap<ResourceKind, Collection>> {
        self.collections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_collections(&self) -> RwLockWriteGuard<'_, HashMap<ResourceKind, Collection>> {
        self.collections.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_interest(&self) -> MutexGuard<'_, HashMap<ResourceKind, usize>> {
        self.interest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
