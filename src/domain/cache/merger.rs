//! Single entry point for every collection mutation.
//!
//! Snapshot loads, push creates, push updates and optimistic local edits all
//! funnel through [`EntityUpsertMerger`], so interleavings among them reduce
//! to the merge rule instead of racing independent mutation paths.
//!
//! # Merge rule
//!
//! - Fields present on the incoming entity overwrite; absent fields are kept.
//! - When both the cached and incoming entity carry a revision, an incoming
//!   revision lower than the cached one is discarded as stale.
//! - Without revisions on both sides, the last processed event wins.

use indexmap::IndexMap;

use crate::domain::foundation::{CanonicalId, StateMachine, SyncError};

use super::{CachedEntry, Collection, Entity, EntryState, IdentityError, IdentityNormalizer, Revision};

/// Revision fields tried when none are configured.
pub const DEFAULT_REVISION_FIELDS: &[&str] = &["revision", "version", "updated_at", "updatedAt"];

/// What a single upsert did to the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(CanonicalId),
    Merged(CanonicalId),
    /// Every incoming field already matched.
    Unchanged(CanonicalId),
    /// Incoming revision was older than the cached one; nothing applied.
    Stale(CanonicalId),
}

impl UpsertOutcome {
    pub fn id(&self) -> &CanonicalId {
        match self {
            UpsertOutcome::Inserted(id)
            | UpsertOutcome::Merged(id)
            | UpsertOutcome::Unchanged(id)
            | UpsertOutcome::Stale(id) => id,
        }
    }

    /// True when the rendered collection changed.
    pub fn is_applied(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted(_) | UpsertOutcome::Merged(_))
    }
}

/// Reconciliation report for a full snapshot replace.
#[derive(Debug, Default)]
pub struct ReplaceOutcome {
    pub inserted: Vec<CanonicalId>,
    pub updated: Vec<CanonicalId>,
    pub unchanged: Vec<CanonicalId>,
    /// Snapshot rows older than the cached entry; cached fields were kept.
    pub stale: Vec<CanonicalId>,
    /// Present before, absent from the snapshot.
    pub removed: Vec<CanonicalId>,
    /// Rows without a recognizable identity.
    pub rejected: Vec<IdentityError>,
    /// Unacknowledged optimistic creates carried across the replace.
    pub kept_local: Vec<CanonicalId>,
}

/// What rolling back an optimistic change did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// A local-only create was dropped from the collection.
    Removed(CanonicalId),
    /// A local edit was discarded; the entry shows its server value again.
    Reverted(CanonicalId),
}

impl RollbackOutcome {
    pub fn id(&self) -> &CanonicalId {
        match self {
            RollbackOutcome::Removed(id) | RollbackOutcome::Reverted(id) => id,
        }
    }
}

/// Handle to one optimistic change, used to confirm or roll back exactly
/// that change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticEdit {
    id: CanonicalId,
    seq: u64,
}

impl OptimisticEdit {
    /// The entry the change was applied to: the entity's own id, or a
    /// placeholder for a create without one.
    pub fn id(&self) -> &CanonicalId {
        &self.id
    }
}

/// Merges snapshots, push events and optimistic edits into a [`Collection`].
#[derive(Debug, Clone)]
pub struct EntityUpsertMerger {
    normalizer: IdentityNormalizer,
    revision_fields: Vec<String>,
}

impl EntityUpsertMerger {
    pub fn new(normalizer: IdentityNormalizer, revision_fields: Vec<String>) -> Self {
        Self {
            normalizer,
            revision_fields,
        }
    }

    pub fn normalizer(&self) -> &IdentityNormalizer {
        &self.normalizer
    }

    pub fn revision_fields(&self) -> &[String] {
        &self.revision_fields
    }

    /// Canonical identity of `entity` within `collection`'s kind.
    pub fn identify(&self, collection: &Collection, entity: &Entity) -> Result<CanonicalId, IdentityError> {
        self.normalizer.normalize(collection.kind(), entity)
    }

    /// Inserts when absent, merges field-by-field when present.
    pub fn upsert(&self, collection: &mut Collection, entity: Entity) -> Result<UpsertOutcome, IdentityError> {
        let id = self.identify(collection, &entity)?;
        Ok(self.upsert_identified(collection, id, entity))
    }

    /// Merges a (possibly partial) update into an existing entry.
    ///
    /// An update for an id with no cached entry is a merge conflict; no
    /// partial entity is fabricated from it.
    pub fn update_existing(&self, collection: &mut Collection, entity: Entity) -> Result<UpsertOutcome, SyncError> {
        let id = self.identify(collection, &entity)?;
        if !collection.contains(&id) {
            return Err(SyncError::MergeConflict {
                kind: collection.kind(),
                id,
            });
        }
        Ok(self.upsert_identified(collection, id, entity))
    }

    /// Replaces the whole collection with an authoritative snapshot.
    ///
    /// The only path through which an entity disappears: anything cached and
    /// absent from the snapshot is reported in [`ReplaceOutcome::removed`].
    pub fn replace_all(&self, collection: &mut Collection, entities: Vec<Entity>) -> ReplaceOutcome {
        let mut outcome = ReplaceOutcome::default();
        let mut previous = collection.take_entries();
        let previous_order: Vec<CanonicalId> = previous.keys().cloned().collect();
        let mut next: IndexMap<CanonicalId, CachedEntry> = IndexMap::with_capacity(entities.len());

        for entity in entities {
            let id = match self.normalizer.normalize(collection.kind(), &entity) {
                Ok(id) => id,
                Err(err) => {
                    outcome.rejected.push(err);
                    continue;
                }
            };

            // Duplicate rows within one snapshot: the later row wins field-by-field.
            if let Some(entry) = next.get_mut(&id) {
                entry.merge_base(&entity, &self.revision_fields);
                continue;
            }

            let revision = entity.revision(&self.revision_fields);
            match previous.swap_remove(&id) {
                Some(mut entry) => {
                    if is_stale(entry.revision(), revision) {
                        outcome.stale.push(id.clone());
                    } else if entry.base() != &entity || entry.is_local_only() {
                        entry.replace_base(entity, &self.revision_fields);
                        outcome.updated.push(id.clone());
                    } else {
                        outcome.unchanged.push(id.clone());
                    }
                    next.insert(id, entry);
                }
                None => {
                    next.insert(id.clone(), CachedEntry::confirmed(entity, revision));
                    outcome.inserted.push(id);
                }
            }
        }

        for id in previous_order {
            let Some(entry) = previous.swap_remove(&id) else {
                continue;
            };
            if entry.is_local_only() {
                next.insert(id.clone(), entry);
                outcome.kept_local.push(id);
            } else {
                outcome.removed.push(id);
            }
        }

        collection.set_entries(next);
        outcome
    }

    /// Applies a local change before the server confirms it.
    ///
    /// An entity whose identity is already cached gets the change layered as
    /// its own pending patch. Anything else is an optimistic create, keyed by
    /// its own id or, when it has none, by a fresh placeholder.
    pub fn apply_optimistic(
        &self,
        collection: &mut Collection,
        local: Entity,
    ) -> Result<OptimisticEdit, SyncError> {
        let id = match self.identify(collection, &local) {
            Ok(id) => id,
            Err(_) => CanonicalId::placeholder(),
        };
        let seq = collection.next_edit_seq();

        match collection.entries_mut().get_mut(&id) {
            Some(entry) => {
                let next = entry.state().transition_to(EntryState::Optimistic)?;
                entry.layer_pending(seq, &local);
                entry.set_state(next);
            }
            None => {
                collection
                    .entries_mut()
                    .insert(id.clone(), CachedEntry::optimistic_create(local, seq));
            }
        }
        Ok(OptimisticEdit { id, seq })
    }

    /// Settles one optimistic edit with the authoritative post-mutation entity.
    ///
    /// Only that edit's patch is dropped; other unacknowledged edits on the
    /// same entry stay layered and keep it `Optimistic`. The authoritative
    /// entity is always merged. A local-only create is re-keyed to the
    /// authoritative id in place, and if a push event already delivered that
    /// id the two are merged into one slot.
    ///
    /// Reports `Stale` only when the authoritative entity was older than the
    /// cache and nothing rendered changed.
    pub fn confirm_optimistic(
        &self,
        collection: &mut Collection,
        edit: &OptimisticEdit,
        authoritative: Entity,
    ) -> Result<UpsertOutcome, SyncError> {
        let kind = collection.kind();
        let Some(located) = locate(collection, edit) else {
            if edit.id.is_placeholder() {
                return Err(SyncError::PlaceholderNotFound {
                    kind,
                    id: edit.id.clone(),
                });
            }
            let id = self.identify(collection, &authoritative)?;
            return Ok(self.upsert_identified(collection, id, authoritative));
        };
        let id = self.identify(collection, &authoritative)?;

        let creates_here = collection
            .entry(&located)
            .is_some_and(|entry| entry.is_local_only() && entry.created_by() == Some(edit.seq));
        if creates_here {
            return self.rekey_create(collection, &located, id, authoritative);
        }

        let revision_fields = &self.revision_fields;
        let incoming = authoritative.revision(revision_fields);
        let Some(entry) = collection.entries_mut().get_mut(&located) else {
            return Err(SyncError::PlaceholderNotFound { kind, id: located });
        };
        let before = entry.entity().clone();
        entry.settle(edit.seq);
        entry.resettle()?;
        let stale = is_stale(entry.revision(), incoming);
        if !stale {
            entry.merge_base(&authoritative, revision_fields);
        }
        Ok(if entry.entity() != &before {
            UpsertOutcome::Merged(located)
        } else if stale {
            UpsertOutcome::Stale(located)
        } else {
            UpsertOutcome::Unchanged(located)
        })
    }

    /// Discards one unacknowledged local edit.
    ///
    /// Rolling back an edit that was already settled is an invalid
    /// transition and leaves the entry untouched.
    pub fn rollback_optimistic(
        &self,
        collection: &mut Collection,
        edit: &OptimisticEdit,
    ) -> Result<RollbackOutcome, SyncError> {
        let kind = collection.kind();
        let Some(id) = locate(collection, edit) else {
            return Err(SyncError::PlaceholderNotFound {
                kind,
                id: edit.id.clone(),
            });
        };
        let Some(entry) = collection.entries_mut().get_mut(&id) else {
            return Err(SyncError::PlaceholderNotFound { kind, id });
        };

        if entry.is_local_only() && entry.created_by() == Some(edit.seq) {
            entry.state().transition_to(EntryState::RolledBack)?;
            collection.entries_mut().shift_remove(&id);
            return Ok(RollbackOutcome::Removed(id));
        }

        let edit_state = if entry.holds_edit(edit.seq) {
            EntryState::Optimistic
        } else {
            EntryState::Confirmed
        };
        edit_state.transition_to(EntryState::RolledBack)?;
        entry.settle(edit.seq);
        entry.resettle()?;
        Ok(RollbackOutcome::Reverted(id))
    }

    fn rekey_create(
        &self,
        collection: &mut Collection,
        local_id: &CanonicalId,
        id: CanonicalId,
        authoritative: Entity,
    ) -> Result<UpsertOutcome, SyncError> {
        let kind = collection.kind();
        let Some((index, _, mut created)) = collection.entries_mut().shift_remove_full(local_id)
        else {
            return Err(SyncError::PlaceholderNotFound {
                kind,
                id: local_id.clone(),
            });
        };
        // Patches applied against the placeholder still name it.
        let candidates = self.normalizer.candidates(kind);
        let carried: Vec<(u64, Entity)> = created
            .take_pending()
            .into_iter()
            .map(|(seq, mut patch)| {
                for field in &candidates {
                    patch.remove(field);
                }
                (seq, patch)
            })
            .collect();

        if collection.contains(&id) {
            let outcome = self.upsert_identified(collection, id.clone(), authoritative);
            if let Some(entry) = collection.entries_mut().get_mut(&id) {
                if !carried.is_empty() {
                    entry.adopt_pending(carried);
                }
                entry.resettle()?;
            }
            return Ok(outcome);
        }

        let revision = authoritative.revision(&self.revision_fields);
        let mut confirmed = CachedEntry::confirmed(authoritative, revision);
        confirmed.adopt_pending(carried);
        confirmed.resettle()?;
        let entries = collection.entries_mut();
        let index = index.min(entries.len());
        entries.shift_insert(index, id.clone(), confirmed);
        Ok(UpsertOutcome::Inserted(id))
    }

    fn upsert_identified(&self, collection: &mut Collection, id: CanonicalId, entity: Entity) -> UpsertOutcome {
        let incoming = entity.revision(&self.revision_fields);
        match collection.entries_mut().get_mut(&id) {
            None => {
                collection
                    .entries_mut()
                    .insert(id.clone(), CachedEntry::confirmed(entity, incoming));
                UpsertOutcome::Inserted(id)
            }
            Some(entry) => {
                if is_stale(entry.revision(), incoming) {
                    return UpsertOutcome::Stale(id);
                }
                if entry.merge_base(&entity, &self.revision_fields) {
                    UpsertOutcome::Merged(id)
                } else {
                    UpsertOutcome::Unchanged(id)
                }
            }
        }
    }
}

impl Default for EntityUpsertMerger {
    fn default() -> Self {
        Self::new(
            IdentityNormalizer::default(),
            DEFAULT_REVISION_FIELDS.iter().map(|f| f.to_string()).collect(),
        )
    }
}

/// Finds the entry holding `edit`, following a create that was re-keyed
/// since the edit was applied.
fn locate(collection: &Collection, edit: &OptimisticEdit) -> Option<CanonicalId> {
    if collection
        .entry(&edit.id)
        .is_some_and(|entry| entry.holds_edit(edit.seq))
    {
        return Some(edit.id.clone());
    }
    collection
        .iter()
        .find(|(_, entry)| entry.holds_edit(edit.seq))
        .map(|(id, _)| id.clone())
        .or_else(|| collection.contains(&edit.id).then(|| edit.id.clone()))
}

fn is_stale(cached: Option<Revision>, incoming: Option<Revision>) -> bool {
    matches!((cached, incoming), (Some(cached), Some(incoming)) if incoming < cached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::ResourceKind;
    use serde_json::{json, Value as JsonValue};

    fn entity(value: JsonValue) -> Entity {
        Entity::from_value(value).unwrap()
    }

    fn appointments() -> Collection {
        Collection::new(ResourceKind::Appointments)
    }

    fn values(collection: &Collection) -> Vec<JsonValue> {
        collection
            .to_vec()
            .into_iter()
            .map(Entity::into_value)
            .collect()
    }

    #[test]
    fn upsert_inserts_then_merges_partial_update() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();

        merger
            .upsert(&mut collection, entity(json!({"id": 1, "a": 1, "b": 2})))
            .unwrap();
        let outcome = merger
            .upsert(&mut collection, entity(json!({"id": "1", "b": 3})))
            .unwrap();

        assert_eq!(outcome, UpsertOutcome::Merged(CanonicalId::new("1")));
        assert_eq!(values(&collection), vec![json!({"id": 1, "a": 1, "b": 3})]);
    }

    #[test]
    fn upsert_twice_is_idempotent() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();
        let event = entity(json!({"id": 4, "status": "Confirmed"}));

        merger.upsert(&mut collection, event.clone()).unwrap();
        let once = values(&collection);
        let second = merger.upsert(&mut collection, event).unwrap();

        assert_eq!(second, UpsertOutcome::Unchanged(CanonicalId::new("4")));
        assert_eq!(values(&collection), once);
    }

    #[test]
    fn upsert_without_identity_is_rejected_and_collection_untouched() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();

        let err = merger
            .upsert(&mut collection, entity(json!({"status": "Pending"})))
            .unwrap_err();

        assert_eq!(err.kind, ResourceKind::Appointments);
        assert!(collection.is_empty());
    }

    #[test]
    fn older_revision_is_discarded() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();

        merger
            .upsert(&mut collection, entity(json!({"id": 1, "status": "Confirmed", "revision": 5})))
            .unwrap();
        let outcome = merger
            .upsert(&mut collection, entity(json!({"id": 1, "status": "Pending", "revision": 4})))
            .unwrap();

        assert_eq!(outcome, UpsertOutcome::Stale(CanonicalId::new("1")));
        assert_eq!(
            collection.get(&CanonicalId::new("1")).unwrap().get("status"),
            Some(&json!("Confirmed"))
        );
    }

    #[test]
    fn missing_revision_falls_back_to_last_processed_wins() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();

        merger
            .upsert(&mut collection, entity(json!({"id": 1, "status": "Confirmed", "revision": 5})))
            .unwrap();
        merger
            .upsert(&mut collection, entity(json!({"id": 1, "status": "Cancelled"})))
            .unwrap();

        let stored = collection.entry(&CanonicalId::new("1")).unwrap();
        assert_eq!(stored.entity().get("status"), Some(&json!("Cancelled")));
        assert_eq!(stored.revision(), Some(Revision::new(5)));
    }

    #[test]
    fn update_for_unknown_id_is_merge_conflict() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();

        let err = merger
            .update_existing(&mut collection, entity(json!({"id": 9, "status": "Confirmed"})))
            .unwrap_err();

        assert!(matches!(err, SyncError::MergeConflict { .. }));
        assert!(collection.is_empty());
    }

    #[test]
    fn replace_all_reports_removed_ids() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();
        merger.replace_all(
            &mut collection,
            vec![entity(json!({"id": 1})), entity(json!({"id": 2})), entity(json!({"id": 3}))],
        );

        let outcome = merger.replace_all(
            &mut collection,
            vec![entity(json!({"id": 3, "x": true})), entity(json!({"id": 1}))],
        );

        assert_eq!(outcome.removed, vec![CanonicalId::new("2")]);
        assert_eq!(outcome.updated, vec![CanonicalId::new("3")]);
        assert_eq!(outcome.unchanged, vec![CanonicalId::new("1")]);
        let ids: Vec<_> = collection.ids().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1"]);
    }

    #[test]
    fn replace_all_rejects_rows_without_identity() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();

        let outcome = merger.replace_all(
            &mut collection,
            vec![entity(json!({"id": 1})), entity(json!({"status": "orphan"}))],
        );

        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn replace_all_collapses_duplicate_rows() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();

        merger.replace_all(
            &mut collection,
            vec![
                entity(json!({"id": 2, "status": "Pending"})),
                entity(json!({"appointment_id": "2", "status": "Confirmed"})),
            ],
        );

        assert_eq!(collection.len(), 1);
        assert_eq!(
            collection.get(&CanonicalId::new("2")).unwrap().get("status"),
            Some(&json!("Confirmed"))
        );
    }

    #[test]
    fn replace_all_keeps_newer_cached_revision() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();
        merger
            .upsert(&mut collection, entity(json!({"id": 1, "status": "Confirmed", "revision": 3})))
            .unwrap();

        let outcome = merger.replace_all(
            &mut collection,
            vec![entity(json!({"id": 1, "status": "Pending", "revision": 2}))],
        );

        assert_eq!(outcome.stale, vec![CanonicalId::new("1")]);
        assert_eq!(
            collection.get(&CanonicalId::new("1")).unwrap().get("status"),
            Some(&json!("Confirmed"))
        );
    }

    #[test]
    fn optimistic_create_survives_snapshot_and_confirms_in_place() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();
        merger.replace_all(&mut collection, vec![entity(json!({"id": 1}))]);

        let local = merger
            .apply_optimistic(&mut collection, entity(json!({"status": "Pending"})))
            .unwrap();
        assert!(local.id().is_placeholder());

        let outcome = merger.replace_all(
            &mut collection,
            vec![entity(json!({"id": 1})), entity(json!({"id": 5}))],
        );
        assert_eq!(outcome.kept_local, vec![local.id().clone()]);

        let confirmed = merger
            .confirm_optimistic(&mut collection, &local, entity(json!({"id": 7, "status": "Pending"})))
            .unwrap();
        assert_eq!(confirmed, UpsertOutcome::Inserted(CanonicalId::new("7")));
        assert!(!collection.contains(local.id()));
        let ids: Vec<_> = collection.ids().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["1", "5", "7"]);
        assert_eq!(
            collection.entry(&CanonicalId::new("7")).unwrap().state(),
            EntryState::Confirmed
        );
    }

    #[test]
    fn confirm_merges_when_push_create_won_the_race() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();
        let local = merger
            .apply_optimistic(&mut collection, entity(json!({"status": "Pending"})))
            .unwrap();
        merger
            .upsert(&mut collection, entity(json!({"id": 8, "status": "Pending", "room": "A"})))
            .unwrap();

        merger
            .confirm_optimistic(&mut collection, &local, entity(json!({"id": 8, "status": "Pending"})))
            .unwrap();

        assert_eq!(collection.len(), 1);
        assert!(collection.contains(&CanonicalId::new("8")));
    }

    #[test]
    fn optimistic_edit_rolls_back_to_server_value() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();
        merger
            .upsert(&mut collection, entity(json!({"id": 1, "status": "Pending"})))
            .unwrap();

        let edit = merger
            .apply_optimistic(&mut collection, entity(json!({"id": 1, "status": "Confirmed"})))
            .unwrap();
        assert_eq!(
            collection.get(edit.id()).unwrap().get("status"),
            Some(&json!("Confirmed"))
        );

        let outcome = merger.rollback_optimistic(&mut collection, &edit).unwrap();
        assert_eq!(outcome, RollbackOutcome::Reverted(CanonicalId::new("1")));
        let entry = collection.entry(edit.id()).unwrap();
        assert_eq!(entry.entity().get("status"), Some(&json!("Pending")));
        assert_eq!(entry.state(), EntryState::Confirmed);
    }

    #[test]
    fn optimistic_create_rollback_removes_entry() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();
        let local = merger
            .apply_optimistic(&mut collection, entity(json!({"status": "Pending"})))
            .unwrap();

        let outcome = merger.rollback_optimistic(&mut collection, &local).unwrap();

        assert_eq!(outcome, RollbackOutcome::Removed(local.id().clone()));
        assert!(collection.is_empty());
    }

    #[test]
    fn rollback_of_confirmed_entry_is_invalid_transition() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();
        merger.upsert(&mut collection, entity(json!({"id": 1}))).unwrap();

        let settled = OptimisticEdit {
            id: CanonicalId::new("1"),
            seq: 99,
        };
        let err = merger
            .rollback_optimistic(&mut collection, &settled)
            .unwrap_err();

        assert!(matches!(err, SyncError::InvalidTransition(_)));
    }

    #[test]
    fn confirm_unknown_placeholder_fails() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();

        let err = merger
            .confirm_optimistic(
                &mut collection,
                &OptimisticEdit {
                    id: CanonicalId::placeholder(),
                    seq: 1,
                },
                entity(json!({"id": 1})),
            )
            .unwrap_err();

        assert!(matches!(err, SyncError::PlaceholderNotFound { .. }));
    }

    #[test]
    fn overlapping_edits_settle_independently() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();
        merger
            .upsert(&mut collection, entity(json!({"id": 3, "status": "Pending", "note": ""})))
            .unwrap();

        let first = merger
            .apply_optimistic(&mut collection, entity(json!({"id": 3, "status": "Confirmed"})))
            .unwrap();
        let second = merger
            .apply_optimistic(&mut collection, entity(json!({"id": 3, "note": "late"})))
            .unwrap();

        merger
            .confirm_optimistic(
                &mut collection,
                &first,
                entity(json!({"id": 3, "status": "Confirmed", "note": ""})),
            )
            .unwrap();
        let entry = collection.entry(first.id()).unwrap();
        assert_eq!(entry.state(), EntryState::Optimistic);
        assert_eq!(entry.entity().get("note"), Some(&json!("late")));

        let outcome = merger
            .confirm_optimistic(
                &mut collection,
                &second,
                entity(json!({"id": 3, "status": "Confirmed", "note": "late"})),
            )
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged(CanonicalId::new("3")));
        let entry = collection.entry(second.id()).unwrap();
        assert_eq!(entry.state(), EntryState::Confirmed);
        assert_eq!(
            entry.base().clone().into_value(),
            json!({"id": 3, "status": "Confirmed", "note": "late"})
        );
    }

    #[test]
    fn rolling_back_one_edit_keeps_a_sibling_edit() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();
        merger
            .upsert(&mut collection, entity(json!({"id": 3, "status": "Pending", "note": ""})))
            .unwrap();
        let first = merger
            .apply_optimistic(&mut collection, entity(json!({"id": 3, "status": "Cancelled"})))
            .unwrap();
        let second = merger
            .apply_optimistic(&mut collection, entity(json!({"id": 3, "note": "late"})))
            .unwrap();

        merger.rollback_optimistic(&mut collection, &first).unwrap();

        let entry = collection.entry(second.id()).unwrap();
        assert_eq!(entry.state(), EntryState::Optimistic);
        assert_eq!(
            entry.entity().clone().into_value(),
            json!({"id": 3, "status": "Pending", "note": "late"})
        );
    }

    #[test]
    fn confirm_with_older_revision_reports_stale() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();
        merger
            .upsert(&mut collection, entity(json!({"id": 1, "status": "Pending", "revision": 5})))
            .unwrap();
        let edit = merger
            .apply_optimistic(&mut collection, entity(json!({"id": 1, "status": "Pending"})))
            .unwrap();

        let outcome = merger
            .confirm_optimistic(
                &mut collection,
                &edit,
                entity(json!({"id": 1, "status": "Cancelled", "revision": 4})),
            )
            .unwrap();

        assert_eq!(outcome, UpsertOutcome::Stale(CanonicalId::new("1")));
        let entry = collection.entry(edit.id()).unwrap();
        assert_eq!(entry.state(), EntryState::Confirmed);
        assert_eq!(entry.entity().get("status"), Some(&json!("Pending")));
    }

    #[test]
    fn edit_on_placeholder_follows_the_rekeyed_entry() {
        let merger = EntityUpsertMerger::default();
        let mut collection = appointments();
        let create = merger
            .apply_optimistic(&mut collection, entity(json!({"status": "Pending"})))
            .unwrap();
        let placeholder = create.id().as_str().to_string();
        let edit = merger
            .apply_optimistic(
                &mut collection,
                entity(json!({"id": placeholder, "note": "first visit"})),
            )
            .unwrap();
        assert_eq!(edit.id(), create.id());

        merger
            .confirm_optimistic(&mut collection, &create, entity(json!({"id": 40, "status": "Pending"})))
            .unwrap();
        let real = CanonicalId::new("40");
        assert_eq!(collection.entry(&real).unwrap().state(), EntryState::Optimistic);

        merger
            .confirm_optimistic(
                &mut collection,
                &edit,
                entity(json!({"id": 40, "status": "Pending", "note": "first visit"})),
            )
            .unwrap();
        let entry = collection.entry(&real).unwrap();
        assert_eq!(entry.state(), EntryState::Confirmed);
        assert_eq!(entry.entity().get("note"), Some(&json!("first visit")));
        assert_eq!(collection.len(), 1);
    }
}
