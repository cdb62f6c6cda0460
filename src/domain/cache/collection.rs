//! Ordered, identity-keyed entity collection.

use indexmap::IndexMap;

use crate::domain::foundation::{CanonicalId, StateMachine, ValidationError};

use super::{Entity, EntryState, ResourceKind, Revision};

/// One slot in a [`Collection`].
///
/// `base` is the last server-known value. Each unacknowledged local edit is
/// kept as its own patch, keyed by edit sequence, and `view` is `base` with
/// every pending patch layered on in order.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry {
    base: Entity,
    pending: Vec<(u64, Entity)>,
    view: Entity,
    state: EntryState,
    revision: Option<Revision>,
    local_only: bool,
    /// Edit that created this entry locally, until the server acknowledges it.
    created_by: Option<u64>,
}

impl CachedEntry {
    pub(crate) fn confirmed(base: Entity, revision: Option<Revision>) -> Self {
        Self {
            view: base.clone(),
            base,
            pending: Vec::new(),
            state: EntryState::Confirmed,
            revision,
            local_only: false,
            created_by: None,
        }
    }

    pub(crate) fn optimistic_create(local: Entity, seq: u64) -> Self {
        Self {
            view: local.clone(),
            base: local,
            pending: Vec::new(),
            state: EntryState::Optimistic,
            revision: None,
            local_only: true,
            created_by: Some(seq),
        }
    }

    /// The value to render.
    pub fn entity(&self) -> &Entity {
        &self.view
    }

    /// The last server-known value, without local edits.
    pub fn base(&self) -> &Entity {
        &self.base
    }

    /// Number of local edits layered over the base.
    pub fn pending_edits(&self) -> usize {
        self.pending.len()
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    pub fn revision(&self) -> Option<Revision> {
        self.revision
    }

    /// True for an optimistic create the server has never seen.
    pub fn is_local_only(&self) -> bool {
        self.local_only
    }

    pub(crate) fn created_by(&self) -> Option<u64> {
        self.created_by
    }

    /// True while edit `seq` is still unacknowledged on this entry.
    pub(crate) fn holds_edit(&self, seq: u64) -> bool {
        self.created_by == Some(seq) || self.pending.iter().any(|(s, _)| *s == seq)
    }

    pub(crate) fn set_state(&mut self, state: EntryState) {
        self.state = state;
    }

    pub(crate) fn replace_base(&mut self, base: Entity, revision_fields: &[String]) {
        self.revision = base.revision(revision_fields);
        self.base = base;
        self.local_only = false;
        self.rebuild_view();
    }

    pub(crate) fn merge_base(&mut self, incoming: &Entity, revision_fields: &[String]) -> bool {
        let changed = self.base.merge_from(incoming);
        self.revision = self.base.revision(revision_fields);
        self.local_only = false;
        self.rebuild_view();
        changed
    }

    pub(crate) fn layer_pending(&mut self, seq: u64, patch: &Entity) {
        self.pending.push((seq, patch.clone()));
        self.rebuild_view();
    }

    /// Marks edit `seq` as acknowledged or discarded.
    ///
    /// Returns false when the edit was no longer pending here.
    pub(crate) fn settle(&mut self, seq: u64) -> bool {
        if self.created_by == Some(seq) {
            self.created_by = None;
            return true;
        }
        let before = self.pending.len();
        self.pending.retain(|(s, _)| *s != seq);
        if self.pending.len() == before {
            return false;
        }
        self.rebuild_view();
        true
    }

    /// Moves the state to match what is still pending: `Optimistic` while
    /// any edit is unacknowledged, `Confirmed` otherwise.
    pub(crate) fn resettle(&mut self) -> Result<(), ValidationError> {
        let target = if self.pending.is_empty() && self.created_by.is_none() {
            EntryState::Confirmed
        } else {
            EntryState::Optimistic
        };
        if self.state != target {
            self.state = self.state.transition_to(target)?;
        }
        Ok(())
    }

    pub(crate) fn take_pending(&mut self) -> Vec<(u64, Entity)> {
        let pending = std::mem::take(&mut self.pending);
        self.rebuild_view();
        pending
    }

    pub(crate) fn adopt_pending(&mut self, patches: Vec<(u64, Entity)>) {
        self.pending.extend(patches);
        self.rebuild_view();
    }

    fn rebuild_view(&mut self) {
        let mut view = self.base.clone();
        for (_, patch) in &self.pending {
            view.merge_from(patch);
        }
        self.view = view;
    }
}

/// Mapping CanonicalId → entry with O(1) lookup and stable iteration order.
///
/// Never holds two entries for one CanonicalId. New ids append; a snapshot
/// replace adopts the snapshot's order.
#[derive(Debug, Clone)]
pub struct Collection {
    kind: ResourceKind,
    entries: IndexMap<CanonicalId, CachedEntry>,
    next_edit: u64,
}

impl Collection {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            entries: IndexMap::new(),
            next_edit: 0,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &CanonicalId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &CanonicalId) -> Option<&Entity> {
        self.entries.get(id).map(CachedEntry::entity)
    }

    pub fn entry(&self, id: &CanonicalId) -> Option<&CachedEntry> {
        self.entries.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &CanonicalId> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CanonicalId, &CachedEntry)> {
        self.entries.iter()
    }

    /// Rendered entities in collection order.
    pub fn to_vec(&self) -> Vec<Entity> {
        self.entries.values().map(|e| e.entity().clone()).collect()
    }

    pub(crate) fn entries_mut(&mut self) -> &mut IndexMap<CanonicalId, CachedEntry> {
        &mut self.entries
    }

    pub(crate) fn next_edit_seq(&mut self) -> u64 {
        self.next_edit += 1;
        self.next_edit
    }

    pub(crate) fn take_entries(&mut self) -> IndexMap<CanonicalId, CachedEntry> {
        std::mem::take(&mut self.entries)
    }

    pub(crate) fn set_entries(&mut self, entries: IndexMap<CanonicalId, CachedEntry>) {
        self.entries = entries;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(value: serde_json::Value) -> Entity {
        Entity::from_value(value).unwrap()
    }

    #[test]
    fn pending_patch_layers_over_base() {
        let mut entry = CachedEntry::confirmed(entity(json!({"id": 1, "status": "Pending"})), None);
        entry.layer_pending(1, &entity(json!({"status": "Confirmed"})));

        assert_eq!(entry.entity().get("status"), Some(&json!("Confirmed")));
        assert_eq!(entry.base().get("status"), Some(&json!("Pending")));
    }

    #[test]
    fn base_merge_keeps_pending_on_top() {
        let mut entry = CachedEntry::confirmed(entity(json!({"id": 1, "status": "Pending"})), None);
        entry.layer_pending(1, &entity(json!({"status": "Cancelled"})));
        entry.merge_base(&entity(json!({"status": "Confirmed", "room": "B"})), &[]);

        assert_eq!(
            entry.entity().clone().into_value(),
            json!({"id": 1, "status": "Cancelled", "room": "B"})
        );

        assert!(entry.settle(1));
        assert_eq!(entry.entity().get("status"), Some(&json!("Confirmed")));
    }

    #[test]
    fn settling_one_edit_keeps_the_others_layered() {
        let mut entry = CachedEntry::confirmed(entity(json!({"id": 1, "status": "Pending", "note": ""})), None);
        entry.layer_pending(1, &entity(json!({"status": "Confirmed"})));
        entry.layer_pending(2, &entity(json!({"note": "late"})));
        entry.set_state(EntryState::Optimistic);

        assert!(entry.settle(1));
        entry.resettle().unwrap();

        assert_eq!(entry.state(), EntryState::Optimistic);
        assert_eq!(entry.pending_edits(), 1);
        assert_eq!(
            entry.entity().clone().into_value(),
            json!({"id": 1, "status": "Pending", "note": "late"})
        );
        assert!(!entry.settle(1));

        assert!(entry.settle(2));
        entry.resettle().unwrap();
        assert_eq!(entry.state(), EntryState::Confirmed);
    }

    #[test]
    fn to_vec_follows_insertion_order() {
        let mut collection = Collection::new(ResourceKind::Patients);
        for id in ["3", "1", "2"] {
            collection.entries_mut().insert(
                CanonicalId::new(id),
                CachedEntry::confirmed(entity(json!({"id": id})), None),
            );
        }
        let ids: Vec<_> = collection.ids().map(|id| id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["3", "1", "2"]);
        assert_eq!(collection.to_vec().len(), 3);
    }
}
