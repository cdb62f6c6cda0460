//! Canonical identity derivation.
//!
//! Server payloads name the same key differently depending on the endpoint
//! (`patient_id`, `patientId`, `id`, `_id`). The normalizer tries an ordered
//! candidate list per kind and stringifies the first present value, so the
//! resulting [`CanonicalId`] is a pure function of the raw fields.

use std::collections::HashMap;

use serde_json::{Number, Value as JsonValue};
use thiserror::Error;

use crate::domain::foundation::CanonicalId;

use super::{Entity, ResourceKind};

/// Entity carried none of the identifier fields for its kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} entity has none of the identifier fields [{}]", .candidates.join(", "))]
pub struct IdentityError {
    pub kind: ResourceKind,
    pub candidates: Vec<String>,
}

/// Derives the canonical identity of an entity from its raw fields.
#[derive(Debug, Clone)]
pub struct IdentityNormalizer {
    overrides: HashMap<ResourceKind, Vec<String>>,
}

impl IdentityNormalizer {
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
        }
    }

    /// Replaces the candidate list for one kind.
    pub fn with_candidates<I, S>(mut self, kind: ResourceKind, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.overrides
            .insert(kind, candidates.into_iter().map(Into::into).collect());
        self
    }

    /// The candidate fields tried for `kind`, in order.
    pub fn candidates(&self, kind: ResourceKind) -> Vec<String> {
        match self.overrides.get(&kind) {
            Some(fields) => fields.clone(),
            None => kind
                .default_id_candidates()
                .iter()
                .map(|f| f.to_string())
                .collect(),
        }
    }

    /// Returns the first present candidate value, stringified.
    pub fn normalize(
        &self,
        kind: ResourceKind,
        entity: &Entity,
    ) -> Result<CanonicalId, IdentityError> {
        let candidates = self.candidates(kind);
        let found = candidates
            .iter()
            .filter_map(|field| entity.get(field))
            .find_map(stringify_id);
        match found {
            Some(id) => Ok(CanonicalId::new(id)),
            None => Err(IdentityError { kind, candidates }),
        }
    }
}

impl Default for IdentityNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

fn stringify_id(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        JsonValue::Number(n) => Some(stringify_number(n)),
        _ => None,
    }
}

// 42, 42.0 and "42" must all land in the same slot.
fn stringify_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => format!("{}", f as i64),
        _ => n.to_string(),
    }
}
