//! Generic cached record and its revision.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::domain::foundation::Timestamp;

/// A record of any resource kind, held as its raw field map.
///
/// Fields missing from the map are "absent", which matters for partial
/// updates: only present fields overwrite cached values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity {
    fields: Map<String, JsonValue>,
}

impl Entity {
    /// Wraps an existing field map.
    pub fn new(fields: Map<String, JsonValue>) -> Self {
        Self { fields }
    }

    /// Accepts a JSON object; any other JSON value is not an entity.
    pub fn from_value(value: JsonValue) -> Option<Self> {
        match value {
            JsonValue::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: JsonValue) {
        self.fields.insert(field.into(), value);
    }

    pub(crate) fn remove(&mut self, field: &str) -> Option<JsonValue> {
        self.fields.remove(field)
    }

    pub fn fields(&self) -> &Map<String, JsonValue> {
        &self.fields
    }

    pub fn into_value(self) -> JsonValue {
        JsonValue::Object(self.fields)
    }

    /// Incoming-present-wins, incoming-absent-preserves.
    ///
    /// Returns true if any stored value changed.
    pub fn merge_from(&mut self, incoming: &Entity) -> bool {
        let mut changed = false;
        for (field, value) in &incoming.fields {
            if self.fields.get(field) != Some(value) {
                self.fields.insert(field.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }

    /// Reads the first present revision field.
    ///
    /// Integers are sequence numbers; RFC 3339 strings become epoch millis.
    pub fn revision(&self, revision_fields: &[String]) -> Option<Revision> {
        revision_fields
            .iter()
            .filter_map(|field| self.fields.get(field))
            .find_map(Revision::from_json)
    }
}

impl From<Map<String, JsonValue>> for Entity {
    fn from(fields: Map<String, JsonValue>) -> Self {
        Self::new(fields)
    }
}

/// Monotonic version attached to an entity at the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(i64);

impl Revision {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(n) => n.as_i64().map(Self),
            JsonValue::String(s) => s
                .trim()
                .parse::<i64>()
                .ok()
                .or_else(|| Timestamp::parse_rfc3339(s).map(|ts| ts.as_millis()))
                .map(Self),
            _ => None,
        }
    }
}
