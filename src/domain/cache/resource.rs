//! Resource kinds and the push topics each one owns.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Entity families cached by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Patients,
    Appointments,
    Dashboard,
    LoginActivity,
}

impl ResourceKind {
    /// Collection name used in logs and load-guard keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Patients => "patients",
            ResourceKind::Appointments => "appointments",
            ResourceKind::Dashboard => "dashboard",
            ResourceKind::LoginActivity => "login_activity",
        }
    }

    /// Singular entity name used as the topic prefix.
    fn entity_name(&self) -> &'static str {
        match self {
            ResourceKind::Patients => "patient",
            ResourceKind::Appointments => "appointment",
            ResourceKind::Dashboard => "dashboard",
            ResourceKind::LoginActivity => "login_activity",
        }
    }

    /// Raw identifier fields tried in order when normalizing identity.
    pub fn default_id_candidates(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Patients => &["patient_id", "patientId", "id", "_id"],
            ResourceKind::Appointments => &["appointment_id", "appointmentId", "id", "_id"],
            ResourceKind::Dashboard => &["doctor_id", "doctorId", "id"],
            ResourceKind::LoginActivity => &["activity_id", "activityId", "id", "_id"],
        }
    }

    /// The push topic for one lifecycle phase of this kind.
    pub fn topic(&self, phase: TopicPhase) -> Topic {
        Topic(format!("{}.{}", self.entity_name(), phase.as_str()))
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase carried by a push topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicPhase {
    /// Full-list replacement.
    List,
    /// Single entity created.
    Created,
    /// Single entity updated, possibly partial.
    Updated,
}

impl TopicPhase {
    pub const ALL: [TopicPhase; 3] = [TopicPhase::List, TopicPhase::Created, TopicPhase::Updated];

    fn as_str(&self) -> &'static str {
        match self {
            TopicPhase::List => "list",
            TopicPhase::Created => "created",
            TopicPhase::Updated => "updated",
        }
    }
}

/// Named push topic, implicitly scoped beneath the joined tenant room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
