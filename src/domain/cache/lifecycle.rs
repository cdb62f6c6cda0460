//! Lifecycle of a cached entry with respect to optimistic local edits.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::StateMachine;

/// Where a cached entry stands relative to the server.
///
/// ```text
/// Confirmed --local edit--> Optimistic --ack--> Confirmed
///                           Optimistic --fail--> RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Matches the last server-sourced value.
    Confirmed,
    /// Carries a local change the server has not acknowledged yet.
    Optimistic,
    /// The local change was rejected; terminal.
    RolledBack,
}

impl StateMachine for EntryState {
    fn can_transition_to(&self, target: &Self) -> bool {
        use EntryState::*;
        matches!(
            (self, target),
            (Confirmed, Optimistic)
                | (Optimistic, Optimistic)
                | (Optimistic, Confirmed)
                | (Optimistic, RolledBack)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use EntryState::*;
        match self {
            Confirmed => vec![Optimistic],
            Optimistic => vec![Optimistic, Confirmed, RolledBack],
            RolledBack => vec![],
        }
    }
}
