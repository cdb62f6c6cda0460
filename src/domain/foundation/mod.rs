//! Foundation module - Shared domain primitives.
//!
//! Contains identifiers, timestamps, the state machine trait and error types
//! that form the vocabulary of the synchronization core.

mod errors;
mod ids;
mod state_machine;
mod timestamp;

pub use errors::{ErrorCode, SyncError, ValidationError};
pub use ids::{CanonicalId, ConnectionId, SubscriptionId, TenantId};
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;
