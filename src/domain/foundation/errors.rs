//! Error types for the synchronization core.

use std::fmt;
use thiserror::Error;

use crate::domain::cache::{IdentityError, ResourceKind};
use crate::ports::{FetchError, TransportError};

use super::CanonicalId;

/// Errors that occur during value object construction and state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Field '{field}' cannot be empty")]
    EmptyField { field: String },

    #[error("Field '{field}' has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    /// Creates an empty field validation error.
    pub fn empty_field(field: impl Into<String>) -> Self {
        ValidationError::EmptyField {
            field: field.into(),
        }
    }

    /// Creates an invalid format validation error.
    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Error codes organized by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Transport errors
    TransportError,
    NotConnected,
    ConnectTimeout,

    // Fetch errors
    FetchFailed,
    NotFound,

    // Cache anomalies
    IdentityMissing,
    MergeConflict,
    PlaceholderNotFound,

    // State errors
    InvalidStateTransition,
    ValidationFailed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::TransportError => "TRANSPORT_ERROR",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::ConnectTimeout => "CONNECT_TIMEOUT",
            ErrorCode::FetchFailed => "FETCH_FAILED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::IdentityMissing => "IDENTITY_MISSING",
            ErrorCode::MergeConflict => "MERGE_CONFLICT",
            ErrorCode::PlaceholderNotFound => "PLACEHOLDER_NOT_FOUND",
            ErrorCode::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
        };
        write!(f, "{}", s)
    }
}

/// Crate-level error for cache synchronization.
///
/// Transport and fetch failures are recoverable by the caller (retry or a
/// non-fatal banner). Identity and merge anomalies mean the event was dropped
/// before it could touch the collection.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("Update for {kind} '{id}' has no cached entry to merge into")]
    MergeConflict { kind: ResourceKind, id: CanonicalId },

    #[error("No optimistic placeholder '{id}' in {kind}")]
    PlaceholderNotFound { kind: ResourceKind, id: CanonicalId },

    #[error("Invalid state transition: {0}")]
    InvalidTransition(#[from] ValidationError),
}

impl SyncError {
    /// Returns the categorized error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::Transport(TransportError::NotConnected) => ErrorCode::NotConnected,
            SyncError::Transport(TransportError::Timeout(_)) => ErrorCode::ConnectTimeout,
            SyncError::Transport(_) => ErrorCode::TransportError,
            SyncError::Fetch(FetchError::NotFound { .. }) => ErrorCode::NotFound,
            SyncError::Fetch(_) => ErrorCode::FetchFailed,
            SyncError::Identity(_) => ErrorCode::IdentityMissing,
            SyncError::MergeConflict { .. } => ErrorCode::MergeConflict,
            SyncError::PlaceholderNotFound { .. } => ErrorCode::PlaceholderNotFound,
            SyncError::InvalidTransition(ValidationError::InvalidFormat { .. }) => {
                ErrorCode::InvalidStateTransition
            }
            SyncError::InvalidTransition(_) => ErrorCode::ValidationFailed,
        }
    }

    /// True when the caller can retry or keep showing cached data.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::Fetch(_))
    }
}
