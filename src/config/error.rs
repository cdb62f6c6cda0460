//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid tenant id: {0}")]
    InvalidTenant(String),

    #[error("Connect timeout must be between 1 and {max} seconds")]
    InvalidConnectTimeout { max: u64 },

    #[error("Change channel capacity must be greater than zero")]
    InvalidChannelCapacity,

    #[error("At least one revision field is required")]
    NoRevisionFields,

    #[error("Invalid log level directive: {0}")]
    InvalidLogLevel(String),
}
