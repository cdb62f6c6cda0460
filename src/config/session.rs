//! Session configuration

use secrecy::SecretString;
use serde::Deserialize;

use crate::domain::foundation::TenantId;

use super::error::ValidationError;

/// Who the client is syncing for.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Tenant (doctor account) whose room is joined on connect
    pub tenant_id: String,

    /// Bearer token presented when opening the push channel
    pub auth_token: Option<SecretString>,
}

impl SessionConfig {
    /// Parsed tenant id.
    pub fn tenant(&self) -> Result<TenantId, ValidationError> {
        TenantId::new(self.tenant_id.clone())
            .map_err(|e| ValidationError::InvalidTenant(e.to_string()))
    }

    /// Validate session configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tenant_id.trim().is_empty() {
            return Err(ValidationError::MissingRequired("SESSION__TENANT_ID"));
        }
        self.tenant().map(|_| ())
    }
}
