//! Error types for the Cellar system.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CellarError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("Billing provider error: {message}")]
    Provider { message: String },

    #[error("Limit exceeded for {resource}: {current} of {limit}")]
    LimitExceeded {
        resource: String,
        current: u64,
        limit: u64,
    },

    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimited {
        retry_after: u64,
        limit: u64,
        reset: i64,
    },

    #[error("No dedicated store provisioned for tenant {tenant_id}")]
    ProvisioningMissing { tenant_id: Uuid },

    #[error("Tenant {tenant_id} is not active ({status})")]
    TenantInactive { tenant_id: Uuid, status: String },

    #[error("Tenant context missing or invalid")]
    TenantContext,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CellarError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Only provider failures are worth retrying; domain errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { .. })
    }
}

pub type CellarResult<T> = Result<T, CellarError>;
