//! Billing error types.

use cellar_core::error::CellarError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("provider request failed: {0}")]
    Http(String),

    #[error("provider request timed out")]
    Timeout,

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected provider response: {0}")]
    Decode(String),

    #[error("provider response has no approval link")]
    MissingApprovalLink,

    #[error("webhook signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("malformed webhook payload: {0}")]
    Payload(String),

    #[error("billing misconfigured: {0}")]
    Config(String),
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BillingError::Timeout
        } else {
            BillingError::Http(err.to_string())
        }
    }
}

impl From<BillingError> for CellarError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::SignatureInvalid(_) => CellarError::AuthenticationFailed {
                reason: err.to_string(),
            },
            BillingError::Payload(_) | BillingError::Config(_) => CellarError::Validation {
                message: err.to_string(),
            },
            BillingError::Http(_)
            | BillingError::Timeout
            | BillingError::Status { .. }
            | BillingError::Decode(_)
            | BillingError::MissingApprovalLink => CellarError::Provider {
                message: err.to_string(),
            },
        }
    }
}
