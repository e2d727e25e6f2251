//! Access-layer error types.

use cellar_core::error::CellarError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("token has expired")]
    TokenExpired,

    #[error("invalid token: {0}")]
    TokenInvalid(String),

    #[error("cryptography error: {0}")]
    Crypto(String),

    #[error("counter store error: {0}")]
    Counter(String),
}

impl From<AccessError> for CellarError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::TokenExpired | AccessError::TokenInvalid(_) => {
                CellarError::AuthenticationFailed {
                    reason: err.to_string(),
                }
            }
            AccessError::Crypto(msg) | AccessError::Counter(msg) => CellarError::Internal(msg),
        }
    }
}
