//! Bearer token claims carrying the caller's tenant.
//!
//! Tokens are EdDSA (Ed25519) JWTs issued by the identity service; this
//! crate only verifies them. [`issue_tenant_token`] exists for service
//! accounts and tests.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AccessConfig;
use crate::error::AccessError;

/// JWT claims the access layer relies on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantClaims {
    /// Subject (user or service account ID).
    pub sub: String,
    /// Tenant ID (UUID string).
    pub tenant_id: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

impl TenantClaims {
    pub fn tenant_uuid(&self) -> Result<Uuid, AccessError> {
        Uuid::parse_str(&self.tenant_id)
            .map_err(|e| AccessError::TokenInvalid(format!("tenant_id: {e}")))
    }
}

/// Issue a signed EdDSA token for `tenant_id`.
pub fn issue_tenant_token(
    subject: &str,
    tenant_id: Uuid,
    private_key_pem: &str,
    issuer: &str,
    lifetime_secs: i64,
) -> Result<String, AccessError> {
    let now = Utc::now().timestamp();
    let claims = TenantClaims {
        sub: subject.to_string(),
        tenant_id: tenant_id.to_string(),
        iss: issuer.to_string(),
        iat: now,
        exp: now + lifetime_secs,
    };

    let key = EncodingKey::from_ed_pem(private_key_pem.as_bytes())
        .map_err(|e| AccessError::Crypto(format!("bad private key: {e}")))?;
    jsonwebtoken::encode(&Header::new(Algorithm::EdDSA), &claims, &key)
        .map_err(|e| AccessError::Crypto(format!("JWT encode: {e}")))
}

/// Verify signature, expiry and issuer, returning the claims.
pub fn decode_tenant_claims(token: &str, config: &AccessConfig) -> Result<TenantClaims, AccessError> {
    if config.jwt_public_key_pem.is_empty() {
        return Err(AccessError::TokenInvalid(
            "bearer tokens are not accepted".into(),
        ));
    }
    let key = DecodingKey::from_ed_pem(config.jwt_public_key_pem.as_bytes())
        .map_err(|e| AccessError::Crypto(format!("bad public key: {e}")))?;

    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.set_issuer(&[&config.jwt_issuer]);
    validation.set_required_spec_claims(&["sub", "exp", "iat", "iss"]);

    jsonwebtoken::decode::<TenantClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AccessError::TokenExpired,
            _ => AccessError::TokenInvalid(e.to_string()),
        })
}
