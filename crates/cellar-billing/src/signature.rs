//! Webhook signature verification.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac-sha256>`. The MAC covers
//! `"<t>.<raw body>"` keyed with the shared webhook secret.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::BillingError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "x-cellar-signature";

fn mac_hex(payload: &[u8], secret: &str, timestamp: &str) -> Result<String, BillingError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::Config("webhook secret unusable as HMAC key".into()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check `header` against `payload`, rejecting timestamps further than
/// `tolerance_secs` from `now` in either direction.
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: DateTime<Utc>,
    tolerance_secs: u64,
) -> Result<(), BillingError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| BillingError::SignatureInvalid("missing timestamp".into()))?;
    if signatures.is_empty() {
        return Err(BillingError::SignatureInvalid("missing v1 signature".into()));
    }

    let sent_at: i64 = timestamp
        .parse()
        .map_err(|_| BillingError::SignatureInvalid("malformed timestamp".into()))?;
    if now.timestamp().abs_diff(sent_at) > tolerance_secs {
        return Err(BillingError::SignatureInvalid(
            "timestamp outside tolerance".into(),
        ));
    }

    let expected = mac_hex(payload, secret, timestamp)?;
    let matched = signatures
        .iter()
        .any(|candidate| bool::from(expected.as_bytes().ct_eq(candidate.as_bytes())));
    if matched {
        Ok(())
    } else {
        Err(BillingError::SignatureInvalid("signature mismatch".into()))
    }
}

/// Produce a header value for `payload` signed at `timestamp`.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, BillingError> {
    let t = timestamp.to_string();
    let v1 = mac_hex(payload, secret, &t)?;
    Ok(format!("t={t},v1={v1}"))
}
