//! Billing configuration.

use crate::error::BillingError;

/// Which provider environment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderMode {
    Sandbox,
    Live,
}

impl ProviderMode {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderMode::Sandbox => "https://api-m.sandbox.paypal.com",
            ProviderMode::Live => "https://api-m.paypal.com",
        }
    }
}

/// Configuration for the subscription lifecycle and provider client.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// OAuth2 client ID issued by the provider.
    pub client_id: String,
    /// OAuth2 client secret issued by the provider.
    pub client_secret: String,
    pub mode: ProviderMode,
    /// Overrides the mode's API base URL (tests, proxies).
    pub base_url: Option<String>,
    /// Shared secret for webhook signatures. Required in live mode.
    pub webhook_secret: Option<String>,
    /// Accepted clock skew for signed webhooks, in seconds.
    pub webhook_tolerance_secs: u64,
    /// Where the provider sends the customer after approving.
    pub return_url: String,
    /// Where the provider sends the customer after backing out.
    pub cancel_url: String,
    /// Shown on the provider's approval page.
    pub brand_name: String,
    /// Per-call timeout for provider requests.
    pub request_timeout_secs: u64,
    /// Most webhook event IDs remembered for deduplication.
    pub dedupe_capacity: usize,
    /// How long a webhook event ID is remembered, in seconds.
    pub dedupe_max_age_secs: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            mode: ProviderMode::Sandbox,
            base_url: None,
            webhook_secret: None,
            webhook_tolerance_secs: 300,
            return_url: "http://localhost:3000/billing/return".into(),
            cancel_url: "http://localhost:3000/billing/cancel".into(),
            brand_name: "Cellar".into(),
            request_timeout_secs: 15,
            dedupe_capacity: 10_000,
            dedupe_max_age_secs: 86_400,
        }
    }
}

impl BillingConfig {
    /// Read `PAYPAL_*` and `CELLAR_BILLING_*` variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let num = |key: &str, default: u64| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };
        let mode = match std::env::var("PAYPAL_MODE").as_deref() {
            Ok("live") => ProviderMode::Live,
            _ => ProviderMode::Sandbox,
        };
        Self {
            client_id: std::env::var("PAYPAL_CLIENT_ID").unwrap_or(defaults.client_id),
            client_secret: std::env::var("PAYPAL_CLIENT_SECRET")
                .unwrap_or(defaults.client_secret),
            mode,
            base_url: std::env::var("PAYPAL_BASE_URL").ok(),
            webhook_secret: std::env::var("CELLAR_BILLING_WEBHOOK_SECRET").ok(),
            webhook_tolerance_secs: num(
                "CELLAR_BILLING_WEBHOOK_TOLERANCE_SECS",
                defaults.webhook_tolerance_secs,
            ),
            return_url: std::env::var("CELLAR_BILLING_RETURN_URL").unwrap_or(defaults.return_url),
            cancel_url: std::env::var("CELLAR_BILLING_CANCEL_URL").unwrap_or(defaults.cancel_url),
            brand_name: std::env::var("CELLAR_BILLING_BRAND_NAME").unwrap_or(defaults.brand_name),
            request_timeout_secs: num(
                "CELLAR_BILLING_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            ),
            dedupe_capacity: num("CELLAR_BILLING_DEDUPE_CAPACITY", defaults.dedupe_capacity as u64)
                as usize,
            dedupe_max_age_secs: num(
                "CELLAR_BILLING_DEDUPE_MAX_AGE_SECS",
                defaults.dedupe_max_age_secs,
            ),
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.mode.default_base_url())
    }

    /// Reject configurations that would run live without credentials
    /// or accept unsigned webhooks.
    pub fn validate(&self) -> Result<(), BillingError> {
        if self.mode == ProviderMode::Live {
            if self.client_id.is_empty() || self.client_secret.is_empty() {
                return Err(BillingError::Config(
                    "live mode requires PAYPAL_CLIENT_ID and PAYPAL_CLIENT_SECRET".into(),
                ));
            }
            if self.webhook_secret.as_deref().is_none_or(str::is_empty) {
                return Err(BillingError::Config(
                    "live mode requires a webhook secret".into(),
                ));
            }
        }
        if self.dedupe_capacity == 0 {
            return Err(BillingError::Config("dedupe capacity must be positive".into()));
        }
        Ok(())
    }
}
