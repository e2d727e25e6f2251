//! PayPal Subscriptions API client.
//!
//! Authenticates with the OAuth2 client-credentials grant and caches the
//! access token until shortly before it expires.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::BillingConfig;
use crate::error::BillingError;
use crate::provider::{
    BillingProvider, CreateRemoteSubscription, CreatedSubscription, RemoteSubscription,
};

/// Refresh the token this long before the provider says it expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct SubscriptionCreated {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Default, Deserialize)]
struct BillingInfo {
    #[serde(default)]
    next_billing_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionDetails {
    id: String,
    status: String,
    #[serde(default)]
    plan_id: Option<String>,
    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    billing_info: Option<BillingInfo>,
}

/// [`BillingProvider`] backed by the PayPal REST API.
pub struct PayPalClient {
    http: Client,
    config: BillingConfig,
    token: Mutex<Option<CachedToken>>,
}

impl PayPalClient {
    pub fn new(config: BillingConfig) -> Result<Self, BillingError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BillingError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            config,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url().trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<String, BillingError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }

        debug!("Requesting provider access token");
        let response = self
            .http
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let token: TokenResponse = decode(response).await?;

        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }
}

async fn ensure_success(response: Response) -> Result<Response, BillingError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), body = %body, "Provider request rejected");
    Err(BillingError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, BillingError> {
    ensure_success(response)
        .await?
        .json::<T>()
        .await
        .map_err(|e| BillingError::Decode(e.to_string()))
}

impl BillingProvider for PayPalClient {
    async fn create_subscription(
        &self,
        request: CreateRemoteSubscription,
    ) -> Result<CreatedSubscription, BillingError> {
        let token = self.access_token().await?;
        let body = json!({
            "plan_id": request.provider_plan_id,
            "custom_id": request.custom_id,
            "application_context": {
                "brand_name": request.brand_name,
                "user_action": "SUBSCRIBE_NOW",
                "return_url": request.return_url,
                "cancel_url": request.cancel_url,
            },
        });

        let response = self
            .http
            .post(self.url("/v1/billing/subscriptions"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let created: SubscriptionCreated = decode(response).await?;

        let approval_url = created
            .links
            .into_iter()
            .find(|link| link.rel == "approve")
            .map(|link| link.href)
            .ok_or(BillingError::MissingApprovalLink)?;

        info!(external_id = %created.id, "Provider subscription created");
        Ok(CreatedSubscription {
            id: created.id,
            status: created.status,
            approval_url,
        })
    }

    async fn get_subscription(&self, external_id: &str) -> Result<RemoteSubscription, BillingError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(self.url(&format!("/v1/billing/subscriptions/{external_id}")))
            .bearer_auth(token)
            .send()
            .await?;
        let details: SubscriptionDetails = decode(response).await?;

        Ok(RemoteSubscription {
            id: details.id,
            status: details.status,
            plan_id: details.plan_id,
            start_time: details.start_time,
            next_billing_time: details.billing_info.unwrap_or_default().next_billing_time,
        })
    }

    async fn cancel_subscription(&self, external_id: &str, reason: &str) -> Result<(), BillingError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.url(&format!("/v1/billing/subscriptions/{external_id}/cancel")))
            .bearer_auth(token)
            .json(&json!({ "reason": reason }))
            .send()
            .await?;
        ensure_success(response).await?;
        info!(external_id = %external_id, "Provider subscription cancelled");
        Ok(())
    }
}
