//! Inbound webhook intake: signature check, parsing, deduplication and
//! dispatch to a [`WebhookHandler`].

use std::sync::Arc;

use cellar_core::Clock;
use cellar_core::error::CellarResult;
use cellar_core::models::webhook::WebhookEvent;
use chrono::Duration;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::BillingConfig;
use crate::dedupe::EventDeduper;
use crate::error::BillingError;
use crate::signature::verify_webhook_signature;

/// What processing a webhook did. Every variant is a success as far as the
/// provider is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// State changed.
    Applied,
    /// The event's effect was already in place.
    AlreadyApplied,
    /// Nothing to do, with the reason.
    Ignored(String),
    /// The event ID was seen recently and was not processed again.
    Duplicate,
}

/// Applies a parsed webhook event to local state. Must be idempotent.
pub trait WebhookHandler: Send + Sync {
    fn handle_webhook(
        &self,
        event: &WebhookEvent,
    ) -> impl Future<Output = CellarResult<WebhookOutcome>> + Send;
}

/// Verifies and deduplicates raw webhook deliveries.
pub struct WebhookReceiver {
    secret: Option<String>,
    tolerance_secs: u64,
    deduper: EventDeduper,
    clock: Arc<dyn Clock>,
}

impl WebhookReceiver {
    pub fn new(config: &BillingConfig, clock: Arc<dyn Clock>) -> Self {
        let max_age = i64::try_from(config.dedupe_max_age_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        Self {
            secret: config.webhook_secret.clone().filter(|s| !s.is_empty()),
            tolerance_secs: config.webhook_tolerance_secs,
            deduper: EventDeduper::new(config.dedupe_capacity, max_age, clock.clone()),
            clock,
        }
    }

    /// Verify `signature` over `body` and parse the event.
    ///
    /// Without a configured secret, unsigned deliveries are accepted.
    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> Result<WebhookEvent, BillingError> {
        match &self.secret {
            Some(secret) => {
                let header = signature
                    .ok_or_else(|| BillingError::SignatureInvalid("missing signature header".into()))?;
                verify_webhook_signature(body, header, secret, self.clock.now(), self.tolerance_secs)?;
            }
            None => debug!("No webhook secret configured; skipping signature check"),
        }

        serde_json::from_slice(body).map_err(|e| BillingError::Payload(e.to_string()))
    }

    /// Verify, parse and hand the event to `handler` unless it is a
    /// recent duplicate. A failed event is forgotten so the provider's
    /// redelivery gets another try. Events without an ID are never
    /// remembered and rely on the handler's state checks alone.
    pub async fn receive<H: WebhookHandler>(
        &self,
        handler: &H,
        body: &[u8],
        signature: Option<&str>,
    ) -> CellarResult<WebhookOutcome> {
        let event = self.verify(body, signature)?;
        let tracked = !event.id.trim().is_empty();

        if tracked && !self.deduper.check_and_record(&event.id) {
            info!(event_id = %event.id, "Duplicate webhook delivery");
            return Ok(WebhookOutcome::Duplicate);
        }

        match handler.handle_webhook(&event).await {
            Ok(outcome) => {
                info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    outcome = ?outcome,
                    "Webhook processed"
                );
                Ok(outcome)
            }
            Err(e) => {
                if tracked {
                    self.deduper.forget(&event.id);
                }
                Err(e)
            }
        }
    }
}
