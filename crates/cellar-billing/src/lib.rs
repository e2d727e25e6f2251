//! Cellar Billing — the subscription lifecycle, the billing provider
//! client and webhook intake.

pub mod config;
pub mod dedupe;
pub mod error;
pub mod paypal;
pub mod provider;
pub mod service;
pub mod signature;
pub mod webhook;

pub use config::{BillingConfig, ProviderMode};
pub use dedupe::EventDeduper;
pub use error::BillingError;
pub use paypal::PayPalClient;
pub use provider::{BillingProvider, CreateRemoteSubscription, CreatedSubscription, RemoteSubscription};
pub use service::{SubscriptionService, UpgradeOutcome};
pub use signature::{SIGNATURE_HEADER, sign_payload, verify_webhook_signature};
pub use webhook::{WebhookHandler, WebhookOutcome, WebhookReceiver};
