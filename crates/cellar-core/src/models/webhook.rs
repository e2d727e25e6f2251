//! Inbound billing webhook payloads.
//!
//! Events are transient: they are applied to subscriptions and then only
//! their IDs are remembered, for a bounded window, to skip redeliveries.

use serde::{Deserialize, Serialize};

/// Raw webhook body as delivered by the billing provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Provider-assigned event ID, used for deduplication.
    pub id: String,
    pub event_type: String,
    pub resource: WebhookResource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResource {
    /// The subscription ID for subscription events, the sale ID for
    /// payment events.
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    /// On payment events, the subscription the payment belongs to.
    #[serde(default)]
    pub billing_agreement_id: Option<String>,
    #[serde(default)]
    pub amount: Option<WebhookAmount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAmount {
    pub total: String,
    pub currency: String,
}

/// Event types the lifecycle manager reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventKind {
    SubscriptionActivated,
    SubscriptionUpdated,
    SubscriptionCancelled,
    SubscriptionSuspended,
    SubscriptionExpired,
    PaymentCompleted,
}

impl WebhookEventKind {
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "BILLING.SUBSCRIPTION.ACTIVATED" => Some(Self::SubscriptionActivated),
            "BILLING.SUBSCRIPTION.UPDATED" => Some(Self::SubscriptionUpdated),
            "BILLING.SUBSCRIPTION.CANCELLED" => Some(Self::SubscriptionCancelled),
            "BILLING.SUBSCRIPTION.SUSPENDED" => Some(Self::SubscriptionSuspended),
            "BILLING.SUBSCRIPTION.EXPIRED" => Some(Self::SubscriptionExpired),
            "PAYMENT.SALE.COMPLETED" => Some(Self::PaymentCompleted),
            _ => None,
        }
    }
}
