//! The billing provider seam.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::BillingError;

/// Request to open a remote subscription awaiting customer approval.
#[derive(Debug, Clone, Serialize)]
pub struct CreateRemoteSubscription {
    /// The provider's plan ID for the chosen cycle.
    pub provider_plan_id: String,
    /// Our subscription ID, echoed back by the provider.
    pub custom_id: String,
    pub return_url: String,
    pub cancel_url: String,
    pub brand_name: String,
}

/// A freshly created remote subscription.
#[derive(Debug, Clone)]
pub struct CreatedSubscription {
    pub id: String,
    pub status: String,
    /// Where the customer approves the subscription.
    pub approval_url: String,
}

/// The provider's view of a subscription.
#[derive(Debug, Clone)]
pub struct RemoteSubscription {
    pub id: String,
    /// Provider status, e.g. `ACTIVE`, `APPROVAL_PENDING`, `SUSPENDED`.
    pub status: String,
    pub plan_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub next_billing_time: Option<DateTime<Utc>>,
}

impl RemoteSubscription {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("ACTIVE")
    }
}

/// Remote subscription operations. Calls are never retried here;
/// callers decide.
pub trait BillingProvider: Send + Sync {
    fn create_subscription(
        &self,
        request: CreateRemoteSubscription,
    ) -> impl Future<Output = Result<CreatedSubscription, BillingError>> + Send;

    fn get_subscription(
        &self,
        external_id: &str,
    ) -> impl Future<Output = Result<RemoteSubscription, BillingError>> + Send;

    fn cancel_subscription(
        &self,
        external_id: &str,
        reason: &str,
    ) -> impl Future<Output = Result<(), BillingError>> + Send;
}
