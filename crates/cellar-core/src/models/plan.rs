//! Subscription plan catalog entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::subscription::BillingCycle;
use crate::models::tenant::Tier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    /// Tier granted once a subscription on this plan activates.
    pub tier: Tier,
    pub monthly_price_cents: u64,
    pub yearly_price_cents: u64,
    pub currency: String,
    /// Provider-side plan identifiers; a missing one means the cycle
    /// is not offered.
    pub provider_plan_monthly: Option<String>,
    pub provider_plan_yearly: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn provider_plan_id(&self, cycle: BillingCycle) -> Option<&str> {
        match cycle {
            BillingCycle::Monthly => self.provider_plan_monthly.as_deref(),
            BillingCycle::Yearly => self.provider_plan_yearly.as_deref(),
        }
    }

    pub fn price_cents(&self, cycle: BillingCycle) -> u64 {
        match cycle {
            BillingCycle::Monthly => self.monthly_price_cents,
            BillingCycle::Yearly => self.yearly_price_cents,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePlan {
    pub name: String,
    pub tier: Tier,
    pub monthly_price_cents: u64,
    pub yearly_price_cents: u64,
    pub currency: String,
    pub provider_plan_monthly: Option<String>,
    pub provider_plan_yearly: Option<String>,
}
