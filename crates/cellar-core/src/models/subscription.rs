//! Subscription domain model and its state machine.
//!
//! ```text
//! pending ──► active ──► past_due / suspended / cancelled / expired
//!    │          ▲ │
//!    │          └─┘  renewal
//! trialing ─────┘
//! ```
//!
//! `cancelled` and `expired` are terminal. The only way out of a terminal
//! state is a brand-new subscription record that supersedes the old one.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CellarError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    PastDue,
    Trialing,
    Suspended,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub const NON_TERMINAL: [SubscriptionStatus; 5] = [
        SubscriptionStatus::Pending,
        SubscriptionStatus::Active,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Trialing,
        SubscriptionStatus::Suspended,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Suspended => "suspended",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Explicit user cancellation is allowed from every non-terminal
    /// state; `active → active` is the renewal self-loop.
    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;

        if self.is_terminal() {
            return false;
        }
        if next == Cancelled {
            return true;
        }
        match self {
            Pending => matches!(next, Active),
            Trialing => matches!(next, Active),
            Active => matches!(next, Active | PastDue | Suspended | Expired),
            PastDue => matches!(next, Active | Suspended | Expired),
            Suspended => matches!(next, Active | Expired),
            Cancelled | Expired => false,
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = CellarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubscriptionStatus::Pending),
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "suspended" => Ok(SubscriptionStatus::Suspended),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(CellarError::validation(format!(
                "unknown subscription status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Yearly => "yearly",
        }
    }

    pub fn months(&self) -> u32 {
        match self {
            BillingCycle::Monthly => 1,
            BillingCycle::Yearly => 12,
        }
    }

    /// End of a billing period that starts at `start`, in calendar months.
    pub fn period_end(&self, start: DateTime<Utc>) -> Result<DateTime<Utc>, CellarError> {
        start
            .checked_add_months(Months::new(self.months()))
            .ok_or_else(|| CellarError::validation(format!("period start {start} out of range")))
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingCycle {
    type Err = CellarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(BillingCycle::Monthly),
            "yearly" => Ok(BillingCycle::Yearly),
            other => Err(CellarError::validation(format!(
                "unknown billing cycle: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub billing_cycle: BillingCycle,
    /// Provider-assigned ID; absent until the remote subscription exists.
    pub external_subscription_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    /// Set when a newer subscription record replaced this one.
    pub superseded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to create a new (pending) subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubscription {
    pub tenant_id: Uuid,
    pub plan_id: Uuid,
    pub billing_cycle: BillingCycle,
}

/// A state change applied by the lifecycle manager.
///
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubscriptionUpdate {
    pub status: Option<SubscriptionStatus>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use SubscriptionStatus::*;

    #[test]
    fn pending_only_moves_to_active_or_cancelled() {
        for next in [Pending, PastDue, Trialing, Suspended, Expired] {
            assert!(!Pending.can_transition_to(next), "pending -> {next}");
        }
        assert!(Pending.can_transition_to(Active));
        assert!(Pending.can_transition_to(Cancelled));
    }

    #[test]
    fn active_renews_and_degrades() {
        assert!(Active.can_transition_to(Active));
        assert!(Active.can_transition_to(PastDue));
        assert!(Active.can_transition_to(Suspended));
        assert!(Active.can_transition_to(Expired));
        assert!(!Active.can_transition_to(Pending));
        assert!(Trialing.can_transition_to(Active));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for next in [Pending, Active, PastDue, Trialing, Suspended, Cancelled, Expired] {
            assert!(!Cancelled.can_transition_to(next));
            assert!(!Expired.can_transition_to(next));
        }
    }

    #[test]
    fn every_non_terminal_state_can_be_cancelled() {
        for status in SubscriptionStatus::NON_TERMINAL {
            assert!(status.can_transition_to(Cancelled), "{status}");
        }
    }

    #[test]
    fn period_end_uses_calendar_months() {
        let start = Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap();
        assert_eq!(
            BillingCycle::Monthly.period_end(start).unwrap(),
            Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).unwrap()
        );
        assert_eq!(
            BillingCycle::Yearly.period_end(start).unwrap(),
            Utc.with_ymd_and_hms(2027, 1, 31, 12, 0, 0).unwrap()
        );
    }
}
