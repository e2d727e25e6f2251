//! Subscription lifecycle against in-memory repositories.

mod common;

use std::sync::atomic::Ordering;

use cellar_core::error::CellarError;
use cellar_core::models::subscription::{BillingCycle, SubscriptionStatus};
use cellar_core::models::tenant::{TenantStatus, Tier};
use cellar_core::repository::{SubscriptionRepository, TenantRepository};
use chrono::{TimeZone, Utc};
use common::{Harness, start};
use uuid::Uuid;

#[tokio::test]
async fn upgrade_creates_pending_subscription_with_approval_link() {
    let h = Harness::new().await;
    let tenant = h.tenant("acme").await;
    let plan = h.plan("pro", Tier::Pro).await;

    let outcome = h
        .service
        .initiate_upgrade(tenant.id, plan.id, BillingCycle::Monthly)
        .await
        .unwrap();

    assert_eq!(outcome.subscription.status, SubscriptionStatus::Pending);
    assert_eq!(outcome.subscription.external_subscription_id.as_deref(), Some("I-1"));
    assert!(outcome.approval_url.contains("P-pro-M"));

    // Tier is untouched until activation.
    let tenant = h.tenants.get_by_id(tenant.id).await.unwrap();
    assert_eq!(tenant.tier, Tier::Free);
}

#[tokio::test]
async fn upgrade_rejects_unusable_plans() {
    let h = Harness::new().await;
    let tenant = h.tenant("acme").await;

    let free = h.plan("free", Tier::Free).await;
    let err = h
        .service
        .initiate_upgrade(tenant.id, free.id, BillingCycle::Monthly)
        .await
        .unwrap_err();
    assert!(matches!(err, CellarError::Validation { .. }));

    let retired = h.plan("legacy", Tier::Basic).await;
    h.db
        .query("UPDATE type::record('plan', $id) SET active = false")
        .bind(("id", retired.id.to_string()))
        .await
        .unwrap();
    let err = h
        .service
        .initiate_upgrade(tenant.id, retired.id, BillingCycle::Yearly)
        .await
        .unwrap_err();
    assert!(matches!(err, CellarError::Validation { .. }));

    let err = h
        .service
        .initiate_upgrade(tenant.id, Uuid::new_v4(), BillingCycle::Monthly)
        .await
        .unwrap_err();
    assert!(matches!(err, CellarError::NotFound { .. }));

    let err = h
        .service
        .initiate_upgrade(Uuid::new_v4(), retired.id, BillingCycle::Monthly)
        .await
        .unwrap_err();
    assert!(matches!(err, CellarError::NotFound { .. }));
}

#[tokio::test]
async fn provider_failure_leaves_pending_record() {
    let h = Harness::new().await;
    let tenant = h.tenant("acme").await;
    let plan = h.plan("pro", Tier::Pro).await;

    h.provider.state.fail_create.store(true, Ordering::SeqCst);
    let err = h
        .service
        .initiate_upgrade(tenant.id, plan.id, BillingCycle::Monthly)
        .await
        .unwrap_err();
    assert!(matches!(err, CellarError::Provider { .. }));
    assert!(err.is_retryable());

    let current = h.subscriptions.get_current(tenant.id).await.unwrap().unwrap();
    assert_eq!(current.status, SubscriptionStatus::Pending);
    assert!(current.external_subscription_id.is_none());

    // A retry supersedes the stranded record.
    h.provider.state.fail_create.store(false, Ordering::SeqCst);
    let outcome = h
        .service
        .initiate_upgrade(tenant.id, plan.id, BillingCycle::Monthly)
        .await
        .unwrap();
    let stranded = h.subscriptions.get_by_id(current.id).await.unwrap();
    assert_eq!(stranded.status, SubscriptionStatus::Cancelled);
    assert_eq!(stranded.superseded_by, Some(outcome.subscription.id));
}

#[tokio::test]
async fn pending_upgrade_leaves_paid_subscription_in_force() {
    let h = Harness::new().await;
    let tenant = h.tenant("acme").await;
    let pro = h.plan("pro", Tier::Pro).await;
    let enterprise = h.plan("enterprise", Tier::Enterprise).await;

    h.service
        .initiate_upgrade(tenant.id, pro.id, BillingCycle::Monthly)
        .await
        .unwrap();
    let paid = h.service.activate("I-1").await.unwrap();

    let upgrade = h
        .service
        .initiate_upgrade(tenant.id, enterprise.id, BillingCycle::Monthly)
        .await
        .unwrap();
    let still_paid = h.subscriptions.get_by_id(paid.id).await.unwrap();
    assert_eq!(still_paid.status, SubscriptionStatus::Active);
    assert_eq!(
        h.service.current_subscription(tenant.id).await.unwrap().unwrap().id,
        paid.id
    );
    assert!(h.provider.cancelled().is_empty());

    h.service.activate("I-2").await.unwrap();
    let replaced = h.subscriptions.get_by_id(paid.id).await.unwrap();
    assert_eq!(replaced.status, SubscriptionStatus::Cancelled);
    assert_eq!(replaced.superseded_by, Some(upgrade.subscription.id));
    assert_eq!(h.provider.cancelled(), vec!["I-1".to_string()]);
    assert_eq!(h.tenants.get_by_id(tenant.id).await.unwrap().tier, Tier::Enterprise);
}

#[tokio::test]
async fn cancel_after_failed_upgrade_cancels_paid_remote() {
    let h = Harness::new().await;
    let tenant = h.tenant("acme").await;
    let pro = h.plan("pro", Tier::Pro).await;
    let enterprise = h.plan("enterprise", Tier::Enterprise).await;

    h.service
        .initiate_upgrade(tenant.id, pro.id, BillingCycle::Monthly)
        .await
        .unwrap();
    let paid = h.service.activate("I-1").await.unwrap();

    h.provider.state.fail_create.store(true, Ordering::SeqCst);
    h.service
        .initiate_upgrade(tenant.id, enterprise.id, BillingCycle::Monthly)
        .await
        .unwrap_err();

    let still_paid = h.subscriptions.get_by_id(paid.id).await.unwrap();
    assert_eq!(still_paid.status, SubscriptionStatus::Active);
    assert_eq!(h.tenants.get_by_id(tenant.id).await.unwrap().tier, Tier::Pro);

    let cancelled = h.service.cancel(tenant.id, None).await.unwrap().unwrap();
    assert_eq!(cancelled.id, paid.id);
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    assert_eq!(h.provider.cancelled(), vec!["I-1".to_string()]);

    let history = h.subscriptions.list_by_tenant(tenant.id).await.unwrap();
    assert!(history.iter().all(|s| s.status.is_terminal()));
    assert_eq!(h.tenants.get_by_id(tenant.id).await.unwrap().tier, Tier::Free);
}

#[tokio::test]
async fn activation_promotes_tier_and_sets_period() {
    let h = Harness::new().await;
    let tenant = h.tenant("acme").await;
    let plan = h.plan("pro", Tier::Pro).await;
    let next = Utc.with_ymd_and_hms(2026, 4, 10, 9, 0, 0).unwrap();
    *h.provider.state.next_billing.lock().unwrap() = Some(next);

    let outcome = h
        .service
        .initiate_upgrade(tenant.id, plan.id, BillingCycle::Yearly)
        .await
        .unwrap();
    let active = h.service.activate("I-1").await.unwrap();

    assert_eq!(active.id, outcome.subscription.id);
    assert_eq!(active.status, SubscriptionStatus::Active);
    assert_eq!(active.current_period_start, Some(start()));
    assert_eq!(
        active.current_period_end,
        Some(Utc.with_ymd_and_hms(2027, 3, 10, 9, 0, 0).unwrap())
    );
    assert_eq!(active.next_billing_date, Some(next));

    let tenant = h.tenants.get_by_id(tenant.id).await.unwrap();
    assert_eq!(tenant.tier, Tier::Pro);
    assert_eq!(tenant.status, TenantStatus::Active);
    assert!(tenant.dedicated_store.is_none());
}

#[tokio::test]
async fn activation_requires_remote_approval() {
    let h = Harness::new().await;
    let tenant = h.tenant("acme").await;
    let plan = h.plan("pro", Tier::Pro).await;

    h.service
        .initiate_upgrade(tenant.id, plan.id, BillingCycle::Monthly)
        .await
        .unwrap();
    h.provider.set_status("I-1", "APPROVAL_PENDING");

    let err = h.service.activate("I-1").await.unwrap_err();
    assert!(matches!(err, CellarError::Validation { .. }));
    let tenant = h.tenants.get_by_id(tenant.id).await.unwrap();
    assert_eq!(tenant.tier, Tier::Free);
}

#[tokio::test]
async fn reactivating_is_a_no_op() {
    let h = Harness::new().await;
    let tenant = h.tenant("acme").await;
    let plan = h.plan("pro", Tier::Pro).await;

    h.service
        .initiate_upgrade(tenant.id, plan.id, BillingCycle::Monthly)
        .await
        .unwrap();
    let first = h.service.activate("I-1").await.unwrap();
    let gets = h.provider.state.gets.load(Ordering::SeqCst);

    let second = h.service.activate("I-1").await.unwrap();
    assert_eq!(second.status, SubscriptionStatus::Active);
    assert_eq!(second.updated_at, first.updated_at);
    assert_eq!(h.provider.state.gets.load(Ordering::SeqCst), gets);
}

#[tokio::test]
async fn enterprise_activation_provisions_and_downgrade_decommissions() {
    let h = Harness::new().await;
    let tenant = h.tenant("bigco").await;
    let enterprise = h.plan("enterprise", Tier::Enterprise).await;
    let pro = h.plan("pro", Tier::Pro).await;

    h.service
        .initiate_upgrade(tenant.id, enterprise.id, BillingCycle::Monthly)
        .await
        .unwrap();
    h.service.activate("I-1").await.unwrap();
    assert_eq!(h.provisioning.provisions(), 1);
    let stored = h.tenants.get_by_id(tenant.id).await.unwrap();
    assert!(stored.dedicated_store.is_some());

    // Moving down to pro replaces the enterprise subscription.
    h.service
        .initiate_upgrade(tenant.id, pro.id, BillingCycle::Monthly)
        .await
        .unwrap();
    h.service.activate("I-2").await.unwrap();

    assert_eq!(h.provisioning.decommissions(), 1);
    let stored = h.tenants.get_by_id(tenant.id).await.unwrap();
    assert_eq!(stored.tier, Tier::Pro);
    assert!(stored.dedicated_store.is_none());
    assert_eq!(h.provider.cancelled(), vec!["I-1".to_string()]);
}

#[tokio::test]
async fn failed_provisioning_is_retried_by_reactivation() {
    let h = Harness::new().await;
    let tenant = h.tenant("bigco").await;
    let plan = h.plan("enterprise", Tier::Enterprise).await;

    h.service
        .initiate_upgrade(tenant.id, plan.id, BillingCycle::Monthly)
        .await
        .unwrap();
    h.provisioning
        .fail_next_provision
        .store(true, Ordering::SeqCst);

    let err = h.service.activate("I-1").await.unwrap_err();
    assert!(matches!(err, CellarError::Internal(_)));
    let stored = h.tenants.get_by_id(tenant.id).await.unwrap();
    assert_eq!(stored.tier, Tier::Enterprise);
    assert!(stored.dedicated_store.is_none());

    let active = h.service.activate("I-1").await.unwrap();
    assert_eq!(active.status, SubscriptionStatus::Active);
    assert!(h.tenants.get_by_id(tenant.id).await.unwrap().dedicated_store.is_some());
    assert_eq!(h.provisioning.provisions(), 1);
}

#[tokio::test]
async fn activation_cancels_whole_superseded_chain_remotely() {
    let h = Harness::new().await;
    let tenant = h.tenant("acme").await;
    let basic = h.plan("basic", Tier::Basic).await;
    let pro = h.plan("pro", Tier::Pro).await;

    h.service
        .initiate_upgrade(tenant.id, basic.id, BillingCycle::Monthly)
        .await
        .unwrap();
    h.service.activate("I-1").await.unwrap();
    // Abandoned attempt, then a completed one.
    h.service
        .initiate_upgrade(tenant.id, pro.id, BillingCycle::Monthly)
        .await
        .unwrap();
    h.service
        .initiate_upgrade(tenant.id, pro.id, BillingCycle::Yearly)
        .await
        .unwrap();
    h.service.activate("I-3").await.unwrap();

    let mut cancelled = h.provider.cancelled();
    cancelled.sort();
    assert_eq!(cancelled, vec!["I-1".to_string(), "I-2".to_string()]);
}

#[tokio::test]
async fn remote_cancel_failure_does_not_block_activation() {
    let h = Harness::new().await;
    let tenant = h.tenant("acme").await;
    let basic = h.plan("basic", Tier::Basic).await;
    let pro = h.plan("pro", Tier::Pro).await;

    h.service
        .initiate_upgrade(tenant.id, basic.id, BillingCycle::Monthly)
        .await
        .unwrap();
    h.service.activate("I-1").await.unwrap();
    h.service
        .initiate_upgrade(tenant.id, pro.id, BillingCycle::Monthly)
        .await
        .unwrap();

    h.provider.state.fail_cancel.store(true, Ordering::SeqCst);
    let active = h.service.activate("I-2").await.unwrap();
    assert_eq!(active.status, SubscriptionStatus::Active);
    assert_eq!(h.tenants.get_by_id(tenant.id).await.unwrap().tier, Tier::Pro);
}

#[tokio::test]
async fn cancel_downgrades_immediately_and_second_cancel_is_no_op() {
    let h = Harness::new().await;
    let tenant = h.tenant("acme").await;
    let plan = h.plan("enterprise", Tier::Enterprise).await;

    h.service
        .initiate_upgrade(tenant.id, plan.id, BillingCycle::Monthly)
        .await
        .unwrap();
    h.service.activate("I-1").await.unwrap();

    let cancelled = h
        .service
        .cancel(tenant.id, Some("too expensive".into()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    assert_eq!(cancelled.cancelled_at, Some(start()));
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("too expensive"));
    assert_eq!(h.provider.cancelled(), vec!["I-1".to_string()]);

    let stored = h.tenants.get_by_id(tenant.id).await.unwrap();
    assert_eq!(stored.tier, Tier::Free);
    assert!(stored.dedicated_store.is_none());
    assert_eq!(h.provisioning.decommissions(), 1);

    assert!(h.service.cancel(tenant.id, None).await.unwrap().is_none());
    assert!(h.service.current_subscription(tenant.id).await.unwrap().is_none());
}

#[tokio::test]
async fn cancel_proceeds_when_provider_is_down() {
    let h = Harness::new().await;
    let tenant = h.tenant("acme").await;
    let plan = h.plan("pro", Tier::Pro).await;

    h.service
        .initiate_upgrade(tenant.id, plan.id, BillingCycle::Monthly)
        .await
        .unwrap();
    h.service.activate("I-1").await.unwrap();
    h.provider.state.fail_cancel.store(true, Ordering::SeqCst);

    let cancelled = h.service.cancel(tenant.id, None).await.unwrap().unwrap();
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    assert_eq!(h.tenants.get_by_id(tenant.id).await.unwrap().tier, Tier::Free);
}

#[tokio::test]
async fn cancel_without_subscription_returns_none() {
    let h = Harness::new().await;
    let tenant = h.tenant("acme").await;
    assert!(h.service.cancel(tenant.id, None).await.unwrap().is_none());
}

#[tokio::test]
async fn cancelled_subscription_cannot_be_activated() {
    let h = Harness::new().await;
    let tenant = h.tenant("acme").await;
    let plan = h.plan("pro", Tier::Pro).await;

    h.service
        .initiate_upgrade(tenant.id, plan.id, BillingCycle::Monthly)
        .await
        .unwrap();
    h.service.cancel(tenant.id, None).await.unwrap();

    let err = h.service.activate("I-1").await.unwrap_err();
    assert!(matches!(err, CellarError::Validation { .. }));
    assert_eq!(h.tenants.get_by_id(tenant.id).await.unwrap().tier, Tier::Free);
}

#[tokio::test]
async fn list_plans_returns_active_catalog() {
    let h = Harness::new().await;
    h.plan("basic", Tier::Basic).await;
    h.plan("pro", Tier::Pro).await;
    let plans = h.service.list_plans().await.unwrap();
    assert_eq!(plans.len(), 2);
}
