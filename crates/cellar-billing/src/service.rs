//! Subscription lifecycle: upgrade, activation, cancellation and the
//! provider-driven transitions delivered by webhooks.
//!
//! This is the only place a tenant's tier is promoted. Every mutation of a
//! tenant's subscription state runs under that tenant's lifecycle lock, so
//! an upgrade racing a webhook cannot interleave its read and write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cellar_core::Clock;
use cellar_core::error::{CellarError, CellarResult};
use cellar_core::models::plan::Plan;
use cellar_core::models::subscription::{
    BillingCycle, CreateSubscription, Subscription, SubscriptionStatus, SubscriptionUpdate,
};
use cellar_core::models::tenant::{TenantStatus, Tier, UpdateTenant};
use cellar_core::models::webhook::{WebhookEvent, WebhookEventKind};
use cellar_core::repository::{
    PlanRepository, StoreProvisioning, SubscriptionRepository, TenantRepository,
};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::provider::{BillingProvider, CreateRemoteSubscription};
use crate::webhook::{WebhookHandler, WebhookOutcome};

/// Result of [`SubscriptionService::initiate_upgrade`].
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeOutcome {
    pub subscription: Subscription,
    /// Send the customer here to approve the payment.
    pub approval_url: String,
}

/// Subscription lifecycle manager.
///
/// Generic over the repositories, the billing provider and the store
/// provisioner so it can run against mocks and in-memory stores.
pub struct SubscriptionService<T, S, P, B, V> {
    tenants: T,
    subscriptions: S,
    plans: P,
    provider: B,
    provisioning: V,
    clock: Arc<dyn Clock>,
    config: BillingConfig,
    tenant_locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl<T, S, P, B, V> SubscriptionService<T, S, P, B, V>
where
    T: TenantRepository,
    S: SubscriptionRepository,
    P: PlanRepository,
    B: BillingProvider,
    V: StoreProvisioning,
{
    pub fn new(
        tenants: T,
        subscriptions: S,
        plans: P,
        provider: B,
        provisioning: V,
        clock: Arc<dyn Clock>,
        config: BillingConfig,
    ) -> Self {
        Self {
            tenants,
            subscriptions,
            plans,
            provider,
            provisioning,
            clock,
            config,
            tenant_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_tenant(&self, tenant_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.tenant_locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(tenant_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// The tenant's non-terminal subscription. `None` means free tier.
    pub async fn current_subscription(&self, tenant_id: Uuid) -> CellarResult<Option<Subscription>> {
        self.subscriptions.get_current(tenant_id).await
    }

    pub async fn list_plans(&self) -> CellarResult<Vec<Plan>> {
        self.plans.list_active().await
    }

    /// Start a paid subscription: record it as `pending`, open the remote
    /// subscription and return the approval URL. A subscription already in
    /// force keeps running until the new one is activated.
    ///
    /// If the provider call fails the local record stays `pending`; the
    /// next attempt supersedes it.
    pub async fn initiate_upgrade(
        &self,
        tenant_id: Uuid,
        plan_id: Uuid,
        cycle: BillingCycle,
    ) -> CellarResult<UpgradeOutcome> {
        let tenant = self.tenants.get_by_id(tenant_id).await?;
        let plan = self.plans.get_by_id(plan_id).await?;

        if !plan.active {
            return Err(CellarError::validation(format!(
                "plan {} is no longer offered",
                plan.name
            )));
        }
        if !plan.tier.is_paid() {
            return Err(CellarError::validation(format!(
                "plan {} is not a paid plan",
                plan.name
            )));
        }
        let provider_plan_id = plan
            .provider_plan_id(cycle)
            .ok_or_else(|| {
                CellarError::validation(format!("plan {} has no {cycle} option", plan.name))
            })?
            .to_owned();

        let _guard = self.lock_tenant(tenant.id).await;

        let pending = self
            .subscriptions
            .create(CreateSubscription {
                tenant_id: tenant.id,
                plan_id: plan.id,
                billing_cycle: cycle,
            })
            .await?;

        let created = match self
            .provider
            .create_subscription(CreateRemoteSubscription {
                provider_plan_id,
                custom_id: pending.id.to_string(),
                return_url: self.config.return_url.clone(),
                cancel_url: self.config.cancel_url.clone(),
                brand_name: self.config.brand_name.clone(),
            })
            .await
        {
            Ok(created) => created,
            Err(e) => {
                warn!(
                    tenant_id = %tenant.id,
                    subscription_id = %pending.id,
                    error = %e,
                    "Provider refused new subscription; local record left pending"
                );
                return Err(e.into());
            }
        };

        let subscription = self
            .subscriptions
            .set_external_id(pending.id, &created.id)
            .await?;

        info!(
            tenant_id = %tenant.id,
            subscription_id = %subscription.id,
            external_id = %created.id,
            plan = %plan.name,
            cycle = %cycle,
            "Upgrade initiated"
        );

        Ok(UpgradeOutcome {
            subscription,
            approval_url: created.approval_url,
        })
    }

    /// Activate the subscription the provider knows as `external_id` once
    /// the customer has approved it, promoting the tenant to the plan's
    /// tier. Activating an already active subscription changes nothing
    /// beyond retrying the dedicated store reconciliation.
    pub async fn activate(&self, external_id: &str) -> CellarResult<Subscription> {
        let (subscription, _) = self.activate_inner(external_id).await?;
        Ok(subscription)
    }

    /// [`Self::activate`], restricted to subscriptions owned by `tenant_id`.
    /// Anyone else's subscription is reported as not found.
    pub async fn activate_for_tenant(
        &self,
        tenant_id: Uuid,
        external_id: &str,
    ) -> CellarResult<Subscription> {
        let found = self.subscriptions.get_by_external_id(external_id).await?;
        if found.tenant_id != tenant_id {
            return Err(CellarError::not_found("subscription", external_id));
        }
        self.activate(external_id).await
    }

    /// Returns the subscription and whether this call changed it.
    async fn activate_inner(&self, external_id: &str) -> CellarResult<(Subscription, bool)> {
        let found = self.subscriptions.get_by_external_id(external_id).await?;
        let _guard = self.lock_tenant(found.tenant_id).await;
        let subscription = self.subscriptions.get_by_id(found.id).await?;

        if subscription.status == SubscriptionStatus::Active {
            self.reconcile_store(subscription.tenant_id).await?;
            return Ok((subscription, false));
        }
        if !subscription.status.can_transition_to(SubscriptionStatus::Active) {
            return Err(CellarError::validation(format!(
                "subscription {} is {} and cannot be activated",
                subscription.id, subscription.status
            )));
        }

        let remote = self.provider.get_subscription(external_id).await?;
        if !remote.is_active() {
            return Err(CellarError::validation(format!(
                "provider reports subscription {external_id} as {}",
                remote.status
            )));
        }

        let plan = self.plans.get_by_id(subscription.plan_id).await?;
        let start = remote.start_time.unwrap_or_else(|| self.clock.now());
        let end = subscription.billing_cycle.period_end(start)?;

        let activated = self
            .subscriptions
            .update(
                subscription.id,
                SubscriptionUpdate {
                    status: Some(SubscriptionStatus::Active),
                    current_period_start: Some(start),
                    current_period_end: Some(end),
                    next_billing_date: Some(remote.next_billing_time.unwrap_or(end)),
                    ..Default::default()
                },
            )
            .await?;
        let replaced = self
            .subscriptions
            .supersede_open(subscription.tenant_id, activated.id)
            .await?;

        self.tenants
            .update(
                subscription.tenant_id,
                UpdateTenant {
                    tier: Some(plan.tier),
                    status: Some(TenantStatus::Active),
                    ..Default::default()
                },
            )
            .await?;

        info!(
            tenant_id = %subscription.tenant_id,
            subscription_id = %subscription.id,
            tier = %plan.tier,
            period_end = %end,
            replaced = replaced.len(),
            "Subscription activated"
        );

        self.cancel_superseded_remotes(&activated).await;
        self.reconcile_store(subscription.tenant_id).await?;

        Ok((activated, true))
    }

    /// Cancel the tenant's subscriptions and drop it to the free tier
    /// immediately. Every open record goes, including a paid one still in
    /// force behind a pending upgrade. Returns the record that was current,
    /// or `None` when there was nothing to cancel.
    pub async fn cancel(
        &self,
        tenant_id: Uuid,
        reason: Option<String>,
    ) -> CellarResult<Option<Subscription>> {
        let _guard = self.lock_tenant(tenant_id).await;

        let Some(current) = self.subscriptions.get_current(tenant_id).await? else {
            return Ok(None);
        };
        let reason = reason.unwrap_or_else(|| "cancelled by customer".to_owned());

        let open: Vec<Subscription> = self
            .subscriptions
            .list_by_tenant(tenant_id)
            .await?
            .into_iter()
            .filter(|s| !s.status.is_terminal())
            .collect();

        let mut cancelled_current = None;
        for subscription in open {
            if let Some(external_id) = subscription.external_subscription_id.as_deref() {
                if let Err(e) = self.provider.cancel_subscription(external_id, &reason).await {
                    warn!(
                        tenant_id = %tenant_id,
                        external_id = %external_id,
                        error = %e,
                        "Remote cancellation failed; cancelling locally"
                    );
                }
            }
            let cancelled = self.record_cancelled(&subscription, reason.clone()).await?;
            if cancelled.id == current.id {
                cancelled_current = Some(cancelled);
            }
        }
        self.downgrade_to_free(tenant_id).await?;

        info!(tenant_id = %tenant_id, subscription_id = %current.id, "Subscription cancelled");
        Ok(cancelled_current)
    }

    /// Cancel one record, then downgrade the tenant unless another paid
    /// subscription is still in force.
    async fn mark_cancelled(
        &self,
        subscription: &Subscription,
        reason: String,
    ) -> CellarResult<Subscription> {
        let cancelled = self.record_cancelled(subscription, reason).await?;
        self.settle_after_close(subscription.tenant_id).await?;
        Ok(cancelled)
    }

    async fn record_cancelled(
        &self,
        subscription: &Subscription,
        reason: String,
    ) -> CellarResult<Subscription> {
        self.subscriptions
            .update(
                subscription.id,
                SubscriptionUpdate {
                    status: Some(SubscriptionStatus::Cancelled),
                    cancelled_at: Some(self.clock.now()),
                    cancellation_reason: Some(reason),
                    ..Default::default()
                },
            )
            .await
    }

    async fn settle_after_close(&self, tenant_id: Uuid) -> CellarResult<()> {
        let still_paid = self
            .subscriptions
            .list_by_tenant(tenant_id)
            .await?
            .iter()
            .any(|s| !s.status.is_terminal() && s.status != SubscriptionStatus::Pending);
        if still_paid {
            return Ok(());
        }
        self.downgrade_to_free(tenant_id).await
    }

    async fn downgrade_to_free(&self, tenant_id: Uuid) -> CellarResult<()> {
        self.tenants
            .update(
                tenant_id,
                UpdateTenant {
                    tier: Some(Tier::Free),
                    status: Some(TenantStatus::Active),
                    ..Default::default()
                },
            )
            .await?;
        self.reconcile_store(tenant_id).await
    }

    /// Bring the tenant's dedicated store in line with its tier: provision
    /// one when the tier needs it and none exists, decommission it when
    /// the tier no longer does.
    async fn reconcile_store(&self, tenant_id: Uuid) -> CellarResult<()> {
        let tenant = self.tenants.get_by_id(tenant_id).await?;
        let wants_store = tenant.tier.has_dedicated_store();

        match (&tenant.dedicated_store, wants_store) {
            (None, true) => {
                let descriptor = self.provisioning.provision(tenant_id).await?;
                info!(tenant_id = %tenant_id, store = %descriptor.store_id(), "Dedicated store provisioned");
            }
            (Some(_), false) => {
                self.provisioning.decommission(tenant_id).await?;
                info!(tenant_id = %tenant_id, "Dedicated store decommissioned");
            }
            _ => {}
        }
        Ok(())
    }

    /// Cancel, at the provider, every subscription this one replaced,
    /// following the chain back through earlier replacements. Failures are
    /// logged and skipped.
    async fn cancel_superseded_remotes(&self, subscription: &Subscription) {
        let mut pending = vec![subscription.id];
        while let Some(id) = pending.pop() {
            let replaced = match self.subscriptions.list_superseded_by(id).await {
                Ok(replaced) => replaced,
                Err(e) => {
                    warn!(subscription_id = %id, error = %e, "Could not list superseded subscriptions");
                    continue;
                }
            };
            for old in replaced {
                pending.push(old.id);
                let Some(external_id) = old.external_subscription_id.as_deref() else {
                    continue;
                };
                if Some(external_id) == subscription.external_subscription_id.as_deref() {
                    continue;
                }
                if let Err(e) = self
                    .provider
                    .cancel_subscription(external_id, "replaced by a new subscription")
                    .await
                {
                    warn!(
                        tenant_id = %subscription.tenant_id,
                        external_id = %external_id,
                        error = %e,
                        "Could not cancel superseded remote subscription"
                    );
                }
            }
        }
    }

    async fn apply_updated(
        &self,
        subscription: Subscription,
        external_id: &str,
    ) -> CellarResult<WebhookOutcome> {
        let remote = self.provider.get_subscription(external_id).await?;

        let mut update = SubscriptionUpdate::default();
        if remote.next_billing_time.is_some()
            && remote.next_billing_time != subscription.next_billing_date
        {
            update.next_billing_date = remote.next_billing_time;
        }
        if subscription.status == SubscriptionStatus::PastDue && remote.is_active() {
            update.status = Some(SubscriptionStatus::Active);
        }

        if update.next_billing_date.is_none() && update.status.is_none() {
            return Ok(WebhookOutcome::AlreadyApplied);
        }
        self.subscriptions.update(subscription.id, update).await?;
        info!(subscription_id = %subscription.id, "Subscription refreshed from provider");
        Ok(WebhookOutcome::Applied)
    }

    async fn apply_cancelled(&self, subscription: Subscription) -> CellarResult<WebhookOutcome> {
        match subscription.status {
            SubscriptionStatus::Cancelled => Ok(WebhookOutcome::AlreadyApplied),
            SubscriptionStatus::Expired => Ok(WebhookOutcome::Ignored(
                "subscription already expired".into(),
            )),
            _ => {
                self.mark_cancelled(&subscription, "cancelled at provider".into())
                    .await?;
                info!(subscription_id = %subscription.id, "Subscription cancelled by provider");
                Ok(WebhookOutcome::Applied)
            }
        }
    }

    async fn apply_suspended(&self, subscription: Subscription) -> CellarResult<WebhookOutcome> {
        if subscription.status == SubscriptionStatus::Suspended {
            return Ok(WebhookOutcome::AlreadyApplied);
        }
        if !subscription
            .status
            .can_transition_to(SubscriptionStatus::Suspended)
        {
            return Ok(WebhookOutcome::Ignored(format!(
                "cannot suspend a {} subscription",
                subscription.status
            )));
        }

        self.subscriptions
            .update(
                subscription.id,
                SubscriptionUpdate {
                    status: Some(SubscriptionStatus::Suspended),
                    ..Default::default()
                },
            )
            .await?;
        self.tenants
            .update(
                subscription.tenant_id,
                UpdateTenant {
                    status: Some(TenantStatus::Suspended),
                    ..Default::default()
                },
            )
            .await?;
        warn!(
            tenant_id = %subscription.tenant_id,
            subscription_id = %subscription.id,
            "Subscription suspended by provider"
        );
        Ok(WebhookOutcome::Applied)
    }

    async fn apply_expired(&self, subscription: Subscription) -> CellarResult<WebhookOutcome> {
        match subscription.status {
            SubscriptionStatus::Expired => return Ok(WebhookOutcome::AlreadyApplied),
            SubscriptionStatus::Pending => {
                return Ok(WebhookOutcome::Ignored("expired before activation".into()));
            }
            status if !status.can_transition_to(SubscriptionStatus::Expired) => {
                return Ok(WebhookOutcome::Ignored(format!(
                    "cannot expire a {status} subscription"
                )));
            }
            _ => {}
        }

        self.subscriptions
            .update(
                subscription.id,
                SubscriptionUpdate {
                    status: Some(SubscriptionStatus::Expired),
                    ..Default::default()
                },
            )
            .await?;
        self.settle_after_close(subscription.tenant_id).await?;
        info!(subscription_id = %subscription.id, "Subscription expired");
        Ok(WebhookOutcome::Applied)
    }
}

impl<T, S, P, B, V> WebhookHandler for SubscriptionService<T, S, P, B, V>
where
    T: TenantRepository,
    S: SubscriptionRepository,
    P: PlanRepository,
    B: BillingProvider,
    V: StoreProvisioning,
{
    async fn handle_webhook(&self, event: &WebhookEvent) -> CellarResult<WebhookOutcome> {
        let Some(kind) = WebhookEventKind::parse(&event.event_type) else {
            info!(event_id = %event.id, event_type = %event.event_type, "Ignoring unhandled webhook");
            return Ok(WebhookOutcome::Ignored(format!(
                "unhandled event type {}",
                event.event_type
            )));
        };

        if kind == WebhookEventKind::PaymentCompleted {
            let amount = event.resource.amount.as_ref();
            info!(
                event_id = %event.id,
                sale_id = %event.resource.id,
                subscription = event.resource.billing_agreement_id.as_deref().unwrap_or("-"),
                amount = amount.map(|a| a.total.as_str()).unwrap_or("-"),
                currency = amount.map(|a| a.currency.as_str()).unwrap_or("-"),
                "Payment completed"
            );
            return Ok(WebhookOutcome::Ignored("payment events are informational".into()));
        }

        let found = match self.subscriptions.get_by_external_id(&event.resource.id).await {
            Ok(found) => found,
            Err(CellarError::NotFound { .. }) => {
                warn!(event_id = %event.id, external_id = %event.resource.id, "Webhook for unknown subscription");
                return Ok(WebhookOutcome::Ignored("unknown subscription".into()));
            }
            Err(e) => return Err(e),
        };

        if kind == WebhookEventKind::SubscriptionActivated {
            // `activate` takes the tenant lock itself. An already active
            // record still goes through it so a failed store provisioning
            // is retried on redelivery.
            return match found.status {
                status if status.is_terminal() => Ok(WebhookOutcome::Ignored(format!(
                    "subscription is {status}"
                ))),
                _ => {
                    let (_, changed) = self.activate_inner(&event.resource.id).await?;
                    Ok(if changed {
                        WebhookOutcome::Applied
                    } else {
                        WebhookOutcome::AlreadyApplied
                    })
                }
            };
        }

        let _guard = self.lock_tenant(found.tenant_id).await;
        let subscription = self.subscriptions.get_by_id(found.id).await?;

        match kind {
            WebhookEventKind::SubscriptionUpdated => {
                if subscription.status.is_terminal() {
                    return Ok(WebhookOutcome::Ignored(format!(
                        "subscription is {}",
                        subscription.status
                    )));
                }
                self.apply_updated(subscription, &event.resource.id).await
            }
            WebhookEventKind::SubscriptionCancelled => self.apply_cancelled(subscription).await,
            WebhookEventKind::SubscriptionSuspended => self.apply_suspended(subscription).await,
            WebhookEventKind::SubscriptionExpired => self.apply_expired(subscription).await,
            WebhookEventKind::SubscriptionActivated | WebhookEventKind::PaymentCompleted => {
                Ok(WebhookOutcome::AlreadyApplied)
            }
        }
    }
}
