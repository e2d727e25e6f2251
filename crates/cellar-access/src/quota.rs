//! Tier quota enforcement against the usage ledger.

use std::sync::Arc;

use cellar_core::clock::Clock;
use cellar_core::error::{CellarError, CellarResult};
use cellar_core::models::tenant::{Tenant, Tier};
use cellar_core::models::usage::{BillingPeriod, UsageMetricKind};
use cellar_core::repository::{TenantRepository, UsageRepository};
use cellar_core::tier::{Feature, TierLimits};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// What a write consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaResource {
    /// Catalogued items, counted in units.
    Items,
    /// Photos, counted in units. Only limited per item.
    Photos,
    /// Photo storage. Deltas are in bytes; the ledger keeps KB.
    StorageBytes,
}

impl QuotaResource {
    pub fn metric(&self) -> UsageMetricKind {
        match self {
            QuotaResource::Items => UsageMetricKind::ItemCount,
            QuotaResource::Photos => UsageMetricKind::PhotoCount,
            QuotaResource::StorageBytes => UsageMetricKind::StorageKb,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaResource::Items => "items",
            QuotaResource::Photos => "photos",
            QuotaResource::StorageBytes => "storage_mb",
        }
    }

    /// Convert a caller delta into ledger units.
    fn ledger_delta(&self, delta: u64) -> u64 {
        match self {
            QuotaResource::StorageBytes => delta / 1024,
            _ => delta,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum QuotaDecision {
    Allow,
    /// `current` and `limit` are in the resource's reporting unit (MB
    /// for storage).
    Deny { current: u64, limit: u64 },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allow)
    }

    pub fn into_result(self, resource: QuotaResource) -> CellarResult<()> {
        match self {
            QuotaDecision::Allow => Ok(()),
            QuotaDecision::Deny { current, limit } => Err(CellarError::LimitExceeded {
                resource: resource.as_str().into(),
                current,
                limit,
            }),
        }
    }
}

/// The quota seam. [`SoftQuotaEnforcer`] checks then writes without a
/// transaction, so concurrent writers can overshoot a limit slightly.
pub trait QuotaGate: Send + Sync {
    /// Decide whether `delta` more of `resource` fits, recording it in
    /// the ledger when it does.
    fn check_and_reserve(
        &self,
        tenant_id: Uuid,
        resource: QuotaResource,
        delta: u64,
    ) -> impl Future<Output = CellarResult<QuotaDecision>> + Send;

    /// Give back usage (deletes, failed writes). Clamps at zero.
    fn release(
        &self,
        tenant_id: Uuid,
        resource: QuotaResource,
        delta: u64,
    ) -> impl Future<Output = CellarResult<()>> + Send;
}

/// One line of a usage summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageLine {
    pub used: u64,
    /// `None` = unlimited.
    pub limit: Option<u64>,
}

/// Current-period usage next to the tenant's limits.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub tenant_id: Uuid,
    pub tier: Tier,
    pub period: BillingPeriod,
    pub items: UsageLine,
    pub photos: UsageLine,
    pub storage_mb: UsageLine,
    pub max_photos_per_item: u64,
    pub requests_per_hour: u64,
    pub features: Vec<Feature>,
}

/// Soft (check-then-act) quota enforcement.
pub struct SoftQuotaEnforcer<T: TenantRepository, U: UsageRepository> {
    tenants: T,
    usage: U,
    clock: Arc<dyn Clock>,
}

impl<T: TenantRepository, U: UsageRepository> SoftQuotaEnforcer<T, U> {
    pub fn new(tenants: T, usage: U, clock: Arc<dyn Clock>) -> Self {
        Self {
            tenants,
            usage,
            clock,
        }
    }

    fn period(&self) -> BillingPeriod {
        BillingPeriod::containing(self.clock.now())
    }

    async fn limits_for(&self, tenant_id: Uuid) -> CellarResult<(Tenant, TierLimits)> {
        let tenant = self.tenants.get_by_id(tenant_id).await?;
        let limits = TierLimits::for_tier(tenant.effective_tier());
        Ok((tenant, limits))
    }

    /// May one more photo be attached to an item that already has
    /// `existing` photos?
    pub async fn check_photos_per_item(
        &self,
        tenant_id: Uuid,
        existing: u64,
        adding: u64,
    ) -> CellarResult<QuotaDecision> {
        let (_, limits) = self.limits_for(tenant_id).await?;
        if existing.saturating_add(adding) > limits.max_photos_per_item {
            Ok(QuotaDecision::Deny {
                current: existing,
                limit: limits.max_photos_per_item,
            })
        } else {
            Ok(QuotaDecision::Allow)
        }
    }

    pub async fn feature_enabled(&self, tenant_id: Uuid, feature: Feature) -> CellarResult<bool> {
        let (_, limits) = self.limits_for(tenant_id).await?;
        Ok(limits.has_feature(feature))
    }

    pub async fn usage_summary(&self, tenant_id: Uuid) -> CellarResult<UsageSummary> {
        let (tenant, limits) = self.limits_for(tenant_id).await?;
        let period = self.period();
        let mut items = 0;
        let mut photos = 0;
        let mut storage_kb = 0;
        for metric in self.usage.list_for_period(tenant_id, period).await? {
            match metric.metric {
                UsageMetricKind::ItemCount => items = metric.value,
                UsageMetricKind::PhotoCount => photos = metric.value,
                UsageMetricKind::StorageKb => storage_kb = metric.value,
            }
        }
        Ok(UsageSummary {
            tenant_id,
            tier: tenant.effective_tier(),
            period,
            items: UsageLine {
                used: items,
                limit: limits.max_items,
            },
            photos: UsageLine {
                used: photos,
                limit: None,
            },
            storage_mb: UsageLine {
                used: storage_kb / 1024,
                limit: limits.storage_ceiling_mb,
            },
            max_photos_per_item: limits.max_photos_per_item,
            requests_per_hour: limits.requests_per_hour,
            features: limits.features.to_vec(),
        })
    }
}

impl<T: TenantRepository, U: UsageRepository> QuotaGate for SoftQuotaEnforcer<T, U> {
    async fn check_and_reserve(
        &self,
        tenant_id: Uuid,
        resource: QuotaResource,
        delta: u64,
    ) -> CellarResult<QuotaDecision> {
        let (_, limits) = self.limits_for(tenant_id).await?;
        let period = self.period();
        let metric = resource.metric();
        let ledger_delta = resource.ledger_delta(delta);

        let limit = match resource {
            QuotaResource::Items => limits.max_items,
            QuotaResource::Photos => None,
            QuotaResource::StorageBytes => limits.storage_ceiling_mb,
        };

        if let Some(limit) = limit {
            let current = self.usage.get(tenant_id, metric, period).await?;
            let decision = match resource {
                QuotaResource::StorageBytes => {
                    let projected_mb = current.saturating_add(ledger_delta) / 1024;
                    (projected_mb > limit).then_some(QuotaDecision::Deny {
                        current: current / 1024,
                        limit,
                    })
                }
                _ => (current.saturating_add(ledger_delta) > limit)
                    .then_some(QuotaDecision::Deny { current, limit }),
            };
            if let Some(deny) = decision {
                info!(
                    tenant_id = %tenant_id,
                    resource = resource.as_str(),
                    delta,
                    limit,
                    "Quota denied"
                );
                return Ok(deny);
            }
        }

        if ledger_delta > 0 {
            self.usage
                .increment(tenant_id, metric, ledger_delta, period)
                .await?;
        }
        Ok(QuotaDecision::Allow)
    }

    async fn release(&self, tenant_id: Uuid, resource: QuotaResource, delta: u64) -> CellarResult<()> {
        let ledger_delta = resource.ledger_delta(delta);
        if ledger_delta > 0 {
            self.usage
                .decrement(tenant_id, resource.metric(), ledger_delta, self.period())
                .await?;
        }
        Ok(())
    }
}
