//! Quota enforcement against the in-memory SurrealDB ledger.

use std::sync::Arc;

use cellar_access::{QuotaDecision, QuotaGate, QuotaResource, SoftQuotaEnforcer};
use cellar_core::clock::{Clock, ManualClock};
use cellar_core::error::CellarResult;
use cellar_core::models::tenant::{CreateTenant, TenantStatus, Tier, UpdateTenant};
use cellar_core::models::usage::{BillingPeriod, UsageMetric, UsageMetricKind};
use cellar_core::repository::{TenantRepository, UsageRepository};
use cellar_core::tier::Feature;
use cellar_db::repository::{SurrealTenantRepository, SurrealUsageRepository};
use chrono::{Duration, TimeZone, Utc};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

type Enforcer = SoftQuotaEnforcer<SurrealTenantRepository<Db>, SurrealUsageRepository<Db>>;

struct Fixture {
    enforcer: Enforcer,
    tenants: SurrealTenantRepository<Db>,
    usage: SurrealUsageRepository<Db>,
    clock: Arc<ManualClock>,
}

async fn fixture() -> Fixture {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    cellar_db::run_migrations(&db).await.unwrap();

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap(),
    ));
    let tenants = SurrealTenantRepository::new(db.clone());
    let usage = SurrealUsageRepository::new(db);
    let enforcer = SoftQuotaEnforcer::new(tenants.clone(), usage.clone(), clock.clone());
    Fixture {
        enforcer,
        tenants,
        usage,
        clock,
    }
}

async fn tenant(f: &Fixture, tier: Tier) -> Uuid {
    let t = f
        .tenants
        .create(CreateTenant {
            subdomain: format!("q{}", Uuid::new_v4().simple()),
            name: "Quota".into(),
        })
        .await
        .unwrap();
    f.tenants
        .update(
            t.id,
            UpdateTenant {
                tier: Some(tier),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    t.id
}

#[tokio::test]
async fn free_tier_allows_25th_item_and_denies_26th() {
    let f = fixture().await;
    let id = tenant(&f, Tier::Free).await;

    for _ in 0..25 {
        let decision = f
            .enforcer
            .check_and_reserve(id, QuotaResource::Items, 1)
            .await
            .unwrap();
        assert_eq!(decision, QuotaDecision::Allow);
    }

    let decision = f
        .enforcer
        .check_and_reserve(id, QuotaResource::Items, 1)
        .await
        .unwrap();
    assert_eq!(
        decision,
        QuotaDecision::Deny {
            current: 25,
            limit: 25
        }
    );

    // Denials do not consume quota.
    let period = BillingPeriod::containing(f.clock.now());
    assert_eq!(
        f.usage
            .get(id, UsageMetricKind::ItemCount, period)
            .await
            .unwrap(),
        25
    );
}

#[tokio::test]
async fn unlimited_tiers_always_allow() {
    let f = fixture().await;
    let id = tenant(&f, Tier::Pro).await;

    let decision = f
        .enforcer
        .check_and_reserve(id, QuotaResource::Items, 10_000)
        .await
        .unwrap();
    assert!(decision.is_allowed());

    let id = tenant(&f, Tier::Enterprise).await;
    let decision = f
        .enforcer
        .check_and_reserve(id, QuotaResource::StorageBytes, 500 * 1024 * 1024 * 1024)
        .await
        .unwrap();
    assert!(decision.is_allowed());
}

#[tokio::test]
async fn storage_is_compared_in_whole_megabytes() {
    let f = fixture().await;
    let id = tenant(&f, Tier::Free).await;
    let mb = 1024 * 1024;

    // 100 MB exactly fits the free ceiling.
    let decision = f
        .enforcer
        .check_and_reserve(id, QuotaResource::StorageBytes, 100 * mb)
        .await
        .unwrap();
    assert!(decision.is_allowed());

    // Under a MB more still rounds down to 100.
    let decision = f
        .enforcer
        .check_and_reserve(id, QuotaResource::StorageBytes, 512 * 1024)
        .await
        .unwrap();
    assert!(decision.is_allowed());

    let decision = f
        .enforcer
        .check_and_reserve(id, QuotaResource::StorageBytes, mb)
        .await
        .unwrap();
    assert_eq!(
        decision,
        QuotaDecision::Deny {
            current: 100,
            limit: 100
        }
    );
}

#[tokio::test]
async fn release_gives_quota_back() {
    let f = fixture().await;
    let id = tenant(&f, Tier::Free).await;

    for _ in 0..25 {
        f.enforcer
            .check_and_reserve(id, QuotaResource::Items, 1)
            .await
            .unwrap();
    }
    f.enforcer.release(id, QuotaResource::Items, 1).await.unwrap();
    let decision = f
        .enforcer
        .check_and_reserve(id, QuotaResource::Items, 1)
        .await
        .unwrap();
    assert!(decision.is_allowed());

    // Releasing more than was used clamps at zero.
    f.enforcer
        .release(id, QuotaResource::Items, 1_000)
        .await
        .unwrap();
    let summary = f.enforcer.usage_summary(id).await.unwrap();
    assert_eq!(summary.items.used, 0);
}

#[tokio::test]
async fn new_month_starts_from_zero() {
    let f = fixture().await;
    let id = tenant(&f, Tier::Free).await;

    for _ in 0..25 {
        f.enforcer
            .check_and_reserve(id, QuotaResource::Items, 1)
            .await
            .unwrap();
    }
    f.clock.advance(Duration::days(30));
    let decision = f
        .enforcer
        .check_and_reserve(id, QuotaResource::Items, 1)
        .await
        .unwrap();
    assert!(decision.is_allowed());
}

#[tokio::test]
async fn suspended_tenant_gets_free_limits() {
    let f = fixture().await;
    let id = tenant(&f, Tier::Pro).await;
    f.tenants
        .update(
            id,
            UpdateTenant {
                status: Some(TenantStatus::Suspended),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let decision = f
        .enforcer
        .check_and_reserve(id, QuotaResource::Items, 26)
        .await
        .unwrap();
    assert_eq!(
        decision,
        QuotaDecision::Deny {
            current: 0,
            limit: 25
        }
    );
    assert!(
        !f.enforcer
            .feature_enabled(id, Feature::AiSuggestions)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn photos_per_item_and_features_follow_tier() {
    let f = fixture().await;
    let id = tenant(&f, Tier::Basic).await;

    assert!(
        f.enforcer
            .check_photos_per_item(id, 2, 1)
            .await
            .unwrap()
            .is_allowed()
    );
    assert_eq!(
        f.enforcer.check_photos_per_item(id, 3, 1).await.unwrap(),
        QuotaDecision::Deny {
            current: 3,
            limit: 3
        }
    );
    assert!(f.enforcer.feature_enabled(id, Feature::Export).await.unwrap());
    assert!(!f.enforcer.feature_enabled(id, Feature::ApiAccess).await.unwrap());
}

#[tokio::test]
async fn usage_summary_reports_limits() {
    let f = fixture().await;
    let id = tenant(&f, Tier::Basic).await;
    f.enforcer
        .check_and_reserve(id, QuotaResource::Items, 3)
        .await
        .unwrap();
    f.enforcer
        .check_and_reserve(id, QuotaResource::Photos, 2)
        .await
        .unwrap();
    f.enforcer
        .check_and_reserve(id, QuotaResource::StorageBytes, 5 * 1024 * 1024)
        .await
        .unwrap();

    let summary = f.enforcer.usage_summary(id).await.unwrap();
    assert_eq!(summary.tier, Tier::Basic);
    assert_eq!(summary.items.used, 3);
    assert_eq!(summary.items.limit, Some(250));
    assert_eq!(summary.photos.used, 2);
    assert_eq!(summary.storage_mb.used, 5);
    assert_eq!(summary.storage_mb.limit, Some(1024));
    assert_eq!(summary.requests_per_hour, 1_000);
}

/// Ledger whose reads wait until two readers have arrived, forcing the
/// check-then-act interleaving.
struct RacingLedger {
    inner: SurrealUsageRepository<Db>,
    barrier: tokio::sync::Barrier,
}

impl UsageRepository for RacingLedger {
    async fn get(
        &self,
        tenant_id: Uuid,
        metric: UsageMetricKind,
        period: BillingPeriod,
    ) -> CellarResult<u64> {
        let value = self.inner.get(tenant_id, metric, period).await?;
        self.barrier.wait().await;
        Ok(value)
    }
    async fn increment(
        &self,
        tenant_id: Uuid,
        metric: UsageMetricKind,
        delta: u64,
        period: BillingPeriod,
    ) -> CellarResult<u64> {
        self.inner.increment(tenant_id, metric, delta, period).await
    }
    async fn decrement(
        &self,
        tenant_id: Uuid,
        metric: UsageMetricKind,
        delta: u64,
        period: BillingPeriod,
    ) -> CellarResult<u64> {
        self.inner.decrement(tenant_id, metric, delta, period).await
    }
    async fn set(
        &self,
        tenant_id: Uuid,
        metric: UsageMetricKind,
        value: u64,
        period: BillingPeriod,
    ) -> CellarResult<u64> {
        self.inner.set(tenant_id, metric, value, period).await
    }
    async fn list_for_period(
        &self,
        tenant_id: Uuid,
        period: BillingPeriod,
    ) -> CellarResult<Vec<UsageMetric>> {
        self.inner.list_for_period(tenant_id, period).await
    }
}

#[tokio::test]
async fn concurrent_reservations_can_overshoot() {
    let f = fixture().await;
    let id = tenant(&f, Tier::Free).await;
    let period = BillingPeriod::containing(f.clock.now());
    f.usage
        .set(id, UsageMetricKind::ItemCount, 24, period)
        .await
        .unwrap();

    let racing = SoftQuotaEnforcer::new(
        f.tenants.clone(),
        RacingLedger {
            inner: f.usage.clone(),
            barrier: tokio::sync::Barrier::new(2),
        },
        f.clock.clone(),
    );

    let a = racing.check_and_reserve(id, QuotaResource::Items, 1);
    let b = racing.check_and_reserve(id, QuotaResource::Items, 1);
    let (a, b) = tokio::join!(a, b);

    // Both saw 24 and both were let through.
    assert!(a.unwrap().is_allowed());
    assert!(b.unwrap().is_allowed());
    assert_eq!(
        f.usage
            .get(id, UsageMetricKind::ItemCount, period)
            .await
            .unwrap(),
        26
    );
}

#[tokio::test]
async fn unknown_tenant_is_not_found() {
    let f = fixture().await;
    let err = f
        .enforcer
        .check_and_reserve(Uuid::new_v4(), QuotaResource::Items, 1)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        cellar_core::error::CellarError::NotFound { .. }
    ));
}
