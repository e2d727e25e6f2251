//! Shared application state.

use std::sync::Arc;

use cellar_access::{
    AccessConfig, InMemoryCounterStore, RateLimiter, SoftQuotaEnforcer, TenantDirectory,
};
use cellar_billing::{BillingConfig, BillingProvider, SubscriptionService, WebhookReceiver};
use cellar_core::Clock;
use cellar_db::repository::{
    SurrealPlanRepository, SurrealSubscriptionRepository, SurrealTenantRepository,
    SurrealUsageRepository,
};
use cellar_db::{DedicatedStoreConfig, SurrealStoreBackend, TenantConnectionRouter, TenantProvisioner};
use surrealdb::Surreal;
use surrealdb::engine::any::Any;

pub type Tenants = SurrealTenantRepository<Any>;
pub type StoreRouter = TenantConnectionRouter<SurrealStoreBackend>;
pub type Provisioner = TenantProvisioner<Tenants, SurrealStoreBackend>;
pub type Billing<P> = SubscriptionService<
    Tenants,
    SurrealSubscriptionRepository<Any>,
    SurrealPlanRepository<Any>,
    P,
    Provisioner,
>;

/// Everything a request handler needs. Generic over the billing provider
/// so the HTTP surface can run against a scripted one.
pub struct AppState<P: BillingProvider> {
    pub directory: TenantDirectory<Tenants>,
    pub router: Arc<StoreRouter>,
    pub quotas: SoftQuotaEnforcer<Tenants, SurrealUsageRepository<Any>>,
    pub counters: InMemoryCounterStore,
    pub limiter: RateLimiter<InMemoryCounterStore>,
    pub billing: Billing<P>,
    pub webhooks: WebhookReceiver,
}

impl<P: BillingProvider> AppState<P> {
    /// Wire the state over the shared store `db`.
    pub fn new(
        db: Surreal<Any>,
        access: AccessConfig,
        billing: BillingConfig,
        dedicated: DedicatedStoreConfig,
        provider: P,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tenants = SurrealTenantRepository::new(db.clone());
        let backend = SurrealStoreBackend::new(dedicated.clone());
        let router = Arc::new(TenantConnectionRouter::new(backend, db.clone()));
        let provisioner = TenantProvisioner::new(tenants.clone(), router.clone(), dedicated);
        let counters = InMemoryCounterStore::new(clock.clone());

        Self {
            directory: TenantDirectory::new(tenants.clone(), access.clone()),
            quotas: SoftQuotaEnforcer::new(
                tenants.clone(),
                SurrealUsageRepository::new(db.clone()),
                clock.clone(),
            ),
            limiter: RateLimiter::new(counters.clone(), clock.clone(), access),
            counters,
            webhooks: WebhookReceiver::new(&billing, clock.clone()),
            billing: SubscriptionService::new(
                tenants,
                SurrealSubscriptionRepository::new(db.clone()),
                SurrealPlanRepository::new(db),
                provider,
                provisioner,
                clock,
                billing,
            ),
            router,
        }
    }
}
