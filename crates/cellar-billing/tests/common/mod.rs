//! Shared fixtures: in-memory repositories, a scripted provider and a
//! provisioner that only records descriptors.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cellar_billing::{
    BillingConfig, BillingError, BillingProvider, CreateRemoteSubscription, CreatedSubscription,
    RemoteSubscription, SubscriptionService,
};
use cellar_core::error::{CellarError, CellarResult};
use cellar_core::models::plan::{CreatePlan, Plan};
use cellar_core::models::store::StoreDescriptor;
use cellar_core::models::tenant::{CreateTenant, Tenant, Tier};
use cellar_core::repository::{PlanRepository, StoreProvisioning, TenantRepository};
use cellar_core::{Clock, ManualClock};
use cellar_db::repository::{
    SurrealPlanRepository, SurrealSubscriptionRepository, SurrealTenantRepository,
};
use chrono::{DateTime, TimeZone, Utc};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
}

#[derive(Default)]
pub struct ProviderState {
    pub created: AtomicUsize,
    pub gets: AtomicUsize,
    pub fail_create: AtomicBool,
    pub fail_cancel: AtomicBool,
    /// Remote status per external ID; unknown IDs report `ACTIVE`.
    pub statuses: Mutex<HashMap<String, String>>,
    pub next_billing: Mutex<Option<DateTime<Utc>>>,
    pub cancelled: Mutex<Vec<String>>,
}

#[derive(Clone, Default)]
pub struct MockProvider {
    pub state: Arc<ProviderState>,
}

impl MockProvider {
    pub fn set_status(&self, external_id: &str, status: &str) {
        self.state
            .statuses
            .lock()
            .unwrap()
            .insert(external_id.to_owned(), status.to_owned());
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state.cancelled.lock().unwrap().clone()
    }
}

impl BillingProvider for MockProvider {
    async fn create_subscription(
        &self,
        request: CreateRemoteSubscription,
    ) -> Result<CreatedSubscription, BillingError> {
        if self.state.fail_create.load(Ordering::SeqCst) {
            return Err(BillingError::Timeout);
        }
        let n = self.state.created.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("I-{n}");
        Ok(CreatedSubscription {
            approval_url: format!("https://approve.test/{id}?plan={}", request.provider_plan_id),
            status: "APPROVAL_PENDING".into(),
            id,
        })
    }

    async fn get_subscription(&self, external_id: &str) -> Result<RemoteSubscription, BillingError> {
        self.state.gets.fetch_add(1, Ordering::SeqCst);
        let status = self
            .state
            .statuses
            .lock()
            .unwrap()
            .get(external_id)
            .cloned()
            .unwrap_or_else(|| "ACTIVE".into());
        Ok(RemoteSubscription {
            id: external_id.to_owned(),
            status,
            plan_id: None,
            start_time: Some(start()),
            next_billing_time: *self.state.next_billing.lock().unwrap(),
        })
    }

    async fn cancel_subscription(&self, external_id: &str, _reason: &str) -> Result<(), BillingError> {
        if self.state.fail_cancel.load(Ordering::SeqCst) {
            return Err(BillingError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        self.state.cancelled.lock().unwrap().push(external_id.to_owned());
        Ok(())
    }
}

/// Records descriptors on the tenant without creating any store.
#[derive(Clone)]
pub struct MockProvisioning {
    tenants: SurrealTenantRepository<Db>,
    pub provisions: Arc<AtomicUsize>,
    pub decommissions: Arc<AtomicUsize>,
    /// When set, the next `provision` fails and clears the flag.
    pub fail_next_provision: Arc<AtomicBool>,
}

impl MockProvisioning {
    pub fn provisions(&self) -> usize {
        self.provisions.load(Ordering::SeqCst)
    }

    pub fn decommissions(&self) -> usize {
        self.decommissions.load(Ordering::SeqCst)
    }
}

impl StoreProvisioning for MockProvisioning {
    async fn provision(&self, tenant_id: Uuid) -> CellarResult<StoreDescriptor> {
        if self.fail_next_provision.swap(false, Ordering::SeqCst) {
            return Err(CellarError::Internal("store create failed".into()));
        }
        let descriptor = StoreDescriptor {
            url: "mem://".into(),
            namespace: "dedicated".into(),
            database: format!("tenant_{}", tenant_id.simple()),
        };
        self.tenants
            .attach_dedicated_store(tenant_id, descriptor.clone())
            .await?;
        self.provisions.fetch_add(1, Ordering::SeqCst);
        Ok(descriptor)
    }

    async fn decommission(&self, tenant_id: Uuid) -> CellarResult<()> {
        let tenant = self.tenants.get_by_id(tenant_id).await?;
        if tenant.dedicated_store.is_some() {
            self.tenants.detach_dedicated_store(tenant_id).await?;
            self.decommissions.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub type Service = SubscriptionService<
    SurrealTenantRepository<Db>,
    SurrealSubscriptionRepository<Db>,
    SurrealPlanRepository<Db>,
    MockProvider,
    MockProvisioning,
>;

pub struct Harness {
    pub db: Surreal<Db>,
    pub service: Service,
    pub provider: MockProvider,
    pub provisioning: MockProvisioning,
    pub clock: Arc<ManualClock>,
    pub tenants: SurrealTenantRepository<Db>,
    pub subscriptions: SurrealSubscriptionRepository<Db>,
    pub plans: SurrealPlanRepository<Db>,
}

impl Harness {
    pub async fn new() -> Self {
        let db = Surreal::new::<Mem>(()).await.unwrap();
        db.use_ns("test").use_db("test").await.unwrap();
        cellar_db::run_migrations(&db).await.unwrap();

        let tenants = SurrealTenantRepository::new(db.clone());
        let subscriptions = SurrealSubscriptionRepository::new(db.clone());
        let plans = SurrealPlanRepository::new(db.clone());
        let provider = MockProvider::default();
        let provisioning = MockProvisioning {
            tenants: tenants.clone(),
            provisions: Arc::default(),
            decommissions: Arc::default(),
            fail_next_provision: Arc::default(),
        };
        let clock = Arc::new(ManualClock::new(start()));
        let shared_clock: Arc<dyn Clock> = clock.clone();

        let service = SubscriptionService::new(
            tenants.clone(),
            subscriptions.clone(),
            plans.clone(),
            provider.clone(),
            provisioning.clone(),
            shared_clock,
            BillingConfig::default(),
        );

        Self {
            db,
            service,
            provider,
            provisioning,
            clock,
            tenants,
            subscriptions,
            plans,
        }
    }

    pub async fn tenant(&self, subdomain: &str) -> Tenant {
        self.tenants
            .create(CreateTenant {
                subdomain: subdomain.into(),
                name: subdomain.to_uppercase(),
            })
            .await
            .unwrap()
    }

    pub async fn plan(&self, name: &str, tier: Tier) -> Plan {
        self.plans
            .create(CreatePlan {
                name: name.into(),
                tier,
                monthly_price_cents: 999,
                yearly_price_cents: 9_990,
                currency: "usd".into(),
                provider_plan_monthly: Some(format!("P-{name}-M")),
                provider_plan_yearly: Some(format!("P-{name}-Y")),
            })
            .await
            .unwrap()
    }
}
