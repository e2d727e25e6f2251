//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Everything here lives in the
//! shared store; dedicated tenant stores only hold domain data.

use uuid::Uuid;

use crate::error::CellarResult;
use crate::models::{
    plan::{CreatePlan, Plan},
    store::StoreDescriptor,
    subscription::{CreateSubscription, Subscription, SubscriptionUpdate},
    tenant::{CreateTenant, Tenant, UpdateTenant},
    usage::{BillingPeriod, UsageMetric, UsageMetricKind},
};

/// Pagination parameters for list queries.
#[derive(Debug, Clone)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// A paginated result set.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

// ---------------------------------------------------------------------------
// Tenants
// ---------------------------------------------------------------------------

pub trait TenantRepository: Send + Sync {
    fn create(&self, input: CreateTenant) -> impl Future<Output = CellarResult<Tenant>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = CellarResult<Tenant>> + Send;
    fn get_by_subdomain(
        &self,
        subdomain: &str,
    ) -> impl Future<Output = CellarResult<Tenant>> + Send;
    fn update(
        &self,
        id: Uuid,
        input: UpdateTenant,
    ) -> impl Future<Output = CellarResult<Tenant>> + Send;
    /// Record the dedicated store descriptor. Fails with `Conflict` if
    /// one is already recorded; a descriptor is never overwritten.
    fn attach_dedicated_store(
        &self,
        id: Uuid,
        descriptor: StoreDescriptor,
    ) -> impl Future<Output = CellarResult<Tenant>> + Send;
    /// Clear the descriptor, returning the tenant as it is afterwards.
    fn detach_dedicated_store(&self, id: Uuid)
    -> impl Future<Output = CellarResult<Tenant>> + Send;
    fn list(
        &self,
        pagination: Pagination,
    ) -> impl Future<Output = CellarResult<PaginatedResult<Tenant>>> + Send;
}

// ---------------------------------------------------------------------------
// Subscriptions & plans
// ---------------------------------------------------------------------------

pub trait SubscriptionRepository: Send + Sync {
    /// Create a `pending` subscription. An earlier `pending` record of the
    /// tenant is superseded: it moves to `cancelled` with `superseded_by`
    /// pointing at the new record. Paid records are left alone until the
    /// new one is activated (see [`Self::supersede_open`]).
    fn create(
        &self,
        input: CreateSubscription,
    ) -> impl Future<Output = CellarResult<Subscription>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = CellarResult<Subscription>> + Send;
    fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> impl Future<Output = CellarResult<Subscription>> + Send;
    /// The subscription in force: the newest non-terminal record that is
    /// not `pending`, falling back to a `pending` one awaiting approval.
    fn get_current(
        &self,
        tenant_id: Uuid,
    ) -> impl Future<Output = CellarResult<Option<Subscription>>> + Send;
    /// Full history, newest first.
    fn list_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> impl Future<Output = CellarResult<Vec<Subscription>>> + Send;
    fn list_superseded_by(
        &self,
        id: Uuid,
    ) -> impl Future<Output = CellarResult<Vec<Subscription>>> + Send;
    /// Supersede every other non-terminal subscription of the tenant in
    /// favour of `by`, returning all records `by` has replaced.
    fn supersede_open(
        &self,
        tenant_id: Uuid,
        by: Uuid,
    ) -> impl Future<Output = CellarResult<Vec<Subscription>>> + Send;
    fn set_external_id(
        &self,
        id: Uuid,
        external_id: &str,
    ) -> impl Future<Output = CellarResult<Subscription>> + Send;
    fn update(
        &self,
        id: Uuid,
        update: SubscriptionUpdate,
    ) -> impl Future<Output = CellarResult<Subscription>> + Send;
}

pub trait PlanRepository: Send + Sync {
    fn create(&self, input: CreatePlan) -> impl Future<Output = CellarResult<Plan>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = CellarResult<Plan>> + Send;
    fn list_active(&self) -> impl Future<Output = CellarResult<Vec<Plan>>> + Send;
}

// ---------------------------------------------------------------------------
// Quota ledger
// ---------------------------------------------------------------------------

/// Durable usage counters. Values never go below zero.
pub trait UsageRepository: Send + Sync {
    /// Current value, `0` when nothing was recorded for the period.
    fn get(
        &self,
        tenant_id: Uuid,
        metric: UsageMetricKind,
        period: BillingPeriod,
    ) -> impl Future<Output = CellarResult<u64>> + Send;
    fn increment(
        &self,
        tenant_id: Uuid,
        metric: UsageMetricKind,
        delta: u64,
        period: BillingPeriod,
    ) -> impl Future<Output = CellarResult<u64>> + Send;
    /// Decrement, clamping at zero.
    fn decrement(
        &self,
        tenant_id: Uuid,
        metric: UsageMetricKind,
        delta: u64,
        period: BillingPeriod,
    ) -> impl Future<Output = CellarResult<u64>> + Send;
    fn set(
        &self,
        tenant_id: Uuid,
        metric: UsageMetricKind,
        value: u64,
        period: BillingPeriod,
    ) -> impl Future<Output = CellarResult<u64>> + Send;
    fn list_for_period(
        &self,
        tenant_id: Uuid,
        period: BillingPeriod,
    ) -> impl Future<Output = CellarResult<Vec<UsageMetric>>> + Send;
}

// ---------------------------------------------------------------------------
// Dedicated store lifecycle
// ---------------------------------------------------------------------------

/// Creates and destroys a top-tier tenant's dedicated store.
pub trait StoreProvisioning: Send + Sync {
    /// Fails with `Conflict` if the tenant already has a store.
    fn provision(
        &self,
        tenant_id: Uuid,
    ) -> impl Future<Output = CellarResult<StoreDescriptor>> + Send;
    /// No-op if the tenant has no store.
    fn decommission(&self, tenant_id: Uuid) -> impl Future<Output = CellarResult<()>> + Send;
}
