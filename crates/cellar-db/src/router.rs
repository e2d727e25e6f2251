//! Tenant connection routing.
//!
//! Every tenant below the top tier shares one store handle. Top-tier
//! tenants get a dedicated store whose handle is opened lazily on first
//! use and cached for the life of the process. Resolution for a tenant
//! is single-flight: concurrent first requests open exactly one handle.

use std::collections::{BTreeMap, HashMap};

use cellar_core::error::{CellarError, CellarResult};
use cellar_core::models::store::StoreDescriptor;
use cellar_core::models::tenant::{Tenant, Tier};
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::{DedicatedStoreConfig, open};
use crate::error::DbError;
use crate::schema::run_migrations;

/// Opens, probes, creates and destroys physical stores.
pub trait StoreBackend: Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;

    fn open(
        &self,
        descriptor: &StoreDescriptor,
    ) -> impl Future<Output = Result<Self::Handle, DbError>> + Send;

    fn ping(&self, handle: &Self::Handle) -> impl Future<Output = Result<(), DbError>> + Send;

    fn close(&self, handle: Self::Handle) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Create the store and apply the schema. Idempotent.
    fn create_store(
        &self,
        descriptor: &StoreDescriptor,
    ) -> impl Future<Output = Result<(), DbError>> + Send;

    fn drop_store(
        &self,
        descriptor: &StoreDescriptor,
    ) -> impl Future<Output = Result<(), DbError>> + Send;
}

/// Result of probing every live handle. Keyed by store id.
#[derive(Debug, Default)]
pub struct HealthReport {
    pub stores: BTreeMap<String, Result<(), String>>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.stores.values().all(Result::is_ok)
    }
}

/// Outcome of shutting the router down.
#[derive(Debug, Default)]
pub struct CloseReport {
    pub closed: usize,
    pub failures: Vec<(String, String)>,
}

pub const SHARED_STORE_ID: &str = "shared";

/// Maps a tenant to the store handle its domain data lives in.
pub struct TenantConnectionRouter<B: StoreBackend> {
    backend: B,
    shared: B::Handle,
    dedicated: RwLock<HashMap<Uuid, Entry<B::Handle>>>,
}

struct Entry<H> {
    store_id: String,
    handle: H,
}

impl<B: StoreBackend> TenantConnectionRouter<B> {
    pub fn new(backend: B, shared: B::Handle) -> Self {
        Self {
            backend,
            shared,
            dedicated: RwLock::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The shared handle, used directly for control-plane data.
    pub fn shared(&self) -> &B::Handle {
        &self.shared
    }

    /// Resolve the handle for a tenant.
    ///
    /// Top-tier tenants without a recorded store fail with
    /// [`CellarError::ProvisioningMissing`]; they are never silently
    /// routed to the shared store.
    pub async fn resolve(
        &self,
        tenant_id: Uuid,
        tier: Tier,
        descriptor: Option<&StoreDescriptor>,
    ) -> CellarResult<B::Handle> {
        if !tier.has_dedicated_store() {
            return Ok(self.shared.clone());
        }
        let descriptor = descriptor.ok_or(CellarError::ProvisioningMissing { tenant_id })?;

        if let Some(entry) = self.dedicated.read().await.get(&tenant_id) {
            return Ok(entry.handle.clone());
        }

        // Hold the write lock across open so a burst of first requests
        // produces one connection.
        let mut map = self.dedicated.write().await;
        if let Some(entry) = map.get(&tenant_id) {
            return Ok(entry.handle.clone());
        }

        let handle = self.backend.open(descriptor).await.map_err(|e| {
            warn!(
                tenant_id = %tenant_id,
                store = %descriptor.store_id(),
                error = %e,
                "Failed to open dedicated store"
            );
            CellarError::from(e)
        })?;
        info!(
            tenant_id = %tenant_id,
            store = %descriptor.store_id(),
            "Opened dedicated store"
        );
        map.insert(
            tenant_id,
            Entry {
                store_id: descriptor.store_id(),
                handle: handle.clone(),
            },
        );
        Ok(handle)
    }

    /// Resolve using the tenant record. Routing follows the stored tier,
    /// not the effective one: a suspended top-tier tenant's data still
    /// lives in its dedicated store.
    pub async fn resolve_tenant(&self, tenant: &Tenant) -> CellarResult<B::Handle> {
        self.resolve(tenant.id, tenant.tier, tenant.dedicated_store.as_ref())
            .await
    }

    /// Close and evict one tenant's cached handle. Returns whether a
    /// handle was cached.
    pub async fn release(&self, tenant_id: Uuid) -> CellarResult<bool> {
        let entry = self.dedicated.write().await.remove(&tenant_id);
        match entry {
            Some(entry) => {
                debug!(tenant_id = %tenant_id, store = %entry.store_id, "Releasing store handle");
                self.backend.close(entry.handle).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Number of cached dedicated handles.
    pub async fn dedicated_count(&self) -> usize {
        self.dedicated.read().await.len()
    }

    /// Probe the shared store and every cached dedicated store. Each
    /// probe is independent; one failure does not hide the others.
    pub async fn health_check(&self) -> HealthReport {
        let handles: Vec<(String, B::Handle)> = {
            let map = self.dedicated.read().await;
            map.values()
                .map(|e| (e.store_id.clone(), e.handle.clone()))
                .collect()
        };

        let mut report = HealthReport::default();
        let shared = self.backend.ping(&self.shared).await;
        report
            .stores
            .insert(SHARED_STORE_ID.to_string(), shared.map_err(|e| e.to_string()));

        for (store_id, handle) in handles {
            let probe = self.backend.ping(&handle).await;
            if let Err(e) = &probe {
                warn!(store = %store_id, error = %e, "Store health probe failed");
            }
            report.stores.insert(store_id, probe.map_err(|e| e.to_string()));
        }
        report
    }

    /// Close every handle. Failures are collected, not short-circuited.
    pub async fn close(&self) -> CloseReport {
        let drained: Vec<Entry<B::Handle>> = {
            let mut map = self.dedicated.write().await;
            map.drain().map(|(_, entry)| entry).collect()
        };

        let mut report = CloseReport::default();
        for entry in drained {
            match self.backend.close(entry.handle).await {
                Ok(()) => report.closed += 1,
                Err(e) => report.failures.push((entry.store_id, e.to_string())),
            }
        }
        match self.backend.close(self.shared.clone()).await {
            Ok(()) => report.closed += 1,
            Err(e) => report
                .failures
                .push((SHARED_STORE_ID.to_string(), e.to_string())),
        }
        info!(
            closed = report.closed,
            failed = report.failures.len(),
            "Store handles closed"
        );
        report
    }
}

/// [`StoreBackend`] over SurrealDB. Each dedicated store is a database
/// in the configured namespace.
#[derive(Clone)]
pub struct SurrealStoreBackend {
    config: DedicatedStoreConfig,
}

impl SurrealStoreBackend {
    pub fn new(config: DedicatedStoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DedicatedStoreConfig {
        &self.config
    }

    async fn connect(&self, descriptor: &StoreDescriptor) -> Result<Surreal<Any>, DbError> {
        let attempt = open(
            &descriptor.url,
            &self.config.username,
            &self.config.password,
            &descriptor.namespace,
            &descriptor.database,
        );
        tokio::time::timeout(self.config.connect_timeout(), attempt)
            .await
            .map_err(|_| DbError::Timeout(format!("connecting to {}", descriptor.store_id())))?
    }
}

fn validate_database_name(name: &str) -> Result<(), DbError> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(DbError::Query(format!("illegal database name '{name}'")))
    }
}

impl StoreBackend for SurrealStoreBackend {
    type Handle = Surreal<Any>;

    async fn open(&self, descriptor: &StoreDescriptor) -> Result<Surreal<Any>, DbError> {
        self.connect(descriptor).await
    }

    async fn ping(&self, handle: &Surreal<Any>) -> Result<(), DbError> {
        handle
            .query("RETURN true")
            .await?
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;
        Ok(())
    }

    async fn close(&self, handle: Surreal<Any>) -> Result<(), DbError> {
        // The client disconnects once its last clone is dropped.
        drop(handle);
        Ok(())
    }

    async fn create_store(&self, descriptor: &StoreDescriptor) -> Result<(), DbError> {
        validate_database_name(&descriptor.database)?;
        let db = self.connect(descriptor).await?;
        db.query(format!(
            "DEFINE DATABASE IF NOT EXISTS {}",
            descriptor.database
        ))
        .await?
        .check()
        .map_err(|e| DbError::Query(e.to_string()))?;
        run_migrations(&db).await?;
        info!(store = %descriptor.store_id(), "Dedicated store created");
        Ok(())
    }

    async fn drop_store(&self, descriptor: &StoreDescriptor) -> Result<(), DbError> {
        validate_database_name(&descriptor.database)?;
        let db = self.connect(descriptor).await?;
        db.query(format!("REMOVE DATABASE IF EXISTS {}", descriptor.database))
            .await?
            .check()
            .map_err(|e| DbError::Query(e.to_string()))?;
        info!(store = %descriptor.store_id(), "Dedicated store removed");
        Ok(())
    }
}
