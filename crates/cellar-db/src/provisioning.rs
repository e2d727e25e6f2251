//! Dedicated store provisioning for top-tier tenants.

use std::sync::Arc;

use cellar_core::error::{CellarError, CellarResult};
use cellar_core::models::store::StoreDescriptor;
use cellar_core::repository::{StoreProvisioning, TenantRepository};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::connection::DedicatedStoreConfig;
use crate::router::{StoreBackend, TenantConnectionRouter};

/// Creates the physical store, then records its descriptor on the
/// tenant. If recording fails the store is dropped again so no orphan
/// is left behind.
pub struct TenantProvisioner<T, B: StoreBackend> {
    tenants: T,
    router: Arc<TenantConnectionRouter<B>>,
    config: DedicatedStoreConfig,
}

impl<T, B> TenantProvisioner<T, B>
where
    T: TenantRepository,
    B: StoreBackend,
{
    pub fn new(tenants: T, router: Arc<TenantConnectionRouter<B>>, config: DedicatedStoreConfig) -> Self {
        Self {
            tenants,
            router,
            config,
        }
    }

    /// Where a tenant's dedicated store lives.
    pub fn descriptor_for(&self, tenant_id: Uuid) -> StoreDescriptor {
        StoreDescriptor {
            url: self.config.url.clone(),
            namespace: self.config.namespace.clone(),
            database: format!("tenant_{}", tenant_id.simple()),
        }
    }
}

impl<T, B> StoreProvisioning for TenantProvisioner<T, B>
where
    T: TenantRepository,
    B: StoreBackend,
{
    async fn provision(&self, tenant_id: Uuid) -> CellarResult<StoreDescriptor> {
        let tenant = self.tenants.get_by_id(tenant_id).await?;
        if !tenant.tier.has_dedicated_store() {
            return Err(CellarError::validation(format!(
                "tier {} does not include a dedicated store",
                tenant.tier
            )));
        }
        if let Some(existing) = tenant.dedicated_store {
            return Err(CellarError::conflict(format!(
                "tenant {tenant_id} already has dedicated store {}",
                existing.store_id()
            )));
        }

        let descriptor = self.descriptor_for(tenant_id);
        self.router.backend().create_store(&descriptor).await?;

        match self
            .tenants
            .attach_dedicated_store(tenant_id, descriptor.clone())
            .await
        {
            Ok(_) => {
                info!(
                    tenant_id = %tenant_id,
                    store = %descriptor.store_id(),
                    "Dedicated store provisioned"
                );
                Ok(descriptor)
            }
            Err(err) => {
                warn!(
                    tenant_id = %tenant_id,
                    store = %descriptor.store_id(),
                    error = %err,
                    "Recording store failed, rolling back"
                );
                if let Err(drop_err) = self.router.backend().drop_store(&descriptor).await {
                    error!(
                        tenant_id = %tenant_id,
                        store = %descriptor.store_id(),
                        error = %drop_err,
                        "Rollback failed; store needs manual removal"
                    );
                }
                Err(err)
            }
        }
    }

    async fn decommission(&self, tenant_id: Uuid) -> CellarResult<()> {
        let tenant = self.tenants.get_by_id(tenant_id).await?;
        let Some(descriptor) = tenant.dedicated_store else {
            return Ok(());
        };

        if let Err(e) = self.router.release(tenant_id).await {
            warn!(tenant_id = %tenant_id, error = %e, "Failed to close store handle");
        }
        // The descriptor stays recorded until the store is gone, so a
        // failed drop can be retried.
        if let Err(e) = self.router.backend().drop_store(&descriptor).await {
            error!(
                tenant_id = %tenant_id,
                store = %descriptor.store_id(),
                error = %e,
                "Dropping dedicated store failed; descriptor kept"
            );
            return Err(e.into());
        }
        self.tenants.detach_dedicated_store(tenant_id).await?;

        info!(
            tenant_id = %tenant_id,
            store = %descriptor.store_id(),
            "Dedicated store decommissioned"
        );
        Ok(())
    }
}
