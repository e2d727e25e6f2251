//! Tenant resolution from request context.

use cellar_core::error::{CellarError, CellarResult};
use cellar_core::models::tenant::Tenant;
use cellar_core::repository::TenantRepository;
use tracing::debug;
use uuid::Uuid;

use crate::claims::decode_tenant_claims;
use crate::config::AccessConfig;

/// Where a request says its tenant is. Filled from the `Host` header,
/// an explicit tenant header, and a bearer token.
#[derive(Debug, Default, Clone)]
pub struct TenantHints<'a> {
    pub host: Option<&'a str>,
    pub tenant_id: Option<&'a str>,
    pub bearer: Option<&'a str>,
}

/// Looks tenants up by subdomain, opaque ID or verified auth claim.
pub struct TenantDirectory<T: TenantRepository> {
    tenants: T,
    config: AccessConfig,
}

impl<T: TenantRepository> TenantDirectory<T> {
    pub fn new(tenants: T, config: AccessConfig) -> Self {
        Self { tenants, config }
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    pub async fn by_id(&self, id: Uuid) -> CellarResult<Tenant> {
        self.tenants.get_by_id(id).await
    }

    pub async fn by_subdomain(&self, subdomain: &str) -> CellarResult<Tenant> {
        self.tenants.get_by_subdomain(subdomain).await
    }

    /// Extract the tenant label from a `Host` header value.
    ///
    /// `acme.cellar.app:443` under base domain `cellar.app` yields
    /// `acme`. The bare base domain and nested labels yield `None`.
    pub fn subdomain_of<'h>(&self, host: &'h str) -> Option<&'h str> {
        let host = host.split(':').next().unwrap_or(host);
        let base = self.config.base_domain.as_str();
        let label = host
            .strip_suffix(base)
            .and_then(|rest| rest.strip_suffix('.'))?;
        if label.is_empty() || label.contains('.') {
            None
        } else {
            Some(label)
        }
    }

    pub async fn from_host(&self, host: &str) -> CellarResult<Tenant> {
        let subdomain = self.subdomain_of(host).ok_or(CellarError::TenantContext)?;
        self.by_subdomain(subdomain).await
    }

    /// Resolve from a verified bearer token's `tenant_id` claim.
    pub async fn from_bearer(&self, token: &str) -> CellarResult<Tenant> {
        let claims = decode_tenant_claims(token, &self.config)?;
        self.by_id(claims.tenant_uuid()?).await
    }

    /// Resolve from every hint present. A bearer claim takes precedence;
    /// when other hints also name a tenant they must agree with it.
    pub async fn resolve(&self, hints: &TenantHints<'_>) -> CellarResult<Tenant> {
        let from_header = hints
            .tenant_id
            .map(|raw| Uuid::parse_str(raw.trim()).map_err(|_| CellarError::TenantContext))
            .transpose()?;

        let tenant = if let Some(token) = hints.bearer {
            self.from_bearer(token).await?
        } else if let Some(id) = from_header {
            self.by_id(id).await?
        } else if let Some(host) = hints.host {
            self.from_host(host).await?
        } else {
            return Err(CellarError::TenantContext);
        };

        if from_header.is_some_and(|id| id != tenant.id) {
            debug!(tenant_id = %tenant.id, "Tenant header disagrees with token");
            return Err(CellarError::TenantContext);
        }
        if hints.bearer.is_some() {
            let host_subdomain = hints.host.and_then(|h| self.subdomain_of(h));
            if host_subdomain.is_some_and(|sub| !sub.eq_ignore_ascii_case(&tenant.subdomain)) {
                debug!(tenant_id = %tenant.id, "Host disagrees with token");
                return Err(CellarError::TenantContext);
            }
        }
        Ok(tenant)
    }
}

/// Reject suspended and cancelled tenants.
pub fn require_active(tenant: &Tenant) -> CellarResult<()> {
    if tenant.is_active() {
        Ok(())
    } else {
        Err(CellarError::TenantInactive {
            tenant_id: tenant.id,
            status: tenant.status.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_core::models::store::StoreDescriptor;
    use cellar_core::models::tenant::{CreateTenant, TenantStatus, Tier, UpdateTenant};
    use cellar_core::repository::{PaginatedResult, Pagination};
    use chrono::Utc;

    struct NoTenants;

    impl TenantRepository for NoTenants {
        async fn create(&self, _: CreateTenant) -> CellarResult<Tenant> {
            unimplemented!()
        }
        async fn get_by_id(&self, id: Uuid) -> CellarResult<Tenant> {
            Err(CellarError::not_found("tenant", id))
        }
        async fn get_by_subdomain(&self, s: &str) -> CellarResult<Tenant> {
            Err(CellarError::not_found("tenant", s))
        }
        async fn update(&self, _: Uuid, _: UpdateTenant) -> CellarResult<Tenant> {
            unimplemented!()
        }
        async fn attach_dedicated_store(&self, _: Uuid, _: StoreDescriptor) -> CellarResult<Tenant> {
            unimplemented!()
        }
        async fn detach_dedicated_store(&self, _: Uuid) -> CellarResult<Tenant> {
            unimplemented!()
        }
        async fn list(&self, _: Pagination) -> CellarResult<PaginatedResult<Tenant>> {
            unimplemented!()
        }
    }

    fn directory() -> TenantDirectory<NoTenants> {
        TenantDirectory::new(
            NoTenants,
            AccessConfig {
                base_domain: "cellar.app".into(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn subdomain_extraction() {
        let dir = directory();
        assert_eq!(dir.subdomain_of("acme.cellar.app"), Some("acme"));
        assert_eq!(dir.subdomain_of("acme.cellar.app:8443"), Some("acme"));
        assert_eq!(dir.subdomain_of("cellar.app"), None);
        assert_eq!(dir.subdomain_of("a.b.cellar.app"), None);
        assert_eq!(dir.subdomain_of("acme.other.app"), None);
        assert_eq!(dir.subdomain_of("evilcellar.app"), None);
    }

    #[tokio::test]
    async fn no_hints_is_a_context_error() {
        let err = directory().resolve(&TenantHints::default()).await.unwrap_err();
        assert!(matches!(err, CellarError::TenantContext));
    }

    #[tokio::test]
    async fn malformed_tenant_header_is_a_context_error() {
        let hints = TenantHints {
            tenant_id: Some("not-a-uuid"),
            ..Default::default()
        };
        let err = directory().resolve(&hints).await.unwrap_err();
        assert!(matches!(err, CellarError::TenantContext));
    }

    #[test]
    fn inactive_tenants_are_rejected() {
        let mut tenant = Tenant {
            id: Uuid::new_v4(),
            subdomain: "acme".into(),
            name: "Acme".into(),
            tier: Tier::Pro,
            status: TenantStatus::Active,
            dedicated_store: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(require_active(&tenant).is_ok());

        tenant.status = TenantStatus::Suspended;
        let err = require_active(&tenant).unwrap_err();
        assert!(matches!(err, CellarError::TenantInactive { ref status, .. } if status == "suspended"));
    }
}
