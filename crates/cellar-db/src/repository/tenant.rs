//! SurrealDB implementation of [`TenantRepository`].

use cellar_core::error::{CellarError, CellarResult};
use cellar_core::models::store::StoreDescriptor;
use cellar_core::models::tenant::{CreateTenant, Tenant, UpdateTenant};
use cellar_core::repository::{PaginatedResult, Pagination, TenantRepository};
use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{CountRow, parse_enum, parse_uuid};
use crate::error::DbError;

const SELECT_WITH_ID: &str = "SELECT meta::id(id) AS record_id, * FROM tenant";

/// DB-side row struct for queries where the UUID is already known.
#[derive(Debug, SurrealValue)]
struct TenantRow {
    subdomain: String,
    name: String,
    tier: String,
    status: String,
    store_url: Option<String>,
    store_namespace: Option<String>,
    store_database: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TenantRow {
    fn into_tenant(self, id: Uuid) -> Result<Tenant, DbError> {
        let dedicated_store = match (self.store_url, self.store_namespace, self.store_database) {
            (Some(url), Some(namespace), Some(database)) => Some(StoreDescriptor {
                url,
                namespace,
                database,
            }),
            (None, None, None) => None,
            _ => {
                return Err(DbError::Corrupt(format!(
                    "tenant {id} has a partial store descriptor"
                )));
            }
        };
        Ok(Tenant {
            id,
            subdomain: self.subdomain,
            name: self.name,
            tier: parse_enum(&self.tier)?,
            status: parse_enum(&self.status)?,
            dedicated_store,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct TenantRowWithId {
    record_id: String,
    subdomain: String,
    name: String,
    tier: String,
    status: String,
    store_url: Option<String>,
    store_namespace: Option<String>,
    store_database: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TenantRowWithId {
    fn try_into_tenant(self) -> Result<Tenant, DbError> {
        let id = parse_uuid(&self.record_id, "tenant id")?;
        TenantRow {
            subdomain: self.subdomain,
            name: self.name,
            tier: self.tier,
            status: self.status,
            store_url: self.store_url,
            store_namespace: self.store_namespace,
            store_database: self.store_database,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
        .into_tenant(id)
    }
}

/// SurrealDB implementation of the Tenant repository.
pub struct SurrealTenantRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> Clone for SurrealTenantRepository<C> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
        }
    }
}

impl<C: Connection> SurrealTenantRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    fn first(rows: Vec<TenantRow>, id: Uuid) -> Result<Tenant, DbError> {
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "tenant".into(),
            id: id.to_string(),
        })?;
        row.into_tenant(id)
    }
}

impl<C: Connection> TenantRepository for SurrealTenantRepository<C> {
    async fn create(&self, input: CreateTenant) -> CellarResult<Tenant> {
        let subdomain = input.subdomain.trim().to_ascii_lowercase();
        if subdomain.is_empty()
            || !subdomain
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(CellarError::validation(format!(
                "invalid subdomain '{}'",
                input.subdomain
            )));
        }

        let id = Uuid::new_v4();
        let result = self
            .db
            .query(
                "CREATE type::record('tenant', $id) SET \
                 subdomain = $subdomain, name = $name, \
                 tier = 'free', status = 'active'",
            )
            .bind(("id", id.to_string()))
            .bind(("subdomain", subdomain))
            .bind(("name", input.name))
            .await
            .map_err(DbError::from)?;

        let mut result = result.check().map_err(DbError::from_check)?;
        let rows: Vec<TenantRow> = result.take(0).map_err(DbError::from)?;
        Ok(Self::first(rows, id)?)
    }

    async fn get_by_id(&self, id: Uuid) -> CellarResult<Tenant> {
        let mut result = self
            .db
            .query("SELECT * FROM type::record('tenant', $id)")
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<TenantRow> = result.take(0).map_err(DbError::from)?;
        Ok(Self::first(rows, id)?)
    }

    async fn get_by_subdomain(&self, subdomain: &str) -> CellarResult<Tenant> {
        let subdomain = subdomain.to_ascii_lowercase();
        let mut result = self
            .db
            .query(format!("{SELECT_WITH_ID} WHERE subdomain = $subdomain"))
            .bind(("subdomain", subdomain.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<TenantRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "tenant".into(),
            id: format!("subdomain={subdomain}"),
        })?;
        Ok(row.try_into_tenant()?)
    }

    async fn update(&self, id: Uuid, input: UpdateTenant) -> CellarResult<Tenant> {
        let mut sets = Vec::new();
        if input.name.is_some() {
            sets.push("name = $name");
        }
        if input.tier.is_some() {
            sets.push("tier = $tier");
        }
        if input.status.is_some() {
            sets.push("status = $status");
        }
        sets.push("updated_at = time::now()");

        let query = format!("UPDATE type::record('tenant', $id) SET {}", sets.join(", "));
        let mut builder = self.db.query(&query).bind(("id", id.to_string()));

        if let Some(name) = input.name {
            builder = builder.bind(("name", name));
        }
        if let Some(tier) = input.tier {
            builder = builder.bind(("tier", tier.as_str()));
        }
        if let Some(status) = input.status {
            builder = builder.bind(("status", status.as_str()));
        }

        let result = builder.await.map_err(DbError::from)?;
        let mut result = result.check().map_err(DbError::from_check)?;
        let rows: Vec<TenantRow> = result.take(0).map_err(DbError::from)?;
        Ok(Self::first(rows, id)?)
    }

    async fn attach_dedicated_store(
        &self,
        id: Uuid,
        descriptor: StoreDescriptor,
    ) -> CellarResult<Tenant> {
        let result = self
            .db
            .query(
                "UPDATE type::record('tenant', $id) SET \
                 store_url = $url, store_namespace = $namespace, \
                 store_database = $database, updated_at = time::now() \
                 WHERE store_database = NONE",
            )
            .bind(("id", id.to_string()))
            .bind(("url", descriptor.url))
            .bind(("namespace", descriptor.namespace))
            .bind(("database", descriptor.database))
            .await
            .map_err(DbError::from)?;

        let mut result = result.check().map_err(DbError::from_check)?;
        let rows: Vec<TenantRow> = result.take(0).map_err(DbError::from)?;
        if rows.is_empty() {
            // Either the tenant is missing or a store is already recorded.
            let existing = self.get_by_id(id).await?;
            let store = existing
                .dedicated_store
                .map(|d| d.store_id())
                .unwrap_or_default();
            return Err(DbError::Conflict(format!(
                "tenant {id} already has dedicated store {store}"
            ))
            .into());
        }
        Ok(Self::first(rows, id)?)
    }

    async fn detach_dedicated_store(&self, id: Uuid) -> CellarResult<Tenant> {
        let result = self
            .db
            .query(
                "UPDATE type::record('tenant', $id) SET \
                 store_url = NONE, store_namespace = NONE, \
                 store_database = NONE, updated_at = time::now()",
            )
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?;

        let mut result = result.check().map_err(DbError::from_check)?;
        let rows: Vec<TenantRow> = result.take(0).map_err(DbError::from)?;
        Ok(Self::first(rows, id)?)
    }

    async fn list(&self, pagination: Pagination) -> CellarResult<PaginatedResult<Tenant>> {
        let mut count_result = self
            .db
            .query("SELECT count() AS total FROM tenant GROUP ALL")
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = self
            .db
            .query(format!(
                "{SELECT_WITH_ID} ORDER BY created_at ASC LIMIT $limit START $offset"
            ))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<TenantRowWithId> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(TenantRowWithId::try_into_tenant)
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
