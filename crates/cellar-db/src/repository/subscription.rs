//! SurrealDB implementation of [`SubscriptionRepository`].

use cellar_core::error::{CellarError, CellarResult};
use cellar_core::models::subscription::{
    CreateSubscription, Subscription, SubscriptionStatus, SubscriptionUpdate,
};
use cellar_core::repository::SubscriptionRepository;
use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{parse_enum, parse_uuid};
use crate::error::DbError;

const SELECT_WITH_ID: &str = "SELECT meta::id(id) AS record_id, * FROM subscription";
const OPEN_STATUSES: &str = "['pending', 'active', 'past_due', 'trialing', 'suspended']";

#[derive(Debug, SurrealValue)]
struct SubscriptionRow {
    tenant_id: String,
    plan_id: String,
    status: String,
    billing_cycle: String,
    external_subscription_id: Option<String>,
    current_period_start: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    next_billing_date: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    superseded_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SubscriptionRow {
    fn into_subscription(self, id: Uuid) -> Result<Subscription, DbError> {
        Ok(Subscription {
            id,
            tenant_id: parse_uuid(&self.tenant_id, "tenant_id")?,
            plan_id: parse_uuid(&self.plan_id, "plan_id")?,
            status: parse_enum(&self.status)?,
            billing_cycle: parse_enum(&self.billing_cycle)?,
            external_subscription_id: self.external_subscription_id,
            current_period_start: self.current_period_start,
            current_period_end: self.current_period_end,
            next_billing_date: self.next_billing_date,
            cancelled_at: self.cancelled_at,
            cancellation_reason: self.cancellation_reason,
            superseded_by: self
                .superseded_by
                .as_deref()
                .map(|raw| parse_uuid(raw, "superseded_by"))
                .transpose()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, SurrealValue)]
struct SubscriptionRowWithId {
    record_id: String,
    tenant_id: String,
    plan_id: String,
    status: String,
    billing_cycle: String,
    external_subscription_id: Option<String>,
    current_period_start: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    next_billing_date: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    superseded_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SubscriptionRowWithId {
    fn try_into_subscription(self) -> Result<Subscription, DbError> {
        let id = parse_uuid(&self.record_id, "subscription id")?;
        SubscriptionRow {
            tenant_id: self.tenant_id,
            plan_id: self.plan_id,
            status: self.status,
            billing_cycle: self.billing_cycle,
            external_subscription_id: self.external_subscription_id,
            current_period_start: self.current_period_start,
            current_period_end: self.current_period_end,
            next_billing_date: self.next_billing_date,
            cancelled_at: self.cancelled_at,
            cancellation_reason: self.cancellation_reason,
            superseded_by: self.superseded_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
        .into_subscription(id)
    }
}

fn collect(rows: Vec<SubscriptionRowWithId>) -> Result<Vec<Subscription>, DbError> {
    rows.into_iter()
        .map(SubscriptionRowWithId::try_into_subscription)
        .collect()
}

/// SurrealDB implementation of the Subscription repository.
pub struct SurrealSubscriptionRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> Clone for SurrealSubscriptionRepository<C> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
        }
    }
}

impl<C: Connection> SurrealSubscriptionRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    fn first(rows: Vec<SubscriptionRow>, id: Uuid) -> Result<Subscription, DbError> {
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "subscription".into(),
            id: id.to_string(),
        })?;
        row.into_subscription(id)
    }
}

impl<C: Connection> SubscriptionRepository for SurrealSubscriptionRepository<C> {
    async fn create(&self, input: CreateSubscription) -> CellarResult<Subscription> {
        let id = Uuid::new_v4();

        // Only an earlier pending record is replaced here. A paid record
        // stays in force until the new one is activated.
        let query = "UPDATE subscription SET \
             status = 'cancelled', cancelled_at = time::now(), \
             cancellation_reason = 'superseded', superseded_by = $id, \
             updated_at = time::now() \
             WHERE tenant_id = $tenant_id AND status = 'pending'; \
             CREATE type::record('subscription', $id) SET \
             tenant_id = $tenant_id, plan_id = $plan_id, \
             status = 'pending', billing_cycle = $billing_cycle;";

        let result = self
            .db
            .query(query)
            .bind(("id", id.to_string()))
            .bind(("tenant_id", input.tenant_id.to_string()))
            .bind(("plan_id", input.plan_id.to_string()))
            .bind(("billing_cycle", input.billing_cycle.as_str()))
            .await
            .map_err(DbError::from)?;

        let mut result = result.check().map_err(DbError::from_check)?;
        // Statement 0 is the supersede UPDATE, statement 1 the CREATE.
        let rows: Vec<SubscriptionRow> = result.take(1).map_err(DbError::from)?;
        Ok(Self::first(rows, id)?)
    }

    async fn get_by_id(&self, id: Uuid) -> CellarResult<Subscription> {
        let mut result = self
            .db
            .query("SELECT * FROM type::record('subscription', $id)")
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<SubscriptionRow> = result.take(0).map_err(DbError::from)?;
        Ok(Self::first(rows, id)?)
    }

    async fn get_by_external_id(&self, external_id: &str) -> CellarResult<Subscription> {
        let mut result = self
            .db
            .query(format!(
                "{SELECT_WITH_ID} WHERE external_subscription_id = $external_id"
            ))
            .bind(("external_id", external_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<SubscriptionRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "subscription".into(),
            id: format!("external={external_id}"),
        })?;
        Ok(row.try_into_subscription()?)
    }

    async fn get_current(&self, tenant_id: Uuid) -> CellarResult<Option<Subscription>> {
        let mut result = self
            .db
            .query(format!(
                "{SELECT_WITH_ID} WHERE tenant_id = $tenant_id \
                 AND status IN {OPEN_STATUSES} \
                 ORDER BY created_at DESC LIMIT 1"
            ))
            .bind(("tenant_id", tenant_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<SubscriptionRowWithId> = result.take(0).map_err(DbError::from)?;
        let open = collect(rows)?;
        let in_force = open
            .iter()
            .position(|s| s.status != SubscriptionStatus::Pending)
            .unwrap_or(0);
        Ok(open.into_iter().nth(in_force))
    }

    async fn list_by_tenant(&self, tenant_id: Uuid) -> CellarResult<Vec<Subscription>> {
        let mut result = self
            .db
            .query(format!(
                "{SELECT_WITH_ID} WHERE tenant_id = $tenant_id ORDER BY created_at DESC"
            ))
            .bind(("tenant_id", tenant_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<SubscriptionRowWithId> = result.take(0).map_err(DbError::from)?;
        Ok(collect(rows)?)
    }

    async fn list_superseded_by(&self, id: Uuid) -> CellarResult<Vec<Subscription>> {
        let mut result = self
            .db
            .query(format!("{SELECT_WITH_ID} WHERE superseded_by = $id"))
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<SubscriptionRowWithId> = result.take(0).map_err(DbError::from)?;
        Ok(collect(rows)?)
    }

    async fn supersede_open(&self, tenant_id: Uuid, by: Uuid) -> CellarResult<Vec<Subscription>> {
        let result = self
            .db
            .query(format!(
                "UPDATE subscription SET \
                 status = 'cancelled', cancelled_at = time::now(), \
                 cancellation_reason = 'superseded', superseded_by = $by, \
                 updated_at = time::now() \
                 WHERE tenant_id = $tenant_id AND meta::id(id) != $by \
                 AND status IN {OPEN_STATUSES}"
            ))
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("by", by.to_string()))
            .await
            .map_err(DbError::from)?;
        result.check().map_err(DbError::from_check)?;

        self.list_superseded_by(by).await
    }

    async fn set_external_id(&self, id: Uuid, external_id: &str) -> CellarResult<Subscription> {
        match self.get_by_external_id(external_id).await {
            Ok(existing) if existing.id != id => {
                return Err(CellarError::conflict(format!(
                    "external subscription {external_id} already linked to {}",
                    existing.id
                )));
            }
            Ok(_) | Err(CellarError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let result = self
            .db
            .query(
                "UPDATE type::record('subscription', $id) SET \
                 external_subscription_id = $external_id, \
                 updated_at = time::now()",
            )
            .bind(("id", id.to_string()))
            .bind(("external_id", external_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let mut result = result.check().map_err(DbError::from_check)?;
        let rows: Vec<SubscriptionRow> = result.take(0).map_err(DbError::from)?;
        Ok(Self::first(rows, id)?)
    }

    async fn update(&self, id: Uuid, update: SubscriptionUpdate) -> CellarResult<Subscription> {
        if let Some(next) = update.status {
            let current = self.get_by_id(id).await?;
            if current.status != next && !current.status.can_transition_to(next) {
                return Err(CellarError::validation(format!(
                    "subscription {id} cannot move from {} to {next}",
                    current.status
                )));
            }
        }

        let mut sets = Vec::new();
        if update.status.is_some() {
            sets.push("status = $status");
        }
        if update.current_period_start.is_some() {
            sets.push("current_period_start = $current_period_start");
        }
        if update.current_period_end.is_some() {
            sets.push("current_period_end = $current_period_end");
        }
        if update.next_billing_date.is_some() {
            sets.push("next_billing_date = $next_billing_date");
        }
        if update.cancelled_at.is_some() {
            sets.push("cancelled_at = $cancelled_at");
        }
        if update.cancellation_reason.is_some() {
            sets.push("cancellation_reason = $cancellation_reason");
        }
        sets.push("updated_at = time::now()");

        let query = format!(
            "UPDATE type::record('subscription', $id) SET {}",
            sets.join(", ")
        );
        let mut builder = self.db.query(&query).bind(("id", id.to_string()));

        if let Some(status) = update.status {
            builder = builder.bind(("status", status.as_str()));
        }
        if let Some(at) = update.current_period_start {
            builder = builder.bind(("current_period_start", at));
        }
        if let Some(at) = update.current_period_end {
            builder = builder.bind(("current_period_end", at));
        }
        if let Some(at) = update.next_billing_date {
            builder = builder.bind(("next_billing_date", at));
        }
        if let Some(at) = update.cancelled_at {
            builder = builder.bind(("cancelled_at", at));
        }
        if let Some(reason) = update.cancellation_reason {
            builder = builder.bind(("cancellation_reason", reason));
        }

        let result = builder.await.map_err(DbError::from)?;
        let mut result = result.check().map_err(DbError::from_check)?;
        let rows: Vec<SubscriptionRow> = result.take(0).map_err(DbError::from)?;
        Ok(Self::first(rows, id)?)
    }
}
