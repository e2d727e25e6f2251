//! SurrealDB implementation of [`PlanRepository`].

use cellar_core::error::CellarResult;
use cellar_core::models::plan::{CreatePlan, Plan};
use cellar_core::repository::PlanRepository;
use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{parse_enum, parse_uuid};
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct PlanRow {
    name: String,
    tier: String,
    monthly_price_cents: u64,
    yearly_price_cents: u64,
    currency: String,
    provider_plan_monthly: Option<String>,
    provider_plan_yearly: Option<String>,
    active: bool,
    created_at: DateTime<Utc>,
}

impl PlanRow {
    fn into_plan(self, id: Uuid) -> Result<Plan, DbError> {
        Ok(Plan {
            id,
            name: self.name,
            tier: parse_enum(&self.tier)?,
            monthly_price_cents: self.monthly_price_cents,
            yearly_price_cents: self.yearly_price_cents,
            currency: self.currency,
            provider_plan_monthly: self.provider_plan_monthly,
            provider_plan_yearly: self.provider_plan_yearly,
            active: self.active,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, SurrealValue)]
struct PlanRowWithId {
    record_id: String,
    name: String,
    tier: String,
    monthly_price_cents: u64,
    yearly_price_cents: u64,
    currency: String,
    provider_plan_monthly: Option<String>,
    provider_plan_yearly: Option<String>,
    active: bool,
    created_at: DateTime<Utc>,
}

/// SurrealDB implementation of the Plan repository.
pub struct SurrealPlanRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> Clone for SurrealPlanRepository<C> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
        }
    }
}

impl<C: Connection> SurrealPlanRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> PlanRepository for SurrealPlanRepository<C> {
    async fn create(&self, input: CreatePlan) -> CellarResult<Plan> {
        let id = Uuid::new_v4();
        let result = self
            .db
            .query(
                "CREATE type::record('plan', $id) SET \
                 name = $name, tier = $tier, \
                 monthly_price_cents = $monthly, yearly_price_cents = $yearly, \
                 currency = $currency, \
                 provider_plan_monthly = $provider_monthly, \
                 provider_plan_yearly = $provider_yearly",
            )
            .bind(("id", id.to_string()))
            .bind(("name", input.name))
            .bind(("tier", input.tier.as_str()))
            .bind(("monthly", input.monthly_price_cents))
            .bind(("yearly", input.yearly_price_cents))
            .bind(("currency", input.currency.to_ascii_uppercase()))
            .bind(("provider_monthly", input.provider_plan_monthly))
            .bind(("provider_yearly", input.provider_plan_yearly))
            .await
            .map_err(DbError::from)?;

        let mut result = result.check().map_err(DbError::from_check)?;
        let rows: Vec<PlanRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "plan".into(),
            id: id.to_string(),
        })?;
        Ok(row.into_plan(id)?)
    }

    async fn get_by_id(&self, id: Uuid) -> CellarResult<Plan> {
        let mut result = self
            .db
            .query("SELECT * FROM type::record('plan', $id)")
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PlanRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "plan".into(),
            id: id.to_string(),
        })?;
        Ok(row.into_plan(id)?)
    }

    async fn list_active(&self) -> CellarResult<Vec<Plan>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM plan \
                 WHERE active = true ORDER BY monthly_price_cents ASC",
            )
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PlanRowWithId> = result.take(0).map_err(DbError::from)?;
        let plans = rows
            .into_iter()
            .map(|row| {
                let id = parse_uuid(&row.record_id, "plan id")?;
                PlanRow {
                    name: row.name,
                    tier: row.tier,
                    monthly_price_cents: row.monthly_price_cents,
                    yearly_price_cents: row.yearly_price_cents,
                    currency: row.currency,
                    provider_plan_monthly: row.provider_plan_monthly,
                    provider_plan_yearly: row.provider_plan_yearly,
                    active: row.active,
                    created_at: row.created_at,
                }
                .into_plan(id)
            })
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(plans)
    }
}
