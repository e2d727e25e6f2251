//! SurrealDB implementation of [`UsageRepository`].
//!
//! One record per (tenant, metric, month), keyed deterministically so
//! increments are a single atomic `UPSERT`.

use cellar_core::error::{CellarError, CellarResult};
use cellar_core::models::usage::{BillingPeriod, UsageMetric, UsageMetricKind};
use cellar_core::repository::UsageRepository;
use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{parse_enum, parse_uuid};
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct UsageRow {
    tenant_id: String,
    metric: String,
    amount: u64,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UsageRow {
    fn into_metric(self) -> Result<UsageMetric, DbError> {
        Ok(UsageMetric {
            tenant_id: parse_uuid(&self.tenant_id, "tenant_id")?,
            metric: parse_enum(&self.metric)?,
            value: self.amount,
            period: BillingPeriod {
                start: self.period_start,
                end: self.period_end,
            },
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, SurrealValue)]
struct AmountRow {
    amount: u64,
}

fn record_key(tenant_id: Uuid, metric: UsageMetricKind, period: &BillingPeriod) -> String {
    format!("{}_{}_{}", tenant_id.simple(), metric.as_str(), period.key())
}

fn to_signed(value: u64) -> Result<i64, CellarError> {
    i64::try_from(value).map_err(|_| CellarError::validation("usage delta out of range"))
}

/// SurrealDB implementation of the usage ledger.
pub struct SurrealUsageRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> Clone for SurrealUsageRepository<C> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
        }
    }
}

impl<C: Connection> SurrealUsageRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    /// Apply `amount = max(0, amount + delta)` (or `= value` when
    /// `absolute`) and return the stored amount.
    async fn write(
        &self,
        tenant_id: Uuid,
        metric: UsageMetricKind,
        period: BillingPeriod,
        delta: i64,
        absolute: bool,
    ) -> CellarResult<u64> {
        let expr = if absolute {
            "$delta"
        } else {
            "math::max([0, (amount ?? 0) + $delta])"
        };
        let query = format!(
            "UPSERT type::record('usage_metric', $key) SET \
             tenant_id = $tenant_id, metric = $metric, \
             period_start = $period_start, period_end = $period_end, \
             amount = {expr}, updated_at = time::now()"
        );

        let result = self
            .db
            .query(query)
            .bind(("key", record_key(tenant_id, metric, &period)))
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("metric", metric.as_str()))
            .bind(("period_start", period.start))
            .bind(("period_end", period.end))
            .bind(("delta", delta))
            .await
            .map_err(DbError::from)?;

        let mut result = result.check().map_err(DbError::from_check)?;
        let rows: Vec<AmountRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| {
            DbError::Query(format!("usage upsert for {tenant_id} returned nothing"))
        })?;
        Ok(row.amount)
    }
}

impl<C: Connection> UsageRepository for SurrealUsageRepository<C> {
    async fn get(
        &self,
        tenant_id: Uuid,
        metric: UsageMetricKind,
        period: BillingPeriod,
    ) -> CellarResult<u64> {
        let mut result = self
            .db
            .query("SELECT amount FROM type::record('usage_metric', $key)")
            .bind(("key", record_key(tenant_id, metric, &period)))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<AmountRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().map(|r| r.amount).unwrap_or(0))
    }

    async fn increment(
        &self,
        tenant_id: Uuid,
        metric: UsageMetricKind,
        delta: u64,
        period: BillingPeriod,
    ) -> CellarResult<u64> {
        self.write(tenant_id, metric, period, to_signed(delta)?, false)
            .await
    }

    async fn decrement(
        &self,
        tenant_id: Uuid,
        metric: UsageMetricKind,
        delta: u64,
        period: BillingPeriod,
    ) -> CellarResult<u64> {
        self.write(tenant_id, metric, period, -to_signed(delta)?, false)
            .await
    }

    async fn set(
        &self,
        tenant_id: Uuid,
        metric: UsageMetricKind,
        value: u64,
        period: BillingPeriod,
    ) -> CellarResult<u64> {
        self.write(tenant_id, metric, period, to_signed(value)?, true)
            .await
    }

    async fn list_for_period(
        &self,
        tenant_id: Uuid,
        period: BillingPeriod,
    ) -> CellarResult<Vec<UsageMetric>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM usage_metric \
                 WHERE tenant_id = $tenant_id AND period_start = $period_start \
                 ORDER BY metric ASC",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("period_start", period.start))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UsageRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows
            .into_iter()
            .map(UsageRow::into_metric)
            .collect::<Result<Vec<_>, DbError>>()?)
    }
}
