//! Schema definitions and migration runner for SurrealDB.
//!
//! Tables are SCHEMAFULL. UUIDs are stored as strings, enums as their
//! snake_case names guarded by ASSERT. A dedicated tenant store runs the
//! same migrations as the shared store.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct AppliedMigration {
    version: u32,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "tenancy_billing_usage",
    sql: SCHEMA_V1,
}];

const SCHEMA_V1: &str = "\
-- Tenants: one row per customer, keyed by subdomain.
DEFINE TABLE tenant SCHEMAFULL;
DEFINE FIELD subdomain ON TABLE tenant TYPE string \
    ASSERT string::len($value) > 0;
DEFINE FIELD name ON TABLE tenant TYPE string;
DEFINE FIELD tier ON TABLE tenant TYPE string \
    ASSERT $value IN ['free', 'basic', 'pro', 'enterprise'] \
    DEFAULT 'free';
DEFINE FIELD status ON TABLE tenant TYPE string \
    ASSERT $value IN ['active', 'suspended', 'cancelled'] \
    DEFAULT 'active';
DEFINE FIELD store_url ON TABLE tenant TYPE option<string>;
DEFINE FIELD store_namespace ON TABLE tenant TYPE option<string>;
DEFINE FIELD store_database ON TABLE tenant TYPE option<string>;
DEFINE FIELD created_at ON TABLE tenant TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE tenant TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_tenant_subdomain ON TABLE tenant \
    COLUMNS subdomain UNIQUE;

-- Plans: the purchasable catalogue.
DEFINE TABLE plan SCHEMAFULL;
DEFINE FIELD name ON TABLE plan TYPE string;
DEFINE FIELD tier ON TABLE plan TYPE string \
    ASSERT $value IN ['free', 'basic', 'pro', 'enterprise'];
DEFINE FIELD monthly_price_cents ON TABLE plan TYPE int \
    ASSERT $value >= 0;
DEFINE FIELD yearly_price_cents ON TABLE plan TYPE int \
    ASSERT $value >= 0;
DEFINE FIELD currency ON TABLE plan TYPE string;
DEFINE FIELD provider_plan_monthly ON TABLE plan TYPE option<string>;
DEFINE FIELD provider_plan_yearly ON TABLE plan TYPE option<string>;
DEFINE FIELD active ON TABLE plan TYPE bool DEFAULT true;
DEFINE FIELD created_at ON TABLE plan TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_plan_name ON TABLE plan COLUMNS name UNIQUE;

-- Subscriptions: history per tenant, at most one non-terminal.
DEFINE TABLE subscription SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE subscription TYPE string;
DEFINE FIELD plan_id ON TABLE subscription TYPE string;
DEFINE FIELD status ON TABLE subscription TYPE string \
    ASSERT $value IN ['pending', 'active', 'past_due', 'trialing', \
    'suspended', 'cancelled', 'expired'];
DEFINE FIELD billing_cycle ON TABLE subscription TYPE string \
    ASSERT $value IN ['monthly', 'yearly'];
DEFINE FIELD external_subscription_id ON TABLE subscription \
    TYPE option<string>;
DEFINE FIELD current_period_start ON TABLE subscription \
    TYPE option<datetime>;
DEFINE FIELD current_period_end ON TABLE subscription \
    TYPE option<datetime>;
DEFINE FIELD next_billing_date ON TABLE subscription \
    TYPE option<datetime>;
DEFINE FIELD cancelled_at ON TABLE subscription TYPE option<datetime>;
DEFINE FIELD cancellation_reason ON TABLE subscription \
    TYPE option<string>;
DEFINE FIELD superseded_by ON TABLE subscription TYPE option<string>;
DEFINE FIELD created_at ON TABLE subscription TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE subscription TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_subscription_tenant ON TABLE subscription \
    COLUMNS tenant_id;
DEFINE INDEX idx_subscription_external ON TABLE subscription \
    COLUMNS external_subscription_id;

-- Usage counters: one row per (tenant, metric, calendar month).
DEFINE TABLE usage_metric SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE usage_metric TYPE string;
DEFINE FIELD metric ON TABLE usage_metric TYPE string \
    ASSERT $value IN ['item_count', 'photo_count', 'storage_kb'];
DEFINE FIELD amount ON TABLE usage_metric TYPE int DEFAULT 0 \
    ASSERT $value >= 0;
DEFINE FIELD period_start ON TABLE usage_metric TYPE datetime;
DEFINE FIELD period_end ON TABLE usage_metric TYPE datetime;
DEFINE FIELD updated_at ON TABLE usage_metric TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_usage_tenant_period ON TABLE usage_metric \
    COLUMNS tenant_id, period_start;
";

/// Apply all pending migrations to the database.
///
/// Creates a `_migration` tracking table on first run, then applies
/// each migration whose version exceeds the current maximum.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let mut result = db
        .query("SELECT version FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let applied: Vec<AppliedMigration> = result.take(0)?;
    let current_version = applied.first().map(|m| m.version).unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }
        info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        db.query(migration.sql).await?.check().map_err(|e| {
            DbError::Migration(format!(
                "Migration v{} '{}' failed: {}",
                migration.version, migration.name, e,
            ))
        })?;

        db.query("CREATE _migration SET version = $version, name = $name")
            .bind(("version", migration.version))
            .bind(("name", migration.name))
            .await?
            .check()
            .map_err(|e| {
                DbError::Migration(format!(
                    "Failed to record migration v{}: {}",
                    migration.version, e,
                ))
            })?;
    }

    Ok(())
}

/// Returns the raw schema DDL for version 1.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(window[0].version < window[1].version);
        }
    }

    #[test]
    fn schema_covers_every_table() {
        for table in ["tenant", "plan", "subscription", "usage_metric"] {
            assert!(
                SCHEMA_V1.contains(&format!("DEFINE TABLE {table} SCHEMAFULL")),
                "missing {table}"
            );
        }
    }
}
