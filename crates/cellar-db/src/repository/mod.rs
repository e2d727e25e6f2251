//! SurrealDB repository implementations.

mod plan;
mod subscription;
mod tenant;
mod usage;

pub use plan::SurrealPlanRepository;
pub use subscription::SurrealSubscriptionRepository;
pub use tenant::SurrealTenantRepository;
pub use usage::SurrealUsageRepository;

use std::str::FromStr;

use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::DbError;

/// Row struct for count queries.
#[derive(Debug, SurrealValue)]
pub(crate) struct CountRow {
    pub total: u64,
}

pub(crate) fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(raw).map_err(|e| DbError::Corrupt(format!("{field}: {e}")))
}

pub(crate) fn parse_enum<T>(raw: &str) -> Result<T, DbError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| DbError::Corrupt(e.to_string()))
}
