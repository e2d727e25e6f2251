//! Database-specific error types and conversions.

use cellar_core::error::CellarError;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid stored value: {0}")]
    Corrupt(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl DbError {
    /// Classify a failed statement, recognising unique-index violations.
    pub(crate) fn from_check(err: surrealdb::Error) -> Self {
        let message = err.to_string();
        if message.contains("already contains") {
            DbError::Conflict(message)
        } else {
            DbError::Query(message)
        }
    }
}

impl From<DbError> for CellarError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => CellarError::NotFound { entity, id },
            DbError::Conflict(message) => CellarError::Conflict { message },
            other => CellarError::Database(other.to_string()),
        }
    }
}
