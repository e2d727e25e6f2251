//! Cellar Database — SurrealDB connection management, repository
//! implementations, tenant connection routing and dedicated store
//! provisioning.
//!
//! This crate provides:
//! - Connection management ([`DbManager`], [`DbConfig`])
//! - Schema initialization and migrations ([`run_migrations`])
//! - Repository implementations of the `cellar-core` traits
//! - The [`TenantConnectionRouter`] and its [`StoreBackend`] seam
//! - Dedicated store provisioning ([`TenantProvisioner`])

mod connection;
mod error;
pub mod provisioning;
pub mod repository;
pub mod router;
mod schema;

pub use connection::{DbConfig, DbManager, DedicatedStoreConfig};
pub use error::DbError;
pub use provisioning::TenantProvisioner;
pub use router::{
    CloseReport, HealthReport, StoreBackend, SurrealStoreBackend, TenantConnectionRouter,
};
pub use schema::{run_migrations, schema_v1};
