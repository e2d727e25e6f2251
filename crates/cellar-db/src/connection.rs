//! SurrealDB connection management.

use std::time::Duration;

use surrealdb::Surreal;
use surrealdb::engine::any::{self, Any};
use surrealdb::opt::auth::Root;
use tracing::info;

use crate::error::DbError;

/// Configuration for connecting to the shared SurrealDB store.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Endpoint URL (e.g., `ws://127.0.0.1:8000`, or `mem://` for tests).
    pub url: String,
    /// SurrealDB namespace.
    pub namespace: String,
    /// SurrealDB database name.
    pub database: String,
    /// Root username. Empty skips sign-in (embedded engines).
    pub username: String,
    /// Root password for authentication.
    pub password: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000".into(),
            namespace: "cellar".into(),
            database: "main".into(),
            username: "root".into(),
            password: "root".into(),
        }
    }
}

impl DbConfig {
    /// Read `CELLAR_DB_*` variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("CELLAR_DB_URL").unwrap_or(defaults.url),
            namespace: std::env::var("CELLAR_DB_NAMESPACE").unwrap_or(defaults.namespace),
            database: std::env::var("CELLAR_DB_DATABASE").unwrap_or(defaults.database),
            username: std::env::var("CELLAR_DB_USERNAME").unwrap_or(defaults.username),
            password: std::env::var("CELLAR_DB_PASSWORD").unwrap_or(defaults.password),
        }
    }
}

/// Where and how dedicated (top-tier) stores are created.
#[derive(Debug, Clone)]
pub struct DedicatedStoreConfig {
    /// Server hosting dedicated databases.
    pub url: String,
    /// Namespace the per-tenant databases are created in.
    pub namespace: String,
    pub username: String,
    pub password: String,
    /// Bound on connecting to a dedicated store.
    pub connect_timeout_secs: u64,
}

impl Default for DedicatedStoreConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000".into(),
            namespace: "cellar_dedicated".into(),
            username: "root".into(),
            password: "root".into(),
            connect_timeout_secs: 5,
        }
    }
}

impl DedicatedStoreConfig {
    /// Read `CELLAR_DEDICATED_*` variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("CELLAR_DEDICATED_URL").unwrap_or(defaults.url),
            namespace: std::env::var("CELLAR_DEDICATED_NAMESPACE").unwrap_or(defaults.namespace),
            username: std::env::var("CELLAR_DEDICATED_USERNAME").unwrap_or(defaults.username),
            password: std::env::var("CELLAR_DEDICATED_PASSWORD").unwrap_or(defaults.password),
            connect_timeout_secs: std::env::var("CELLAR_DEDICATED_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.connect_timeout_secs),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Open a connection, sign in when credentials are given, and select
/// the namespace and database.
pub(crate) async fn open(
    url: &str,
    username: &str,
    password: &str,
    namespace: &str,
    database: &str,
) -> Result<Surreal<Any>, DbError> {
    let db = any::connect(url).await?;

    if !username.is_empty() {
        db.signin(Root {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await?;
    }

    db.use_ns(namespace).use_db(database).await?;
    Ok(db)
}

/// Manages the connection to the shared SurrealDB store.
#[derive(Clone)]
pub struct DbManager {
    db: Surreal<Any>,
}

impl DbManager {
    /// Connect to SurrealDB using the provided configuration.
    ///
    /// Authenticates as root, selects the configured namespace and
    /// database, and returns a ready-to-use manager.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            url = %config.url,
            namespace = %config.namespace,
            database = %config.database,
            "Connecting to SurrealDB"
        );

        let db = open(
            &config.url,
            &config.username,
            &config.password,
            &config.namespace,
            &config.database,
        )
        .await?;

        info!("Successfully connected to SurrealDB");

        Ok(Self { db })
    }

    /// Returns a reference to the underlying SurrealDB client.
    pub fn client(&self) -> &Surreal<Any> {
        &self.db
    }
}
