//! Server configuration, assembled from the per-crate configs.

use cellar_access::AccessConfig;
use cellar_billing::BillingConfig;
use cellar_db::{DbConfig, DedicatedStoreConfig};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind_addr: String,
    pub db: DbConfig,
    pub dedicated: DedicatedStoreConfig,
    pub access: AccessConfig,
    pub billing: BillingConfig,
    /// How often expired rate-limit counters are purged, in seconds.
    pub counter_purge_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
            db: DbConfig::default(),
            dedicated: DedicatedStoreConfig::default(),
            access: AccessConfig::default(),
            billing: BillingConfig::default(),
            counter_purge_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("CELLAR_BIND_ADDR").unwrap_or(defaults.bind_addr),
            db: DbConfig::from_env(),
            dedicated: DedicatedStoreConfig::from_env(),
            access: AccessConfig::from_env(),
            billing: BillingConfig::from_env(),
            counter_purge_interval_secs: std::env::var("CELLAR_COUNTER_PURGE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.counter_purge_interval_secs),
        }
    }
}
