//! Dedicated data store descriptor.

use serde::{Deserialize, Serialize};

/// Where a top-tier tenant's dedicated store lives.
///
/// Credentials are not part of the descriptor; they come from the
/// dedicated store configuration at connect time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StoreDescriptor {
    /// Endpoint URL (e.g. `ws://db-2.internal:8000` or `mem://`).
    pub url: String,
    pub namespace: String,
    pub database: String,
}

impl StoreDescriptor {
    /// Stable identifier used in health reports.
    pub fn store_id(&self) -> String {
        format!("{}/{}", self.namespace, self.database)
    }
}
