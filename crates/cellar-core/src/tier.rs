//! Static tier policy.
//!
//! Limits are compiled in; changing them is a deploy, not a data
//! migration.

use serde::{Deserialize, Serialize};

use crate::models::tenant::Tier;

/// Feature flags gated by tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Export,
    AiSuggestions,
    ApiAccess,
    CustomBranding,
    DedicatedStore,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Export => "export",
            Feature::AiSuggestions => "ai_suggestions",
            Feature::ApiAccess => "api_access",
            Feature::CustomBranding => "custom_branding",
            Feature::DedicatedStore => "dedicated_store",
        }
    }
}

/// Usage ceilings and feature flags for a tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierLimits {
    pub tier: Tier,
    /// Maximum catalogued items. `None` = unlimited.
    pub max_items: Option<u64>,
    pub max_photos_per_item: u64,
    /// Photo storage ceiling in MB. `None` = unlimited.
    pub storage_ceiling_mb: Option<u64>,
    pub requests_per_hour: u64,
    pub features: &'static [Feature],
}

impl TierLimits {
    /// | Tier       | Items     | Photos/item | Storage   | Req/hour |
    /// |------------|-----------|-------------|-----------|----------|
    /// | Free       | 25        | 1           | 100 MB    | 100      |
    /// | Basic      | 250       | 3           | 1 GB      | 1 000    |
    /// | Pro        | Unlimited | 10          | 10 GB     | 5 000    |
    /// | Enterprise | Unlimited | 25          | Unlimited | 20 000   |
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Free => Self {
                tier,
                max_items: Some(25),
                max_photos_per_item: 1,
                storage_ceiling_mb: Some(100),
                requests_per_hour: 100,
                features: &[],
            },
            Tier::Basic => Self {
                tier,
                max_items: Some(250),
                max_photos_per_item: 3,
                storage_ceiling_mb: Some(1024),
                requests_per_hour: 1_000,
                features: &[Feature::Export],
            },
            Tier::Pro => Self {
                tier,
                max_items: None,
                max_photos_per_item: 10,
                storage_ceiling_mb: Some(10_240),
                requests_per_hour: 5_000,
                features: &[Feature::Export, Feature::AiSuggestions, Feature::ApiAccess],
            },
            Tier::Enterprise => Self {
                tier,
                max_items: None,
                max_photos_per_item: 25,
                storage_ceiling_mb: None,
                requests_per_hour: 20_000,
                features: &[
                    Feature::Export,
                    Feature::AiSuggestions,
                    Feature::ApiAccess,
                    Feature::CustomBranding,
                    Feature::DedicatedStore,
                ],
            },
        }
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }
}
