//! Quota ledger model: per-tenant usage counters per billing period.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CellarError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UsageMetricKind {
    ItemCount,
    PhotoCount,
    /// Stored photo bytes, recorded in whole kilobytes.
    StorageKb,
}

impl UsageMetricKind {
    pub const ALL: [UsageMetricKind; 3] = [
        UsageMetricKind::ItemCount,
        UsageMetricKind::PhotoCount,
        UsageMetricKind::StorageKb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UsageMetricKind::ItemCount => "item_count",
            UsageMetricKind::PhotoCount => "photo_count",
            UsageMetricKind::StorageKb => "storage_kb",
        }
    }
}

impl fmt::Display for UsageMetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UsageMetricKind {
    type Err = CellarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "item_count" => Ok(UsageMetricKind::ItemCount),
            "photo_count" => Ok(UsageMetricKind::PhotoCount),
            "storage_kb" => Ok(UsageMetricKind::StorageKb),
            other => Err(CellarError::validation(format!("unknown metric: {other}"))),
        }
    }
}

/// A calendar-month billing window, `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BillingPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BillingPeriod {
    /// The calendar month containing `at`.
    pub fn containing(at: DateTime<Utc>) -> Self {
        let start = Utc
            .with_ymd_and_hms(at.year(), at.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(at);
        let end = start.checked_add_months(Months::new(1)).unwrap_or(start);
        Self { start, end }
    }

    /// Short key such as `2026-03`.
    pub fn key(&self) -> String {
        self.start.format("%Y-%m").to_string()
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageMetric {
    pub tenant_id: Uuid,
    pub metric: UsageMetricKind,
    pub value: u64,
    pub period: BillingPeriod,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_is_calendar_month() {
        let at = Utc.with_ymd_and_hms(2026, 12, 17, 23, 59, 59).unwrap();
        let period = BillingPeriod::containing(at);
        assert_eq!(period.start, Utc.with_ymd_and_hms(2026, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(period.end, Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(period.key(), "2026-12");
        assert!(period.contains(at));
        assert!(!period.contains(period.end));
    }
}
