//! Cellar Access — the per-request gate in front of tenant data.
//!
//! Resolves the tenant behind a request ([`TenantDirectory`]), enforces
//! tier quotas against the usage ledger ([`SoftQuotaEnforcer`]) and
//! throttles traffic with fixed-window counters ([`RateLimiter`]).

pub mod claims;
pub mod config;
pub mod counter;
pub mod directory;
pub mod error;
pub mod quota;
pub mod rate_limit;

pub use config::AccessConfig;
pub use counter::{CounterStore, InMemoryCounterStore};
pub use directory::TenantDirectory;
pub use error::AccessError;
pub use quota::{QuotaDecision, QuotaGate, QuotaResource, SoftQuotaEnforcer, UsageSummary};
pub use rate_limit::{RateLimitDecision, RateLimiter, RateSubject};
