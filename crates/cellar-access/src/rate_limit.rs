//! Fixed-window rate limiting.
//!
//! Counters are keyed by subject and window index. The first hit in a
//! window sets a TTL of the window length plus 60 s so stale windows
//! age out. Fixed windows allow up to twice the limit across a window
//! boundary.

use std::sync::Arc;

use cellar_core::clock::Clock;
use cellar_core::error::CellarError;
use cellar_core::models::tenant::Tier;
use cellar_core::tier::TierLimits;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::config::AccessConfig;
use crate::counter::CounterStore;

const HOUR: i64 = 3_600;
const MINUTE: i64 = 60;
const LOGIN_BLOCK: i64 = 900;
const TTL_SLACK_SECS: u64 = 60;

/// Who is being throttled.
#[derive(Debug, Clone)]
pub enum RateSubject {
    /// Per-tenant hourly budget from the tier table.
    Tenant { id: Uuid, tier: Tier },
    /// Per-client-address budget per minute.
    Ip(String),
    /// Login attempts per identifier per 15-minute block.
    Login(String),
}

impl RateSubject {
    fn window_secs(&self) -> i64 {
        match self {
            RateSubject::Tenant { .. } => HOUR,
            RateSubject::Ip(_) => MINUTE,
            RateSubject::Login(_) => LOGIN_BLOCK,
        }
    }

    fn key(&self, window_index: i64) -> String {
        match self {
            RateSubject::Tenant { id, .. } => format!("rl:tenant:{id}:{window_index}"),
            RateSubject::Ip(ip) => format!("rl:ip:{ip}:{window_index}"),
            RateSubject::Login(who) => {
                format!("rl:login:{}:{window_index}", who.to_ascii_lowercase())
            }
        }
    }
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Window end, epoch seconds.
    pub reset: i64,
    /// Seconds until the window ends, `1..=window length`.
    pub retry_after: u64,
}

impl RateLimitDecision {
    /// `X-RateLimit-*` headers, plus `Retry-After` on rejection.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("x-ratelimit-limit", self.limit.to_string()),
            ("x-ratelimit-remaining", self.remaining.to_string()),
            ("x-ratelimit-reset", self.reset.to_string()),
        ];
        if !self.allowed {
            headers.push(("retry-after", self.retry_after.to_string()));
        }
        headers
    }

    pub fn into_result(self) -> Result<Self, CellarError> {
        if self.allowed {
            Ok(self)
        } else {
            Err(CellarError::RateLimited {
                retry_after: self.retry_after,
                limit: self.limit,
                reset: self.reset,
            })
        }
    }
}

/// Fixed-window limiter over a [`CounterStore`].
pub struct RateLimiter<S: CounterStore> {
    store: S,
    clock: Arc<dyn Clock>,
    config: AccessConfig,
}

impl<S: CounterStore> RateLimiter<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>, config: AccessConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    fn limit_for(&self, subject: &RateSubject) -> u64 {
        match subject {
            RateSubject::Tenant { tier, .. } => TierLimits::for_tier(*tier).requests_per_hour,
            RateSubject::Ip(_) => self.config.ip_requests_per_minute,
            RateSubject::Login(_) => self.config.login_attempts_per_block,
        }
    }

    /// Count one request against `subject` and decide.
    ///
    /// Counter store failures let the request through.
    pub async fn check(&self, subject: &RateSubject) -> RateLimitDecision {
        let limit = self.limit_for(subject);
        let window = subject.window_secs();
        let now = self.clock.now().timestamp();
        let index = now.div_euclid(window);
        let reset = (index + 1) * window;
        let retry_after = (reset - now) as u64;

        let open = RateLimitDecision {
            allowed: true,
            limit,
            remaining: limit,
            reset,
            retry_after,
        };
        if !self.config.rate_limit_enabled {
            return open;
        }

        let key = subject.key(index);
        let count = match self.store.incr(&key, 1).await {
            Ok(count) => count,
            Err(e) => {
                warn!(key = %key, error = %e, "Rate limit store unavailable, allowing request");
                return open;
            }
        };
        if count == 1 {
            if let Err(e) = self.store.expire(&key, window as u64 + TTL_SLACK_SECS).await {
                warn!(key = %key, error = %e, "Failed to set rate limit TTL");
            }
        }

        let allowed = count <= limit;
        if !allowed {
            warn!(key = %key, count, limit, retry_after, "Rate limit exceeded");
        }
        RateLimitDecision {
            allowed,
            limit,
            remaining: limit.saturating_sub(count),
            reset,
            retry_after,
        }
    }
}
