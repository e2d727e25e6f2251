//! Per-request gates: client-address throttling, tenant resolution,
//! per-tenant throttling and store routing.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use cellar_access::directory::{TenantHints, require_active};
use cellar_access::{RateLimitDecision, RateSubject};
use cellar_billing::BillingProvider;
use cellar_core::error::CellarError;
use cellar_core::models::tenant::Tenant;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// The resolved tenant, attached to request extensions.
#[derive(Debug, Clone)]
pub struct RequestTenant(pub Tenant);

/// Handle to the store holding the tenant's domain data.
#[derive(Clone)]
pub struct TenantStore(pub Surreal<Any>);

/// Best-effort client address from proxy headers.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

fn apply_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    for (name, value) in decision.headers() {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}

/// Throttle by client address.
pub async fn ip_rate_limit<P: BillingProvider + 'static>(
    State(state): State<Arc<AppState<P>>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(request.headers());
    let decision = state.limiter.check(&RateSubject::Ip(ip.clone())).await;
    if let Err(e) = decision.into_result() {
        warn!(ip = %ip, "Client address rate limited");
        return ApiError(e).into_response();
    }
    next.run(request).await
}

/// Resolve the tenant, charge its hourly budget and attach it to the
/// request. Inactive tenants get through so they can still manage their
/// subscription. No store is resolved here; see [`tenant_store`].
pub async fn tenant_context<P: BillingProvider + 'static>(
    State(state): State<Arc<AppState<P>>>,
    mut request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();
    let host = header_text(headers, header::HOST.as_str());
    let tenant_header = header_text(headers, TENANT_HEADER);
    let token = bearer(headers).map(str::to_owned);

    let hints = TenantHints {
        host: host.as_deref(),
        tenant_id: tenant_header.as_deref(),
        bearer: token.as_deref(),
    };
    let tenant = match state.directory.resolve(&hints).await {
        Ok(tenant) => tenant,
        Err(e) => return ApiError(e).into_response(),
    };

    let subject = RateSubject::Tenant {
        id: tenant.id,
        tier: tenant.effective_tier(),
    };
    let decision = state.limiter.check(&subject).await;
    if !decision.allowed {
        warn!(tenant_id = %tenant.id, retry_after = decision.retry_after, "Tenant rate limited");
    }
    let decision = match decision.into_result() {
        Ok(decision) => decision,
        Err(e) => return ApiError(e).into_response(),
    };

    request.extensions_mut().insert(RequestTenant(tenant));

    let mut response = next.run(request).await;
    apply_headers(&mut response, &decision);
    response
}

/// Reject suspended and cancelled tenants. Runs after [`tenant_context`].
pub async fn active_tenant(request: Request, next: Next) -> Response {
    match request.extensions().get::<RequestTenant>() {
        Some(RequestTenant(tenant)) => {
            if let Err(e) = require_active(tenant) {
                return ApiError(e).into_response();
            }
        }
        None => return ApiError(CellarError::TenantContext).into_response(),
    }
    next.run(request).await
}

/// Attach the tenant's data store handle. Runs after [`tenant_context`]
/// on data routes only, so a top-tier tenant whose store is missing can
/// still reach its subscription routes.
pub async fn tenant_store<P: BillingProvider + 'static>(
    State(state): State<Arc<AppState<P>>>,
    mut request: Request,
    next: Next,
) -> Response {
    let tenant = request
        .extensions()
        .get::<RequestTenant>()
        .map(|RequestTenant(tenant)| tenant.clone());
    let store = match tenant {
        Some(tenant) => state.router.resolve_tenant(&tenant).await,
        None => Err(CellarError::TenantContext),
    };
    match store {
        Ok(store) => {
            request.extensions_mut().insert(TenantStore(store));
            next.run(request).await
        }
        Err(e) => ApiError(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "10.0.0.2".parse().unwrap());
        assert_eq!(client_ip(&headers), "203.0.113.7");

        headers.remove("x-forwarded-for");
        assert_eq!(client_ip(&headers), "10.0.0.2");

        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn bearer_requires_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer(&headers), None);
        headers.insert(header::AUTHORIZATION, "Bearer tok".parse().unwrap());
        assert_eq!(bearer(&headers), Some("tok"));
    }
}
