//! HTTP routes.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cellar_access::{QuotaDecision, QuotaGate, QuotaResource, UsageSummary};
use cellar_billing::{BillingProvider, SIGNATURE_HEADER, UpgradeOutcome, WebhookOutcome};
use cellar_core::error::CellarError;
use cellar_core::models::plan::Plan;
use cellar_core::models::subscription::{BillingCycle, Subscription};
use cellar_core::models::tenant::{TenantStatus, Tier};
use cellar_db::StoreBackend;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::middleware::{
    RequestTenant, TenantStore, active_tenant, ip_rate_limit, tenant_context, tenant_store,
};
use crate::state::AppState;

/// Webhook providers this deployment accepts.
const WEBHOOK_PROVIDERS: &[&str] = &["paypal"];

/// Build the application router.
pub fn app<P: BillingProvider + 'static>(state: Arc<AppState<P>>) -> Router {
    let data_routes = Router::new()
        .route("/usage", get(usage::<P>))
        .route("/usage/reserve", post(reserve::<P>))
        .route("/usage/release", post(release::<P>))
        .route("/store/health", get(store_health::<P>))
        .route_layer(from_fn_with_state(state.clone(), tenant_store::<P>))
        .route_layer(from_fn(active_tenant));

    let tenant_routes = Router::new()
        .route("/subscription", get(current_subscription::<P>))
        .route("/subscription/upgrade", post(upgrade::<P>))
        .route("/subscription/activate", post(activate::<P>))
        .route("/subscription/cancel", post(cancel::<P>))
        .merge(data_routes)
        .route_layer(from_fn_with_state(state.clone(), tenant_context::<P>))
        .route_layer(from_fn_with_state(state.clone(), ip_rate_limit::<P>));

    Router::new()
        .route("/health", get(health::<P>))
        .route("/plans", get(plans::<P>))
        .route("/webhooks/{provider}", post(webhook::<P>))
        .merge(tenant_routes)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Public
// ---------------------------------------------------------------------------

async fn health<P: BillingProvider + 'static>(State(state): State<Arc<AppState<P>>>) -> Response {
    let report = state.router.health_check().await;
    let healthy = report.is_healthy();
    let stores: BTreeMap<&str, String> = report
        .stores
        .iter()
        .map(|(id, result)| {
            let status = match result {
                Ok(()) => "ok".to_string(),
                Err(e) => format!("error: {e}"),
            };
            (id.as_str(), status)
        })
        .collect();

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": if healthy { "ok" } else { "degraded" },
        "stores": stores,
    });
    (status, Json(body)).into_response()
}

async fn plans<P: BillingProvider + 'static>(
    State(state): State<Arc<AppState<P>>>,
) -> ApiResult<Json<Vec<Plan>>> {
    Ok(Json(state.billing.list_plans().await?))
}

async fn webhook<P: BillingProvider + 'static>(
    State(state): State<Arc<AppState<P>>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookOutcome>> {
    if !WEBHOOK_PROVIDERS.contains(&provider.as_str()) {
        return Err(CellarError::not_found("webhook provider", &provider).into());
    }
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let outcome = state
        .webhooks
        .receive(&state.billing, &body, signature)
        .await?;
    Ok(Json(outcome))
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SubscriptionView {
    tier: Tier,
    status: TenantStatus,
    /// `None` means the tenant is on the free tier.
    subscription: Option<Subscription>,
}

async fn current_subscription<P: BillingProvider + 'static>(
    State(state): State<Arc<AppState<P>>>,
    Extension(RequestTenant(tenant)): Extension<RequestTenant>,
) -> ApiResult<Json<SubscriptionView>> {
    let subscription = state.billing.current_subscription(tenant.id).await?;
    Ok(Json(SubscriptionView {
        tier: tenant.tier,
        status: tenant.status,
        subscription,
    }))
}

#[derive(Debug, Deserialize)]
struct UpgradeRequest {
    plan_id: Uuid,
    billing_cycle: BillingCycle,
}

async fn upgrade<P: BillingProvider + 'static>(
    State(state): State<Arc<AppState<P>>>,
    Extension(RequestTenant(tenant)): Extension<RequestTenant>,
    Json(request): Json<UpgradeRequest>,
) -> ApiResult<(StatusCode, Json<UpgradeOutcome>)> {
    let outcome = state
        .billing
        .initiate_upgrade(tenant.id, request.plan_id, request.billing_cycle)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[derive(Debug, Deserialize)]
struct ActivateRequest {
    /// The provider's subscription ID from the approval redirect.
    subscription_id: String,
}

async fn activate<P: BillingProvider + 'static>(
    State(state): State<Arc<AppState<P>>>,
    Extension(RequestTenant(tenant)): Extension<RequestTenant>,
    Json(request): Json<ActivateRequest>,
) -> ApiResult<Json<Subscription>> {
    Ok(Json(
        state
            .billing
            .activate_for_tenant(tenant.id, &request.subscription_id)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
struct CancelRequest {
    reason: Option<String>,
}

async fn cancel<P: BillingProvider + 'static>(
    State(state): State<Arc<AppState<P>>>,
    Extension(RequestTenant(tenant)): Extension<RequestTenant>,
    request: Option<Json<CancelRequest>>,
) -> ApiResult<Json<serde_json::Value>> {
    let reason = request.and_then(|Json(r)| r.reason);
    let cancelled = state.billing.cancel(tenant.id, reason).await?;
    Ok(Json(json!({ "subscription": cancelled })))
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

async fn usage<P: BillingProvider + 'static>(
    State(state): State<Arc<AppState<P>>>,
    Extension(RequestTenant(tenant)): Extension<RequestTenant>,
) -> ApiResult<Json<UsageSummary>> {
    Ok(Json(state.quotas.usage_summary(tenant.id).await?))
}

#[derive(Debug, Deserialize)]
struct UsageChange {
    resource: QuotaResource,
    amount: u64,
}

async fn reserve<P: BillingProvider + 'static>(
    State(state): State<Arc<AppState<P>>>,
    Extension(RequestTenant(tenant)): Extension<RequestTenant>,
    Json(change): Json<UsageChange>,
) -> ApiResult<Json<QuotaDecision>> {
    let decision = state
        .quotas
        .check_and_reserve(tenant.id, change.resource, change.amount)
        .await?;
    decision.into_result(change.resource)?;
    Ok(Json(decision))
}

async fn release<P: BillingProvider + 'static>(
    State(state): State<Arc<AppState<P>>>,
    Extension(RequestTenant(tenant)): Extension<RequestTenant>,
    Json(change): Json<UsageChange>,
) -> ApiResult<StatusCode> {
    state
        .quotas
        .release(tenant.id, change.resource, change.amount)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn store_health<P: BillingProvider + 'static>(
    State(state): State<Arc<AppState<P>>>,
    Extension(RequestTenant(tenant)): Extension<RequestTenant>,
    Extension(TenantStore(store)): Extension<TenantStore>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .router
        .backend()
        .ping(&store)
        .await
        .map_err(CellarError::from)?;
    let kind = if tenant.dedicated_store.is_some() {
        "dedicated"
    } else {
        "shared"
    };
    Ok(Json(json!({ "store": kind, "status": "ok" })))
}
