//! Mapping of domain errors onto HTTP responses.

use axum::Json;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use cellar_core::error::CellarError;
use serde_json::json;
use tracing::error;

/// A [`CellarError`] on its way out as a response.
#[derive(Debug)]
pub struct ApiError(pub CellarError);

impl<E: Into<CellarError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            CellarError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            CellarError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            CellarError::Validation { .. } => (StatusCode::BAD_REQUEST, "validation_error"),
            CellarError::AuthenticationFailed { .. } => {
                (StatusCode::UNAUTHORIZED, "authentication_failed")
            }
            CellarError::Provider { .. } => (StatusCode::BAD_GATEWAY, "provider_error"),
            CellarError::LimitExceeded { .. } => (StatusCode::FORBIDDEN, "limit_exceeded"),
            CellarError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            CellarError::ProvisioningMissing { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "provisioning_missing")
            }
            CellarError::TenantInactive { .. } => (StatusCode::FORBIDDEN, "tenant_inactive"),
            CellarError::TenantContext => (StatusCode::BAD_REQUEST, "tenant_context"),
            CellarError::Database(_) | CellarError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let body = match &self.0 {
            CellarError::RateLimited {
                retry_after,
                limit,
                reset,
            } => json!({
                "code": code,
                "message": self.0.to_string(),
                "retry_after": retry_after,
                "limit": limit,
                "reset": reset,
            }),
            CellarError::LimitExceeded {
                resource,
                current,
                limit,
            } => json!({
                "code": code,
                "message": self.0.to_string(),
                "resource": resource,
                "current": current,
                "limit": limit,
            }),
            CellarError::Database(_) | CellarError::Internal(_) => {
                error!(error = %self.0, "Request failed");
                json!({ "code": code, "message": "internal error" })
            }
            other => json!({ "code": code, "message": other.to_string() }),
        };

        let mut response = (status, Json(body)).into_response();
        if let CellarError::RateLimited {
            retry_after,
            limit,
            reset,
        } = &self.0
        {
            let headers = response.headers_mut();
            for (name, value) in [
                ("retry-after", retry_after.to_string()),
                ("x-ratelimit-limit", limit.to_string()),
                ("x-ratelimit-remaining", "0".to_string()),
                ("x-ratelimit-reset", reset.to_string()),
            ] {
                if let Ok(value) = HeaderValue::from_str(&value) {
                    headers.insert(name, value);
                }
            }
        }
        response
    }
}
