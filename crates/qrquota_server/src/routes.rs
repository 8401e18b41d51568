//! Quota introspection endpoints.

use crate::{AppState, MeteredSubject, quota_middleware};
use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use qrquota_error::{QrQuotaError, QrQuotaErrorKind};
use qrquota_rate_limit::ShippedTier;
use serde_json::json;
use tracing::{error, info};

/// Creates the service router: health check plus the `/api/v1/rate-limits` endpoints.
///
/// Usage, limits and reset are metered. Health and status stay outside
/// enforcement so they answer while the counter store is down.
pub fn create_router(state: AppState) -> Router {
    let metered = Router::new()
        .route("/api/v1/rate-limits/usage", get(get_usage))
        .route("/api/v1/rate-limits/limits", get(get_limits))
        .route("/api/v1/rate-limits/reset", post(reset_usage))
        .with_state(state.clone());
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/rate-limits/status", get(get_status))
        .with_state(state.clone())
        .merge(with_enforcement(metered, state))
}

/// Apply quota enforcement to an application router.
pub fn with_enforcement(router: Router, state: AppState) -> Router {
    router.layer(from_fn_with_state(state, quota_middleware))
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// Usage of the calling subject in every window of its tier.
async fn get_usage(
    State(state): State<AppState>,
    Extension(subject): Extension<MeteredSubject>,
) -> Result<Response, ApiError> {
    let report = state
        .limiter()
        .usage(&subject.id, &subject.tier, None)
        .await?;
    Ok((StatusCode::OK, Json(report)).into_response())
}

/// Every configured tier with its limits and the caller's tier.
async fn get_limits(
    State(state): State<AppState>,
    Extension(subject): Extension<MeteredSubject>,
) -> impl IntoResponse {
    let tiers: Vec<_> = state.limiter().tiers().policies().collect();
    (
        StatusCode::OK,
        Json(json!({
            "current_tier": subject.tier,
            "tiers": tiers,
        })),
    )
}

/// Clear the caller's counters. Enterprise tier only.
async fn reset_usage(
    State(state): State<AppState>,
    Extension(subject): Extension<MeteredSubject>,
) -> Result<Response, ApiError> {
    if subject.tier != ShippedTier::Enterprise.name() {
        return Ok((
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "forbidden",
                "message": "Rate limit reset is only available for the enterprise tier",
            })),
        )
            .into_response());
    }

    let removed = state.limiter().reset(&subject.id).await?;
    info!(subject = %subject.id, removed, "Usage reset via API");
    Ok((
        StatusCode::OK,
        Json(json!({
            "subject": subject.id,
            "removed": removed,
        })),
    )
        .into_response())
}

/// Counter backend health and limiter settings.
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let limiter = state.limiter();
    let available = limiter.is_available().await;
    let status = if available {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if available { "ok" } else { "degraded" },
            "backend": limiter.backend_name(),
            "backend_available": available,
            "counting": limiter.counting().to_string(),
            "tiers": limiter.tiers().tier_names().collect::<Vec<_>>(),
        })),
    )
}

/// Maps workspace errors onto HTTP responses.
#[derive(Debug)]
pub struct ApiError(QrQuotaError);

impl From<QrQuotaError> for ApiError {
    fn from(err: QrQuotaError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            QrQuotaErrorKind::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            QrQuotaErrorKind::Tier(_)
            | QrQuotaErrorKind::Config(_)
            | QrQuotaErrorKind::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!(error = %self.0, %status, "Request failed");
        (status, Json(json!({"error": self.0.kind().to_string()}))).into_response()
    }
}
