//! Quota enforcement middleware.

use crate::{AppState, MeteredSubject};
use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use qrquota_core::SubjectId;
use qrquota_rate_limit::{GateOutcome, GateVerdict, RateLimitHeaders};
use serde_json::json;
use std::net::SocketAddr;
use tracing::{debug, instrument, warn};

/// Gate every metered request through the enforcement gate.
///
/// Unmetered paths pass through untouched. With `scope_by_path` each path is
/// counted under its own budget. Metered requests get rate-limit headers,
/// per-window counts included, on every response:
///
/// - admitted: passed to the inner service
/// - quota exhausted: `429 Too Many Requests` with `Retry-After`
/// - counts unavailable: `503 Service Unavailable` with a short `Retry-After`
/// - unknown tier: `500 Internal Server Error`
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn quota_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if !state.is_metered(request.uri().path()) {
        return next.run(request).await;
    }

    let subject = resolve_subject(&state, &request);
    let scope = state
        .server()
        .scope_by_path
        .then(|| request.uri().path().to_string());
    let outcome = state
        .gate()
        .enforce(&subject.id, &subject.tier, scope.as_deref())
        .await;
    debug!(subject = %subject.id, tier = %subject.tier, verdict = ?outcome.verdict(), "Quota checked");

    let mut response = match outcome.verdict() {
        GateVerdict::Allow => {
            request.extensions_mut().insert(subject);
            next.run(request).await
        }
        _ => rejection(&outcome),
    };
    apply_headers(&mut response, outcome.headers());
    response
}

/// The authenticated subject, or the client address on the anonymous tier.
fn resolve_subject(state: &AppState, request: &Request) -> MeteredSubject {
    if let Some(subject) = request.extensions().get::<MeteredSubject>() {
        return subject.clone();
    }
    let id = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| SubjectId::ip(addr.ip()))
        .unwrap_or_else(|| SubjectId::ip("unknown"));
    MeteredSubject::new(id, state.server().anonymous_tier.clone())
}

/// Error response for a rejected request.
fn rejection(outcome: &GateOutcome) -> Response {
    let decision = outcome.decision();
    let (status, error) = match outcome.verdict() {
        GateVerdict::RejectQuota { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded"),
        GateVerdict::RejectUnavailable { .. } => {
            warn!(subject = %decision.subject(), "Rejecting request, quota store unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, "quota_unavailable")
        }
        GateVerdict::RejectMisconfigured | GateVerdict::Allow => {
            (StatusCode::INTERNAL_SERVER_ERROR, "quota_misconfigured")
        }
    };

    let body = json!({
        "error": error,
        "message": decision.reason().to_string(),
        "reason": decision.reason(),
        "tier": decision.tier(),
        "retry_after": outcome.headers().retry_after(),
    });
    (status, Json(body)).into_response()
}

fn apply_headers(response: &mut Response, headers: &RateLimitHeaders) {
    let map = response.headers_mut();
    for (name, value) in headers.pairs() {
        if let Ok(value) = HeaderValue::from_str(&value) {
            map.insert(HeaderName::from_static(name), value);
        }
    }
}
