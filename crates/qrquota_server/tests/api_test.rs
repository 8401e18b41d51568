//! Tests for the enforcement middleware and quota endpoints.

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    response::Response,
    routing::post,
};
use chrono::{TimeZone, Utc};
use qrquota_core::{ManualClock, SubjectId};
use qrquota_error::{StoreError, StoreErrorKind, StoreResult};
use qrquota_rate_limit::{EnforcementGate, QuotaConfig, RateLimiter};
use qrquota_server::{AppState, MeteredSubject, build_state, create_router, with_enforcement};
use qrquota_store::{CounterKey, CounterStore, MemoryCounterStore};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// State on a frozen clock, so no test straddles a minute boundary.
fn state_with(config: &QuotaConfig, store: Arc<dyn CounterStore>) -> AppState {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 10, 32, 15).unwrap());
    let limiter = RateLimiter::from_config(config, store)
        .unwrap()
        .with_clock(Arc::new(clock));
    let gate = EnforcementGate::new(Arc::new(limiter))
        .with_unavailable_retry_after(config.limiter.unavailable_retry_after());
    AppState::new(gate, config.server.clone())
}

fn memory_state() -> AppState {
    state_with(&QuotaConfig::bundled().unwrap(), Arc::new(MemoryCounterStore::new()))
}

/// Quota endpoints plus one metered application route.
fn app(state: AppState) -> Router {
    let generate = Router::new().route("/api/v1/qr/generate", post(|| async { "generated" }));
    create_router(state.clone()).merge(with_enforcement(generate, state))
}

fn request(method: &str, uri: &str, subject: Option<MeteredSubject>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(subject) = subject {
        builder = builder.extension(subject);
    }
    builder.body(Body::empty()).unwrap()
}

fn user(id: u64, tier: &str) -> Option<MeteredSubject> {
    Some(MeteredSubject::new(SubjectId::user(id), tier))
}

fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_build_state_from_bundled_config() {
    let state = build_state(&QuotaConfig::bundled().unwrap(), Arc::new(MemoryCounterStore::new())).unwrap();
    assert_eq!(state.limiter().backend_name(), "memory");
    assert!(state.is_metered("/api/v1/qr/generate"));
    assert!(!state.is_metered("/health"));
    assert!(!state.is_metered("/dashboard"));
}

#[tokio::test]
async fn test_health_is_not_metered() {
    let app = app(memory_state());
    let response = app.oneshot(request("GET", "/health", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, "x-ratelimit-status").is_none());
    assert_eq!(json_body(response).await["status"], "ok");
}

#[tokio::test]
async fn test_free_tier_eleventh_request_is_rejected() {
    let app = app(memory_state());

    for n in 1..=10 {
        let response = app
            .clone()
            .oneshot(request("POST", "/api/v1/qr/generate", user(1, "free")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {n}");
        assert_eq!(header(&response, "x-ratelimit-limit"), Some("10"));
        let expected_remaining = (10 - n).to_string();
        assert_eq!(header(&response, "x-ratelimit-remaining"), Some(expected_remaining.as_str()));
        assert_eq!(header(&response, "x-ratelimit-status"), Some("ok"));
    }

    let response = app
        .clone()
        .oneshot(request("POST", "/api/v1/qr/generate", user(1, "free")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&response, "x-ratelimit-status"), Some("exceeded"));
    assert_eq!(header(&response, "retry-after"), Some("45"));

    let body = json_body(response).await;
    assert_eq!(body["error"], "rate_limit_exceeded");
    assert_eq!(body["reason"]["code"], "quota_exceeded");
    assert_eq!(body["reason"]["window"], "minute");

    // Another subject is unaffected
    let other = app
        .oneshot(request("POST", "/api/v1/qr/generate", user(2, "free")))
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_anonymous_requests_use_anonymous_tier() {
    let app = app(memory_state());
    let response = app
        .oneshot(request("POST", "/api/v1/qr/generate", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-ratelimit-limit"), Some("10"));
}

#[tokio::test]
async fn test_usage_reports_counts() {
    let app = app(memory_state());
    for _ in 0..3 {
        app.clone()
            .oneshot(request("POST", "/api/v1/qr/generate", user(5, "pro")))
            .await
            .unwrap();
    }

    let response = app
        .oneshot(request("GET", "/api/v1/rate-limits/usage", user(5, "pro")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["tier"], "pro");
    assert_eq!(body["subject"], "user:5");
    // The usage request itself is metered
    assert_eq!(body["windows"][0]["kind"], "minute");
    assert_eq!(body["windows"][0]["used"], 4);
    assert_eq!(body["windows"][0]["remaining"], 56);
}

#[tokio::test]
async fn test_limits_lists_every_tier() {
    let app = app(memory_state());
    let response = app
        .oneshot(request("GET", "/api/v1/rate-limits/limits", user(1, "business")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["current_tier"], "business");
    let names: Vec<_> = body["tiers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tier| tier["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["business", "enterprise", "free", "pro"]);
}

#[tokio::test]
async fn test_reset_is_enterprise_only() {
    let app = app(memory_state());

    let forbidden = app
        .clone()
        .oneshot(request("POST", "/api/v1/rate-limits/reset", user(1, "pro")))
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let allowed = app
        .oneshot(request("POST", "/api/v1/rate-limits/reset", user(9, "enterprise")))
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
    let body = json_body(allowed).await;
    assert_eq!(body["subject"], "user:9");
    // The reset request's own minute, hour and day counters
    assert_eq!(body["removed"], 3);
}

#[tokio::test]
async fn test_unknown_tier_is_a_server_error() {
    let app = app(memory_state());
    let response = app
        .oneshot(request("POST", "/api/v1/qr/generate", user(1, "platinum")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(header(&response, "x-ratelimit-status"), Some("misconfigured"));
    assert_eq!(json_body(response).await["reason"]["code"], "unknown_tier");
}

#[tokio::test]
async fn test_status_reports_backend() {
    let app = app(memory_state());
    let response = app
        .oneshot(request("GET", "/api/v1/rate-limits/status", user(1, "free")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["backend"], "memory");
    assert_eq!(body["backend_available"], true);
    assert_eq!(body["counting"], "attempted");
}

#[tokio::test]
async fn test_excluded_paths_are_not_metered() {
    let mut config = QuotaConfig::bundled().unwrap();
    config.server.excluded_paths.push("/api/v1/qr".to_string());
    let app = app(state_with(&config, Arc::new(MemoryCounterStore::new())));

    for _ in 0..20 {
        let response = app
            .clone()
            .oneshot(request("POST", "/api/v1/qr/generate", user(1, "free")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(header(&response, "x-ratelimit-status").is_none());
    }
}

/// Store whose every call fails.
#[derive(Debug)]
struct DownStore;

fn refused<T>() -> StoreResult<T> {
    Err(StoreError::new(StoreErrorKind::Unavailable("connection refused".to_string())))
}

#[async_trait]
impl CounterStore for DownStore {
    async fn increment_and_get(&self, _key: &CounterKey, _ttl: Duration) -> StoreResult<u64> {
        refused()
    }

    async fn decrement(&self, _key: &CounterKey) -> StoreResult<u64> {
        refused()
    }

    async fn peek(&self, _key: &CounterKey) -> StoreResult<u64> {
        refused()
    }

    async fn reset_subject(&self, _subject: &SubjectId) -> StoreResult<u64> {
        refused()
    }

    async fn ping(&self) -> StoreResult<()> {
        refused()
    }

    fn backend_name(&self) -> &'static str {
        "down"
    }
}

#[tokio::test]
async fn test_store_outage_is_service_unavailable() {
    let app = app(state_with(&QuotaConfig::bundled().unwrap(), Arc::new(DownStore)));

    let response = app
        .clone()
        .oneshot(request("POST", "/api/v1/qr/generate", user(1, "enterprise")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(header(&response, "retry-after"), Some("1"));
    assert_eq!(header(&response, "x-ratelimit-status"), Some("unavailable"));
    assert_eq!(json_body(response).await["error"], "quota_unavailable");

    // Health stays up so orchestration does not restart the service
    let health = app.oneshot(request("GET", "/health", None)).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_status_reports_degraded_store() {
    let app = app(state_with(&QuotaConfig::bundled().unwrap(), Arc::new(DownStore)));
    let response = app
        .oneshot(request("GET", "/api/v1/rate-limits/status", user(1, "free")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(header(&response, "x-ratelimit-status").is_none());
    let body = json_body(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["backend"], "down");
    assert_eq!(body["backend_available"], false);
}

#[tokio::test]
async fn test_status_is_not_metered() {
    let app = app(memory_state());
    for _ in 0..15 {
        let response = app
            .clone()
            .oneshot(request("GET", "/api/v1/rate-limits/status", user(1, "free")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_window_count_headers() {
    let app = app(memory_state());
    for _ in 0..2 {
        app.clone()
            .oneshot(request("POST", "/api/v1/qr/generate", user(3, "pro")))
            .await
            .unwrap();
    }

    let response = app
        .oneshot(request("POST", "/api/v1/qr/generate", user(3, "pro")))
        .await
        .unwrap();
    assert_eq!(header(&response, "x-ratelimit-count-minute"), Some("3"));
    assert_eq!(header(&response, "x-ratelimit-count-hour"), Some("3"));
    assert_eq!(header(&response, "x-ratelimit-count-day"), Some("3"));
    assert!(header(&response, "x-ratelimit-count-month").is_none());
}

#[tokio::test]
async fn test_scope_by_path_counts_each_path() {
    let mut config = QuotaConfig::bundled().unwrap();
    config.server.scope_by_path = true;
    let state = state_with(&config, Arc::new(MemoryCounterStore::new()));
    let other = Router::new().route("/api/v1/qr/scan", post(|| async { "scanned" }));
    let app = app(state.clone()).merge(with_enforcement(other, state));

    for _ in 0..10 {
        let response = app
            .clone()
            .oneshot(request("POST", "/api/v1/qr/generate", user(4, "free")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let exhausted = app
        .clone()
        .oneshot(request("POST", "/api/v1/qr/generate", user(4, "free")))
        .await
        .unwrap();
    assert_eq!(exhausted.status(), StatusCode::TOO_MANY_REQUESTS);

    // A different path has its own budget
    let scan = app
        .oneshot(request("POST", "/api/v1/qr/scan", user(4, "free")))
        .await
        .unwrap();
    assert_eq!(scan.status(), StatusCode::OK);
    assert_eq!(header(&scan, "x-ratelimit-count-minute"), Some("1"));
}
