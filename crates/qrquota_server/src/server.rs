//! Service startup: counter backend, shared state and the listen loop.

use crate::{AppState, create_router};
use qrquota_error::{QrQuotaResult, ServerError, ServerErrorKind};
use qrquota_rate_limit::{EnforcementGate, QuotaConfig, RateLimiter, StoreBackend, StoreConfig};
use qrquota_store::{CounterStore, MemoryCounterStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, instrument};

/// Build the counter store selected in `[store]`.
///
/// Redis connections are retried with jittered exponential backoff before
/// giving up.
///
/// # Errors
///
/// Returns a server error if the backend cannot be reached or is not compiled in.
#[instrument(skip(config), fields(backend = %config.backend))]
pub async fn connect_store(
    config: &StoreConfig,
    key_prefix: &str,
) -> QrQuotaResult<Arc<dyn CounterStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-process counters; limits are not shared between instances");
            let store = MemoryCounterStore::new();
            // Detached; the task ends when the store is dropped
            let _purge = store.spawn_purge(config.purge_interval());
            Ok(Arc::new(store))
        }
        #[cfg(feature = "redis")]
        StoreBackend::Redis => Ok(Arc::new(connect_redis(&config.redis_url, key_prefix).await?)),
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => {
            let _ = key_prefix;
            Err(ServerError::new(ServerErrorKind::Backend(
                "redis backend requested but the `redis` feature is disabled".to_string(),
            ))
            .into())
        }
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(url: &str, key_prefix: &str) -> QrQuotaResult<qrquota_store::RedisCounterStore> {
    use qrquota_store::RedisCounterStore;
    use std::time::Duration;
    use tokio_retry2::{Retry, RetryError, strategy::ExponentialBackoff, strategy::jitter};
    use tracing::warn;

    let retry_strategy = ExponentialBackoff::from_millis(100)
        .factor(2)
        .max_delay(Duration::from_secs(5))
        .map(jitter)
        .take(5);

    let store = Retry::spawn(retry_strategy, || async move {
        RedisCounterStore::connect_with_prefix(url, key_prefix)
            .await
            .map_err(|e| {
                warn!(error = %e, "Redis connection failed, will retry");
                RetryError::Transient {
                    err: e,
                    retry_after: None,
                }
            })
    })
    .await
    .map_err(|e| ServerError::new(ServerErrorKind::Backend(e.to_string())))?;

    info!(prefix = store.prefix(), "Connected to redis counter store");
    Ok(store)
}

/// Build limiter, gate and handler state from `config` over `store`.
///
/// # Errors
///
/// Returns a tier error if a configured tier is invalid.
pub fn build_state(config: &QuotaConfig, store: Arc<dyn CounterStore>) -> QrQuotaResult<AppState> {
    let limiter = RateLimiter::from_config(config, store)?;
    let gate = EnforcementGate::new(Arc::new(limiter))
        .with_unavailable_retry_after(config.limiter.unavailable_retry_after());
    Ok(AppState::new(gate, config.server.clone()))
}

/// Connect the backend and serve until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the backend, the listen address or the server loop fails.
#[instrument(skip(config), fields(bind = %config.server.bind))]
pub async fn serve(config: QuotaConfig) -> QrQuotaResult<()> {
    let store = connect_store(&config.store, &config.limiter.key_prefix).await?;
    let state = build_state(&config, store)?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .map_err(|e| ServerError::new(ServerErrorKind::Bind(format!("{}: {}", config.server.bind, e))))?;
    info!(
        tiers = config.tiers.len(),
        counting = %config.limiter.counting,
        "qrquota server listening"
    );

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServerError::new(ServerErrorKind::Serve(e.to_string())))?;

    info!("qrquota server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
