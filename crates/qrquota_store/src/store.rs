//! The counter store contract.

use crate::CounterKey;
use async_trait::async_trait;
use qrquota_core::SubjectId;
use qrquota_error::StoreResult;
use std::time::Duration;

/// Atomic per-window request counters.
///
/// Implementations must never answer a failed read with zero: a zero count
/// looks like an untouched budget and would let every request through.
#[async_trait]
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    /// Atomically create or bump the counter and return the new count.
    ///
    /// Concurrent callers on the same key each observe a distinct value. The
    /// expiry is set to `ttl` when the counter is created and is not refreshed
    /// by later increments.
    async fn increment_and_get(&self, key: &CounterKey, ttl: Duration) -> StoreResult<u64>;

    /// Undo one increment. Clamps at zero; absent or expired counters are left alone.
    ///
    /// Returns the count after the decrement.
    async fn decrement(&self, key: &CounterKey) -> StoreResult<u64>;

    /// Current count without modifying it, zero when absent or expired.
    async fn peek(&self, key: &CounterKey) -> StoreResult<u64>;

    /// Remove every counter belonging to `subject`. Returns how many were removed.
    async fn reset_subject(&self, subject: &SubjectId) -> StoreResult<u64>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> StoreResult<()>;

    /// Short backend name for logs and status output.
    fn backend_name(&self) -> &'static str;
}
