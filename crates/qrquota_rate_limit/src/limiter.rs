//! Rate limiter orchestration over the counter store.
//!
//! A request moves `PENDING -> ADMITTED | DENIED` in one call to
//! [`RateLimiter::check`]:
//!
//! 1. resolve the tier (unknown tiers deny),
//! 2. speculatively bump every configured window counter,
//! 3. evaluate the post-increment counts,
//! 4. under [`CountingPolicy::Admitted`], undo the bumps of a denied request.
//!
//! Store failures and timeouts deny with [`DecisionReason::QuotaUnavailable`].
//! Nothing in this module ever turns an internal fault into an admission.

use crate::{CountingPolicy, QuotaConfig, TierPolicyTable, evaluate};
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use qrquota_core::{
    Clock, DecisionReason, QuotaDecision, SubjectId, SystemClock, TierPolicy, WindowKind,
    WindowUsage,
};
use qrquota_error::{QrQuotaResult, StoreError, StoreErrorKind, StoreResult};
use qrquota_store::{CounterKey, CounterStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Default deadline for one counter store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// Slack added to a counter's expiry past its window end.
///
/// Covers clock skew between the limiter and the store at the boundary
/// instant. The counter key already names its window instance, so the slack
/// never makes a count visible in the next window.
const EXPIRY_SLACK_SECS: i64 = 1;

/// Non-mutating snapshot of a subject's usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, derive_getters::Getters)]
pub struct UsageReport {
    /// Metered subject
    subject: SubjectId,
    /// Tier the usage is measured against
    tier: String,
    /// Tier description
    description: String,
    /// Instant of the snapshot
    at: DateTime<Utc>,
    /// One entry per configured window, shortest first
    windows: Vec<WindowUsage>,
}

/// One configured window resolved for a request.
#[derive(Debug)]
struct WindowSlot {
    kind: WindowKind,
    key: CounterKey,
    ttl: Duration,
}

/// Multi-window quota enforcement for every tier in a [`TierPolicyTable`].
///
/// Cheap to share: wrap it in an `Arc` and call [`check`](Self::check) from as
/// many tasks as needed. The counter store's atomic increment is the only
/// synchronization point.
///
/// # Example
///
/// ```
/// use qrquota_core::SubjectId;
/// use qrquota_rate_limit::{RateLimiter, TierPolicyTable};
/// use qrquota_store::MemoryCounterStore;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = RateLimiter::new(TierPolicyTable::shipped()?, Arc::new(MemoryCounterStore::new()));
///
/// let decision = limiter.check(&SubjectId::user(42), "free", None).await;
/// assert!(decision.allowed());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RateLimiter {
    tiers: Arc<TierPolicyTable>,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
    counting: CountingPolicy,
}

impl RateLimiter {
    /// Create a limiter on the system clock with default settings.
    pub fn new(tiers: TierPolicyTable, store: Arc<dyn CounterStore>) -> Self {
        debug!(backend = store.backend_name(), tiers = tiers.len(), "Creating rate limiter");
        Self {
            tiers: Arc::new(tiers),
            store,
            clock: Arc::new(SystemClock),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            counting: CountingPolicy::default(),
        }
    }

    /// Create a limiter from the `[limiter]` and `[tiers]` sections of `config`.
    ///
    /// # Errors
    ///
    /// Returns a tier error if a configured tier is invalid.
    #[instrument(skip_all)]
    pub fn from_config(config: &QuotaConfig, store: Arc<dyn CounterStore>) -> QrQuotaResult<Self> {
        let tiers = TierPolicyTable::from_config(config)?;
        Ok(Self::new(tiers, store)
            .with_store_timeout(config.limiter.store_timeout())
            .with_counting(config.limiter.counting))
    }

    /// Read time from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound every store call by `timeout`.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Choose whether denied requests keep their increments.
    pub fn with_counting(mut self, counting: CountingPolicy) -> Self {
        self.counting = counting;
        self
    }

    /// Registered tiers.
    pub fn tiers(&self) -> &TierPolicyTable {
        &self.tiers
    }

    /// Name of the counter store backend.
    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Active counting policy.
    pub fn counting(&self) -> CountingPolicy {
        self.counting
    }

    /// Current instant on the limiter's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Count one request of `subject` and decide whether it may proceed.
    ///
    /// `scope` narrows the counters to one metered action; `None` meters the
    /// subject as a whole. Never returns an error: faults deny the request
    /// with a reason that tells them apart from quota exhaustion.
    #[instrument(skip(self), fields(subject = %subject))]
    pub async fn check(&self, subject: &SubjectId, tier: &str, scope: Option<&str>) -> QuotaDecision {
        let at = self.clock.now();

        let policy = match self.tiers.policy(tier) {
            Ok(policy) => policy,
            Err(e) => {
                error!(tier, error = %e, "Subject tier is not configured, denying");
                return QuotaDecision::unknown_tier(subject.clone(), tier, at);
            }
        };

        let slots = slots_for(policy, subject, scope, at);
        let results = join_all(slots.iter().map(|slot| {
            self.bounded(self.store.increment_and_get(&slot.key, slot.ttl))
        }))
        .await;

        let mut counts = BTreeMap::new();
        let mut failure: Option<StoreError> = None;
        let mut bumped = Vec::with_capacity(slots.len());
        for (slot, result) in slots.iter().zip(results) {
            match result {
                Ok(count) => {
                    counts.insert(slot.kind, count);
                    bumped.push(slot);
                }
                Err(e) => {
                    error!(window = %slot.kind, error = %e, "Counter increment failed");
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        if let Some(e) = failure {
            if self.counting == CountingPolicy::Admitted {
                self.rollback(&bumped).await;
            }
            return QuotaDecision::unavailable(subject.clone(), tier, at, e.kind().to_string());
        }

        let decision = evaluate(policy, subject, at, &counts);
        match decision.reason() {
            DecisionReason::Admitted => debug!("Request admitted"),
            reason => {
                warn!(%reason, "Request denied");
                if self.counting == CountingPolicy::Admitted {
                    self.rollback(&bumped).await;
                }
            }
        }
        decision
    }

    /// Current usage of `subject` without counting a request.
    ///
    /// # Errors
    ///
    /// Returns a tier error for unknown tiers and a store error if any
    /// counter cannot be read.
    #[instrument(skip(self), fields(subject = %subject))]
    pub async fn usage(
        &self,
        subject: &SubjectId,
        tier: &str,
        scope: Option<&str>,
    ) -> QrQuotaResult<UsageReport> {
        let at = self.clock.now();
        let policy = self.tiers.policy(tier)?;
        let slots = slots_for(policy, subject, scope, at);

        let counts = join_all(slots.iter().map(|slot| self.bounded(self.store.peek(&slot.key)))).await;

        let mut windows = Vec::with_capacity(slots.len());
        for ((slot, count), limit) in slots.iter().zip(counts).zip(policy.limits()) {
            let reset_at = slot.kind.reset_at(slot.key.window);
            windows.push(WindowUsage::new(slot.kind, count?, limit.max_count, reset_at));
        }

        Ok(UsageReport {
            subject: subject.clone(),
            tier: policy.name().clone(),
            description: policy.description().clone(),
            at,
            windows,
        })
    }

    /// Delete every counter of `subject`. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the store fails or times out.
    #[instrument(skip(self), fields(subject = %subject))]
    pub async fn reset(&self, subject: &SubjectId) -> QrQuotaResult<u64> {
        let removed = self.bounded(self.store.reset_subject(subject)).await?;
        warn!(removed, "Subject counters reset");
        Ok(removed)
    }

    /// Whether the counter store answers within the deadline.
    pub async fn is_available(&self) -> bool {
        match self.bounded(self.store.ping()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, backend = self.store.backend_name(), "Counter store unavailable");
                false
            }
        }
    }

    /// Undo speculative increments. Failures are logged and left in place.
    async fn rollback(&self, bumped: &[&WindowSlot]) {
        let results = join_all(bumped.iter().map(|slot| self.bounded(self.store.decrement(&slot.key)))).await;
        for (slot, result) in bumped.iter().zip(results) {
            if let Err(e) = result {
                warn!(window = %slot.kind, error = %e, "Failed to roll back counter");
            }
        }
    }

    /// Apply the store deadline to `call`.
    async fn bounded<T>(&self, call: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        tokio::time::timeout(self.store_timeout, call)
            .await
            .unwrap_or_else(|_| {
                let millis = u64::try_from(self.store_timeout.as_millis()).unwrap_or(u64::MAX);
                Err(StoreError::new(StoreErrorKind::Timeout(millis)))
            })
    }
}

/// Counter keys and expiries of every window of `policy` at `at`.
fn slots_for(
    policy: &TierPolicy,
    subject: &SubjectId,
    scope: Option<&str>,
    at: DateTime<Utc>,
) -> Vec<WindowSlot> {
    policy
        .limits()
        .iter()
        .map(|limit| {
            let window = limit.kind.window_key(at);
            let expires_in = limit.kind.reset_at(window) - at + TimeDelta::seconds(EXPIRY_SLACK_SECS);
            WindowSlot {
                kind: limit.kind,
                key: CounterKey::new(subject.clone(), limit.kind, window)
                    .with_scope(scope.map(str::to_string)),
                ttl: expires_in.to_std().unwrap_or(Duration::from_secs(1)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use qrquota_core::ManualClock;
    use qrquota_store::MemoryCounterStore;

    #[test]
    fn test_ttl_runs_to_window_end_plus_slack() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 32, 45).unwrap();
        let policy = crate::ShippedTier::Free.policy().unwrap();
        let slots = slots_for(&policy, &SubjectId::user(1), None, at);

        assert_eq!(slots[0].kind, WindowKind::Minute);
        assert_eq!(slots[0].ttl, Duration::from_secs(16));
        assert_eq!(slots[1].ttl, Duration::from_secs(27 * 60 + 16));
    }

    #[test]
    fn test_scope_is_carried_into_keys() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let policy = crate::ShippedTier::Pro.policy().unwrap();
        let slots = slots_for(&policy, &SubjectId::user(1), Some("/api/v1/qr"), at);
        assert!(slots.iter().all(|slot| slot.key.scope.as_deref() == Some("/api/v1/qr")));
    }

    #[tokio::test]
    async fn test_usage_does_not_count() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let limiter = RateLimiter::new(
            TierPolicyTable::shipped().unwrap(),
            Arc::new(MemoryCounterStore::with_clock(Arc::new(clock.clone()))),
        )
        .with_clock(Arc::new(clock));
        let subject = SubjectId::user(3);

        limiter.check(&subject, "free", None).await;
        limiter.check(&subject, "free", None).await;
        let report = limiter.usage(&subject, "free", None).await.unwrap();
        let again = limiter.usage(&subject, "free", None).await.unwrap();

        assert_eq!(report, again);
        assert_eq!(report.windows()[0].used, 2);
        assert_eq!(report.windows()[0].remaining, Some(8));
        assert_eq!(report.description(), "Free tier with basic rate limits for personal use");
    }

    #[tokio::test]
    async fn test_usage_of_unknown_tier_is_an_error() {
        let limiter = RateLimiter::new(
            TierPolicyTable::shipped().unwrap(),
            Arc::new(MemoryCounterStore::new()),
        );
        assert!(limiter.usage(&SubjectId::user(1), "gold", None).await.is_err());
    }
}
