//! Boundary adapter between request handlers and the rate limiter.
//!
//! The gate never performs the metered action. It turns a [`QuotaDecision`]
//! into a verdict the caller can act on and the standard rate-limit response
//! metadata:
//!
//! | Header | Source |
//! |--------|--------|
//! | `X-RateLimit-Limit` | budget of the most restrictive finite window |
//! | `X-RateLimit-Remaining` | requests left in that window |
//! | `X-RateLimit-Reset` | its reset instant, Unix seconds |
//! | `X-RateLimit-Status` | `ok`, `exceeded`, `unavailable` or `misconfigured` |
//! | `Retry-After` | seconds until a retry can succeed, denials only |
//! | `X-RateLimit-Count-<Window>` | count of each evaluated window, this request included |

use crate::RateLimiter;
use chrono::TimeDelta;
use qrquota_core::{DecisionReason, QuotaDecision, SubjectId, WindowKind};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// `X-RateLimit-Limit` header name.
pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
/// `X-RateLimit-Remaining` header name.
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
/// `X-RateLimit-Reset` header name.
pub const HEADER_RESET: &str = "x-ratelimit-reset";
/// `X-RateLimit-Status` header name.
pub const HEADER_STATUS: &str = "x-ratelimit-status";
/// `Retry-After` header name.
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// `X-RateLimit-Count-<Window>` header name for `kind`.
pub fn count_header(kind: WindowKind) -> &'static str {
    match kind {
        WindowKind::Minute => "x-ratelimit-count-minute",
        WindowKind::Hour => "x-ratelimit-count-hour",
        WindowKind::Day => "x-ratelimit-count-day",
        WindowKind::Month => "x-ratelimit-count-month",
    }
}

/// What the caller must do with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    /// Run the action
    Allow,
    /// Reject, the subject exhausted a window
    RejectQuota {
        /// Until the soonest exceeded window resets
        retry_after: Duration,
    },
    /// Reject, counts are unavailable; a transient fault
    RejectUnavailable {
        /// Short constant hint
        retry_after: Duration,
    },
    /// Reject, the subject's tier is not configured
    RejectMisconfigured,
}

impl GateVerdict {
    /// Whether the action may run.
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateVerdict::Allow)
    }

    /// Retry hint, if the verdict carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GateVerdict::RejectQuota { retry_after } | GateVerdict::RejectUnavailable { retry_after } => {
                Some(*retry_after)
            }
            GateVerdict::Allow | GateVerdict::RejectMisconfigured => None,
        }
    }
}

/// Value of the `X-RateLimit-Status` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RateLimitStatus {
    /// Admitted
    Ok,
    /// Denied for quota
    Exceeded,
    /// Denied, store fault
    Unavailable,
    /// Denied, unknown tier
    Misconfigured,
}

/// Rate-limit response metadata for one decision.
///
/// Limit fields are `None` when every window of the tier is unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, derive_getters::Getters)]
pub struct RateLimitHeaders {
    /// Budget of the most restrictive window
    limit: Option<u64>,
    /// Requests left in it
    remaining: Option<u64>,
    /// Its reset instant in Unix seconds
    reset: Option<i64>,
    /// Whole seconds to wait before retrying, rounded up
    retry_after: Option<u64>,
    /// Decision status
    status: RateLimitStatus,
    /// Count of every evaluated window, shortest first
    counts: Vec<(WindowKind, u64)>,
}

impl RateLimitHeaders {
    /// Header name and value pairs, lowercase names, omitting absent values.
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(5 + self.counts.len());
        if let Some(limit) = self.limit {
            pairs.push((HEADER_LIMIT, limit.to_string()));
        }
        if let Some(remaining) = self.remaining {
            pairs.push((HEADER_REMAINING, remaining.to_string()));
        }
        if let Some(reset) = self.reset {
            pairs.push((HEADER_RESET, reset.to_string()));
        }
        pairs.push((HEADER_STATUS, self.status.to_string()));
        if let Some(retry_after) = self.retry_after {
            pairs.push((HEADER_RETRY_AFTER, retry_after.to_string()));
        }
        pairs.extend(
            self.counts
                .iter()
                .map(|(kind, used)| (count_header(*kind), used.to_string())),
        );
        pairs
    }
}

/// Decision plus everything the caller needs to respond.
#[derive(Debug, Clone, PartialEq, Eq, derive_getters::Getters)]
pub struct GateOutcome {
    /// Underlying decision
    decision: QuotaDecision,
    /// What to do
    verdict: GateVerdict,
    /// Response metadata
    headers: RateLimitHeaders,
}

impl GateOutcome {
    /// Take the decision out of the outcome.
    pub fn into_decision(self) -> QuotaDecision {
        self.decision
    }
}

/// Entry point for request-handling code.
///
/// # Example
///
/// ```
/// use qrquota_core::SubjectId;
/// use qrquota_rate_limit::{EnforcementGate, GateVerdict, RateLimiter, TierPolicyTable};
/// use qrquota_store::MemoryCounterStore;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = RateLimiter::new(TierPolicyTable::shipped()?, Arc::new(MemoryCounterStore::new()));
/// let gate = EnforcementGate::new(Arc::new(limiter));
///
/// let outcome = gate.enforce(&SubjectId::api_key("k-1"), "pro", None).await;
/// assert_eq!(outcome.verdict(), &GateVerdict::Allow);
/// assert_eq!(outcome.headers().limit(), &Some(60));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EnforcementGate {
    limiter: Arc<RateLimiter>,
    unavailable_retry_after: Duration,
}

impl EnforcementGate {
    /// Gate over `limiter` with a one second retry hint for store faults.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            unavailable_retry_after: Duration::from_secs(1),
        }
    }

    /// Retry hint sent when counts are unavailable.
    pub fn with_unavailable_retry_after(mut self, retry_after: Duration) -> Self {
        self.unavailable_retry_after = retry_after;
        self
    }

    /// The limiter behind the gate.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Decide one subject-wide metered action.
    pub async fn check(&self, subject: &SubjectId, tier: &str) -> QuotaDecision {
        self.limiter.check(subject, tier, None).await
    }

    /// Decide one metered action counted under `scope`.
    pub async fn check_scoped(&self, subject: &SubjectId, tier: &str, scope: &str) -> QuotaDecision {
        self.limiter.check(subject, tier, Some(scope)).await
    }

    /// Decide and translate into a verdict with response metadata.
    #[instrument(skip(self), fields(subject = %subject))]
    pub async fn enforce(&self, subject: &SubjectId, tier: &str, scope: Option<&str>) -> GateOutcome {
        let decision = self.limiter.check(subject, tier, scope).await;
        self.outcome(decision)
    }

    /// Translate an existing decision.
    ///
    /// Retry hints are measured from the decision's own evaluation instant, so
    /// repeating the translation yields the same metadata.
    pub fn outcome(&self, decision: QuotaDecision) -> GateOutcome {
        let (verdict, status) = match decision.reason() {
            DecisionReason::Admitted => (GateVerdict::Allow, RateLimitStatus::Ok),
            DecisionReason::QuotaExceeded { reset_at, .. } => {
                let until = decision
                    .retry_after(*decision.evaluated_at())
                    .unwrap_or_else(|| *reset_at - *decision.evaluated_at());
                (
                    GateVerdict::RejectQuota {
                        retry_after: Duration::from_secs(ceil_seconds(until)),
                    },
                    RateLimitStatus::Exceeded,
                )
            }
            DecisionReason::QuotaUnavailable { .. } => (
                GateVerdict::RejectUnavailable {
                    retry_after: self.unavailable_retry_after,
                },
                RateLimitStatus::Unavailable,
            ),
            DecisionReason::UnknownTier { .. } => {
                (GateVerdict::RejectMisconfigured, RateLimitStatus::Misconfigured)
            }
        };

        let restrictive = decision.most_restrictive();
        let headers = RateLimitHeaders {
            limit: restrictive.and_then(|usage| usage.limit.max_count()),
            remaining: restrictive.and_then(|usage| usage.remaining),
            reset: restrictive.map(|usage| usage.reset_at.timestamp()),
            retry_after: verdict
                .retry_after()
                .map(|retry_after| retry_after.as_secs().max(1)),
            status,
            counts: decision
                .windows()
                .iter()
                .map(|usage| (usage.kind, usage.used))
                .collect(),
        };

        GateOutcome {
            decision,
            verdict,
            headers,
        }
    }
}

/// Whole seconds in `delta`, rounded up, never below one.
fn ceil_seconds(delta: TimeDelta) -> u64 {
    let millis = delta.num_milliseconds().max(0);
    u64::try_from((millis + 999) / 1000).unwrap_or(0).max(1)
}
