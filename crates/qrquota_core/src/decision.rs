//! Per-request quota decisions.

use crate::{Limit, SubjectId, WindowKind};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

/// Usage of one window for one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowUsage {
    /// Window kind
    pub kind: WindowKind,
    /// Requests counted in the current instance, this one included
    pub used: u64,
    /// Configured budget
    pub limit: Limit,
    /// Requests left, `None` for unlimited windows
    pub remaining: Option<u64>,
    /// Start of the next window instance
    pub reset_at: DateTime<Utc>,
}

impl WindowUsage {
    /// Build the usage record for `used` requests against `limit`.
    pub fn new(kind: WindowKind, used: u64, limit: Limit, reset_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            used,
            limit,
            remaining: limit.remaining(used),
            reset_at,
        }
    }

    /// Whether this window is over budget.
    pub fn is_exceeded(&self) -> bool {
        !self.limit.permits(self.used)
    }
}

/// Why a decision came out the way it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum DecisionReason {
    /// Every finite window is within budget.
    Admitted,
    /// At least one window is over budget. Names the longest exceeded window.
    QuotaExceeded {
        /// Primary limiting window
        window: WindowKind,
        /// Its budget
        limit: Limit,
        /// Its count including this request
        used: u64,
        /// When it resets
        reset_at: DateTime<Utc>,
    },
    /// The subject's tier is not registered. A configuration defect.
    UnknownTier {
        /// Requested tier name
        tier: String,
    },
    /// Counts could not be read or written in time.
    QuotaUnavailable {
        /// Failure detail for logs
        detail: String,
    },
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionReason::Admitted => write!(f, "admitted"),
            DecisionReason::QuotaExceeded { window, limit, .. } => {
                write!(f, "quota exceeded: {limit} requests per {window}")
            }
            DecisionReason::UnknownTier { tier } => write!(f, "unknown tier '{tier}'"),
            DecisionReason::QuotaUnavailable { detail } => write!(f, "quota unavailable: {detail}"),
        }
    }
}

/// Outcome of evaluating one metered request.
///
/// Ephemeral: produced per request and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, derive_getters::Getters)]
pub struct QuotaDecision {
    /// Whether the action may proceed
    #[getter(skip)]
    allowed: bool,
    /// Metered subject
    subject: SubjectId,
    /// Tier the subject was evaluated against
    tier: String,
    /// Instant the window keys were computed for
    evaluated_at: DateTime<Utc>,
    /// One entry per configured window, shortest first
    windows: Vec<WindowUsage>,
    /// Why
    reason: DecisionReason,
}

impl QuotaDecision {
    /// Decision for evaluated windows. `allowed` follows from `reason`.
    pub fn evaluated(
        subject: SubjectId,
        tier: impl Into<String>,
        evaluated_at: DateTime<Utc>,
        windows: Vec<WindowUsage>,
        reason: DecisionReason,
    ) -> Self {
        Self {
            allowed: matches!(reason, DecisionReason::Admitted),
            subject,
            tier: tier.into(),
            evaluated_at,
            windows,
            reason,
        }
    }

    /// Fail-closed decision for a tier missing from the policy table.
    pub fn unknown_tier(subject: SubjectId, tier: impl Into<String>, at: DateTime<Utc>) -> Self {
        let tier = tier.into();
        Self {
            allowed: false,
            subject,
            reason: DecisionReason::UnknownTier { tier: tier.clone() },
            tier,
            evaluated_at: at,
            windows: Vec::new(),
        }
    }

    /// Fail-closed decision for a counter store fault.
    pub fn unavailable(
        subject: SubjectId,
        tier: impl Into<String>,
        at: DateTime<Utc>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            allowed: false,
            subject,
            tier: tier.into(),
            evaluated_at: at,
            windows: Vec::new(),
            reason: DecisionReason::QuotaUnavailable {
                detail: detail.into(),
            },
        }
    }

    /// Whether the action may proceed.
    pub fn allowed(&self) -> bool {
        self.allowed
    }

    /// Whether the request was denied for exhausting its budget.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self.reason, DecisionReason::QuotaExceeded { .. })
    }

    /// Whether the request was denied because counts were unavailable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self.reason, DecisionReason::QuotaUnavailable { .. })
    }

    /// Usage of the `kind` window, if the tier meters it.
    pub fn window(&self, kind: WindowKind) -> Option<&WindowUsage> {
        self.windows.iter().find(|usage| usage.kind == kind)
    }

    /// Finite window with the fewest requests left.
    ///
    /// Ties go to the window that resets first. `None` when every window is
    /// unlimited or nothing was evaluated.
    pub fn most_restrictive(&self) -> Option<&WindowUsage> {
        self.windows
            .iter()
            .filter_map(|usage| usage.remaining.map(|remaining| (remaining, usage)))
            .min_by_key(|(remaining, usage)| (*remaining, usage.reset_at))
            .map(|(_, usage)| usage)
    }

    /// Soonest reset among the exceeded windows.
    pub fn soonest_exceeded_reset(&self) -> Option<DateTime<Utc>> {
        self.windows
            .iter()
            .filter(|usage| usage.is_exceeded())
            .map(|usage| usage.reset_at)
            .min()
    }

    /// Time until the soonest exceeded window resets, measured from `now`.
    ///
    /// `None` unless the decision is a quota denial. Never negative.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        if !self.is_quota_exceeded() {
            return None;
        }
        self.soonest_exceeded_reset()
            .map(|reset| (reset - now).max(TimeDelta::zero()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 30).unwrap()
    }

    fn finite(n: u64) -> Limit {
        Limit::finite(n).unwrap()
    }

    fn exceeded_minute_and_day() -> QuotaDecision {
        let minute_reset = Utc.with_ymd_and_hms(2024, 5, 1, 12, 1, 0).unwrap();
        let day_reset = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let windows = vec![
            WindowUsage::new(WindowKind::Minute, 11, finite(10), minute_reset),
            WindowUsage::new(WindowKind::Day, 1001, finite(1000), day_reset),
        ];
        QuotaDecision::evaluated(
            SubjectId::user(1),
            "free",
            at(),
            windows,
            DecisionReason::QuotaExceeded {
                window: WindowKind::Day,
                limit: finite(1000),
                used: 1001,
                reset_at: day_reset,
            },
        )
    }

    #[test]
    fn test_retry_after_uses_soonest_exceeded_reset() {
        let decision = exceeded_minute_and_day();
        assert!(!decision.allowed());
        assert_eq!(decision.retry_after(at()), Some(TimeDelta::seconds(30)));
    }

    #[test]
    fn test_unavailable_has_no_retry_after() {
        let decision = QuotaDecision::unavailable(SubjectId::user(1), "free", at(), "timeout");
        assert!(!decision.allowed());
        assert!(decision.is_unavailable());
        assert_eq!(decision.retry_after(at()), None);
    }

    #[test]
    fn test_unknown_tier_denies() {
        let decision = QuotaDecision::unknown_tier(SubjectId::user(1), "gold", at());
        assert!(!decision.allowed());
        assert_eq!(
            decision.reason(),
            &DecisionReason::UnknownTier {
                tier: "gold".to_string()
            }
        );
    }

    #[test]
    fn test_most_restrictive_skips_unlimited() {
        let reset = at();
        let decision = QuotaDecision::evaluated(
            SubjectId::user(2),
            "pro",
            at(),
            vec![
                WindowUsage::new(WindowKind::Minute, 5, Limit::Unlimited, reset),
                WindowUsage::new(WindowKind::Hour, 990, finite(1000), reset),
                WindowUsage::new(WindowKind::Day, 991, finite(10000), reset),
            ],
            DecisionReason::Admitted,
        );
        assert!(decision.allowed());
        assert_eq!(decision.most_restrictive().map(|w| w.kind), Some(WindowKind::Hour));
    }

    #[test]
    fn test_reason_serializes_with_code() {
        let json = serde_json::to_value(DecisionReason::UnknownTier {
            tier: "gold".to_string(),
        })
        .unwrap();
        assert_eq!(json["code"], "unknown_tier");
        assert_eq!(json["tier"], "gold");
    }
}
