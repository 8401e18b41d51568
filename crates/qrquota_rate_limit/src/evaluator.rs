//! Pure allow/deny decision over a tier's windows.

use chrono::{DateTime, Utc};
use qrquota_core::{DecisionReason, QuotaDecision, SubjectId, TierPolicy, WindowKind, WindowUsage};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Decide whether `counts` fit the budget of `policy` at instant `at`.
///
/// Each count already includes the request being decided, so a window admits
/// while `count <= max_count`. Unlimited windows are reported but never deny.
/// When several windows are exceeded the longest one is named in the reason.
///
/// A finite window with no entry in `counts` is treated as an unknown count and
/// the decision fails closed with [`DecisionReason::QuotaUnavailable`].
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use qrquota_core::{Limit, SubjectId, TierPolicy, WindowKind, WindowLimit};
/// use qrquota_rate_limit::evaluate;
/// use std::collections::BTreeMap;
///
/// let policy = TierPolicy::new(
///     "free",
///     "",
///     [WindowLimit::new(WindowKind::Minute, Limit::finite(10).unwrap())],
/// )
/// .unwrap();
///
/// let at_limit = BTreeMap::from([(WindowKind::Minute, 10)]);
/// assert!(evaluate(&policy, &SubjectId::user(1), Utc::now(), &at_limit).allowed());
///
/// let over = BTreeMap::from([(WindowKind::Minute, 11)]);
/// assert!(!evaluate(&policy, &SubjectId::user(1), Utc::now(), &over).allowed());
/// ```
pub fn evaluate(
    policy: &TierPolicy,
    subject: &SubjectId,
    at: DateTime<Utc>,
    counts: &BTreeMap<WindowKind, u64>,
) -> QuotaDecision {
    let mut windows = Vec::with_capacity(policy.limits().len());

    for limit in policy.limits() {
        let key = limit.kind.window_key(at);
        let reset_at = limit.kind.reset_at(key);
        match counts.get(&limit.kind) {
            Some(&used) => windows.push(WindowUsage::new(limit.kind, used, limit.max_count, reset_at)),
            None if limit.max_count.is_unlimited() => {
                windows.push(WindowUsage::new(limit.kind, 0, limit.max_count, reset_at))
            }
            None => {
                warn!(window = %limit.kind, "No count supplied for a finite window");
                return QuotaDecision::unavailable(
                    subject.clone(),
                    policy.name(),
                    at,
                    format!("missing count for {} window", limit.kind),
                );
            }
        }
    }

    // Limits are sorted shortest first, so the last exceeded window is the longest.
    let reason = windows
        .iter()
        .rev()
        .find(|usage| usage.is_exceeded())
        .map(|usage| DecisionReason::QuotaExceeded {
            window: usage.kind,
            limit: usage.limit,
            used: usage.used,
            reset_at: usage.reset_at,
        })
        .unwrap_or(DecisionReason::Admitted);

    debug!(subject = %subject, tier = %policy.name(), %reason, "Evaluated quota");
    QuotaDecision::evaluated(subject.clone(), policy.name(), at, windows, reason)
}
