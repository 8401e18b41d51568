//! Per-tier window limits.

use crate::WindowKind;
use qrquota_error::{ConfigError, TierError, TierErrorKind};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU64;

/// Configuration value meaning "no limit for this window".
pub const UNLIMITED_SENTINEL: i64 = -1;

/// Maximum number of requests in one window instance.
///
/// Serialized as an integer where [`UNLIMITED_SENTINEL`] means unlimited.
/// Zero and every other negative value are rejected at load time.
///
/// # Examples
///
/// ```
/// use qrquota_core::Limit;
///
/// let limit = Limit::try_from(10_i64).unwrap();
/// assert!(limit.permits(10));
/// assert!(!limit.permits(11));
/// assert_eq!(limit.remaining(4), Some(6));
///
/// assert!(Limit::try_from(-1_i64).unwrap().is_unlimited());
/// assert!(Limit::try_from(0_i64).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Limit {
    /// At most this many requests per window instance
    Finite(NonZeroU64),
    /// Never denies
    Unlimited,
}

impl Limit {
    /// Finite limit of `max_count` requests, `None` for zero.
    pub fn finite(max_count: u64) -> Option<Self> {
        NonZeroU64::new(max_count).map(Limit::Finite)
    }

    /// Whether this window is skipped during evaluation.
    pub fn is_unlimited(self) -> bool {
        matches!(self, Limit::Unlimited)
    }

    /// Configured maximum, `None` when unlimited.
    pub fn max_count(self) -> Option<u64> {
        match self {
            Limit::Finite(n) => Some(n.get()),
            Limit::Unlimited => None,
        }
    }

    /// Whether `count` requests, the current one included, fit in the budget.
    pub fn permits(self, count: u64) -> bool {
        match self {
            Limit::Finite(n) => count <= n.get(),
            Limit::Unlimited => true,
        }
    }

    /// Requests left after `count`, `None` when unlimited.
    pub fn remaining(self, count: u64) -> Option<u64> {
        self.max_count().map(|max| max.saturating_sub(count))
    }
}

impl TryFrom<i64> for Limit {
    type Error = ConfigError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value == UNLIMITED_SENTINEL {
            return Ok(Limit::Unlimited);
        }
        u64::try_from(value)
            .ok()
            .and_then(Limit::finite)
            .ok_or_else(|| {
                ConfigError::new(format!(
                    "window limit must be a positive integer or {UNLIMITED_SENTINEL} (unlimited), got {value}"
                ))
            })
    }
}

impl From<Limit> for i64 {
    fn from(limit: Limit) -> Self {
        match limit {
            Limit::Finite(n) => i64::try_from(n.get()).unwrap_or(i64::MAX),
            Limit::Unlimited => UNLIMITED_SENTINEL,
        }
    }
}

impl std::fmt::Display for Limit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Limit::Finite(n) => write!(f, "{n}"),
            Limit::Unlimited => write!(f, "unlimited"),
        }
    }
}

/// One `(window_kind, max_count)` pair of a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowLimit {
    /// Window the limit applies to
    pub kind: WindowKind,
    /// Budget per window instance
    pub max_count: Limit,
}

impl WindowLimit {
    /// Create a window limit.
    pub fn new(kind: WindowKind, max_count: Limit) -> Self {
        Self { kind, max_count }
    }
}

/// A subscription tier and its ordered window limits.
///
/// Built once from configuration and never mutated. The constructor enforces
/// that the tier defines at least one window and no window twice; limits are
/// kept sorted from the shortest period to the longest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, derive_getters::Getters)]
pub struct TierPolicy {
    /// Tier name, e.g. `free` or `enterprise`
    name: String,
    /// Human readable summary of the tier
    description: String,
    /// Limits sorted by window kind
    limits: Vec<WindowLimit>,
}

impl TierPolicy {
    /// Validate and build a tier policy.
    ///
    /// # Errors
    ///
    /// Returns [`TierErrorKind::Invalid`] if `limits` is empty or names a window
    /// kind more than once.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        limits: impl IntoIterator<Item = WindowLimit>,
    ) -> Result<Self, TierError> {
        let name = name.into();
        let mut limits: Vec<WindowLimit> = limits.into_iter().collect();
        if limits.is_empty() {
            return Err(TierError::new(TierErrorKind::Invalid {
                tier: name,
                reason: "a tier must define at least one window".to_string(),
            }));
        }
        limits.sort_by_key(|limit| limit.kind);
        if let Some(pair) = limits.windows(2).find(|pair| pair[0].kind == pair[1].kind) {
            return Err(TierError::new(TierErrorKind::Invalid {
                tier: name,
                reason: format!("window '{}' is defined twice", pair[0].kind),
            }));
        }
        Ok(Self {
            name,
            description: description.into(),
            limits,
        })
    }

    /// Limit configured for `kind`, if the tier meters that window.
    pub fn limit_for(&self, kind: WindowKind) -> Option<Limit> {
        self.limits
            .iter()
            .find(|limit| limit.kind == kind)
            .map(|limit| limit.max_count)
    }

    /// Whether every window of the tier is unlimited.
    pub fn is_unlimited(&self) -> bool {
        self.limits.iter().all(|limit| limit.max_count.is_unlimited())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finite(n: u64) -> Limit {
        Limit::finite(n).unwrap()
    }

    #[test]
    fn test_limit_boundary() {
        let limit = finite(10);
        assert!(limit.permits(10));
        assert!(!limit.permits(11));
        assert_eq!(limit.remaining(10), Some(0));
        assert_eq!(limit.remaining(12), Some(0));
    }

    #[test]
    fn test_unlimited_never_denies() {
        assert!(Limit::Unlimited.permits(u64::MAX));
        assert_eq!(Limit::Unlimited.remaining(5), None);
        assert_eq!(Limit::Unlimited.max_count(), None);
    }

    #[test]
    fn test_limit_rejects_zero_and_other_negatives() {
        assert!(Limit::try_from(0_i64).is_err());
        assert!(Limit::try_from(-2_i64).is_err());
        assert_eq!(i64::from(Limit::try_from(-1_i64).unwrap()), -1);
        assert_eq!(i64::from(Limit::try_from(42_i64).unwrap()), 42);
    }

    #[test]
    fn test_limit_serde_uses_sentinel() {
        let parsed: Vec<Limit> = serde_json::from_str("[5, -1]").unwrap();
        assert_eq!(parsed, vec![finite(5), Limit::Unlimited]);
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "[5,-1]");
        assert!(serde_json::from_str::<Limit>("0").is_err());
    }

    #[test]
    fn test_policy_sorts_limits() {
        let policy = TierPolicy::new(
            "free",
            "Free tier",
            [
                WindowLimit::new(WindowKind::Day, finite(1000)),
                WindowLimit::new(WindowKind::Minute, finite(10)),
                WindowLimit::new(WindowKind::Hour, finite(100)),
            ],
        )
        .unwrap();
        let kinds: Vec<_> = policy.limits().iter().map(|l| l.kind).collect();
        assert_eq!(kinds, vec![WindowKind::Minute, WindowKind::Hour, WindowKind::Day]);
        assert_eq!(policy.limit_for(WindowKind::Hour), Some(finite(100)));
        assert_eq!(policy.limit_for(WindowKind::Month), None);
        assert!(!policy.is_unlimited());
    }

    #[test]
    fn test_policy_requires_a_window() {
        let err = TierPolicy::new("empty", "", []).unwrap_err();
        assert!(matches!(err.kind(), TierErrorKind::Invalid { .. }));
    }

    #[test]
    fn test_policy_rejects_duplicate_window() {
        let err = TierPolicy::new(
            "dup",
            "",
            [
                WindowLimit::new(WindowKind::Minute, finite(1)),
                WindowLimit::new(WindowKind::Minute, finite(2)),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("defined twice"));
    }
}
