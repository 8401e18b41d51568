//! Subscription tiers and the policy table.
//!
//! [`ShippedTier`] lists the four tiers the product launches with. Deployments
//! add or override tiers in `qrquota.toml`; [`TierPolicyTable::from_config`]
//! turns every `[tiers.<name>]` section into a [`TierPolicy`].

use crate::QuotaConfig;
use qrquota_core::{Limit, TierPolicy, WindowKind, WindowLimit};
use qrquota_error::{TierError, TierErrorKind};
use std::collections::BTreeMap;
use strum::IntoEnumIterator;
use tracing::{debug, instrument};

/// Tiers shipped with the product.
///
/// Rates match the bundled `qrquota.toml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ShippedTier {
    /// 10 per minute, 100 per hour, 1000 per day
    Free,
    /// 60 per minute, 1000 per hour, 10000 per day
    Pro,
    /// 120 per minute, 5000 per hour, 50000 per day
    Business,
    /// Metered, never denied
    Enterprise,
}

impl ShippedTier {
    /// Tier name as used in configuration and on subjects.
    pub fn name(&self) -> &str {
        self.as_ref()
    }

    /// Human readable summary.
    pub fn description(&self) -> &'static str {
        match self {
            ShippedTier::Free => "Free tier with basic rate limits for personal use",
            ShippedTier::Pro => "Pro tier with increased limits for professionals",
            ShippedTier::Business => "Business tier with high limits for growing businesses",
            ShippedTier::Enterprise => "Enterprise tier with maximum limits and priority support",
        }
    }

    /// Minute, hour and day budgets.
    pub fn limits(&self) -> [WindowLimit; 3] {
        let (minute, hour, day) = match self {
            ShippedTier::Free => (Limit::finite(10), Limit::finite(100), Limit::finite(1_000)),
            ShippedTier::Pro => (Limit::finite(60), Limit::finite(1_000), Limit::finite(10_000)),
            ShippedTier::Business => (
                Limit::finite(120),
                Limit::finite(5_000),
                Limit::finite(50_000),
            ),
            ShippedTier::Enterprise => (None, None, None),
        };
        // `None` here only ever comes from the enterprise row
        [
            WindowLimit::new(WindowKind::Minute, minute.unwrap_or(Limit::Unlimited)),
            WindowLimit::new(WindowKind::Hour, hour.unwrap_or(Limit::Unlimited)),
            WindowLimit::new(WindowKind::Day, day.unwrap_or(Limit::Unlimited)),
        ]
    }

    /// Validated policy for this tier.
    ///
    /// # Errors
    ///
    /// Never fails for the shipped rows; the result mirrors [`TierPolicy::new`].
    pub fn policy(&self) -> Result<TierPolicy, TierError> {
        TierPolicy::new(self.name(), self.description(), self.limits())
    }
}

/// Read-only map from tier name to its policy.
///
/// Built once at startup and shared behind an `Arc`. Lookups of unregistered
/// tiers fail with [`TierErrorKind::Unknown`]; callers deny the request.
///
/// # Example
///
/// ```
/// use qrquota_core::WindowKind;
/// use qrquota_rate_limit::TierPolicyTable;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let table = TierPolicyTable::shipped()?;
/// let limits = table.limits_for("free")?;
/// assert_eq!(limits[0].kind, WindowKind::Minute);
/// assert!(table.limits_for("platinum").is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierPolicyTable {
    policies: BTreeMap<String, TierPolicy>,
}

impl TierPolicyTable {
    /// Table of the four shipped tiers.
    ///
    /// # Errors
    ///
    /// Returns a tier error if a shipped row is invalid.
    pub fn shipped() -> Result<Self, TierError> {
        ShippedTier::iter()
            .map(|tier| tier.policy())
            .collect::<Result<Vec<_>, _>>()
            .map(Self::from_policies)
    }

    /// Table of every tier in `config`.
    ///
    /// # Errors
    ///
    /// Returns a tier error if a configured tier defines no window.
    #[instrument(skip(config), fields(tiers = config.tiers.len()))]
    pub fn from_config(config: &QuotaConfig) -> Result<Self, TierError> {
        let policies = config
            .tiers
            .iter()
            .map(|(name, tier)| tier.to_policy(name))
            .collect::<Result<Vec<_>, _>>()?;
        let table = Self::from_policies(policies);
        debug!(tiers = ?table.tier_names().collect::<Vec<_>>(), "Loaded tier policy table");
        Ok(table)
    }

    /// Table holding exactly `policies`. Later entries replace earlier ones of the same name.
    pub fn from_policies(policies: impl IntoIterator<Item = TierPolicy>) -> Self {
        Self {
            policies: policies
                .into_iter()
                .map(|policy| (policy.name().clone(), policy))
                .collect(),
        }
    }

    /// Window limits of `tier`, shortest window first.
    ///
    /// # Errors
    ///
    /// Returns [`TierErrorKind::Unknown`] if the tier is not registered.
    pub fn limits_for(&self, tier: &str) -> Result<&[WindowLimit], TierError> {
        self.policy(tier).map(|policy| policy.limits().as_slice())
    }

    /// Full policy of `tier`.
    ///
    /// # Errors
    ///
    /// Returns [`TierErrorKind::Unknown`] if the tier is not registered.
    pub fn policy(&self, tier: &str) -> Result<&TierPolicy, TierError> {
        self.policies
            .get(tier)
            .ok_or_else(|| TierError::new(TierErrorKind::Unknown(tier.to_string())))
    }

    /// Registered tier names in lexical order.
    pub fn tier_names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    /// Every registered policy in lexical order of name.
    pub fn policies(&self) -> impl Iterator<Item = &TierPolicy> {
        self.policies.values()
    }

    /// Number of registered tiers.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether no tier is registered.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shipped_names() {
        let names: Vec<_> = ShippedTier::iter().map(|t| t.to_string()).collect();
        assert_eq!(names, vec!["free", "pro", "business", "enterprise"]);
    }

    #[test]
    fn test_enterprise_is_unlimited() {
        let policy = ShippedTier::Enterprise.policy().unwrap();
        assert!(policy.is_unlimited());
        assert_eq!(policy.limits().len(), 3);
    }

    #[test]
    fn test_unknown_tier_error_kind() {
        let table = TierPolicyTable::shipped().unwrap();
        let err = table.limits_for("gold").unwrap_err();
        assert_eq!(err.kind(), &TierErrorKind::Unknown("gold".to_string()));
    }
}
