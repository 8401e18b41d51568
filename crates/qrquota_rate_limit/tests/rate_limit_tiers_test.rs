//! Tests for the tier policy table.

use qrquota_core::{Limit, WindowKind};
use qrquota_error::TierErrorKind;
use qrquota_rate_limit::{ShippedTier, TierPolicyTable};
use strum::IntoEnumIterator;

#[test]
fn test_shipped_limits() {
    let table = TierPolicyTable::shipped().unwrap();
    let expected = [
        ("free", [10, 100, 1_000]),
        ("pro", [60, 1_000, 10_000]),
        ("business", [120, 5_000, 50_000]),
    ];
    for (tier, [minute, hour, day]) in expected {
        let limits = table.limits_for(tier).unwrap();
        let budgets: Vec<_> = limits.iter().map(|l| (l.kind, l.max_count.max_count())).collect();
        assert_eq!(
            budgets,
            vec![
                (WindowKind::Minute, Some(minute)),
                (WindowKind::Hour, Some(hour)),
                (WindowKind::Day, Some(day)),
            ],
            "tier {tier}"
        );
    }
}

#[test]
fn test_enterprise_windows_are_all_unlimited() {
    let table = TierPolicyTable::shipped().unwrap();
    let limits = table.limits_for("enterprise").unwrap();
    assert!(limits.iter().all(|l| l.max_count == Limit::Unlimited));
}

#[test]
fn test_every_shipped_tier_is_registered() {
    let table = TierPolicyTable::shipped().unwrap();
    assert_eq!(table.len(), ShippedTier::iter().count());
    for tier in ShippedTier::iter() {
        let policy = table.policy(tier.name()).unwrap();
        assert_eq!(policy.description(), tier.description());
    }
}

#[test]
fn test_unknown_tier_is_an_error() {
    let table = TierPolicyTable::shipped().unwrap();
    let err = table.limits_for("Free").unwrap_err();
    assert!(matches!(err.kind(), TierErrorKind::Unknown(name) if name == "Free"));
}

#[test]
fn test_empty_table_rejects_everything() {
    let table = TierPolicyTable::default();
    assert!(table.is_empty());
    assert!(table.policy("free").is_err());
}
