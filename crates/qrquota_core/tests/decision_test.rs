use chrono::{TimeZone, Utc};
use qrquota_core::{DecisionReason, Limit, QuotaDecision, SubjectId, WindowKind, WindowUsage};

fn minute_usage(used: u64) -> WindowUsage {
    let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 32, 45).unwrap();
    let reset = WindowKind::Minute.reset_at(WindowKind::Minute.window_key(at));
    WindowUsage::new(WindowKind::Minute, used, Limit::finite(10).unwrap(), reset)
}

#[test]
fn decision_serializes_for_callers() {
    let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 32, 45).unwrap();
    let decision = QuotaDecision::evaluated(
        SubjectId::api_key("abc"),
        "free",
        at,
        vec![minute_usage(3)],
        DecisionReason::Admitted,
    );

    let json = serde_json::to_value(&decision).unwrap();
    assert_eq!(json["allowed"], true);
    assert_eq!(json["subject"], "key:abc");
    assert_eq!(json["reason"]["code"], "admitted");
    assert_eq!(json["windows"][0]["kind"], "minute");
    assert_eq!(json["windows"][0]["limit"], 10);
    assert_eq!(json["windows"][0]["remaining"], 7);
    assert_eq!(json["windows"][0]["reset_at"], "2024-01-01T10:33:00Z");
}

#[test]
fn usage_over_budget_is_exceeded() {
    assert!(!minute_usage(10).is_exceeded());
    assert!(minute_usage(11).is_exceeded());
    assert_eq!(minute_usage(11).remaining, Some(0));
}

#[test]
fn unlimited_usage_reports_sentinel_limit() {
    let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let usage = WindowUsage::new(WindowKind::Day, 50_000, Limit::Unlimited, at);
    let json = serde_json::to_value(usage).unwrap();
    assert_eq!(json["limit"], -1);
    assert!(json["remaining"].is_null());
}
