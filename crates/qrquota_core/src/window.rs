//! Window kinds and their UTC boundary arithmetic.
//!
//! A window instance is identified by its canonical start instant. Every
//! boundary is computed in UTC, so daylight-saving transitions never move a
//! reset and two processes in different time zones agree on every key.

use chrono::{DateTime, Datelike, Days, Months, NaiveTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_HOUR: i64 = 3_600;
const SECONDS_PER_DAY: i64 = 86_400;

/// Recurring interval over which requests are counted.
///
/// Ordered by period length, so `Month` is the greatest. The ordering is used
/// to pick the most informative window when several are exceeded at once.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::EnumIter,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WindowKind {
    /// Calendar minute in UTC
    Minute,
    /// Calendar hour in UTC
    Hour,
    /// UTC day, starting at midnight
    Day,
    /// UTC calendar month, starting on the first
    Month,
}

impl WindowKind {
    /// Canonical key of the window instance containing `at`.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{TimeZone, Utc};
    /// use qrquota_core::WindowKind;
    ///
    /// let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 32, 45).unwrap();
    /// let key = WindowKind::Minute.window_key(at);
    /// assert_eq!(key.start(), Utc.with_ymd_and_hms(2024, 1, 1, 10, 32, 0).unwrap());
    /// ```
    pub fn window_key(self, at: DateTime<Utc>) -> WindowKey {
        let start = match self {
            WindowKind::Minute => truncate(at, SECONDS_PER_MINUTE),
            WindowKind::Hour => truncate(at, SECONDS_PER_HOUR),
            WindowKind::Day => truncate(at, SECONDS_PER_DAY),
            WindowKind::Month => (at.date_naive() - Days::new(u64::from(at.day0())))
                .and_time(NaiveTime::MIN)
                .and_utc(),
        };
        WindowKey(start)
    }

    /// Exclusive end of the window instance `key`, i.e. the start of the next one.
    pub fn reset_at(self, key: WindowKey) -> DateTime<Utc> {
        let start = key.0;
        match self {
            WindowKind::Minute => start + TimeDelta::seconds(SECONDS_PER_MINUTE),
            WindowKind::Hour => start + TimeDelta::seconds(SECONDS_PER_HOUR),
            WindowKind::Day => start + TimeDelta::seconds(SECONDS_PER_DAY),
            WindowKind::Month => start
                .checked_add_months(Months::new(1))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Length of the window instance `key`.
    ///
    /// Constant for every kind except `Month`, whose length follows the calendar.
    pub fn window_duration(self, key: WindowKey) -> TimeDelta {
        self.reset_at(key) - key.0
    }
}

/// Truncate `at` to a multiple of `unit_secs` since the Unix epoch.
fn truncate(at: DateTime<Utc>, unit_secs: i64) -> DateTime<Utc> {
    let into_unit = at.timestamp().rem_euclid(unit_secs);
    at - TimeDelta::seconds(into_unit) - TimeDelta::nanoseconds(i64::from(at.timestamp_subsec_nanos()))
}

/// Canonical start instant of one concrete window instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowKey(DateTime<Utc>);

impl WindowKey {
    /// Start of the window instance.
    pub fn start(self) -> DateTime<Utc> {
        self.0
    }

    /// Start of the window instance as whole Unix seconds.
    pub fn epoch_seconds(self) -> i64 {
        self.0.timestamp()
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

/// Canonical key of the `kind` window containing `at`.
pub fn window_key(kind: WindowKind, at: DateTime<Utc>) -> WindowKey {
    kind.window_key(at)
}

/// Exclusive end of the `kind` window instance identified by `key`.
pub fn reset_at(kind: WindowKind, key: WindowKey) -> DateTime<Utc> {
    kind.reset_at(key)
}
