//! Accounting periods are anchored to UTC: a day starts at 00:00:00 UTC and a
//! month on day 1, 00:00:00 UTC. Counters derived from a period carry a TTL a
//! little longer than the period itself so a fresh window never collides with a
//! stale key.

use chrono::{DateTime, Datelike, Utc};
use std::time::Duration;

/// Kind of accounting period a usage row covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodType {
    Daily,
    Monthly,
}

impl PeriodType {
    pub fn as_str(self) -> &'static str {
        match self {
            PeriodType::Daily => "daily",
            PeriodType::Monthly => "monthly",
        }
    }
}

/// Conservative TTL for daily counters (25 hours).
pub const DAILY_COUNTER_TTL: Duration = Duration::from_secs(25 * 60 * 60);
/// Conservative TTL for monthly counters (32 days).
pub const MONTHLY_COUNTER_TTL: Duration = Duration::from_secs(32 * 24 * 60 * 60);

/// The key identifying the period containing `now`: `YYYY-MM-DD` for daily,
/// `YYYY-MM` for monthly.
pub fn period_key(period: PeriodType, now: DateTime<Utc>) -> String {
    match period {
        PeriodType::Daily => now.format("%Y-%m-%d").to_string(),
        PeriodType::Monthly => now.format("%Y-%m").to_string(),
    }
}

/// Start of the period containing `now`, in seconds since the epoch.
pub fn period_start(period: PeriodType, now: DateTime<Utc>) -> u64 {
    let date = match period {
        PeriodType::Daily => now.date_naive(),
        PeriodType::Monthly => now.date_naive().with_day(1).unwrap_or(now.date_naive()),
    };
    let start = date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
    start.timestamp().max(0) as u64
}

/// TTL to apply to a counter scoped to the given period type.
pub fn counter_ttl(period: PeriodType) -> Duration {
    match period {
        PeriodType::Daily => DAILY_COUNTER_TTL,
        PeriodType::Monthly => MONTHLY_COUNTER_TTL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn daily_key_is_utc_date() {
        let t = Utc.with_ymd_and_hms(2026, 8, 1, 23, 59, 59).unwrap();
        assert_eq!(period_key(PeriodType::Daily, t), "2026-08-01");
        assert_eq!(period_key(PeriodType::Monthly, t), "2026-08");
    }

    #[test]
    fn day_boundary_rolls_at_utc_midnight() {
        let before = Utc.with_ymd_and_hms(2026, 3, 31, 23, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        assert_ne!(
            period_key(PeriodType::Daily, before),
            period_key(PeriodType::Daily, after)
        );
        assert_ne!(
            period_key(PeriodType::Monthly, before),
            period_key(PeriodType::Monthly, after)
        );
    }

    #[test]
    fn period_start_is_midnight() {
        let t = Utc.with_ymd_and_hms(2026, 8, 15, 13, 45, 0).unwrap();
        let daily = period_start(PeriodType::Daily, t);
        let monthly = period_start(PeriodType::Monthly, t);
        assert_eq!(
            daily,
            Utc.with_ymd_and_hms(2026, 8, 15, 0, 0, 0).unwrap().timestamp() as u64
        );
        assert_eq!(
            monthly,
            Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap().timestamp() as u64
        );
    }
}
