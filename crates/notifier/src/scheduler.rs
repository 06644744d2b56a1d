//! Timing for the daily lookahead scan.

use chrono::{DateTime, FixedOffset, NaiveTime, TimeDelta, Utc};

use assetmail_common::time::{local_date, local_to_utc};

/// The next instant strictly after `now` at `hour:00` local time.
///
/// Hours past 23 are clamped to 23.
pub fn next_daily_run(now: DateTime<Utc>, hour: u32, zone: &FixedOffset) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    match local_to_utc(local_date(now, zone).and_time(at), zone) {
        Some(today) if today > now => today,
        Some(today) => today + TimeDelta::days(1),
        None => now + TimeDelta::days(1),
    }
}

/// How long to sleep from `now` until the next daily run.
pub fn delay_until_next_run(now: DateTime<Utc>, hour: u32, zone: &FixedOffset) -> std::time::Duration {
    (next_daily_run(now, hour, zone) - now)
        .to_std()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetmail_common::time::default_zone;
    use chrono::TimeZone;

    #[test]
    fn test_next_run_later_today() {
        // 07:00 local
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let next = next_daily_run(now, 9, &default_zone());
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 1, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_next_run_tomorrow_when_passed() {
        // 09:00 local exactly, already due
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 2, 0, 0).unwrap();
        let next = next_daily_run(now, 9, &default_zone());
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 2, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_next_run_across_utc_midnight() {
        // 23:30 UTC on Mar 1 is 06:30 Mar 2 local
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 23, 30, 0).unwrap();
        let next = next_daily_run(now, 9, &default_zone());
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 2, 2, 0, 0).unwrap());
        assert_eq!(
            delay_until_next_run(now, 9, &default_zone()),
            std::time::Duration::from_secs(150 * 60)
        );
    }
}
