//! Fixed civil time zone helpers.
//!
//! All date math and display happens in one fixed zone (Asia/Bangkok, UTC+7,
//! no daylight saving). Instants are carried as `DateTime<Utc>`; anything that
//! compares calendar days converts to a `NaiveDate` in the zone first so the
//! time of day never shifts a result by one.

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta, Utc,
};
use serde_json::Value;

/// Default offset of the civil zone in hours.
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 7;

/// Display format for calendar dates (day/month/year).
const DISPLAY_FORMAT: &str = "%d/%m/%Y";

/// Build the fixed zone from an hour offset. Returns `None` outside ±23h.
pub fn zone_from_hours(hours: i32) -> Option<FixedOffset> {
    hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
}

/// The default civil zone (UTC+7).
pub fn default_zone() -> FixedOffset {
    zone_from_hours(DEFAULT_UTC_OFFSET_HOURS).unwrap_or(Utc.fix())
}

/// Calendar date of an instant in the zone.
pub fn local_date(instant: DateTime<Utc>, zone: &FixedOffset) -> NaiveDate {
    instant.with_timezone(zone).date_naive()
}

/// Interpret a wall-clock time in the zone as an instant.
///
/// `None` when the shift lands outside chrono's representable range.
pub fn local_to_utc(local: NaiveDateTime, zone: &FixedOffset) -> Option<DateTime<Utc>> {
    local
        .checked_sub_signed(TimeDelta::seconds(zone.local_minus_utc() as i64))
        .map(|utc| utc.and_utc())
}

/// Render an instant as `dd/mm/yyyy` in the zone.
pub fn format_date(instant: DateTime<Utc>, zone: &FixedOffset) -> String {
    instant.with_timezone(zone).format(DISPLAY_FORMAT).to_string()
}

/// Whole calendar days from `today` to the date of `target` in the zone.
///
/// Negative when the target is in the past. Computed on dates only.
pub fn days_until(target: DateTime<Utc>, today: NaiveDate, zone: &FixedOffset) -> i64 {
    (local_date(target, zone) - today).num_days()
}

/// Inclusive bounds of one calendar day in the zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub date: NaiveDate,
    /// 00:00:00.000 local
    pub start: DateTime<Utc>,
    /// 23:59:59.999 local
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

/// The single calendar day `days_ahead` days after the local date of `now`.
pub fn day_window(now: DateTime<Utc>, days_ahead: i64, zone: &FixedOffset) -> DayWindow {
    let date = local_date(now, zone) + TimeDelta::days(days_ahead);
    let midnight = date.and_time(NaiveTime::MIN);
    // only unrepresentable at the ends of chrono's calendar
    let start = local_to_utc(midnight, zone).unwrap_or_else(|| midnight.and_utc());
    let end = start + TimeDelta::days(1) - TimeDelta::milliseconds(1);
    DayWindow { date, start, end }
}

/// Collapse the representations of "a point in time" found in records into
/// one instant.
///
/// Accepted forms:
/// - RFC 3339 strings (`2025-03-01T08:00:00Z`)
/// - local date-times (`2025-03-01T08:00:00`, `2025-03-01 08:00:00`)
/// - date-only strings (`2025-03-01`, `01/03/2025`, `01-03-2025`), taken as
///   midnight of that civil date in the zone
/// - integers, taken as epoch milliseconds
/// - objects with `_seconds`/`seconds` and optional `_nanoseconds`/`nanoseconds`
pub fn parse_timestamp(value: &Value, zone: &FixedOffset) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s, zone),
        Value::Number(n) => {
            if let Some(ms) = n.as_i64() {
                DateTime::from_timestamp_millis(ms)
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite())
                    .and_then(|f| DateTime::from_timestamp_millis(f.round() as i64))
            }
        }
        Value::Object(map) => {
            let secs = map
                .get("_seconds")
                .or_else(|| map.get("seconds"))
                .and_then(Value::as_i64)?;
            let nanos = map
                .get("_nanoseconds")
                .or_else(|| map.get("nanoseconds"))
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0);
            DateTime::from_timestamp(secs, nanos)
        }
        _ => None,
    }
}

fn parse_timestamp_str(raw: &str, zone: &FixedOffset) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(local) = NaiveDateTime::parse_from_str(s, fmt) {
            return local_to_utc(local, zone);
        }
    }

    for fmt in ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return local_to_utc(date.and_time(NaiveTime::MIN), zone);
        }
    }

    None
}

/// Encode an instant the way it is written back into records.
pub fn to_record_value(instant: DateTime<Utc>) -> Value {
    Value::String(instant.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}
