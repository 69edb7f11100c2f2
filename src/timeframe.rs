//! Calendar date-range normalization.
//!
//! A bare `YYYY-MM-DD` filter bound is a *local* calendar day. Sending it
//! to the server as a naive UTC date shifts the visible window by the
//! user's UTC offset and silently drops boundary-day records, so the
//! bounds are pinned here: start-of-day for `from`, 23:59:59 for `to`,
//! both in the user's zone, then converted to UTC instants.

use chrono::{DateTime, Datelike, Days, Local, NaiveDate, TimeZone, Utc};
use thiserror::Error;

/// Days covered by the default analytics window.
pub const DEFAULT_WINDOW_DAYS: u64 = 30;

/// Errors from date-range normalization.
#[derive(Debug, Error)]
pub enum TimeframeError {
    #[error("invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("date '{0}' has no representable time in the local zone")]
    Unrepresentable(String),
}

/// A normalized filter window of absolute instants. An absent bound is
/// unbounded on that side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstantRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Normalize a pair of optional calendar dates in the system local zone.
pub fn normalize_range(
    from: Option<&str>,
    to: Option<&str>,
) -> Result<InstantRange, TimeframeError> {
    normalize_range_in(&Local, from, to)
}

/// Normalize a pair of optional calendar dates in an explicit zone.
pub fn normalize_range_in<Tz: TimeZone>(
    tz: &Tz,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<InstantRange, TimeframeError> {
    let from = from.map(|date| day_start(tz, date)).transpose()?;
    let to = to.map(|date| day_end(tz, date)).transpose()?;
    Ok(InstantRange { from, to })
}

/// Midnight at the start of the given calendar day, as a UTC instant.
pub fn day_start<Tz: TimeZone>(tz: &Tz, date: &str) -> Result<DateTime<Utc>, TimeframeError> {
    resolve(tz, date, 0, 0, 0, true)
}

/// The last whole second (23:59:59) of the given calendar day, as a UTC
/// instant. Matches the server's inclusive `to` filtering.
pub fn day_end<Tz: TimeZone>(tz: &Tz, date: &str) -> Result<DateTime<Utc>, TimeframeError> {
    resolve(tz, date, 23, 59, 59, false)
}

fn resolve<Tz: TimeZone>(
    tz: &Tz,
    date: &str,
    hour: u32,
    min: u32,
    sec: u32,
    earliest: bool,
) -> Result<DateTime<Utc>, TimeframeError> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| TimeframeError::InvalidDate(date.to_string()))?;
    let naive = day
        .and_hms_opt(hour, min, sec)
        .ok_or_else(|| TimeframeError::InvalidDate(date.to_string()))?;
    // DST transitions can make a wall-clock time ambiguous or missing;
    // take the bound-appropriate side of an ambiguity.
    let local = tz.from_local_datetime(&naive);
    let resolved = if earliest {
        local.earliest()
    } else {
        local.latest()
    };
    resolved
        .map(|instant| instant.with_timezone(&Utc))
        .ok_or_else(|| TimeframeError::Unrepresentable(date.to_string()))
}

/// Default trailing window for analytics: (today - 30 days, today) as
/// local calendar dates.
pub fn default_window() -> (String, String) {
    default_window_on(Local::now().date_naive())
}

fn default_window_on(today: NaiveDate) -> (String, String) {
    let start = today
        .checked_sub_days(Days::new(DEFAULT_WINDOW_DAYS))
        .unwrap_or(today);
    (format_date(start), format_date(today))
}

fn format_date(date: NaiveDate) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn utc_plus_7() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    #[test]
    fn test_same_day_range_covers_whole_local_day() {
        let tz = utc_plus_7();
        let range =
            normalize_range_in(&tz, Some("2024-01-05"), Some("2024-01-05")).unwrap();

        let from = range.from.unwrap();
        let to = range.to.unwrap();
        assert_eq!(from.to_rfc3339(), "2024-01-04T17:00:00+00:00");
        assert_eq!(to.to_rfc3339(), "2024-01-05T16:59:59+00:00");

        // Local Jan 4 23:59:59.999 is before the window, local Jan 6
        // 00:00:00 is after it.
        let before = tz
            .with_ymd_and_hms(2024, 1, 4, 23, 59, 59)
            .unwrap()
            .with_timezone(&Utc);
        let after = tz
            .with_ymd_and_hms(2024, 1, 6, 0, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert!(before < from);
        assert!(after > to);
    }

    #[test]
    fn test_negative_offset_zone() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let range = normalize_range_in(&tz, Some("2024-06-10"), None).unwrap();
        assert_eq!(
            range.from.unwrap().to_rfc3339(),
            "2024-06-10T05:00:00+00:00"
        );
        assert!(range.to.is_none());
    }

    #[test]
    fn test_absent_bounds_stay_absent() {
        let range = normalize_range_in(&utc_plus_7(), None, None).unwrap();
        assert_eq!(range, InstantRange::default());
    }

    #[test]
    fn test_invalid_date_rejected() {
        let err = normalize_range_in(&utc_plus_7(), Some("01/05/2024"), None).unwrap_err();
        assert!(matches!(err, TimeframeError::InvalidDate(_)));
        let err = normalize_range_in(&utc_plus_7(), None, Some("2024-13-40")).unwrap_err();
        assert!(matches!(err, TimeframeError::InvalidDate(_)));
    }

    #[test]
    fn test_end_of_day_is_inclusive_second() {
        let tz = FixedOffset::east_opt(0).unwrap();
        let end = day_end(&tz, "2024-02-29").unwrap();
        assert_eq!(end.to_rfc3339(), "2024-02-29T23:59:59+00:00");
    }

    #[test]
    fn test_default_window_spans_thirty_days() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let (from, to) = default_window_on(today);
        assert_eq!(from, "2024-02-14");
        assert_eq!(to, "2024-03-15");
    }
}
