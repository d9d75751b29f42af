use chrono::{NaiveDate, Utc};
use mongodb::bson::DateTime;

pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Parses a `YYYY-MM-DD` calendar day into UTC midnight.
pub fn parse_day(value: &str) -> Option<DateTime> {
    let day = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()?;
    let midnight = day.and_hms_opt(0, 0, 0)?.and_utc();
    Some(DateTime::from_millis(midnight.timestamp_millis()))
}

pub fn today() -> DateTime {
    let now = Utc::now().timestamp_millis();
    DateTime::from_millis(now - now.rem_euclid(DAY_MS))
}

/// Whole days in `[start, end)`.
pub fn days_between(start: DateTime, end: DateTime) -> i64 {
    (end.timestamp_millis() - start.timestamp_millis()) / DAY_MS
}

pub fn to_iso(value: &DateTime) -> String {
    value.try_to_rfc3339_string().unwrap_or_default()
}

pub fn to_day(value: &DateTime) -> String {
    to_iso(value).chars().take(10).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_calendar_days_at_midnight() {
        let day = parse_day("2026-03-01").unwrap();
        assert_eq!(day.timestamp_millis() % DAY_MS, 0);
        assert_eq!(to_day(&day), "2026-03-01");
        assert!(parse_day("01/03/2026").is_none());
        assert!(parse_day("2026-02-30").is_none());
    }

    #[test]
    fn counts_nights() {
        let start = parse_day("2026-02-27").unwrap();
        let end = parse_day("2026-03-02").unwrap();
        assert_eq!(days_between(start, end), 3);
        assert_eq!(days_between(start, start), 0);
    }

    #[test]
    fn today_is_midnight() {
        assert_eq!(today().timestamp_millis() % DAY_MS, 0);
        assert!(today().timestamp_millis() <= DateTime::now().timestamp_millis());
    }
}
