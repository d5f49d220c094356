use chrono::{Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;

/// Both backends publish search data with a multi-day delay; windows that
/// include the trailing days would compare partial data against full days.
pub const DEFAULT_REPORTING_LAG_DAYS: i64 = 3;

/// Parse a `YYYY-MM-DD` day key as emitted by the reporting backends.
pub fn parse_day(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// Shift a date back to the preceding Monday (same day if already Monday).
pub fn week_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(day.weekday().num_days_from_monday() as i64)
}

/// An inclusive day range used for analysis queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Window of `days` days ending at `end` inclusive.
    pub fn ending_at(end: NaiveDate, days: i64) -> Self {
        let days = days.max(1);
        Self {
            start: end - Duration::days(days - 1),
            end,
        }
    }

    /// Window of `days` days ending `lag_days` before today.
    pub fn delayed(days: i64, lag_days: i64) -> Self {
        let end = Utc::now().date_naive() - Duration::days(lag_days.max(0));
        Self::ending_at(end, days)
    }

    /// The adjacent window of equal length immediately before this one.
    pub fn preceding(&self) -> Self {
        let len = self.len_days();
        Self {
            start: self.start - Duration::days(len),
            end: self.start - Duration::days(1),
        }
    }

    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    #[test]
    fn week_start_aligns_to_monday() {
        // 2024-01-01 is a Monday.
        assert_eq!(week_start(day(2024, 1, 1)), day(2024, 1, 1));
        assert_eq!(week_start(day(2024, 1, 4)), day(2024, 1, 1));
        assert_eq!(week_start(day(2024, 1, 7)), day(2024, 1, 1));
        assert_eq!(week_start(day(2024, 1, 8)), day(2024, 1, 8));
    }

    #[test]
    fn preceding_window_is_adjacent_and_equal_length() {
        let current = DateWindow::ending_at(day(2024, 3, 28), 28);
        let previous = current.preceding();
        assert_eq!(current.len_days(), 28);
        assert_eq!(previous.len_days(), 28);
        assert_eq!(previous.end + Duration::days(1), current.start);
    }

    #[test]
    fn parse_day_accepts_backend_keys() {
        assert_eq!(parse_day("2024-06-30"), Some(day(2024, 6, 30)));
        assert_eq!(parse_day(" 2024-06-30 "), Some(day(2024, 6, 30)));
        assert_eq!(parse_day("06/30/2024"), None);
        assert_eq!(parse_day(""), None);
    }
}
