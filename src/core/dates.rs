use chrono::{Datelike, Months, NaiveDate};
use thiserror::Error;

use super::types::DayMonth;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateParseError {
    #[error("date is empty")]
    Empty,
    #[error("unrecognised date format: {0:?}")]
    Format(String),
    #[error("date out of range: {0:?}")]
    OutOfRange(String),
}

impl DayMonth {
    pub fn new(day: u32, month: u32) -> Option<Self> {
        // 29 February is accepted and clamped in non-leap years.
        if (1..=12).contains(&month) && day >= 1 && day <= days_in_month(2000, month) {
            Some(Self { day, month })
        } else {
            None
        }
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            day: date.day(),
            month: date.month(),
        }
    }

    pub fn in_year(self, year: i32) -> Option<NaiveDate> {
        let day = self.day.min(days_in_month(year, self.month));
        NaiveDate::from_ymd_opt(year, self.month, day)
    }

    pub fn next_on_or_after(self, reference: NaiveDate) -> Option<NaiveDate> {
        match self.in_year(reference.year()) {
            Some(date) if date >= reference => Some(date),
            _ => self.in_year(reference.year() + 1),
        }
    }
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// First day of the month `months` after the month of `date`.
pub fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    month_start(date)
        .checked_add_months(Months::new(months))
        .unwrap_or(NaiveDate::MAX)
}

pub fn month_offset(start: NaiveDate, date: NaiveDate) -> i64 {
    (date.year() as i64 - start.year() as i64) * 12 + date.month() as i64 - start.month() as i64
}

pub fn month_label(date: NaiveDate) -> String {
    date.format("%b %Y").to_string()
}

/// Parses a full calendar date. Accepted shapes: `d.m.yyyy`, `d.m.yy`, ISO
/// `yyyy-mm-dd` (optionally followed by a time), `d/m/yyyy` and `yyyy/mm/dd`.
pub fn parse_date(raw: &str) -> Result<NaiveDate, DateParseError> {
    let trimmed = raw.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(DateParseError::Empty);
    }
    let date_part = trimmed
        .split(|c: char| c == 'T' || c.is_whitespace())
        .next()
        .unwrap_or(trimmed);

    let (separator, parts) =
        split_numeric(date_part).ok_or_else(|| DateParseError::Format(raw.to_string()))?;
    let (year, month, day) = match (separator, parts.as_slice()) {
        ('-' | '/', [y, m, d]) if y.len() == 4 => (*y, *m, *d),
        ('/' | '.', [d, m, y]) => (*y, *m, *d),
        _ => return Err(DateParseError::Format(raw.to_string())),
    };

    let year = expand_year(year).ok_or_else(|| DateParseError::Format(raw.to_string()))?;
    let month = month.parse::<u32>().map_err(|_| DateParseError::Format(raw.to_string()))?;
    let day = day.parse::<u32>().map_err(|_| DateParseError::Format(raw.to_string()))?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| DateParseError::OutOfRange(raw.to_string()))
}

pub fn parse_day_month(raw: &str) -> Result<DayMonth, DateParseError> {
    if let Ok(date) = parse_date(raw) {
        return Ok(DayMonth::of(date));
    }
    let trimmed = raw.trim().trim_start_matches("--").trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(DateParseError::Empty);
    }

    let (separator, parts) =
        split_numeric(trimmed).ok_or_else(|| DateParseError::Format(raw.to_string()))?;
    let (day, month) = match (separator, parts.as_slice()) {
        ('.' | '/', [d, m]) => (*d, *m),
        ('-', [m, d]) => (*d, *m),
        _ => return Err(DateParseError::Format(raw.to_string())),
    };
    let day = day.parse::<u32>().map_err(|_| DateParseError::Format(raw.to_string()))?;
    let month = month.parse::<u32>().map_err(|_| DateParseError::Format(raw.to_string()))?;
    DayMonth::new(day, month).ok_or_else(|| DateParseError::OutOfRange(raw.to_string()))
}

fn split_numeric(raw: &str) -> Option<(char, Vec<&str>)> {
    let separator = ['.', '-', '/'].into_iter().find(|sep| raw.contains(*sep))?;
    let parts: Vec<&str> = raw.split(separator).map(str::trim).collect();
    let well_formed = (2..=3).contains(&parts.len())
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    well_formed.then_some((separator, parts))
}

fn expand_year(raw: &str) -> Option<i32> {
    let year = raw.parse::<i32>().ok()?;
    match raw.len() {
        2 => Some(2000 + year),
        4 => Some(year),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn parse_date_accepts_supported_shapes() {
        assert_eq!(parse_date("2025-03-15"), Ok(ymd(2025, 3, 15)));
        assert_eq!(parse_date("2025-03-15T08:30:00"), Ok(ymd(2025, 3, 15)));
        assert_eq!(parse_date("15.03.2025"), Ok(ymd(2025, 3, 15)));
        assert_eq!(parse_date("1.4.26"), Ok(ymd(2026, 4, 1)));
        assert_eq!(parse_date("15/03/2025"), Ok(ymd(2025, 3, 15)));
        assert_eq!(parse_date("2025/03/15"), Ok(ymd(2025, 3, 15)));
        assert_eq!(parse_date(" 31.12.2025. "), Ok(ymd(2025, 12, 31)));
    }

    #[test]
    fn parse_date_rejects_garbage_and_impossible_dates() {
        assert_eq!(parse_date("   "), Err(DateParseError::Empty));
        assert!(matches!(parse_date("soon"), Err(DateParseError::Format(_))));
        assert!(matches!(parse_date("15.03"), Err(DateParseError::Format(_))));
        assert!(matches!(
            parse_date("31.02.2025"),
            Err(DateParseError::OutOfRange(_))
        ));
    }

    #[test]
    fn parse_day_month_handles_partial_and_full_dates() {
        assert_eq!(parse_day_month("15.3."), Ok(DayMonth { day: 15, month: 3 }));
        assert_eq!(parse_day_month("1/12"), Ok(DayMonth { day: 1, month: 12 }));
        assert_eq!(parse_day_month("--07-04"), Ok(DayMonth { day: 4, month: 7 }));
        assert_eq!(
            parse_day_month("2024-02-29"),
            Ok(DayMonth { day: 29, month: 2 })
        );
        assert!(parse_day_month("32.1").is_err());
        assert!(parse_day_month("1.13").is_err());
    }

    #[test]
    fn leap_day_is_clamped_in_common_years() {
        let leap_day = DayMonth::new(29, 2).expect("valid day/month");
        assert_eq!(leap_day.in_year(2025), Some(ymd(2025, 2, 28)));
        assert_eq!(leap_day.in_year(2028), Some(ymd(2028, 2, 29)));
    }

    #[test]
    fn next_on_or_after_rolls_to_following_year() {
        let due = DayMonth::new(10, 3).expect("valid day/month");
        assert_eq!(due.next_on_or_after(ymd(2025, 3, 10)), Some(ymd(2025, 3, 10)));
        assert_eq!(due.next_on_or_after(ymd(2025, 3, 11)), Some(ymd(2026, 3, 10)));
    }

    #[test]
    fn month_helpers_agree() {
        let start = ymd(2025, 11, 20);
        assert_eq!(add_months(start, 0), ymd(2025, 11, 1));
        assert_eq!(add_months(start, 3), ymd(2026, 2, 1));
        assert_eq!(month_offset(start, ymd(2026, 2, 28)), 3);
        assert_eq!(month_offset(start, ymd(2025, 10, 31)), -1);
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(month_label(ymd(2026, 2, 1)), "Feb 2026");
    }
}
