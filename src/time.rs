//! Time-of-day and calendar-date parsing.
//!
//! Times are minutes since midnight. Dates are `dd/MM/yyyy`.

use chrono::{Duration, NaiveDate};

use crate::model::Minutes;

pub const DATE_FORMAT: &str = "%d/%m/%Y";

/// Last minute of a day, exclusive.
pub const END_OF_DAY: Minutes = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeError {
    Malformed(String),
    OutOfRange(String),
    BadPeriod(String),
    BadDate(String),
}

impl std::fmt::Display for TimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeError::Malformed(s) => write!(f, "malformed time: {s:?}"),
            TimeError::OutOfRange(s) => write!(f, "time out of range: {s:?}"),
            TimeError::BadPeriod(s) => write!(f, "expected AM or PM in {s:?}"),
            TimeError::BadDate(s) => write!(f, "invalid date (expected dd/MM/yyyy): {s:?}"),
        }
    }
}

impl std::error::Error for TimeError {}

/// Parse `"H:MM"`, `"HH:MM"` or `"H:MM AM|PM"` into minutes since midnight.
///
/// 12 AM is midnight, 12 PM is noon, any other PM hour gains 12.
pub fn parse_time_of_day(text: &str) -> Result<Minutes, TimeError> {
    let tokens: Vec<&str> = text
        .split(|c: char| c.is_whitespace() || c == ':')
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.len() < 2 || tokens.len() > 3 {
        return Err(TimeError::Malformed(text.to_string()));
    }
    let mut hours: Minutes = tokens[0]
        .parse()
        .map_err(|_| TimeError::Malformed(text.to_string()))?;
    let minutes: Minutes = tokens[1]
        .parse()
        .map_err(|_| TimeError::Malformed(text.to_string()))?;
    if minutes > 59 {
        return Err(TimeError::OutOfRange(text.to_string()));
    }

    if let Some(period) = tokens.get(2) {
        if hours == 0 || hours > 12 {
            return Err(TimeError::OutOfRange(text.to_string()));
        }
        match period.to_ascii_uppercase().as_str() {
            "AM" if hours == 12 => hours = 0,
            "AM" => {}
            "PM" if hours != 12 => hours += 12,
            "PM" => {}
            _ => return Err(TimeError::BadPeriod(text.to_string())),
        }
    } else if hours > 23 {
        return Err(TimeError::OutOfRange(text.to_string()));
    }

    Ok(hours * 60 + minutes)
}

/// Render minutes since midnight as `HH:MM`.
pub fn format_time_of_day(minutes: Minutes) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Strict `dd/MM/yyyy`; impossible dates such as 32/01 are rejected.
pub fn parse_date(text: &str) -> Result<NaiveDate, TimeError> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT).map_err(|_| TimeError::BadDate(text.to_string()))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// `start`, `start + 7d`, ... while not after `until`. Empty if `until < start`.
pub fn weekly_dates(start: NaiveDate, until: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = start;
    while current <= until {
        dates.push(current);
        current += Duration::days(7);
    }
    dates
}
