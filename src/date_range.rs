use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use tracing::warn;

use crate::error::{AppError, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Inclusive calendar-day window. `from <= to` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self> {
        if from > to {
            return Err(AppError::Validation(format!(
                "'from' ({}) must not be after 'to' ({})",
                from.format(DATE_FORMAT),
                to.format(DATE_FORMAT)
            )));
        }
        Ok(Self { from, to })
    }

    /// Resolves the optional `from`/`to` query values against `today`.
    /// Missing bounds fall back to a `default_days` window; present ones
    /// must be real `YYYY-MM-DD` dates in order.
    pub fn resolve(
        from: Option<&str>,
        to: Option<&str>,
        today: NaiveDate,
        default_days: u32,
    ) -> Result<Self> {
        let span = Duration::days(i64::from(default_days.max(1)) - 1);
        let from = from.map(|v| parse_date("from", v)).transpose()?;
        let to = to.map(|v| parse_date("to", v)).transpose()?;

        match (from, to) {
            (Some(from), Some(to)) => Self::new(from, to),
            (Some(from), None) if from > today => Err(AppError::Validation(format!(
                "'from' ({}) is in the future",
                from.format(DATE_FORMAT)
            ))),
            (Some(from), None) => Self::new(from, today),
            (None, Some(to)) => Self::new(to - span, to),
            (None, None) => Self::new(today - span, today),
        }
    }

    /// Pulls a window that reaches past `today` back to `today`.
    pub fn clamp_to_today(self, today: NaiveDate) -> Self {
        if self.to <= today {
            return self;
        }
        warn!(
            from = %self.from,
            to = %self.to,
            %today,
            "date range reaches into the future, clamping to today"
        );
        Self {
            from: self.from.min(today),
            to: today,
        }
    }

    pub fn days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }

    /// Unix seconds at the start of `from` (UTC).
    pub fn since_unix(&self) -> i64 {
        Utc.from_utc_datetime(&self.from.and_time(NaiveTime::MIN))
            .timestamp()
    }

    /// Unix seconds at the end of `to` (UTC), exclusive.
    pub fn until_unix(&self) -> i64 {
        Utc.from_utc_datetime(&(self.to + Duration::days(1)).and_time(NaiveTime::MIN))
            .timestamp()
    }

    pub fn start_rfc3339(&self) -> String {
        Utc.from_utc_datetime(&self.from.and_time(NaiveTime::MIN))
            .to_rfc3339()
    }

    pub fn end_rfc3339(&self) -> String {
        Utc.from_utc_datetime(&(self.to + Duration::days(1)).and_time(NaiveTime::MIN))
            .to_rfc3339()
    }

    pub fn from_ymd(&self) -> String {
        self.from.format(DATE_FORMAT).to_string()
    }

    pub fn to_ymd(&self) -> String {
        self.to.format(DATE_FORMAT).to_string()
    }
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    let value = value.trim();
    // NaiveDate::parse_from_str accepts unpadded fields, the API contract does not
    let shaped = value.len() == 10
        && value
            .char_indices()
            .all(|(i, c)| if i == 4 || i == 7 { c == '-' } else { c.is_ascii_digit() });
    if !shaped {
        return Err(AppError::Validation(format!(
            "'{}' must be a date in YYYY-MM-DD format, got '{}'",
            field, value
        )));
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| {
        AppError::Validation(format!("'{}' is not a valid calendar date: '{}'", field, value))
    })
}
