//! Cron normalization, parsing and next-occurrence helpers.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use deadman_core::ConfigurationError;

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds.
///
/// The `cron` crate requires 6 fields: `sec min hour day-of-month month day-of-week`.
/// Checks are configured with standard 5-field cron: `min hour day-of-month month day-of-week`.
pub(crate) fn normalize_cron(cron_5field: &str) -> String {
    let trimmed = cron_5field.trim();
    let field_count = trimmed.split_whitespace().count();
    if field_count == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Parse a 5- or 6-field cron expression.
pub fn parse_schedule(expr: &str) -> Result<Schedule, ConfigurationError> {
    let fields = expr.split_whitespace().count();
    if fields != 5 && fields != 6 {
        return Err(ConfigurationError::Schedule {
            schedule: expr.to_string(),
            reason: format!("expected 5 or 6 fields, got {fields}"),
        });
    }
    Schedule::from_str(&normalize_cron(expr)).map_err(|e| ConfigurationError::Schedule {
        schedule: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Parse an IANA time zone name such as `Europe/Riga`.
pub fn parse_tz(name: &str) -> Result<Tz, ConfigurationError> {
    Tz::from_str(name.trim()).map_err(|_| ConfigurationError::TimeZone(name.to_string()))
}

/// First occurrence of `schedule` strictly after `after`, evaluated in `tz`.
///
/// Returns `None` for schedules with no future occurrence (e.g. a fixed year
/// in the past).
pub fn next_occurrence(schedule: &Schedule, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|local| local.with_timezone(&Utc))
}
