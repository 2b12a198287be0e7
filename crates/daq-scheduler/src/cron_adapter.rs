//! Adapts standard five-field cron expressions
//! (minute/hour/day/month/weekday) onto the `cron` crate, which parses
//! its own six-field format with a leading seconds column.

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use daq_core::{GatewayError, GatewayResult};
use std::str::FromStr;

/// Parses a five-field expression ("standard five-field
/// expression") by prepending a fixed `0` seconds field.
pub fn parse(expression: &str) -> GatewayResult<CronSchedule> {
 let fields = expression.split_whitespace().count();
 if fields != 5 {
 return Err(GatewayError::bad_request(format!(
 "cron expression must have 5 fields (minute hour day month weekday), got {fields}"
 )));
 }
 let six_field = format!("0 {expression}");
 CronSchedule::from_str(&six_field).map_err(|e| GatewayError::bad_request(format!("invalid cron expression: {e}")))
}

/// The next fire time strictly after `after`, or `None` if the
/// expression can never match again (never happens for `cron`'s
/// infinite iterator, but kept `Option` for symmetry with the other
/// schedule kinds).
pub fn next_match(expression: &str, after: DateTime<Utc>) -> GatewayResult<Option<DateTime<Utc>>> {
 let schedule = parse(expression)?;
 Ok(schedule.after(&after).next())
}

#[cfg(test)]
mod tests {
 use super::*;
 use chrono::TimeZone;

 #[test]
 fn rejects_expressions_with_wrong_field_count() {
 let err = parse("* * * * * *").unwrap_err();
 assert_eq!(err.kind, daq_core::ErrorKind::BadRequest);
 }

 #[test]
 fn every_minute_fires_one_minute_later() {
 let after = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 30).unwrap();
 let next = next_match("* * * * *", after).unwrap().unwrap();
 assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 10, 1, 0).unwrap());
 }

 #[test]
 fn specific_hour_minute_matches_next_day_if_passed() {
 let after = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
 let next = next_match("0 9 * * *", after).unwrap().unwrap();
 assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 2, 9, 0, 0).unwrap());
 }
}
