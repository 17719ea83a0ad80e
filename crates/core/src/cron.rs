//! Five-field cron expression parsing and next-fire computation.
//!
//! Field order is `MIN HOUR DOM MON DOW`. Supported forms per field: `*`,
//! `*/step`, single values, ranges `a-b`, and comma lists mixing values and
//! ranges. Day-of-week accepts 0-7 with both 0 and 7 meaning Sunday.
//!
//! Expressions are validated when a crontab source is saved, so the
//! scheduler never sees an unparsable schedule at fire time.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, Timelike, Utc};

use crate::error::CoreError;

/// Upper bound on the forward day scan. Covers the worst case of a
/// leap-day schedule (`0 0 29 2 *`) with room to spare.
const MAX_SCAN_DAYS: u64 = 1500;

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days_of_month: BTreeSet<u32>,
    months: BTreeSet<u32>,
    days_of_week: BTreeSet<u32>,
    dom_is_wildcard: bool,
    dow_is_wildcard: bool,
}

impl CronSchedule {
    /// Parse a five-field cron expression.
    pub fn parse(expression: &str) -> Result<Self, CoreError> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(CoreError::Validation(format!(
                "Invalid cron expression \"{expression}\": expected 5 fields, got {}",
                parts.len()
            )));
        }

        let minutes = parse_field(parts[0], 0, 59, "minute")?;
        let hours = parse_field(parts[1], 0, 23, "hour")?;
        let days_of_month = parse_field(parts[2], 1, 31, "day-of-month")?;
        let months = parse_field(parts[3], 1, 12, "month")?;
        let mut days_of_week = parse_field(parts[4], 0, 7, "day-of-week")?;

        // 7 is an alias for Sunday.
        if days_of_week.remove(&7) {
            days_of_week.insert(0);
        }

        Ok(Self {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_is_wildcard: parts[2] == "*",
            dow_is_wildcard: parts[4] == "*",
        })
    }

    /// Compute the first fire time strictly after `after`.
    ///
    /// Returns `None` only for schedules that never match within the scan
    /// window, which cannot happen for expressions accepted by [`parse`]
    /// (every field keeps at least one valid value).
    ///
    /// [`parse`]: CronSchedule::parse
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = (after + Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;

        for day_offset in 0..=MAX_SCAN_DAYS {
            let day = start.checked_add_days(Days::new(day_offset))?;
            if !self.matches_date(day.date_naive()) {
                continue;
            }

            // Minutes earlier on the first scanned day are already past.
            let (floor_hour, floor_minute) = if day_offset == 0 {
                (start.hour(), start.minute())
            } else {
                (0, 0)
            };

            for &hour in &self.hours {
                if hour < floor_hour {
                    continue;
                }
                for &minute in &self.minutes {
                    if hour == floor_hour && minute < floor_minute {
                        continue;
                    }
                    return day
                        .with_hour(hour)
                        .and_then(|d| d.with_minute(minute));
                }
            }
        }

        None
    }

    /// Standard cron day matching: when both day fields are restricted the
    /// entry fires if either matches; otherwise both must match (with a
    /// wildcard matching everything).
    fn matches_date(&self, date: NaiveDate) -> bool {
        if !self.months.contains(&date.month()) {
            return false;
        }
        let dom_hit = self.days_of_month.contains(&date.day());
        let dow_hit = self
            .days_of_week
            .contains(&date.weekday().num_days_from_sunday());

        if !self.dom_is_wildcard && !self.dow_is_wildcard {
            dom_hit || dow_hit
        } else {
            dom_hit && dow_hit
        }
    }
}

/// Parse one cron field into its set of matching values.
fn parse_field(
    field: &str,
    min: u32,
    max: u32,
    label: &str,
) -> Result<BTreeSet<u32>, CoreError> {
    if field == "*" {
        return Ok((min..=max).collect());
    }

    // */N steps over the full range.
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step
            .parse()
            .map_err(|_| invalid(label, field, "step is not a number"))?;
        if n == 0 {
            return Err(invalid(label, field, "step must be positive"));
        }
        return Ok((min..=max).step_by(n as usize).collect());
    }

    let mut values = BTreeSet::new();
    for item in field.split(',') {
        if let Some((lo, hi)) = item.split_once('-') {
            let lo: u32 = lo
                .parse()
                .map_err(|_| invalid(label, field, "range start is not a number"))?;
            let hi: u32 = hi
                .parse()
                .map_err(|_| invalid(label, field, "range end is not a number"))?;
            if lo > hi {
                return Err(invalid(label, field, "range start exceeds range end"));
            }
            if lo < min || hi > max {
                return Err(invalid(label, field, "range out of bounds"));
            }
            values.extend(lo..=hi);
        } else {
            let n: u32 = item
                .trim()
                .parse()
                .map_err(|_| invalid(label, field, "value is not a number"))?;
            if n < min || n > max {
                return Err(invalid(label, field, "value out of bounds"));
            }
            values.insert(n);
        }
    }

    Ok(values)
}

fn invalid(label: &str, field: &str, reason: &str) -> CoreError {
    CoreError::Validation(format!("Invalid cron {label} field \"{field}\": {reason}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
