//! Schedule evaluation
//!
//! Pure functions deciding when a test job is next due. `once` schedules
//! fire at creation + delay; `cron` schedules fire on a five-field cron
//! expression evaluated in an IANA timezone.

use std::str::FromStr;
use std::time::Duration;

use canary_core::domain::test_job::{ScheduleKind, ScheduleSpec};
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use thiserror::Error;

/// Upper bound when skipping over missed firings
const MAX_SKIPPED_FIRINGS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("schedule.cron is required when type=cron")]
    MissingCron,

    #[error("invalid schedule.timezone {0:?}")]
    InvalidTimezone(String),

    #[error("invalid schedule.cron {expr:?}: {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("schedule.cron {0:?} has no upcoming occurrence")]
    NoOccurrence(String),
}

/// Result of a schedule evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextSchedule {
    pub next_time: DateTime<Utc>,
    /// Time until `next_time`, zero when overdue
    pub requeue_after: Duration,
}

impl NextSchedule {
    fn new(next_time: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let requeue_after = (next_time - now).to_std().unwrap_or(Duration::ZERO);
        Self {
            next_time,
            requeue_after,
        }
    }
}

/// Computes when a job is next due
///
/// For cron schedules an already persisted `current_next` wins so the
/// due time never drifts between evaluations. Otherwise the next firing
/// strictly after `last_run` (or `now` when the job never ran) is used.
pub fn compute_next_schedule(
    now: DateTime<Utc>,
    creation_time: DateTime<Utc>,
    schedule: &ScheduleSpec,
    current_next: Option<DateTime<Utc>>,
    last_run: Option<DateTime<Utc>>,
    default_tz: Tz,
) -> Result<NextSchedule, ScheduleError> {
    match schedule.kind {
        ScheduleKind::Once => {
            let delay = chrono::Duration::from_std(schedule.delay)
                .unwrap_or(chrono::Duration::MAX);
            let next = creation_time
                .checked_add_signed(delay)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            Ok(NextSchedule::new(next, now))
        }
        ScheduleKind::Cron => {
            let cron = CronSchedule::from_spec(schedule, default_tz)?;

            if let Some(next) = current_next {
                return Ok(NextSchedule::new(next, now));
            }

            let anchor = last_run.unwrap_or(now);
            let next = cron.next_after(anchor)?;
            Ok(NextSchedule::new(next, now))
        }
    }
}

/// A parsed cron schedule bound to its timezone
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    rule: CronRule,
    tz: Tz,
}

impl CronSchedule {
    pub fn from_spec(spec: &ScheduleSpec, default_tz: Tz) -> Result<Self, ScheduleError> {
        let expr = spec.cron.trim();
        if expr.is_empty() {
            return Err(ScheduleError::MissingCron);
        }

        let tz = resolve_timezone(&spec.timezone, default_tz)?;
        let rule = parse_cron(expr)?;

        Ok(Self {
            expr: expr.to_string(),
            rule,
            tz,
        })
    }

    /// First firing strictly after `anchor`
    pub fn next_after(&self, anchor: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        self.rule
            .next_after(&anchor.with_timezone(&self.tz))
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| ScheduleError::NoOccurrence(self.expr.clone()))
    }

    /// Latest firing in `[due, now]`, starting from the firing `due`
    ///
    /// Firings missed while the controller was down or a run overran are
    /// collapsed into the most recent one.
    pub fn latest_firing(&self, due: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut latest = due;

        for _ in 0..MAX_SKIPPED_FIRINGS {
            let Some(firing) = self.rule.next_after(&latest.with_timezone(&self.tz)) else {
                break;
            };
            let firing = firing.with_timezone(&Utc);
            if firing > now {
                break;
            }
            latest = firing;
        }

        latest
    }
}

/// Parsed cron expression
///
/// When both day-of-month and day-of-week are restricted, a time matches
/// if either of them does. The `cron` crate requires both, so such an
/// expression is held as two schedules, one per day field.
#[derive(Debug, Clone)]
pub struct CronRule {
    schedules: Vec<Schedule>,
}

impl CronRule {
    /// First firing strictly after `after`
    pub fn next_after<Z: TimeZone>(&self, after: &DateTime<Z>) -> Option<DateTime<Z>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(after).next())
            .min()
    }
}

/// Resolves an IANA timezone name; empty means `default_tz`
pub fn resolve_timezone(name: &str, default_tz: Tz) -> Result<Tz, ScheduleError> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(default_tz);
    }
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

/// Parses a five-field cron expression or an `@` descriptor
pub fn parse_cron(expr: &str) -> Result<CronRule, ScheduleError> {
    let invalid = |reason: String| ScheduleError::InvalidCron {
        expr: expr.to_string(),
        reason,
    };

    let expr = expr.trim();
    let expanded = match expand_descriptor(expr) {
        Some(fields) => fields.to_string(),
        None if expr.starts_with('@') => return Err(invalid("unknown descriptor".to_string())),
        None => expr.to_string(),
    };

    let fields: Vec<&str> = expanded.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
    }

    let (minute, hour, day_of_month, month, day_of_week) =
        (fields[0], fields[1], fields[2], fields[3], fields[4]);

    // Either day field may match when both are restricted
    let day_fields = if is_unrestricted(day_of_month) || is_unrestricted(day_of_week) {
        vec![(day_of_month, day_of_week)]
    } else {
        vec![(day_of_month, "*"), ("*", day_of_week)]
    };

    let schedules = day_fields
        .into_iter()
        .map(|(dom, dow)| {
            // The cron crate wants seconds first and counts weekdays from 1 = Sunday
            let normalized = format!(
                "0 {} {} {} {} {}",
                minute,
                hour,
                dom,
                month,
                normalize_day_of_week(dow)
            );
            Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CronRule { schedules })
}

fn is_unrestricted(field: &str) -> bool {
    field == "*" || field == "?"
}

fn expand_descriptor(expr: &str) -> Option<&'static str> {
    let fields = match expr.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => "0 0 1 1 *",
        "@monthly" => "0 0 1 * *",
        "@weekly" => "0 0 * * 0",
        "@daily" | "@midnight" => "0 0 * * *",
        "@hourly" => "0 * * * *",
        _ => return None,
    };
    Some(fields)
}

const WEEKDAYS: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Rewrites numeric weekdays (0-7, 0 and 7 = Sunday) as names
///
/// A range ending at 7 would wrap past Saturday, so "5-7" becomes
/// "Fri-Sat,Sun". With a step the trailing Sunday is dropped.
fn normalize_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(normalize_weekday_item)
        .collect::<Vec<_>>()
        .join(",")
}

fn normalize_weekday_item(item: &str) -> String {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };

    let range = match range.split_once('-') {
        Some((start, end)) => match (weekday_number(start), weekday_number(end)) {
            (Some(0), Some(7)) => "Sun-Sat".to_string(),
            (Some(s), Some(7)) if step.is_none() => format!("{}-Sat,Sun", WEEKDAYS[s]),
            (Some(s), Some(7)) => format!("{}-Sat", WEEKDAYS[s]),
            (Some(s), Some(e)) => format!("{}-{}", WEEKDAYS[s], WEEKDAYS[e]),
            _ => range.to_string(),
        },
        None => match weekday_number(range) {
            Some(n) => WEEKDAYS[n].to_string(),
            None => range.to_string(),
        },
    };

    match step {
        Some(step) => format!("{}/{}", range, step),
        None => range,
    }
}

fn weekday_number(token: &str) -> Option<usize> {
    token.parse::<usize>().ok().filter(|n| *n < WEEKDAYS.len())
}
