//! The schedule grammar.
//!
//! A schedule is a short string:
//!
//! - `` (empty) or `now`: one-shot, start immediately
//! - `every N <unit>`: units from milliseconds to weeks, weekday names,
//!   `midday`
//! - `every <duration>`: a duration literal such as `90s` or `2h45m`
//! - `every N monthdays D1,D2,…`: days 1..28, or the single value `-1`
//!   meaning the last day of the month
//! - `at HH:MM[:SS][;HH:MM[:SS]…]`: intra-day offsets
//! - `cron <expr>`: five or six fields, optionally prefixed `TZ=`/`CRON_TZ=`
//!
//! Parsing produces a descriptive [`ScheduleSpec`] value; all validation
//! happens here so the rest of the engine only ever sees well-formed
//! schedules.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Timelike, Utc, Weekday};
use cron::Schedule as CronSchedule;

use fahrplan_core::SchedulingUnit;
use fahrplan_store::Task;

use crate::error::ScheduleError;

const FREQUENCY_NOW: &str = "now";
const FREQUENCY_EVERY: &str = "every";
const FREQUENCY_AT: &str = "at";
const FREQUENCY_CRON: &str = "cron";

/// A parsed, validated schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSpec {
    pub unit: SchedulingUnit,
    pub interval: i32,
    pub duration: Option<Duration>,
    /// Sorted, unique offsets from midnight.
    pub run_at: Vec<Duration>,
    pub week_days: Vec<Weekday>,
    pub month_days: Vec<i32>,
    /// Normalized six-field cron expression with a `CRON_TZ=` prefix.
    pub cron_schedule: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub start_immediately: bool,
}

impl ScheduleSpec {
    /// Parse a schedule string. `now` anchors the immediate one-shot form.
    pub fn parse(input: &str, now: DateTime<Utc>) -> Result<Self, ScheduleError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(FREQUENCY_NOW) {
            let mut builder = SpecBuilder::default();
            builder.unit = Some(SchedulingUnit::Once);
            builder.start_at = Some(now);
            builder.start_immediately = true;
            builder.add_run_at(time_of_day(now));
            return builder.finish();
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        if tokens.len() < 2 {
            return Err(ScheduleError::InvalidScheduleType);
        }

        let mut builder = SpecBuilder::default();
        match tokens[0].to_ascii_lowercase().as_str() {
            FREQUENCY_EVERY => {
                // An integer selects an interval; anything else must be a
                // duration literal.
                match tokens[1].parse::<i32>() {
                    Ok(n) => {
                        builder.interval = n;
                        if n <= 0 {
                            builder.record(ScheduleError::InvalidInterval);
                        }
                    }
                    Err(_) => match humantime::parse_duration(tokens[1]) {
                        Ok(d) => {
                            builder.duration = Some(d);
                            builder.set_unit(SchedulingUnit::Duration);
                        }
                        Err(_) => builder.record(ScheduleError::InvalidInterval),
                    },
                }

                if let Some(unit_token) = tokens.get(2) {
                    match unit_token.to_ascii_lowercase().as_str() {
                        "monthdays" => match tokens.get(3) {
                            Some(days) => builder.month_days_from_csv(days),
                            None => builder.record(ScheduleError::InvalidScheduleType),
                        },
                        other => builder.apply_unit_token(other),
                    }
                }
            }

            FREQUENCY_AT => {
                for part in tokens[1].split(';') {
                    match parse_time_of_day(part) {
                        Ok(offset) => builder.add_run_at(offset),
                        Err(err) => builder.record(err),
                    }
                }
            }

            FREQUENCY_CRON => {
                // The expression is everything after the keyword; splitting
                // on the first whitespace keeps its internal spaces.
                let expr = trimmed
                    .splitn(2, char::is_whitespace)
                    .nth(1)
                    .unwrap_or("")
                    .trim();
                builder.cron(expr);
            }

            _ => return Err(ScheduleError::InvalidScheduleType),
        }

        builder.finish()
    }

    /// Copy the schedule onto a task's schedule fields.
    pub fn apply_to(&self, task: &mut Task) {
        task.unit = self.unit;
        task.interval = self.interval;
        task.duration = self.duration;
        task.run_at = self.run_at.clone();
        task.week_days = self.week_days.clone();
        task.month_days = self.month_days.clone();
        task.cron_schedule = self.cron_schedule.clone();
        task.start_at = self.start_at;
        task.start_immediately = self.start_immediately;
    }
}

// ── Builder ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SpecBuilder {
    unit: Option<SchedulingUnit>,
    interval: i32,
    duration: Option<Duration>,
    run_at: Vec<Duration>,
    week_days: Vec<Weekday>,
    month_days: Vec<i32>,
    cron_schedule: Option<String>,
    start_at: Option<DateTime<Utc>>,
    start_immediately: bool,
    errors: Vec<ScheduleError>,
}

impl SpecBuilder {
    fn record(&mut self, error: ScheduleError) {
        if !self.errors.contains(&error) {
            self.errors.push(error);
        }
    }

    /// Change the scheduling unit. A duration or cron schedule cannot be
    /// combined with unit selectors.
    fn set_unit(&mut self, unit: SchedulingUnit) {
        match self.unit {
            Some(SchedulingUnit::Duration) | Some(SchedulingUnit::Crontab) => {
                self.record(ScheduleError::InvalidUnitSelection);
            }
            _ => self.unit = Some(unit),
        }
    }

    fn apply_unit_token(&mut self, token: &str) {
        match token {
            "millisecond" | "milliseconds" => self.set_unit(SchedulingUnit::Milliseconds),
            "second" | "seconds" => self.set_unit(SchedulingUnit::Seconds),
            "minute" | "minutes" => self.set_unit(SchedulingUnit::Minutes),
            "hour" | "hours" => self.set_unit(SchedulingUnit::Hours),
            "day" | "days" => self.set_unit(SchedulingUnit::Days),
            "week" | "weeks" => self.set_unit(SchedulingUnit::Weeks),
            "monday" => self.weekday(Weekday::Mon),
            "tuesday" => self.weekday(Weekday::Tue),
            "wednesday" => self.weekday(Weekday::Wed),
            "thursday" => self.weekday(Weekday::Thu),
            "friday" => self.weekday(Weekday::Fri),
            "saturday" => self.weekday(Weekday::Sat),
            "sunday" => self.weekday(Weekday::Sun),
            "midday" => self.add_run_at(Duration::from_secs(12 * 3600)),
            _ => self.record(ScheduleError::InvalidSchedulingUnit),
        }
    }

    /// Weekday selectors imply a weekly schedule.
    fn weekday(&mut self, day: Weekday) {
        if !self.week_days.contains(&day) {
            self.week_days.push(day);
        }
        self.start_immediately = false;
        self.set_unit(SchedulingUnit::Weeks);
    }

    /// Insert an intra-day offset, keeping the list sorted and unique.
    fn add_run_at(&mut self, offset: Duration) {
        match self.run_at.binary_search(&offset) {
            Ok(_) => {}
            Err(index) => self.run_at.insert(index, offset),
        }
    }

    fn month_days_from_csv(&mut self, csv: &str) {
        let mut days = Vec::new();
        for part in csv.split(',') {
            match part.trim().parse::<i32>() {
                Ok(day) => days.push(day),
                Err(_) => {
                    self.record(ScheduleError::InvalidDayOfMonth);
                    return;
                }
            }
        }
        self.month_days(days);
    }

    /// Select days of the month. Only days 1 through 28 are allowed, with
    /// `-1` (last day) permitted only as the sole entry; duplicates are
    /// rejected.
    fn month_days(&mut self, days: Vec<i32>) {
        if days.is_empty() {
            self.record(ScheduleError::InvalidDayOfMonth);
        } else if days.len() == 1 {
            let day = days[0];
            if day != -1 && !(1..=28).contains(&day) {
                self.record(ScheduleError::InvalidDayOfMonth);
            }
        } else {
            let mut seen = std::collections::HashSet::new();
            for day in &days {
                if !(1..=28).contains(day) {
                    self.record(ScheduleError::InvalidDayOfMonth);
                    break;
                }
                if self.month_days.contains(day) || !seen.insert(*day) {
                    self.record(ScheduleError::DuplicateDayOfMonth);
                    break;
                }
            }
        }

        self.month_days.extend(days);
        self.start_immediately = false;
        self.set_unit(SchedulingUnit::Months);
    }

    /// Parse a cron expression. An embedded `TZ=`/`CRON_TZ=` zone wins;
    /// otherwise UTC is used. The stored form is always six fields with a
    /// `CRON_TZ=` prefix.
    fn cron(&mut self, expression: &str) {
        let (zone, fields) = match expression
            .strip_prefix("CRON_TZ=")
            .or_else(|| expression.strip_prefix("TZ="))
        {
            Some(rest) => match rest.split_once(char::is_whitespace) {
                Some((zone, fields)) => (zone, fields.trim()),
                None => {
                    self.record(ScheduleError::CronParseFailure);
                    return;
                }
            },
            None => ("UTC", expression),
        };

        if chrono_tz::Tz::from_str(zone).is_err() {
            self.record(ScheduleError::CronParseFailure);
            return;
        }

        // The cron engine wants six fields; standard five-field expressions
        // gain a seconds column.
        let normalized = match fields.split_whitespace().count() {
            5 => format!("0 {fields}"),
            6 => fields.to_string(),
            _ => {
                self.record(ScheduleError::CronParseFailure);
                return;
            }
        };

        if CronSchedule::from_str(&normalized).is_err() {
            self.record(ScheduleError::CronParseFailure);
            return;
        }

        self.cron_schedule = Some(format!("CRON_TZ={zone} {normalized}"));
        self.unit = Some(SchedulingUnit::Crontab);
        self.start_immediately = false;
    }

    fn finish(mut self) -> Result<ScheduleSpec, ScheduleError> {
        // A bare `at` schedule runs daily at the listed offsets.
        if self.unit.is_none() && !self.run_at.is_empty() {
            self.unit = Some(SchedulingUnit::Days);
            if self.interval == 0 {
                self.interval = 1;
            }
        }

        // Cross-field validation only applies to schedules that parsed
        // cleanly; a parse error already explains the failure.
        if self.errors.is_empty() {
            if !self.week_days.is_empty() && self.unit != Some(SchedulingUnit::Weeks) {
                self.record(ScheduleError::WeekdayNotSupported);
            }

            match self.unit {
                None => self.record(ScheduleError::InvalidScheduleType),
                Some(unit) => {
                    if !matches!(
                        unit,
                        SchedulingUnit::Crontab
                            | SchedulingUnit::Duration
                            | SchedulingUnit::Once
                    ) && self.interval == 0
                    {
                        self.record(ScheduleError::InvalidInterval);
                    }
                }
            }
        }
        let unit = self.unit.unwrap_or(SchedulingUnit::Once);

        if self.errors.is_empty() {
            return Ok(ScheduleSpec {
                unit,
                interval: self.interval,
                duration: self.duration,
                run_at: self.run_at,
                week_days: self.week_days,
                month_days: self.month_days,
                cron_schedule: self.cron_schedule,
                start_at: self.start_at,
                start_immediately: self.start_immediately,
            });
        }
        if self.errors.len() == 1 {
            Err(self.errors.remove(0))
        } else {
            Err(ScheduleError::Composite(self.errors))
        }
    }
}

// ── Time-of-day parsing ───────────────────────────────────────

fn time_of_day(at: DateTime<Utc>) -> Duration {
    Duration::from_secs(u64::from(at.time().num_seconds_from_midnight()))
}

/// Parse `HH:MM` or `HH:MM:SS` into an offset from midnight.
fn parse_time_of_day(input: &str) -> Result<Duration, ScheduleError> {
    let parts: Vec<&str> = input.split(':').collect();
    let format = match parts.len() {
        2 => "%H:%M",
        3 => "%H:%M:%S",
        _ => return Err(ScheduleError::UnsupportedTimeFormat),
    };
    if parts[0].is_empty() || parts[0].len() > 2 || parts.iter().skip(1).any(|p| p.len() != 2) {
        return Err(ScheduleError::UnsupportedTimeFormat);
    }

    let parsed = NaiveTime::parse_from_str(input, format)
        .map_err(|_| ScheduleError::UnsupportedTimeFormat)?;
    Ok(Duration::from_secs(u64::from(
        parsed.num_seconds_from_midnight(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 2, 10, 15, 0).unwrap()
    }

    #[test]
    fn empty_and_now_are_immediate_one_shots() {
        for input in ["", "now", "NOW", "  "] {
            let spec = ScheduleSpec::parse(input, now()).unwrap();
            assert_eq!(spec.unit, SchedulingUnit::Once, "input {input:?}");
            assert!(spec.start_immediately);
            assert_eq!(spec.start_at, Some(now()));
        }
    }

    #[test]
    fn every_duration_literal_selects_duration_unit() {
        let spec = ScheduleSpec::parse("every 2h", now()).unwrap();
        assert_eq!(spec.unit, SchedulingUnit::Duration);
        assert_eq!(spec.duration, Some(Duration::from_secs(2 * 3600)));
        assert_eq!(spec.interval, 0);

        let spec = ScheduleSpec::parse("every 1500ms", now()).unwrap();
        assert_eq!(spec.duration, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn every_n_units_selects_interval_and_unit() {
        let spec = ScheduleSpec::parse("every 5 minutes", now()).unwrap();
        assert_eq!(spec.unit, SchedulingUnit::Minutes);
        assert_eq!(spec.interval, 5);

        let spec = ScheduleSpec::parse("every 1 day", now()).unwrap();
        assert_eq!(spec.unit, SchedulingUnit::Days);
        assert_eq!(spec.interval, 1);

        let spec = ScheduleSpec::parse("every 2 weeks", now()).unwrap();
        assert_eq!(spec.unit, SchedulingUnit::Weeks);
    }

    #[test]
    fn weekday_selectors_imply_weekly_unit() {
        let spec = ScheduleSpec::parse("every 1 monday", now()).unwrap();
        assert_eq!(spec.unit, SchedulingUnit::Weeks);
        assert_eq!(spec.week_days, vec![Weekday::Mon]);
        assert!(!spec.start_immediately);
    }

    #[test]
    fn midday_is_noon() {
        let spec = ScheduleSpec::parse("every 1 midday", now()).unwrap();
        assert_eq!(spec.run_at, vec![Duration::from_secs(12 * 3600)]);
    }

    #[test]
    fn at_offsets_are_sorted_and_deduplicated() {
        let spec = ScheduleSpec::parse("at 12:00;09:30;12:00", now()).unwrap();
        assert_eq!(
            spec.run_at,
            vec![
                Duration::from_secs(9 * 3600 + 30 * 60),
                Duration::from_secs(12 * 3600)
            ]
        );
        // Bare `at` schedules run daily.
        assert_eq!(spec.unit, SchedulingUnit::Days);
        assert_eq!(spec.interval, 1);
    }

    #[test]
    fn at_accepts_seconds() {
        let spec = ScheduleSpec::parse("at 23:59:59", now()).unwrap();
        assert_eq!(spec.run_at, vec![Duration::from_secs(86_399)]);
    }

    #[test]
    fn bad_time_strings_are_rejected() {
        for input in ["at 25:00", "at 9:3", "at noon", "at 09:30:5"] {
            assert!(
                matches!(
                    ScheduleSpec::parse(input, now()),
                    Err(ScheduleError::UnsupportedTimeFormat)
                ),
                "input {input:?}"
            );
        }
    }

    #[test]
    fn monthdays_select_monthly_unit() {
        let spec = ScheduleSpec::parse("every 1 monthdays 1,15,28", now()).unwrap();
        assert_eq!(spec.unit, SchedulingUnit::Months);
        assert_eq!(spec.month_days, vec![1, 15, 28]);
    }

    #[test]
    fn last_day_of_month_is_a_single_value() {
        let spec = ScheduleSpec::parse("every 1 monthdays -1", now()).unwrap();
        assert_eq!(spec.month_days, vec![-1]);
    }

    #[test]
    fn monthday_validation() {
        assert_eq!(
            ScheduleSpec::parse("every 1 monthdays 1,1", now()).unwrap_err(),
            ScheduleError::DuplicateDayOfMonth
        );
        assert_eq!(
            ScheduleSpec::parse("every 1 monthdays 29,3", now()).unwrap_err(),
            ScheduleError::InvalidDayOfMonth
        );
        assert_eq!(
            ScheduleSpec::parse("every 1 monthdays", now()).unwrap_err(),
            ScheduleError::InvalidScheduleType
        );
    }

    #[test]
    fn five_field_cron_gains_seconds_and_utc() {
        let spec = ScheduleSpec::parse("cron */5 * * * *", now()).unwrap();
        assert_eq!(spec.unit, SchedulingUnit::Crontab);
        assert_eq!(
            spec.cron_schedule.as_deref(),
            Some("CRON_TZ=UTC 0 */5 * * * *")
        );
    }

    #[test]
    fn embedded_cron_zone_wins() {
        let spec = ScheduleSpec::parse("cron TZ=Asia/Manila 0 12 * * *", now()).unwrap();
        assert_eq!(
            spec.cron_schedule.as_deref(),
            Some("CRON_TZ=Asia/Manila 0 0 12 * * *")
        );

        let spec = ScheduleSpec::parse("cron CRON_TZ=Europe/Berlin 0 0 6 * * *", now()).unwrap();
        assert_eq!(
            spec.cron_schedule.as_deref(),
            Some("CRON_TZ=Europe/Berlin 0 0 6 * * *")
        );
    }

    #[test]
    fn bad_cron_expressions_are_rejected() {
        for input in [
            "cron not a cron",
            "cron * *",
            "cron TZ=Nowhere/Nope * * * * *",
            "cron",
        ] {
            let result = ScheduleSpec::parse(input, now());
            assert!(
                matches!(
                    result,
                    Err(ScheduleError::CronParseFailure) | Err(ScheduleError::InvalidScheduleType)
                ),
                "input {input:?} gave {result:?}"
            );
        }
    }

    #[test]
    fn duration_cannot_be_combined_with_unit_selectors() {
        assert_eq!(
            ScheduleSpec::parse("every 2h minutes", now()).unwrap_err(),
            ScheduleError::InvalidUnitSelection
        );
    }

    #[test]
    fn zero_and_negative_intervals_are_rejected() {
        assert_eq!(
            ScheduleSpec::parse("every 0 minutes", now()).unwrap_err(),
            ScheduleError::InvalidInterval
        );
        assert_eq!(
            ScheduleSpec::parse("every -3 hours", now()).unwrap_err(),
            ScheduleError::InvalidInterval
        );
    }

    #[test]
    fn unknown_grammar_is_rejected() {
        assert_eq!(
            ScheduleSpec::parse("sometimes maybe", now()).unwrap_err(),
            ScheduleError::InvalidScheduleType
        );
        assert_eq!(
            ScheduleSpec::parse("every", now()).unwrap_err(),
            ScheduleError::InvalidScheduleType
        );
        assert_eq!(
            ScheduleSpec::parse("every 5 fortnights", now()).unwrap_err(),
            ScheduleError::InvalidSchedulingUnit
        );
    }

    #[test]
    fn multiple_problems_compose() {
        // Bad interval and bad unit in one schedule string.
        let err = ScheduleSpec::parse("every 0 fortnights", now()).unwrap_err();
        match err {
            ScheduleError::Composite(errors) => {
                assert!(errors.contains(&ScheduleError::InvalidInterval));
                assert!(errors.contains(&ScheduleError::InvalidSchedulingUnit));
            }
            other => panic!("expected composite error, got {other:?}"),
        }
    }
}
