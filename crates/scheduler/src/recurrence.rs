//! Deterministic recurrence advancement.
//!
//! After a run fires, the daemon computes the task's next firing from its
//! schedule fields and re-keys the scheduled-run row into the partition of
//! the new instant. A `None` here means the schedule is exhausted and the
//! run row is removed.

use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveTime, Timelike, Utc};
use cron::Schedule as CronSchedule;

use fahrplan_core::SchedulingUnit;
use fahrplan_store::Task;

/// Compute the first firing strictly after `after`, or `None` when the
/// schedule has no further runs.
pub fn next_run_after(task: &Task, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match task.unit {
        SchedulingUnit::Once => None,

        SchedulingUnit::Duration => {
            let duration = task.duration?;
            Some(after + Duration::from_std(duration).ok()?)
        }

        SchedulingUnit::Milliseconds => interval_step(after, task.interval, 1),
        SchedulingUnit::Seconds => interval_step(after, task.interval, 1_000),
        SchedulingUnit::Minutes => interval_step(after, task.interval, 60_000),
        SchedulingUnit::Hours => interval_step(after, task.interval, 3_600_000),

        SchedulingUnit::Days => {
            let interval = positive(task.interval)?;
            calendar_step(task, after, |_| true, |n| n % interval == 0, interval * 2)
        }

        SchedulingUnit::Weeks => {
            let interval = positive(task.interval)?;
            if task.week_days.is_empty() {
                // No weekday filter: the anchor weekday is the fired day.
                calendar_step(
                    task,
                    after,
                    |_| true,
                    |n| n % (7 * interval) == 0,
                    14 * interval,
                )
            } else {
                let days = task.week_days.clone();
                calendar_step(
                    task,
                    after,
                    move |date| days.contains(&date.weekday()),
                    |n| (n / 7) % interval == 0,
                    7 * interval + 7,
                )
            }
        }

        SchedulingUnit::Months => month_step(task, after),

        SchedulingUnit::Crontab => cron_step(task.cron_schedule.as_deref()?, after),
    }
}

fn positive(interval: i32) -> Option<i64> {
    (interval > 0).then_some(i64::from(interval))
}

fn interval_step(after: DateTime<Utc>, interval: i32, unit_ms: i64) -> Option<DateTime<Utc>> {
    let interval = positive(interval)?;
    Some(after + Duration::milliseconds(interval * unit_ms))
}

/// Intra-day offsets for a task; tasks without explicit `run_at` times keep
/// firing at the time of day they last fired.
fn effective_offsets(task: &Task, after: DateTime<Utc>) -> Vec<StdDuration> {
    if task.run_at.is_empty() {
        vec![StdDuration::from_secs(u64::from(
            after.time().num_seconds_from_midnight(),
        ))]
    } else {
        task.run_at.clone()
    }
}

fn at_offset(date: NaiveDate, offset: StdDuration) -> Option<DateTime<Utc>> {
    let midnight = date.and_time(NaiveTime::MIN).and_utc();
    Some(midnight + Duration::from_std(offset).ok()?)
}

/// Walk forward day by day from the fired instant, taking the first
/// eligible `(day, offset)` combination strictly after it. `phase_ok`
/// receives the day distance from the fired day, anchoring interval phase
/// there.
fn calendar_step(
    task: &Task,
    after: DateTime<Utc>,
    eligible: impl Fn(NaiveDate) -> bool,
    phase_ok: impl Fn(i64) -> bool,
    horizon_days: i64,
) -> Option<DateTime<Utc>> {
    let start = after.date_naive();
    let offsets = effective_offsets(task, after);

    for n in 0..=horizon_days {
        let date = start.checked_add_days(Days::new(n as u64))?;
        if !eligible(date) || !phase_ok(n) {
            continue;
        }
        for &offset in &offsets {
            let candidate = at_offset(date, offset)?;
            if candidate > after {
                return Some(candidate);
            }
        }
    }
    None
}

fn month_step(task: &Task, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let interval = positive(task.interval)? as u32;
    if task.month_days.is_empty() {
        return None;
    }

    let offsets = effective_offsets(task, after);
    let anchor = after.date_naive().with_day(1)?;

    // Two years of candidate months bounds the walk safely above any
    // permitted interval phase.
    for months_ahead in (0..=interval * 24).step_by(interval as usize) {
        let month_start = anchor.checked_add_months(Months::new(months_ahead))?;
        for day in resolved_month_days(&task.month_days, month_start) {
            let date = month_start.checked_add_days(Days::new(u64::from(day - 1)))?;
            for &offset in &offsets {
                let candidate = at_offset(date, offset)?;
                if candidate > after {
                    return Some(candidate);
                }
            }
        }
    }
    None
}

/// Resolve configured month days against a concrete month: `-1` becomes the
/// month's last day. Returned sorted and unique.
fn resolved_month_days(month_days: &[i32], month_start: NaiveDate) -> Vec<u32> {
    let last_day = days_in_month(month_start);
    let mut days: Vec<u32> = month_days
        .iter()
        .filter_map(|&d| match d {
            -1 => Some(last_day),
            1..=28 => Some(d as u32),
            _ => None,
        })
        .collect();
    days.sort_unstable();
    days.dedup();
    days
}

fn days_in_month(month_start: NaiveDate) -> u32 {
    let next_month = month_start
        .checked_add_months(Months::new(1))
        .unwrap_or(month_start);
    next_month
        .signed_duration_since(month_start)
        .num_days()
        .max(28) as u32
}

/// Next firing of a stored cron schedule (`CRON_TZ=<zone> <six fields>`),
/// evaluated in its zone and returned in UTC.
fn cron_step(stored: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let rest = stored.strip_prefix("CRON_TZ=")?;
    let (zone, fields) = rest.split_once(' ')?;
    let tz: chrono_tz::Tz = zone.parse().ok()?;
    let schedule = CronSchedule::from_str(fields).ok()?;
    let next = schedule.after(&after.with_timezone(&tz)).next()?;
    Some(next.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn task_with(unit: SchedulingUnit, interval: i32) -> Task {
        let mut task = Task::new(
            Uuid::new_v4().to_string(),
            Uuid::new_v4(),
            "c-1".into(),
            b"payload".to_vec(),
        );
        task.unit = unit;
        task.interval = interval;
        task
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn one_shots_never_recur() {
        let task = task_with(SchedulingUnit::Once, 0);
        assert_eq!(next_run_after(&task, at(2026, 8, 2, 10, 0, 0)), None);
    }

    #[test]
    fn duration_advances_by_the_duration() {
        let mut task = task_with(SchedulingUnit::Duration, 0);
        task.duration = Some(StdDuration::from_secs(2 * 3600));
        assert_eq!(
            next_run_after(&task, at(2026, 8, 2, 10, 0, 0)),
            Some(at(2026, 8, 2, 12, 0, 0))
        );
    }

    #[test]
    fn fixed_units_advance_by_interval() {
        let task = task_with(SchedulingUnit::Minutes, 30);
        assert_eq!(
            next_run_after(&task, at(2026, 8, 2, 10, 0, 0)),
            Some(at(2026, 8, 2, 10, 30, 0))
        );

        let task = task_with(SchedulingUnit::Hours, 6);
        assert_eq!(
            next_run_after(&task, at(2026, 8, 2, 22, 0, 0)),
            Some(at(2026, 8, 3, 4, 0, 0))
        );

        let task = task_with(SchedulingUnit::Milliseconds, 500);
        assert_eq!(
            next_run_after(&task, at(2026, 8, 2, 10, 0, 0)),
            Some(at(2026, 8, 2, 10, 0, 0) + Duration::milliseconds(500))
        );
    }

    #[test]
    fn daily_tasks_honor_later_same_day_offsets() {
        let mut task = task_with(SchedulingUnit::Days, 1);
        task.run_at = vec![
            StdDuration::from_secs(9 * 3600 + 30 * 60),
            StdDuration::from_secs(12 * 3600),
        ];

        // Fired at the 09:30 slot: the 12:00 slot is still due today.
        assert_eq!(
            next_run_after(&task, at(2026, 8, 2, 9, 30, 0)),
            Some(at(2026, 8, 2, 12, 0, 0))
        );
        // Fired at the 12:00 slot: tomorrow's 09:30 is next.
        assert_eq!(
            next_run_after(&task, at(2026, 8, 2, 12, 0, 0)),
            Some(at(2026, 8, 3, 9, 30, 0))
        );
    }

    #[test]
    fn multi_day_intervals_skip_days() {
        let mut task = task_with(SchedulingUnit::Days, 3);
        task.run_at = vec![StdDuration::from_secs(8 * 3600)];
        assert_eq!(
            next_run_after(&task, at(2026, 8, 2, 8, 0, 0)),
            Some(at(2026, 8, 5, 8, 0, 0))
        );
    }

    #[test]
    fn daily_without_offsets_keeps_time_of_day() {
        let task = task_with(SchedulingUnit::Days, 1);
        assert_eq!(
            next_run_after(&task, at(2026, 8, 2, 14, 45, 0)),
            Some(at(2026, 8, 3, 14, 45, 0))
        );
    }

    #[test]
    fn weekly_tasks_fire_on_selected_weekdays() {
        let mut task = task_with(SchedulingUnit::Weeks, 1);
        task.week_days = vec![chrono::Weekday::Mon, chrono::Weekday::Fri];
        task.run_at = vec![StdDuration::from_secs(9 * 3600)];

        // 2026-08-02 is a Sunday; the next selected day is Monday the 3rd.
        assert_eq!(
            next_run_after(&task, at(2026, 8, 2, 10, 0, 0)),
            Some(at(2026, 8, 3, 9, 0, 0))
        );
        // Fired Monday: Friday the 7th is next.
        assert_eq!(
            next_run_after(&task, at(2026, 8, 3, 9, 0, 0)),
            Some(at(2026, 8, 7, 9, 0, 0))
        );
    }

    #[test]
    fn weekly_without_weekday_filter_advances_by_whole_weeks() {
        let mut task = task_with(SchedulingUnit::Weeks, 2);
        task.run_at = vec![StdDuration::from_secs(6 * 3600)];
        assert_eq!(
            next_run_after(&task, at(2026, 8, 2, 6, 0, 0)),
            Some(at(2026, 8, 16, 6, 0, 0))
        );
    }

    #[test]
    fn monthly_tasks_fire_on_selected_days() {
        let mut task = task_with(SchedulingUnit::Months, 1);
        task.month_days = vec![1, 15];
        task.run_at = vec![StdDuration::from_secs(12 * 3600)];

        assert_eq!(
            next_run_after(&task, at(2026, 8, 2, 10, 0, 0)),
            Some(at(2026, 8, 15, 12, 0, 0))
        );
        assert_eq!(
            next_run_after(&task, at(2026, 8, 15, 12, 0, 0)),
            Some(at(2026, 9, 1, 12, 0, 0))
        );
    }

    #[test]
    fn last_day_of_month_resolves_per_month() {
        let mut task = task_with(SchedulingUnit::Months, 1);
        task.month_days = vec![-1];
        task.run_at = vec![StdDuration::from_secs(0)];

        assert_eq!(
            next_run_after(&task, at(2026, 2, 1, 0, 0, 0)),
            Some(at(2026, 2, 28, 0, 0, 0))
        );
        assert_eq!(
            next_run_after(&task, at(2028, 2, 1, 0, 0, 0)),
            Some(at(2028, 2, 29, 0, 0, 0))
        );
    }

    #[test]
    fn cron_schedules_advance_in_their_zone() {
        let mut task = task_with(SchedulingUnit::Crontab, 0);
        task.cron_schedule = Some("CRON_TZ=UTC 0 */5 * * * *".into());
        assert_eq!(
            next_run_after(&task, at(2026, 8, 2, 10, 2, 0)),
            Some(at(2026, 8, 2, 10, 5, 0))
        );

        // 12:00 in Manila is 04:00 UTC.
        task.cron_schedule = Some("CRON_TZ=Asia/Manila 0 0 12 * * *".into());
        assert_eq!(
            next_run_after(&task, at(2026, 8, 2, 10, 0, 0)),
            Some(at(2026, 8, 3, 4, 0, 0))
        );
    }

    #[test]
    fn malformed_stored_cron_yields_no_next_run() {
        let mut task = task_with(SchedulingUnit::Crontab, 0);
        task.cron_schedule = Some("garbage".into());
        assert_eq!(next_run_after(&task, at(2026, 8, 2, 10, 0, 0)), None);
        task.cron_schedule = None;
        assert_eq!(next_run_after(&task, at(2026, 8, 2, 10, 0, 0)), None);
    }
}
