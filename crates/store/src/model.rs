//! Row types for the scheduler database.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fahrplan_core::SchedulingUnit;

/// Date format used as the partition key for the scheduled-runs index,
/// e.g. `2026-Aug-02`.
const RUN_PARTITION_FORMAT: &str = "%Y-%b-%d";

/// Compute the run partition for an instant (UTC calendar date).
pub fn run_partition(instant: DateTime<Utc>) -> String {
    instant.format(RUN_PARTITION_FORMAT).to_string()
}

// ── Task status ───────────────────────────────────────────────

/// Status of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Dispatched,
    PendingRetry,
    Completed,
    Failed,
    Unknown,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Dispatched => "dispatched",
            Self::PendingRetry => "pending retry",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => Self::Queued,
            "dispatched" => Self::Dispatched,
            "pending retry" => Self::PendingRetry,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Rank along the lifecycle. Transitions must strictly increase.
    fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Dispatched => 1,
            Self::PendingRetry => 2,
            Self::Completed | Self::Failed => 3,
            Self::Unknown => u8::MAX,
        }
    }

    /// Whether a status update from `self` to `next` moves forward along
    /// `queued → dispatched → {completed | failed}`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        next != TaskStatus::Unknown && next.rank() > self.rank()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Task ──────────────────────────────────────────────────────

/// A task stored in the scheduler database: one scheduled message targeted
/// at one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique, time-ordered identifier assigned at creation.
    pub task_id: Uuid,

    /// The device this task targets. The reserved broadcast UUID denotes a
    /// broadcast task.
    pub device_id: Uuid,

    /// The tenant to which the device belongs.
    pub tenant_id: String,

    /// The service which requested this task to be scheduled.
    pub service_id: String,

    /// Correlation handle assigned by the requesting service. Shared by all
    /// tasks created from one scheduling request; not globally unique.
    pub consignment_id: String,

    pub status: TaskStatus,

    /// The number of times the task has been retried.
    pub retry_count: i32,

    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,

    /// Scheduling unit, e.g. minutes, hours, crontab.
    pub unit: SchedulingUnit,

    /// Interval between runs, in units of `unit`.
    pub interval: i32,

    /// Time duration between runs when `unit` is duration.
    pub duration: Option<Duration>,

    /// Intra-day offsets at which this task runs; sorted, unique.
    pub run_at: Vec<Duration>,

    /// Specific days of the week to run on when `unit` is weeks.
    pub week_days: Vec<Weekday>,

    /// Specific days of the month to run on when `unit` is months.
    /// `-1` means the last day of the month.
    pub month_days: Vec<i32>,

    /// Normalized cron expression (with zone prefix) when `unit` is crontab.
    pub cron_schedule: Option<String>,

    /// Optional time at which the schedule starts.
    pub start_at: Option<DateTime<Utc>>,

    /// Whether the task may run immediately without delay.
    pub start_immediately: bool,

    /// Identifier assigned to the message by the originating service.
    pub message_id: String,

    /// Routing hint for the payload; not interpreted by the scheduler.
    pub message_type: String,

    /// Opaque payload delivered to the device as-is.
    pub task_details: Vec<u8>,
}

impl Task {
    /// A blank task carrying only requester-supplied identity fields.
    /// `create_task` fills in the task ID, status and timestamps.
    pub fn new(tenant_id: String, device_id: Uuid, consignment_id: String, task_details: Vec<u8>) -> Self {
        Self {
            task_id: Uuid::nil(),
            device_id,
            tenant_id,
            service_id: String::new(),
            consignment_id,
            status: TaskStatus::Unknown,
            retry_count: 0,
            create_time: DateTime::<Utc>::MIN_UTC,
            start_time: None,
            end_time: None,
            unit: SchedulingUnit::Once,
            interval: 0,
            duration: None,
            run_at: Vec::new(),
            week_days: Vec::new(),
            month_days: Vec::new(),
            cron_schedule: None,
            start_at: None,
            start_immediately: false,
            message_id: String::new(),
            message_type: String::new(),
            task_details,
        }
    }
}

// ── Scheduled run ─────────────────────────────────────────────

/// The next pending firing of a recurring task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledRun {
    /// Calendar date of `next_run` (`YYYY-MMM-DD`, UTC).
    pub run_partition: String,
    pub next_run: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub task_id: Uuid,
    pub device_id: Uuid,
}

impl ScheduledRun {
    pub fn for_task(task: &Task, next_run: DateTime<Utc>) -> Self {
        Self {
            run_partition: run_partition(next_run),
            next_run,
            last_run: None,
            task_id: task.task_id,
            device_id: task.device_id,
        }
    }
}

// ── Consignment ───────────────────────────────────────────────

/// Secondary index row from a requester's correlation ID to one of the tasks
/// it produced. Mirrors the task's status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consignment {
    pub tenant_id: String,
    pub consignment_id: String,
    pub task_id: Uuid,
    pub device_id: Uuid,
    pub status: TaskStatus,
    pub create_time: DateTime<Utc>,
}

impl Consignment {
    pub fn from_task(task: &Task) -> Self {
        Self {
            tenant_id: task.tenant_id.clone(),
            consignment_id: task.consignment_id.clone(),
            task_id: task.task_id,
            device_id: task.device_id,
            status: task.status,
            create_time: task.create_time,
        }
    }
}

// ── Registered service ────────────────────────────────────────

/// Config snapshot for a service that may originate tasks or receive events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredService {
    pub service_id: String,
    pub name: String,
    pub owner_account: String,
    /// Mapping from broker topic to outbound queue topic.
    pub topics: std::collections::HashMap<String, String>,
}

// ── Column conversions ────────────────────────────────────────

/// Weekdays are stored ISO-style: Monday = 1 … Sunday = 7.
pub(crate) fn weekdays_to_columns(days: &[Weekday]) -> Vec<i16> {
    days.iter().map(|d| d.number_from_monday() as i16).collect()
}

pub(crate) fn weekdays_from_columns(cols: &[i16]) -> Vec<Weekday> {
    cols.iter()
        .filter_map(|d| match d {
            1 => Some(Weekday::Mon),
            2 => Some(Weekday::Tue),
            3 => Some(Weekday::Wed),
            4 => Some(Weekday::Thu),
            5 => Some(Weekday::Fri),
            6 => Some(Weekday::Sat),
            7 => Some(Weekday::Sun),
            _ => None,
        })
        .collect()
}

/// Durations are stored as whole milliseconds.
pub(crate) fn duration_to_ms(d: Duration) -> i64 {
    d.as_millis() as i64
}

pub(crate) fn duration_from_ms(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_partition_matches_calendar_date() {
        let at = Utc.with_ymd_and_hms(2026, 8, 2, 23, 59, 59).unwrap();
        assert_eq!(run_partition(at), "2026-Aug-02");
        let midnight = Utc.with_ymd_and_hms(2026, 1, 9, 0, 0, 0).unwrap();
        assert_eq!(run_partition(midnight), "2026-Jan-09");
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Dispatched,
            TaskStatus::PendingRetry,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), status);
        }
        assert_eq!(TaskStatus::parse("garbage"), TaskStatus::Unknown);
    }

    #[test]
    fn status_transitions_are_forward_only() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Dispatched));
        assert!(TaskStatus::Dispatched.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Dispatched.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Dispatched.can_transition_to(TaskStatus::PendingRetry));
        assert!(TaskStatus::PendingRetry.can_transition_to(TaskStatus::Failed));

        assert!(!TaskStatus::Dispatched.can_transition_to(TaskStatus::Queued));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Dispatched));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Unknown));
    }

    #[test]
    fn weekday_columns_round_trip() {
        let days = vec![Weekday::Mon, Weekday::Fri, Weekday::Sun];
        let cols = weekdays_to_columns(&days);
        assert_eq!(cols, vec![1, 5, 7]);
        assert_eq!(weekdays_from_columns(&cols), days);
    }
}
