//! Error types for the scheduling engine.

use thiserror::Error;

/// Errors produced while parsing and validating a schedule string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("schedule type must be either every, at, or cron")]
    InvalidScheduleType,

    #[error("invalid scheduling unit requested")]
    InvalidSchedulingUnit,

    #[error("schedule interval must be greater than 0")]
    InvalidInterval,

    #[error("a duration or cron schedule cannot be combined with unit selectors")]
    InvalidUnitSelection,

    #[error("the given time format is not supported")]
    UnsupportedTimeFormat,

    #[error("weekday selection requires a weekly schedule")]
    WeekdayNotSupported,

    #[error("only days 1 through 28 are allowed for monthly schedules")]
    InvalidDayOfMonth,

    #[error("duplicate days of month are not allowed")]
    DuplicateDayOfMonth,

    #[error("the specified cron expression could not be parsed")]
    CronParseFailure,

    #[error("multiple schedule errors: {}", format_composite(.0))]
    Composite(Vec<ScheduleError>),
}

fn format_composite(errors: &[ScheduleError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors crossing the scheduling subsystems.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("the request contained one or more invalid parameters")]
    InvalidRequest,

    #[error("the specified service ID is invalid")]
    InvalidServiceId,

    #[error("the specified tenant ID is invalid")]
    InvalidTenantId,

    #[error("the specified message type is invalid")]
    InvalidMessageType,

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Store(#[from] fahrplan_store::StoreError),

    #[error(transparent)]
    Queue(#[from] fahrplan_queue::QueueError),

    #[error(transparent)]
    Broker(#[from] fahrplan_funkturm::BrokerError),

    #[error("token validation failed: {0}")]
    Token(#[from] fahrplan_identity::IdentityError),

    #[error("message codec error: {0}")]
    Codec(String),
}
