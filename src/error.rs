//! Error taxonomy for job construction, scheduling and deletion.

use thiserror::Error;

/// Every fallible operation exposed by this crate returns this error.
///
/// Handle failures (the callback passed to a job raising/returning an error)
/// are a separate concern: they are caught and logged at the call site, never
/// converted into a `SchedulerError`. See [`crate::job::BoxError`].
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("wrong input for {kind}: {expected}")]
    BadTiming {
        kind: &'static str,
        expected: &'static str,
    },

    #[error("can't use offset-naive and offset-aware datetimes together{}", .context.map(|c| format!(" for {c}")).unwrap_or_default())]
    TimezoneMismatch { context: Option<&'static str> },

    #[error("start argument must be smaller than the stop argument")]
    StartStop,

    #[error("times that are effectively identical are not allowed")]
    DuplicateTiming,

    #[error("weekday enumeration interval is [0, 6] <=> [Monday, Sunday]")]
    WeekdayRange,

    #[error("an unscheduled job can not be deleted")]
    NotScheduled,

    #[error("unknown timezone name: {0}")]
    BadTzname(String),
}

pub type Result<T> = core::result::Result<T, SchedulerError>;
