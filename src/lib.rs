//! An in-process job scheduler with two interchangeable engines: a
//! synchronous, priority-driven [`Dispatcher`] polled by calling
//! [`Dispatcher::tick`], and a cooperative [`Supervisor`] that arms one
//! Tokio task per job at insertion time.
//!
//! Both engines share the same timing vocabulary ([`Timing`], [`ClockTime`],
//! [`WeeklyTiming`], [`Weekday`]) and the same construction-time validation,
//! so a job built for one reads the same way as a job built for the other.

mod calendar;
mod dispatcher;
mod display;
mod error;
mod job;
mod job_timer;
mod priority;
mod supervisor;
mod timing;

pub use calendar::Weekday;
pub use dispatcher::{Dispatcher, DispatcherOptions, Once};
pub use error::{Result, SchedulerError};
pub use job::{BoxError, Job, JobId, JobOptions};
pub use priority::{constant, linear, random, PriorityFn};
pub use supervisor::{AsyncHandle, AsyncJob, Supervisor, SupervisorOptions};
pub use timing::{ClockTime, JobKind, Timing, WeeklyTiming};
