//! `Job`: the synchronous-dispatcher flavor of a scheduled unit of work.
//!
//! State every engine shares (timers, attempt accounting, tags, the
//! stop/expiry window) lives in [`JobCore`]; `Job` adds the pieces specific
//! to the worker-pool [`crate::dispatcher::Dispatcher`]. [`crate::supervisor::AsyncJob`]
//! is `JobCore`'s other concrete flavor, differing only in how its handle
//! is invoked.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::{Result, SchedulerError};
use crate::job_timer::{explode_timing, JobTimer};
use crate::timing::{JobKind, Timing};

/// Error type returned by a job handle. Never converted into a
/// [`SchedulerError`] — caught and logged at the call site instead.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(0);

/// Opaque identity that gives a job a total, cheap order and makes it usable
/// as a `HashSet`/`HashMap` key. Not part of the equality contract: two jobs
/// with identical timing are still distinct jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(u64);

impl JobId {
    fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Construction options shared by every `.interval`/`.minutely`/.../`.once`
/// factory. There is no `args`/`kwargs` field: the handle closure already
/// captures whatever state it needs.
pub struct JobOptions {
    pub tags: HashSet<String>,
    pub weight: f64,
    pub delay: bool,
    pub start: Option<DateTime<Utc>>,
    pub stop: Option<DateTime<Utc>>,
    pub skip_missing: bool,
    pub alias: Option<String>,
    pub max_attempts: u32,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            tags: HashSet::new(),
            weight: 1.0,
            delay: true,
            start: None,
            stop: None,
            skip_missing: false,
            alias: None,
            max_attempts: 0,
        }
    }
}

/// Mutable bookkeeping for a job, guarded by one mutex so `Display` snapshots
/// and dispatcher-driven mutation never interleave inconsistently.
pub(crate) struct JobState {
    pub(crate) timers: Vec<JobTimer>,
    pub(crate) pending_idx: usize,
    pub(crate) mark_deleted: bool,
    pub(crate) attempts: u32,
    pub(crate) failed_attempts: u32,
}

impl JobState {
    fn pending(&self) -> &JobTimer {
        &self.timers[self.pending_idx]
    }

    fn reselect_pending(&mut self) {
        self.pending_idx = self
            .timers
            .iter()
            .enumerate()
            .min_by_key(|(_, t)| t.next_exec())
            .map(|(idx, _)| idx)
            .expect("a job always has at least one timer");
    }
}

/// State and behavior common to both engine flavors of a scheduled job.
pub(crate) struct JobCore {
    pub(crate) id: JobId,
    pub(crate) kind: JobKind,
    #[allow(dead_code)]
    pub(crate) timing: Timing,
    pub(crate) tags: HashSet<String>,
    pub(crate) alias: Option<String>,
    pub(crate) weight: f64,
    pub(crate) max_attempts: u32,
    pub(crate) delay: bool,
    pub(crate) start: DateTime<Utc>,
    pub(crate) stop: Option<DateTime<Utc>>,
    pub(crate) skip_missing: bool,
    pub(crate) tz: Option<Tz>,
    pub(crate) state: Mutex<JobState>,
}

impl JobCore {
    pub(crate) fn new(timing: Timing, tz: Option<Tz>, opts: JobOptions) -> Result<Self> {
        let timing = timing.validate(tz)?;
        let kind = timing.kind();
        let start = opts.start.unwrap_or_else(Utc::now);

        if let Some(stop) = opts.stop {
            if start >= stop {
                return Err(SchedulerError::StartStop);
            }
        }

        let timers: Vec<JobTimer> = explode_timing(&timing)
            .into_iter()
            .map(|spec| JobTimer::new(spec, start, opts.skip_missing))
            .collect();

        let mut state = JobState {
            timers,
            pending_idx: 0,
            mark_deleted: false,
            attempts: 0,
            failed_attempts: 0,
        };
        state.reselect_pending();

        if let Some(stop) = opts.stop {
            if state.pending().next_exec() > stop {
                state.mark_deleted = true;
            }
        }

        Ok(Self {
            id: JobId::next(),
            kind,
            timing,
            tags: opts.tags,
            alias: opts.alias,
            weight: opts.weight,
            max_attempts: opts.max_attempts,
            delay: opts.delay,
            start,
            stop: opts.stop,
            skip_missing: opts.skip_missing,
            tz,
            state: Mutex::new(state),
        })
    }

    pub(crate) fn next_fire_at(&self) -> DateTime<Utc> {
        let state = self.state.lock().unwrap();
        if !self.delay && state.attempts == 0 {
            self.start
        } else {
            state.pending().next_exec()
        }
    }

    pub(crate) fn timedelta(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.next_fire_at() - now
    }

    pub(crate) fn has_attempts_remaining(&self) -> bool {
        let state = self.state.lock().unwrap();
        if state.mark_deleted {
            return false;
        }
        self.max_attempts == 0 || state.attempts < self.max_attempts
    }

    pub(crate) fn is_marked_deleted(&self) -> bool {
        self.state.lock().unwrap().mark_deleted
    }

    pub(crate) fn mark_deleted(&self) {
        self.state.lock().unwrap().mark_deleted = true;
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.state.lock().unwrap().attempts
    }

    pub(crate) fn failed_attempts(&self) -> u32 {
        self.state.lock().unwrap().failed_attempts
    }

    pub(crate) fn tags(&self) -> HashSet<String> {
        self.tags.clone()
    }

    pub(crate) fn label(&self) -> String {
        self.alias.clone().unwrap_or_else(|| "<job>".to_string())
    }

    pub(crate) fn tzname(&self) -> Option<String> {
        self.tz.map(|tz| tz.to_string())
    }

    pub(crate) fn calc_next(&self, ref_dt: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        if self.skip_missing {
            for timer in state.timers.iter_mut() {
                if timer.next_exec() <= ref_dt {
                    timer.advance(Some(ref_dt));
                }
            }
        } else {
            let idx = state.pending_idx;
            state.timers[idx].advance(Some(ref_dt));
        }
        state.reselect_pending();
        if let Some(stop) = self.stop {
            if state.pending().next_exec() > stop {
                state.mark_deleted = true;
            }
        }
    }

    pub(crate) fn record_success(&self) {
        self.state.lock().unwrap().attempts += 1;
    }

    pub(crate) fn record_failure(&self) {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        state.failed_attempts += 1;
    }
}

/// A job driven by the synchronous [`crate::dispatcher::Dispatcher`].
pub struct Job {
    pub(crate) core: JobCore,
    handle: Mutex<Box<dyn FnMut() -> core::result::Result<(), BoxError> + Send>>,
}

impl Job {
    pub(crate) fn new<H>(
        timing: Timing,
        tz: Option<Tz>,
        opts: JobOptions,
        handle: H,
    ) -> Result<Self>
    where
        H: FnMut() -> core::result::Result<(), BoxError> + Send + 'static,
    {
        Ok(Self {
            core: JobCore::new(timing, tz, opts)?,
            handle: Mutex::new(Box::new(handle)),
        })
    }

    pub fn id(&self) -> JobId {
        self.core.id
    }

    pub fn kind(&self) -> JobKind {
        self.core.kind
    }

    pub fn tags(&self) -> HashSet<String> {
        self.core.tags()
    }

    pub fn alias(&self) -> Option<&str> {
        self.core.alias.as_deref()
    }

    pub fn label(&self) -> String {
        self.core.label()
    }

    pub fn tzname(&self) -> Option<String> {
        self.core.tzname()
    }

    pub fn weight(&self) -> f64 {
        self.core.weight
    }

    pub fn max_attempts(&self) -> u32 {
        self.core.max_attempts
    }

    pub fn attempts(&self) -> u32 {
        self.core.attempts()
    }

    pub fn failed_attempts(&self) -> u32 {
        self.core.failed_attempts()
    }

    pub fn has_attempts_remaining(&self) -> bool {
        self.core.has_attempts_remaining()
    }

    pub fn next_fire_at(&self) -> DateTime<Utc> {
        self.core.next_fire_at()
    }

    pub fn timedelta(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.core.timedelta(now)
    }

    pub(crate) fn calc_next(&self, ref_dt: DateTime<Utc>) {
        self.core.calc_next(ref_dt)
    }

    pub(crate) fn is_marked_deleted(&self) -> bool {
        self.core.is_marked_deleted()
    }

    pub(crate) fn mark_deleted(&self) {
        self.core.mark_deleted()
    }

    /// Invoke the handle once. Never propagates a handle error or panic —
    /// both are folded into `failed_attempts` and a `log::error!` record, so
    /// one bad job can't bring the worker pool down.
    pub(crate) fn execute(&self) {
        let outcome = {
            let mut handle = self.handle.lock().unwrap();
            catch_unwind(AssertUnwindSafe(|| (handle)()))
        };
        match outcome {
            Ok(Ok(())) => self.core.record_success(),
            Ok(Err(err)) => {
                self.core.record_failure();
                log::error!(
                    "job {:?} ({}) returned an error: {err}",
                    self.core.id,
                    self.alias().unwrap_or("<anonymous>")
                );
            }
            Err(panic) => {
                self.core.record_failure();
                log::error!(
                    "job {:?} ({}) panicked: {}",
                    self.core.id,
                    self.alias().unwrap_or("<anonymous>"),
                    panic_message(panic)
                );
            }
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.core.id == other.core.id
    }
}
impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.next_fire_at()
            .cmp(&other.next_fire_at())
            .then_with(|| self.core.id.cmp(&other.core.id))
    }
}

impl std::hash::Hash for Job {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.core.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::ClockTime;
    use chrono::Duration;

    fn make_interval_job(max_attempts: u32) -> Job {
        let timing = Timing::Interval(Duration::seconds(5));
        let opts = JobOptions {
            start: Some(Utc::now()),
            max_attempts,
            ..Default::default()
        };
        Job::new(timing, None, opts, || Ok(())).unwrap()
    }

    #[test]
    fn fresh_job_has_attempts_remaining() {
        let job = make_interval_job(0);
        assert!(job.has_attempts_remaining());
        assert_eq!(job.attempts(), 0);
    }

    #[test]
    fn execute_increments_attempts_on_success() {
        let job = make_interval_job(0);
        job.execute();
        assert_eq!(job.attempts(), 1);
        assert_eq!(job.failed_attempts(), 0);
    }

    #[test]
    fn failing_handle_is_caught_and_counted() {
        let _ = env_logger::try_init();
        let timing = Timing::Interval(Duration::seconds(5));
        let opts = JobOptions {
            start: Some(Utc::now()),
            ..Default::default()
        };
        let job = Job::new(timing, None, opts, || Err("boom".into())).unwrap();
        job.execute();
        assert_eq!(job.attempts(), 1);
        assert_eq!(job.failed_attempts(), 1);
    }

    #[test]
    fn panicking_handle_is_caught_and_counted() {
        let _ = env_logger::try_init();
        let timing = Timing::Interval(Duration::seconds(5));
        let opts = JobOptions {
            start: Some(Utc::now()),
            ..Default::default()
        };
        let job = Job::new(timing, None, opts, || panic!("kaboom")).unwrap();
        job.execute();
        assert_eq!(job.failed_attempts(), 1);
    }

    #[test]
    fn job_exhausts_after_max_attempts() {
        let job = make_interval_job(2);
        assert!(job.has_attempts_remaining());
        job.execute();
        job.calc_next(Utc::now());
        assert!(job.has_attempts_remaining());
        job.execute();
        job.calc_next(Utc::now());
        assert!(!job.has_attempts_remaining());
    }

    #[test]
    fn duplicate_timing_is_rejected_before_construction() {
        let timing = Timing::Minutely(vec![
            ClockTime::naive(chrono::NaiveTime::from_hms_opt(0, 0, 5, 0).unwrap()),
            ClockTime::naive(chrono::NaiveTime::from_hms_opt(1, 5, 5, 0).unwrap()),
        ]);
        let err = Job::new(timing, None, JobOptions::default(), || Ok(())).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateTiming));
    }

    #[test]
    fn start_after_stop_is_rejected() {
        let now = Utc::now();
        let timing = Timing::Interval(Duration::seconds(5));
        let opts = JobOptions {
            start: Some(now),
            stop: Some(now - Duration::seconds(1)),
            ..Default::default()
        };
        let err = Job::new(timing, None, opts, || Ok(())).unwrap_err();
        assert!(matches!(err, SchedulerError::StartStop));
    }
}
