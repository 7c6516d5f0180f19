//! `Dispatcher`: the synchronous, worker-pool-driven scheduling engine.
//!
//! Each `tick()` call scores the registry, selects a bounded batch of
//! overdue jobs, and fans them out across `std::thread::scope`-joined
//! worker threads before advancing timers and retiring exhausted jobs.
//! There is no background clock thread to keep alive between ticks — the
//! host drives progress by calling `tick` itself.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::error::{Result, SchedulerError};
use crate::job::{BoxError, Job, JobOptions};
use crate::priority::{linear, PriorityFn};
use crate::timing::{ClockTime, Timing, WeeklyTiming};

/// Construction options for a [`Dispatcher`].
pub struct DispatcherOptions {
    pub tz: Option<Tz>,
    /// `0` means unbounded: every overdue job with positive priority runs.
    pub max_exec: usize,
    pub priority_fn: PriorityFn,
    /// `0` means "one worker per eligible job this tick".
    pub n_workers: usize,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            tz: None,
            max_exec: 0,
            priority_fn: linear,
            n_workers: 0,
        }
    }
}

/// One-shot scheduling request accepted by [`Dispatcher::once`].
pub enum Once {
    /// Fire at a specific instant.
    At(DateTime<Utc>),
    /// Fire once after `duration` elapses.
    After(Duration),
    /// Fire once at the next occurrence of the given time of day.
    Time(ClockTime),
    /// Fire once at the next occurrence of the given weekday/time.
    Weekday(WeeklyTiming),
}

/// A synchronous, priority-driven job registry. Nothing here runs on its
/// own; the host must call [`Dispatcher::tick`] to make progress.
pub struct Dispatcher {
    tz: Option<Tz>,
    max_exec: usize,
    priority_fn: PriorityFn,
    n_workers: usize,
    jobs: Mutex<Vec<Arc<Job>>>,
}

impl Dispatcher {
    pub fn new(opts: DispatcherOptions) -> Self {
        Self {
            tz: opts.tz,
            max_exec: opts.max_exec,
            priority_fn: opts.priority_fn,
            n_workers: opts.n_workers,
            jobs: Mutex::new(Vec::new()),
        }
    }

    fn insert<H>(&self, timing: Timing, opts: JobOptions, handle: H) -> Result<Arc<Job>>
    where
        H: FnMut() -> core::result::Result<(), BoxError> + Send + 'static,
    {
        let job = Arc::new(Job::new(timing, self.tz, opts, handle)?);
        if job.has_attempts_remaining() {
            self.jobs.lock().unwrap().push(job.clone());
        }
        Ok(job)
    }

    pub fn interval<H>(&self, duration: Duration, handle: H, opts: JobOptions) -> Result<Arc<Job>>
    where
        H: FnMut() -> core::result::Result<(), BoxError> + Send + 'static,
    {
        self.insert(Timing::Interval(duration), opts, handle)
    }

    pub fn minutely<H>(
        &self,
        times: Vec<ClockTime>,
        handle: H,
        opts: JobOptions,
    ) -> Result<Arc<Job>>
    where
        H: FnMut() -> core::result::Result<(), BoxError> + Send + 'static,
    {
        self.insert(Timing::Minutely(times), opts, handle)
    }

    pub fn hourly<H>(&self, times: Vec<ClockTime>, handle: H, opts: JobOptions) -> Result<Arc<Job>>
    where
        H: FnMut() -> core::result::Result<(), BoxError> + Send + 'static,
    {
        self.insert(Timing::Hourly(times), opts, handle)
    }

    pub fn daily<H>(&self, times: Vec<ClockTime>, handle: H, opts: JobOptions) -> Result<Arc<Job>>
    where
        H: FnMut() -> core::result::Result<(), BoxError> + Send + 'static,
    {
        self.insert(Timing::Daily(times), opts, handle)
    }

    pub fn weekly<H>(
        &self,
        times: Vec<WeeklyTiming>,
        handle: H,
        opts: JobOptions,
    ) -> Result<Arc<Job>>
    where
        H: FnMut() -> core::result::Result<(), BoxError> + Send + 'static,
    {
        self.insert(Timing::Weekly(times), opts, handle)
    }

    /// Schedule a job that fires exactly once, then retires.
    ///
    /// `Once::At` models firing at a bare absolute instant as a zero-duration
    /// interval: this crate's `Timing::Interval` rejects a non-positive
    /// duration, so internally it is represented as a one-second interval —
    /// harmless, since `maxAttempts = 1` guarantees the timer never advances
    /// a second time.
    pub fn once<H>(&self, when: Once, handle: H, mut opts: JobOptions) -> Result<Arc<Job>>
    where
        H: FnMut() -> core::result::Result<(), BoxError> + Send + 'static,
    {
        opts.max_attempts = 1;
        match when {
            Once::At(instant) => {
                opts.start = Some(instant);
                opts.delay = false;
                self.insert(Timing::Interval(Duration::seconds(1)), opts, handle)
            }
            Once::After(duration) => self.insert(Timing::Interval(duration), opts, handle),
            Once::Time(time) => self.insert(Timing::Daily(vec![time]), opts, handle),
            Once::Weekday(weekly) => self.insert(Timing::Weekly(vec![weekly]), opts, handle),
        }
    }

    pub fn jobs(&self) -> Vec<Arc<Job>> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn get_jobs(&self, tags: &HashSet<String>, any_tag: bool) -> Vec<Arc<Job>> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| tag_match(&j.tags(), tags, any_tag))
            .cloned()
            .collect()
    }

    pub fn delete_job(&self, job: &Arc<Job>) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|j| j.id() != job.id());
        if jobs.len() == before {
            return Err(SchedulerError::NotScheduled);
        }
        Ok(())
    }

    pub fn delete_jobs(&self, tags: &HashSet<String>, any_tag: bool) -> usize {
        let mut jobs = self.jobs.lock().unwrap();
        if tags.is_empty() {
            let count = jobs.len();
            jobs.clear();
            return count;
        }
        let before = jobs.len();
        jobs.retain(|j| !tag_match(&j.tags(), tags, any_tag));
        before - jobs.len()
    }

    /// Run one scheduling pass. Returns the number of jobs executed.
    pub fn tick(&self, force_all: bool) -> usize {
        let reference = Utc::now();
        let snapshot = self.jobs.lock().unwrap().clone();
        let job_count = snapshot.len();

        let mut candidates: Vec<Arc<Job>> = if force_all {
            snapshot
        } else {
            let mut scored: Vec<(f64, Arc<Job>)> = snapshot
                .into_iter()
                .map(|job| {
                    let overdue = -job.timedelta(reference).num_milliseconds() as f64 / 1000.0;
                    let priority = (self.priority_fn)(overdue, &job, self.max_exec, job_count);
                    (priority, job)
                })
                .filter(|(priority, _)| *priority > 0.0)
                .collect();
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            scored.into_iter().map(|(_, job)| job).collect()
        };

        if !force_all && self.max_exec > 0 && candidates.len() > self.max_exec {
            candidates.truncate(self.max_exec);
        }

        let executed = candidates.len();
        if executed == 0 {
            return 0;
        }

        let n_workers = if self.n_workers == 0 {
            executed
        } else {
            self.n_workers.min(executed)
        };

        run_worker_pool(&candidates, n_workers);

        for job in &candidates {
            job.calc_next(reference);
        }
        self.jobs
            .lock()
            .unwrap()
            .retain(|j| j.has_attempts_remaining());

        executed
    }
}

impl std::fmt::Display for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let now = Utc::now();
        let rows: Vec<crate::display::JobRow> = self
            .jobs()
            .iter()
            .map(|job| crate::display::JobRow {
                kind: job.kind().name(),
                label: job.label(),
                due_at: job.next_fire_at(),
                tzname: job.tzname(),
                due_in: job.timedelta(now),
                attempts: job.attempts(),
                max_attempts: job.max_attempts(),
                weight: Some(job.weight()),
            })
            .collect();
        write!(f, "{}", crate::display::render_table(&rows, true, self.tz.is_some()))
    }
}

pub(crate) fn tag_match(job_tags: &HashSet<String>, wanted: &HashSet<String>, any_tag: bool) -> bool {
    if wanted.is_empty() {
        return true;
    }
    if any_tag {
        job_tags.intersection(wanted).next().is_some()
    } else {
        wanted.is_subset(job_tags)
    }
}

/// Dispatch `jobs` across `n_workers` scoped threads, each pulling from a
/// shared index cursor, and block until every job has executed.
fn run_worker_pool(jobs: &[Arc<Job>], n_workers: usize) {
    let cursor = std::sync::atomic::AtomicUsize::new(0);
    std::thread::scope(|scope| {
        for _ in 0..n_workers.max(1) {
            scope.spawn(|| loop {
                let idx = cursor.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                match jobs.get(idx) {
                    Some(job) => job.execute(),
                    None => break,
                }
            });
        }
    });
}
