//! `Supervisor`: the cooperative, Tokio-driven scheduling engine.
//!
//! Every inserted job is armed with its own supervising task at insertion
//! time: each task sleeps until its job's next fire time, invokes the
//! handle, advances, and repeats. There is no shared clock thread or
//! condvar to wake — each job's sleep-execute-advance loop runs
//! independently on the supplied Tokio runtime.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use chrono_tz::Tz;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::dispatcher::{tag_match, Once};
use crate::error::{Result, SchedulerError};
use crate::job::{BoxError, JobCore, JobId, JobOptions};
use crate::timing::{ClockTime, JobKind, Timing, WeeklyTiming};

/// Adapter trait so a plain `async` closure can be stored as a trait object
/// and called repeatedly. `Fn` rather than `FnOnce` since a supervised job
/// is called many times over its lifetime rather than once.
pub trait AsyncHandle: Send + Sync + 'static {
    fn call(&self) -> BoxFuture<'static, core::result::Result<(), BoxError>>;
}

impl<T, F> AsyncHandle for T
where
    T: Fn() -> F + Send + Sync + 'static,
    F: Future<Output = core::result::Result<(), BoxError>> + Send + 'static,
{
    fn call(&self) -> BoxFuture<'static, core::result::Result<(), BoxError>> {
        Box::pin(self())
    }
}

/// A job driven by the cooperative [`Supervisor`]. Shares [`JobCore`] with
/// [`crate::job::Job`]; differs only in the handle's calling convention.
pub struct AsyncJob {
    core: JobCore,
    handle: Arc<dyn AsyncHandle>,
}

impl AsyncJob {
    fn new<H>(timing: Timing, tz: Option<Tz>, opts: JobOptions, handle: H) -> Result<Self>
    where
        H: AsyncHandle,
    {
        Ok(Self {
            core: JobCore::new(timing, tz, opts)?,
            handle: Arc::new(handle),
        })
    }

    pub fn id(&self) -> JobId {
        self.core.id
    }

    pub fn kind(&self) -> JobKind {
        self.core.kind
    }

    pub fn alias(&self) -> Option<&str> {
        self.core.alias.as_deref()
    }

    pub fn tags(&self) -> HashSet<String> {
        self.core.tags()
    }

    pub fn attempts(&self) -> u32 {
        self.core.attempts()
    }

    pub fn max_attempts(&self) -> u32 {
        self.core.max_attempts
    }

    pub fn failed_attempts(&self) -> u32 {
        self.core.failed_attempts()
    }

    pub fn label(&self) -> String {
        self.core.label()
    }

    pub fn tzname(&self) -> Option<String> {
        self.core.tzname()
    }

    pub fn next_fire_at(&self) -> chrono::DateTime<Utc> {
        self.core.next_fire_at()
    }

    pub fn has_attempts_remaining(&self) -> bool {
        self.core.has_attempts_remaining()
    }

    /// Invoke the handle once, catching handle errors the same way the
    /// synchronous `Job::execute` does. A panic inside the polled future is
    /// deliberately left to unwind the task: `catch_unwind` cannot safely
    /// wrap a future across `.await` points, so an async handle that panics
    /// aborts its own supervising task, same as a bare `tokio::spawn`ed
    /// future would.
    async fn execute_async(&self) {
        match self.handle.call().await {
            Ok(()) => self.core.record_success(),
            Err(err) => {
                self.core.record_failure();
                log::error!(
                    "job {:?} ({}) returned an error: {err}",
                    self.core.id,
                    self.alias().unwrap_or("<anonymous>")
                );
            }
        }
    }

    fn calc_next(&self, ref_dt: chrono::DateTime<Utc>) {
        self.core.calc_next(ref_dt)
    }

    pub fn timedelta(&self, now: chrono::DateTime<Utc>) -> chrono::Duration {
        self.core.timedelta(now)
    }
}

/// Construction options for a [`Supervisor`].
pub struct SupervisorOptions {
    pub tz: Option<Tz>,
    pub runtime_handle: tokio::runtime::Handle,
}

type TaskMap = Arc<Mutex<HashMap<JobId, (Arc<AsyncJob>, JoinHandle<()>)>>>;

/// A cooperative job registry. Every inserted job is immediately armed with
/// its own supervising task on `runtime_handle`; no separate "tick" call is
/// needed or provided.
///
/// A job's own sleep-execute-advance sequence never races itself, but
/// distinct jobs only ever run serially relative to one another when
/// `runtime_handle` belongs to a current-thread runtime — constructing it
/// against a multi-thread runtime still runs correctly, but handles may
/// then execute concurrently with one another.
pub struct Supervisor {
    tz: Option<Tz>,
    runtime_handle: tokio::runtime::Handle,
    tasks: TaskMap,
}

impl Supervisor {
    pub fn new(opts: SupervisorOptions) -> Self {
        Self {
            tz: opts.tz,
            runtime_handle: opts.runtime_handle,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn arm<H>(&self, timing: Timing, opts: JobOptions, handle: H) -> Result<JobId>
    where
        H: AsyncHandle,
    {
        let job = Arc::new(AsyncJob::new(timing, self.tz, opts, handle)?);
        let id = job.id();
        if job.has_attempts_remaining() {
            let tasks = self.tasks.clone();
            let task = self.runtime_handle.spawn(supervise(job.clone(), tasks.clone()));
            tasks.lock().unwrap().insert(id, (job, task));
        }
        Ok(id)
    }

    pub fn interval<H>(
        &self,
        duration: chrono::Duration,
        handle: H,
        opts: JobOptions,
    ) -> Result<JobId>
    where
        H: AsyncHandle,
    {
        self.arm(Timing::Interval(duration), opts, handle)
    }

    pub fn minutely<H>(&self, times: Vec<ClockTime>, handle: H, opts: JobOptions) -> Result<JobId>
    where
        H: AsyncHandle,
    {
        self.arm(Timing::Minutely(times), opts, handle)
    }

    pub fn hourly<H>(&self, times: Vec<ClockTime>, handle: H, opts: JobOptions) -> Result<JobId>
    where
        H: AsyncHandle,
    {
        self.arm(Timing::Hourly(times), opts, handle)
    }

    pub fn daily<H>(&self, times: Vec<ClockTime>, handle: H, opts: JobOptions) -> Result<JobId>
    where
        H: AsyncHandle,
    {
        self.arm(Timing::Daily(times), opts, handle)
    }

    pub fn weekly<H>(&self, times: Vec<WeeklyTiming>, handle: H, opts: JobOptions) -> Result<JobId>
    where
        H: AsyncHandle,
    {
        self.arm(Timing::Weekly(times), opts, handle)
    }

    pub fn once<H>(&self, when: Once, handle: H, mut opts: JobOptions) -> Result<JobId>
    where
        H: AsyncHandle,
    {
        opts.max_attempts = 1;
        match when {
            Once::At(instant) => {
                opts.start = Some(instant);
                opts.delay = false;
                self.arm(Timing::Interval(chrono::Duration::seconds(1)), opts, handle)
            }
            Once::After(duration) => self.arm(Timing::Interval(duration), opts, handle),
            Once::Time(time) => self.arm(Timing::Daily(vec![time]), opts, handle),
            Once::Weekday(weekly) => self.arm(Timing::Weekly(vec![weekly]), opts, handle),
        }
    }

    /// Cancel `id`'s supervising task. If it is currently sleeping it never
    /// executes its handle again; if it is mid-handle, the handle runs to
    /// completion and the task is cancelled at its next `.await` point.
    pub fn delete_job(&self, id: JobId) -> Result<()> {
        match self.tasks.lock().unwrap().remove(&id) {
            Some((_job, task)) => {
                task.abort();
                Ok(())
            }
            None => Err(SchedulerError::NotScheduled),
        }
    }

    pub fn jobs(&self) -> Vec<Arc<AsyncJob>> {
        self.tasks
            .lock()
            .unwrap()
            .values()
            .map(|(job, _)| job.clone())
            .collect()
    }

    pub fn get_jobs(&self, tags: &HashSet<String>, any_tag: bool) -> Vec<Arc<AsyncJob>> {
        self.tasks
            .lock()
            .unwrap()
            .values()
            .filter(|(job, _)| tag_match(&job.tags(), tags, any_tag))
            .map(|(job, _)| job.clone())
            .collect()
    }

    pub fn delete_jobs(&self, tags: &HashSet<String>, any_tag: bool) -> usize {
        let mut tasks = self.tasks.lock().unwrap();
        let matching: Vec<JobId> = if tags.is_empty() {
            tasks.keys().copied().collect()
        } else {
            tasks
                .iter()
                .filter(|(_, (job, _))| tag_match(&job.tags(), tags, any_tag))
                .map(|(id, _)| *id)
                .collect()
        };
        for id in &matching {
            if let Some((_job, task)) = tasks.remove(id) {
                task.abort();
            }
        }
        matching.len()
    }

    pub fn job_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

impl std::fmt::Display for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let now = Utc::now();
        let tasks = self.tasks.lock().unwrap();
        let rows: Vec<crate::display::JobRow> = tasks
            .values()
            .map(|(job, _)| crate::display::JobRow {
                kind: job.kind().name(),
                label: job.label(),
                due_at: job.next_fire_at(),
                tzname: job.tzname(),
                due_in: job.timedelta(now),
                attempts: job.attempts(),
                max_attempts: job.max_attempts(),
                weight: None,
            })
            .collect();
        write!(
            f,
            "{}",
            crate::display::render_table(&rows, false, self.tz.is_some())
        )
    }
}

async fn supervise(job: Arc<AsyncJob>, tasks: TaskMap) {
    while job.has_attempts_remaining() {
        let now = Utc::now();
        let wait = job.timedelta(now);
        if wait > chrono::Duration::zero() {
            tokio::time::sleep(wait.to_std().unwrap_or_default()).await;
        }
        job.execute_async().await;
        job.calc_next(Utc::now());
    }
    tasks.lock().unwrap().remove(&job.id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn armed_job_executes_and_retires() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        runtime.block_on(async {
            let supervisor = Supervisor::new(SupervisorOptions {
                tz: None,
                runtime_handle: tokio::runtime::Handle::current(),
            });
            let counter_clone = counter.clone();
            let opts = JobOptions {
                start: Some(Utc::now()),
                delay: false,
                max_attempts: 1,
                ..Default::default()
            };
            supervisor
                .interval(
                    Duration::milliseconds(1),
                    move || {
                        let counter = counter_clone.clone();
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    },
                    opts,
                )
                .unwrap();
            for _ in 0..100 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                if supervisor.job_count() == 0 {
                    break;
                }
            }
        });
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delete_job_aborts_task() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            let supervisor = Supervisor::new(SupervisorOptions {
                tz: None,
                runtime_handle: tokio::runtime::Handle::current(),
            });
            let opts = JobOptions {
                start: Some(Utc::now() + Duration::hours(1)),
                delay: false,
                ..Default::default()
            };
            let id = supervisor
                .interval(Duration::hours(1), || async { Ok(()) }, opts)
                .unwrap();
            assert_eq!(supervisor.job_count(), 1);
            supervisor.delete_job(id).unwrap();
            assert_eq!(supervisor.job_count(), 0);
            assert!(matches!(
                supervisor.delete_job(id).unwrap_err(),
                SchedulerError::NotScheduled
            ));
        });
    }

    #[test]
    fn failing_handle_is_caught_and_counted() {
        let _ = env_logger::try_init();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            let supervisor = Supervisor::new(SupervisorOptions {
                tz: None,
                runtime_handle: tokio::runtime::Handle::current(),
            });
            let opts = JobOptions {
                start: Some(Utc::now()),
                delay: false,
                max_attempts: 1,
                ..Default::default()
            };
            let id = supervisor
                .interval(
                    Duration::milliseconds(1),
                    || async { Err("boom".into()) },
                    opts,
                )
                .unwrap();
            let job = supervisor.jobs().into_iter().find(|j| j.id() == id).unwrap();
            for _ in 0..100 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                if supervisor.job_count() == 0 {
                    break;
                }
            }
            assert_eq!(job.attempts(), 1);
            assert_eq!(job.failed_attempts(), 1);
        });
    }

    #[test]
    fn once_at_in_the_past_fires_and_retires() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        runtime.block_on(async {
            let supervisor = Supervisor::new(SupervisorOptions {
                tz: None,
                runtime_handle: tokio::runtime::Handle::current(),
            });
            let counter_clone = counter.clone();
            supervisor
                .once(
                    Once::At(Utc::now() - Duration::seconds(1)),
                    move || {
                        let counter = counter_clone.clone();
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    },
                    JobOptions::default(),
                )
                .unwrap();
            for _ in 0..100 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                if supervisor.job_count() == 0 {
                    break;
                }
            }
        });
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn once_at_overrides_delay_so_next_fire_at_is_the_instant() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            let supervisor = Supervisor::new(SupervisorOptions {
                tz: None,
                runtime_handle: tokio::runtime::Handle::current(),
            });
            let instant = Utc::now() + Duration::hours(1);
            let id = supervisor
                .once(Once::At(instant), || async { Ok(()) }, JobOptions::default())
                .unwrap();
            let job = supervisor.jobs().into_iter().find(|j| j.id() == id).unwrap();
            assert_eq!(job.next_fire_at(), instant);
            assert_eq!(supervisor.job_count(), 1);
        });
    }

    #[test]
    fn once_after_duration_fires_once_and_retires() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            let supervisor = Supervisor::new(SupervisorOptions {
                tz: None,
                runtime_handle: tokio::runtime::Handle::current(),
            });
            supervisor
                .once(
                    Once::After(Duration::milliseconds(1)),
                    || async { Ok(()) },
                    JobOptions::default(),
                )
                .unwrap();
            for _ in 0..100 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                if supervisor.job_count() == 0 {
                    break;
                }
            }
            assert_eq!(supervisor.job_count(), 0);
        });
    }

    #[test]
    fn once_time_schedules_a_daily_kind_job_with_one_attempt() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            let supervisor = Supervisor::new(SupervisorOptions {
                tz: None,
                runtime_handle: tokio::runtime::Handle::current(),
            });
            let time = ClockTime::naive(chrono::NaiveTime::from_hms_opt(0, 0, 1, 0).unwrap());
            let id = supervisor
                .once(Once::Time(time), || async { Ok(()) }, JobOptions::default())
                .unwrap();
            let job = supervisor.jobs().into_iter().find(|j| j.id() == id).unwrap();
            assert_eq!(job.kind(), JobKind::Daily);
            assert_eq!(job.max_attempts(), 1);
            assert_eq!(supervisor.job_count(), 1);
        });
    }

    #[test]
    fn once_weekday_schedules_a_weekly_kind_job_with_one_attempt() {
        use crate::calendar::Weekday;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            let supervisor = Supervisor::new(SupervisorOptions {
                tz: None,
                runtime_handle: tokio::runtime::Handle::current(),
            });
            let weekly = WeeklyTiming::at_midnight(Weekday::Monday);
            let id = supervisor
                .once(Once::Weekday(weekly), || async { Ok(()) }, JobOptions::default())
                .unwrap();
            let job = supervisor.jobs().into_iter().find(|j| j.id() == id).unwrap();
            assert_eq!(job.kind(), JobKind::Weekly);
            assert_eq!(job.max_attempts(), 1);
            assert_eq!(supervisor.job_count(), 1);
        });
    }
}
