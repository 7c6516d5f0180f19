//! Per-timing-element "next fire" state, owned and mutated exclusively by
//! the [`crate::job::Job`] that holds it.

use chrono::{DateTime, Duration, Utc};

use crate::calendar;
use crate::timing::{ClockTime, JobKind, Timing, WeeklyTiming};

/// Explode a validated [`Timing`] into the one-`TimerSpec`-per-entry list a
/// [`crate::job::JobCore`] builds its `JobTimer`s from.
pub fn explode_timing(timing: &Timing) -> Vec<TimerSpec> {
    match timing {
        Timing::Interval(d) => vec![TimerSpec::Interval(*d)],
        Timing::Minutely(v) => v.iter().copied().map(TimerSpec::Minutely).collect(),
        Timing::Hourly(v) => v.iter().copied().map(TimerSpec::Hourly).collect(),
        Timing::Daily(v) => v.iter().copied().map(TimerSpec::Daily).collect(),
        Timing::Weekly(v) => v.iter().copied().map(TimerSpec::Weekly).collect(),
    }
}

/// One element out of a [`crate::timing::Timing`] list, carried alongside the
/// running `nextExec` state it advances.
#[derive(Debug, Clone)]
pub enum TimerSpec {
    Interval(Duration),
    Minutely(ClockTime),
    Hourly(ClockTime),
    Daily(ClockTime),
    Weekly(WeeklyTiming),
}

impl TimerSpec {
    fn kind(&self) -> JobKind {
        match self {
            TimerSpec::Interval(_) => JobKind::Interval,
            TimerSpec::Minutely(_) => JobKind::Minutely,
            TimerSpec::Hourly(_) => JobKind::Hourly,
            TimerSpec::Daily(_) => JobKind::Daily,
            TimerSpec::Weekly(_) => JobKind::Weekly,
        }
    }
}

/// Tracks the single next firing instant for one [`TimerSpec`].
///
/// Created with `next_exec = start` and immediately advanced once, so the
/// stored instant is always the *first true firing*, never the construction
/// reference itself.
#[derive(Debug, Clone)]
pub struct JobTimer {
    spec: TimerSpec,
    next_exec: DateTime<Utc>,
    skip_missing: bool,
}

impl JobTimer {
    pub fn new(spec: TimerSpec, start: DateTime<Utc>, skip_missing: bool) -> Self {
        let mut timer = Self {
            spec,
            next_exec: start,
            skip_missing,
        };
        timer.advance(None);
        timer
    }

    pub fn next_exec(&self) -> DateTime<Utc> {
        self.next_exec
    }

    pub fn timedelta(&self, now: DateTime<Utc>) -> Duration {
        self.next_exec - now
    }

    /// Advance to the next firing, honoring the skip-missed policy.
    ///
    /// `ref_dt` is the reference instant the caller is advancing relative to
    /// (typically "now"); pass `None` only for the initial construction step.
    pub fn advance(&mut self, ref_dt: Option<DateTime<Utc>>) {
        match &self.spec {
            TimerSpec::Interval(duration) => {
                if self.skip_missing {
                    if let Some(ref_dt) = ref_dt {
                        self.next_exec = ref_dt;
                    }
                }
                self.next_exec += *duration;
                return;
            }
            TimerSpec::Weekly(weekly) => {
                self.next_exec = next_weekly_occurrence(self.next_exec, *weekly);
            }
            TimerSpec::Minutely(time) | TimerSpec::Hourly(time) | TimerSpec::Daily(time) => {
                self.next_exec = next_daylike_occurrence(self.next_exec, *time, self.spec.kind());
            }
        }

        if self.skip_missing {
            if let Some(ref_dt) = ref_dt {
                if self.next_exec < ref_dt {
                    self.next_exec = ref_dt;
                    self.advance(Some(ref_dt));
                }
            }
        }
    }
}

fn next_weekly_occurrence(now: DateTime<Utc>, weekly: WeeklyTiming) -> DateTime<Utc> {
    match weekly.time.tz {
        Some(tz) => {
            let local = now.with_timezone(&tz);
            calendar::next_weekday_time(local, weekly.weekday, weekly.time.time)
                .with_timezone(&Utc)
        }
        None => calendar::next_weekday_time(now, weekly.weekday, weekly.time.time),
    }
}

fn next_daylike_occurrence(now: DateTime<Utc>, time: ClockTime, kind: JobKind) -> DateTime<Utc> {
    match time.tz {
        Some(tz) => {
            let local = now.with_timezone(&tz);
            let advanced = match kind {
                JobKind::Minutely => calendar::next_minutely(local, time.time),
                JobKind::Hourly => calendar::next_hourly(local, time.time),
                JobKind::Daily => calendar::next_daily(local, time.time),
                JobKind::Interval | JobKind::Weekly => unreachable!("daylike kinds only"),
            };
            advanced.with_timezone(&Utc)
        }
        None => match kind {
            JobKind::Minutely => calendar::next_minutely(now, time.time),
            JobKind::Hourly => calendar::next_hourly(now, time.time),
            JobKind::Daily => calendar::next_daily(now, time.time),
            JobKind::Interval | JobKind::Weekly => unreachable!("daylike kinds only"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Weekday;
    use chrono::{NaiveTime, TimeZone as _};

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn interval_without_skip_is_evenly_spaced() {
        let start = utc(2021, 5, 26, 3, 55, 0);
        let mut timer = JobTimer::new(TimerSpec::Interval(Duration::seconds(5)), start, false);
        let t1 = timer.next_exec();
        timer.advance(Some(t1 + Duration::seconds(1)));
        let t2 = timer.next_exec();
        assert_eq!(t2 - t1, Duration::seconds(5));
    }

    #[test]
    fn interval_with_skip_jumps_to_ref_plus_duration() {
        let start = utc(2021, 5, 26, 3, 55, 0);
        let mut timer = JobTimer::new(TimerSpec::Interval(Duration::seconds(5)), start, true);
        let far_future = start + Duration::hours(1);
        timer.advance(Some(far_future));
        assert_eq!(timer.next_exec(), far_future + Duration::seconds(5));
    }

    #[test]
    fn weekly_advance_lands_on_requested_weekday() {
        // 2021-05-26 is a Wednesday.
        let start = utc(2021, 5, 26, 3, 55, 0);
        let spec = TimerSpec::Weekly(WeeklyTiming::new(
            Weekday::Friday,
            ClockTime::naive(NaiveTime::from_hms_opt(4, 0, 0, 0).unwrap()),
        ));
        let timer = JobTimer::new(spec, start, false);
        assert_eq!(timer.next_exec(), utc(2021, 5, 28, 4, 0, 0));
    }
}
