//! Timing specifications: the sum type of "when to fire" shapes a [`JobKind`]
//! accepts, plus the validation pipeline every `Dispatcher`/`Supervisor`
//! factory runs before a job is allowed into the registry.

use std::collections::HashSet;

use chrono::{Duration, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;

use crate::calendar::Weekday;
use crate::error::{Result, SchedulerError};

/// Which family of timing a [`crate::job::Job`] was scheduled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Interval,
    Minutely,
    Hourly,
    Daily,
    Weekly,
}

impl JobKind {
    pub fn name(self) -> &'static str {
        match self {
            JobKind::Interval => "Interval",
            JobKind::Minutely => "Minutely",
            JobKind::Hourly => "Hourly",
            JobKind::Daily => "Daily",
            JobKind::Weekly => "Weekly",
        }
    }
}

/// A wall-clock time, optionally pinned to a named timezone.
///
/// Either every `ClockTime` fed to an engine carries a `tz`, or none do —
/// mixing naive and zone-aware times is rejected during validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockTime {
    pub time: NaiveTime,
    pub tz: Option<Tz>,
}

impl ClockTime {
    pub fn naive(time: NaiveTime) -> Self {
        Self { time, tz: None }
    }

    pub fn with_tz(time: NaiveTime, tz: Tz) -> Self {
        Self { time, tz: Some(tz) }
    }
}

/// A weekday paired with the time of day it fires at (defaults to midnight).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeeklyTiming {
    pub weekday: Weekday,
    pub time: ClockTime,
}

impl WeeklyTiming {
    pub fn at_midnight(weekday: Weekday) -> Self {
        Self {
            weekday,
            time: ClockTime::naive(NaiveTime::MIN),
        }
    }

    pub fn new(weekday: Weekday, time: ClockTime) -> Self {
        Self { weekday, time }
    }
}

/// The concrete timing specification for one [`crate::job::Job`].
///
/// Every list variant is guaranteed non-empty and duplicate-free once it has
/// passed through [`Timing::validate`].
#[derive(Debug, Clone)]
pub enum Timing {
    Interval(Duration),
    Minutely(Vec<ClockTime>),
    Hourly(Vec<ClockTime>),
    Daily(Vec<ClockTime>),
    Weekly(Vec<WeeklyTiming>),
}

impl Timing {
    pub fn kind(&self) -> JobKind {
        match self {
            Timing::Interval(_) => JobKind::Interval,
            Timing::Minutely(_) => JobKind::Minutely,
            Timing::Hourly(_) => JobKind::Hourly,
            Timing::Daily(_) => JobKind::Daily,
            Timing::Weekly(_) => JobKind::Weekly,
        }
    }

    /// Run the full validation pipeline: shape check (implicit in the
    /// constructor used), normalization, timezone-consistency check and
    /// duplicate-timing check.
    pub fn validate(mut self, engine_tz: Option<Tz>) -> Result<Self> {
        self.normalize();
        self.check_shape()?;
        self.check_tz_consistency(engine_tz)?;
        self.check_duplicates()?;
        Ok(self)
    }

    /// Clears the clock sub-fields that a `Minutely`/`Hourly` timing ignores,
    /// so two times differing only in an ignored sub-field compare equal.
    fn normalize(&mut self) {
        match self {
            Timing::Minutely(times) => {
                for t in times.iter_mut() {
                    t.time = t.time.with_hour_minute_zeroed();
                }
            }
            Timing::Hourly(times) => {
                for t in times.iter_mut() {
                    t.time = t.time.with_hour_zeroed();
                }
            }
            _ => {}
        }
    }

    fn check_shape(&self) -> Result<()> {
        let kind = self.kind();
        match self {
            Timing::Interval(d) => {
                if *d <= Duration::zero() {
                    return Err(SchedulerError::BadTiming {
                        kind: kind.name(),
                        expected: "a single positive duration",
                    });
                }
            }
            Timing::Minutely(v) | Timing::Hourly(v) | Timing::Daily(v) => {
                if v.is_empty() {
                    return Err(SchedulerError::BadTiming {
                        kind: kind.name(),
                        expected: "datetime.time | list[datetime.time]",
                    });
                }
            }
            Timing::Weekly(v) => {
                if v.is_empty() {
                    return Err(SchedulerError::BadTiming {
                        kind: kind.name(),
                        expected: "Weekday | list[Weekday]",
                    });
                }
            }
        }
        Ok(())
    }

    fn check_tz_consistency(&self, engine_tz: Option<Tz>) -> Result<()> {
        let mismatched = |tz: Option<Tz>| tz.is_some() != engine_tz.is_some();
        let bad = match self {
            Timing::Interval(_) => false,
            Timing::Minutely(v) | Timing::Hourly(v) | Timing::Daily(v) => {
                v.iter().any(|t| mismatched(t.tz))
            }
            Timing::Weekly(v) => v.iter().any(|w| mismatched(w.time.tz)),
        };
        if bad {
            return Err(SchedulerError::TimezoneMismatch { context: None });
        }
        Ok(())
    }

    fn check_duplicates(&self) -> Result<()> {
        let unique = match self {
            Timing::Interval(_) => true,
            Timing::Minutely(v) => times_unique(v, |t| (t.second(), t.nanosecond())),
            Timing::Hourly(v) => times_unique(v, |t| (t.minute(), t.second(), t.nanosecond())),
            Timing::Daily(v) => times_unique(v, |t| {
                (t.hour(), t.minute(), t.second(), t.nanosecond())
            }),
            Timing::Weekly(v) => weekday_times_unique(v),
        };
        if !unique {
            return Err(SchedulerError::DuplicateTiming);
        }
        Ok(())
    }
}

trait ClockFields {
    fn with_hour_minute_zeroed(self) -> NaiveTime;
    fn with_hour_zeroed(self) -> NaiveTime;
}

impl ClockFields for NaiveTime {
    fn with_hour_minute_zeroed(self) -> NaiveTime {
        use chrono::Timelike;
        NaiveTime::from_hms_nano_opt(0, 0, self.second(), self.nanosecond())
            .expect("zeroed hour/minute is always valid")
    }

    fn with_hour_zeroed(self) -> NaiveTime {
        use chrono::Timelike;
        NaiveTime::from_hms_nano_opt(0, self.minute(), self.second(), self.nanosecond())
            .expect("zeroed hour is always valid")
    }
}

use chrono::Timelike;

fn times_unique<K: Eq + std::hash::Hash>(
    times: &[ClockTime],
    key: impl Fn(&NaiveTime) -> K,
) -> bool {
    let mut seen = HashSet::new();
    times.iter().all(|t| seen.insert(key(&t.time)))
}

/// Anchor date that falls on a Monday, used purely as scratch space for
/// converting weekday+time-in-a-zone into an absolute weekday+time in UTC.
fn monday_anchor() -> NaiveDate {
    NaiveDate::from_ymd_opt(2001, 1, 1).expect("2001-01-01 is a valid, known Monday")
}

fn weekday_times_unique(entries: &[WeeklyTiming]) -> bool {
    let mut seen = HashSet::new();
    entries.iter().all(|entry| {
        let key = utc_equivalent_weekday_time(entry);
        seen.insert(key)
    })
}

fn utc_equivalent_weekday_time(entry: &WeeklyTiming) -> (u8, NaiveTime) {
    let offset_days = Duration::days(entry.weekday.index() as i64);
    let naive = (monday_anchor() + offset_days).and_time(entry.time.time);
    match entry.time.tz {
        Some(tz) => {
            let aware = tz
                .from_local_datetime(&naive)
                .single()
                .unwrap_or_else(|| tz.from_utc_datetime(&naive));
            let utc = aware.with_timezone(&chrono_tz::UTC);
            (
                Weekday::from_chrono(utc.weekday()).index(),
                utc.time(),
            )
        }
        None => (entry.weekday.index(), entry.time.time),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;

    #[test]
    fn minutely_duplicate_after_normalization_is_rejected() {
        let t1 = ClockTime::naive(NaiveTime::from_hms_opt(0, 0, 5, 0).unwrap());
        let t2 = ClockTime::naive(NaiveTime::from_hms_opt(1, 5, 5, 0).unwrap());
        let timing = Timing::Minutely(vec![t1, t2]);
        let err = timing.validate(None).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateTiming));
    }

    #[test]
    fn weekly_cross_timezone_duplicate_is_rejected() {
        // Etc/GMT-1 is a fixed UTC+1 offset: Monday 00:30 there is Sunday
        // 23:30 UTC, which collides with an explicit Sunday 23:30 UTC entry.
        let plus_one: Tz = "Etc/GMT-1".parse().unwrap();
        let monday_0030 = WeeklyTiming::new(
            Weekday::Monday,
            ClockTime::with_tz(NaiveTime::from_hms_opt(0, 30, 0, 0).unwrap(), plus_one),
        );
        let sunday_2330 = WeeklyTiming::new(
            Weekday::Sunday,
            ClockTime::with_tz(NaiveTime::from_hms_opt(23, 30, 0, 0).unwrap(), chrono_tz::UTC),
        );
        let timing = Timing::Weekly(vec![monday_0030, sunday_2330]);
        let err = timing.validate(Some(chrono_tz::UTC)).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateTiming));
    }

    #[test]
    fn interval_requires_positive_duration() {
        let timing = Timing::Interval(Duration::zero());
        assert!(timing.validate(None).is_err());
    }
}
