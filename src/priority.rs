//! Prioritization functions handed to a [`crate::dispatcher::Dispatcher`].
//!
//! Every function has the shape `(overdue_seconds, job, max_exec, job_count)
//! -> f64`: the bigger the number, the sooner a tick's worker pool picks the
//! job off the sorted queue. `max_exec`/`job_count` are threaded through
//! unused by the three built-ins below but are part of the signature so a
//! caller's own priority function can factor them in.

use crate::job::Job;

/// Priority function signature accepted by [`crate::dispatcher::Dispatcher`].
pub type PriorityFn = fn(f64, &Job, usize, usize) -> f64;

/// The job's weight for overdue jobs, zero otherwise. A job that hasn't come
/// due yet never outranks one that has, regardless of weight.
pub fn constant(overdue_seconds: f64, job: &Job, _max_exec: usize, _job_count: usize) -> f64 {
    if overdue_seconds < 0.0 {
        0.0
    } else {
        job.weight()
    }
}

/// Priority grows linearly with how overdue a job is, scaled by its weight.
/// At the exact moment a job comes due the priority equals its weight.
pub fn linear(overdue_seconds: f64, job: &Job, _max_exec: usize, _job_count: usize) -> f64 {
    if overdue_seconds < 0.0 {
        0.0
    } else {
        (overdue_seconds + 1.0) * job.weight()
    }
}

/// Treats weight as a probability: returns `1.0` with probability
/// `job.weight()`, `0.0` otherwise. Not suitable for anything
/// security-relevant — it's a scheduling heuristic, not a CSPRNG draw.
pub fn random(_overdue_seconds: f64, job: &Job, _max_exec: usize, _job_count: usize) -> f64 {
    if rand::random::<f64>() < job.weight() {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;
    use crate::timing::Timing;
    use chrono::{Duration, Utc};

    fn job_with_weight(weight: f64) -> Job {
        let timing = Timing::Interval(Duration::seconds(5));
        let opts = JobOptions {
            start: Some(Utc::now()),
            weight,
            ..Default::default()
        };
        Job::new(timing, None, opts, || Ok(())).unwrap()
    }

    #[test]
    fn constant_is_zero_when_not_overdue() {
        let job = job_with_weight(3.0);
        assert_eq!(constant(-1.0, &job, 0, 0), 0.0);
    }

    #[test]
    fn constant_is_weight_when_overdue() {
        let job = job_with_weight(3.0);
        assert_eq!(constant(0.0, &job, 0, 0), 3.0);
        assert_eq!(constant(100.0, &job, 0, 0), 3.0);
    }

    #[test]
    fn linear_scales_with_overdue_seconds() {
        let job = job_with_weight(2.0);
        assert_eq!(linear(-1.0, &job, 0, 0), 0.0);
        assert_eq!(linear(0.0, &job, 0, 0), 2.0);
        assert_eq!(linear(9.0, &job, 0, 0), 20.0);
    }

    #[test]
    fn random_returns_zero_for_zero_weight() {
        let job = job_with_weight(0.0);
        for _ in 0..50 {
            assert_eq!(random(0.0, &job, 0, 0), 0.0);
        }
    }

    #[test]
    fn random_returns_one_for_full_weight() {
        let job = job_with_weight(1.0);
        for _ in 0..50 {
            assert_eq!(random(0.0, &job, 0, 0), 1.0);
        }
    }
}
