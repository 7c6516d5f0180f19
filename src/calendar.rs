//! Weekday arithmetic and next-occurrence calculations.
//!
//! These are the primitives every [`crate::job_timer::JobTimer`] advance
//! step is built from. They are deliberately generic over any `chrono`
//! `TimeZone` so the same code computes correctly whether a [`JobTimer`] is
//! currently expressed in UTC or in the named zone a particular timing entry
//! carries.
//!
//! [`JobTimer`]: crate::job_timer::JobTimer

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike};

/// Day of the week, numbered the way `chrono::Weekday` and the reference
/// implementation both do: Monday = 0 .. Sunday = 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub fn index(self) -> u8 {
        match self {
            Weekday::Monday => 0,
            Weekday::Tuesday => 1,
            Weekday::Wednesday => 2,
            Weekday::Thursday => 3,
            Weekday::Friday => 4,
            Weekday::Saturday => 5,
            Weekday::Sunday => 6,
        }
    }

    pub fn from_chrono(wd: chrono::Weekday) -> Self {
        match wd {
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
            chrono::Weekday::Sun => Weekday::Sunday,
        }
    }
}

/// Days from `src` to the next occurrence of `dest`, counting strictly
/// forward. Returns `7` when `src == dest` ("a full week out"), otherwise a
/// value in `1..=6`.
pub fn days_to_weekday(src: Weekday, dest: Weekday) -> i64 {
    let (s, d) = (src.index() as i64, dest.index() as i64);
    if s == d {
        7
    } else if d < s {
        7 - s + d
    } else {
        d - s
    }
}

/// Midnight of the next occurrence of `weekday`, preserving `now`'s timezone.
pub fn next_weekday<Tz: TimeZone>(now: DateTime<Tz>, weekday: Weekday) -> DateTime<Tz> {
    let days = days_to_weekday(Weekday::from_chrono(now.weekday()), weekday);
    let midnight = now
        .with_hour(0)
        .and_then(|d| d.with_minute(0))
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .expect("zeroing out a valid datetime's clock fields never fails");
    midnight + Duration::days(days)
}

/// Today at `target`, or tomorrow at `target` if that has already passed.
pub fn next_time<Tz: TimeZone>(now: DateTime<Tz>, target: NaiveTime) -> DateTime<Tz> {
    let candidate = set_time(now.clone(), target);
    if (candidate.clone() - now) <= Duration::zero() {
        candidate + Duration::days(1)
    } else {
        candidate
    }
}

/// The date part of the next occurrence of `weekday`, combined with `target`.
pub fn next_weekday_time<Tz: TimeZone>(
    now: DateTime<Tz>,
    weekday: Weekday,
    target: NaiveTime,
) -> DateTime<Tz> {
    let days = days_to_weekday(Weekday::from_chrono(now.weekday()), weekday);
    set_time(now, target) + Duration::days(days)
}

/// Smallest instant strictly greater than `now` whose second+nanosecond match
/// `target`'s (hour and minute are irrelevant for a minutely timing).
pub fn next_minutely<Tz: TimeZone>(now: DateTime<Tz>, target: NaiveTime) -> DateTime<Tz> {
    let candidate = now
        .clone()
        .with_second(target.second())
        .and_then(|d| d.with_nanosecond(target.nanosecond()))
        .expect("valid second/nanosecond replacement");
    if candidate <= now {
        candidate + Duration::minutes(1)
    } else {
        candidate
    }
}

/// Smallest instant strictly greater than `now` whose minute+second+nanosecond
/// match `target`'s (hour is irrelevant for an hourly timing).
pub fn next_hourly<Tz: TimeZone>(now: DateTime<Tz>, target: NaiveTime) -> DateTime<Tz> {
    let candidate = now
        .clone()
        .with_minute(target.minute())
        .and_then(|d| d.with_second(target.second()))
        .and_then(|d| d.with_nanosecond(target.nanosecond()))
        .expect("valid minute/second/nanosecond replacement");
    if candidate <= now {
        candidate + Duration::hours(1)
    } else {
        candidate
    }
}

/// Smallest instant strictly greater than `now` whose hour+minute+second+
/// nanosecond match `target`'s.
pub fn next_daily<Tz: TimeZone>(now: DateTime<Tz>, target: NaiveTime) -> DateTime<Tz> {
    let candidate = set_time(now.clone(), target);
    if candidate <= now {
        candidate + Duration::days(1)
    } else {
        candidate
    }
}

fn set_time<Tz: TimeZone>(dt: DateTime<Tz>, target: NaiveTime) -> DateTime<Tz> {
    dt.with_hour(target.hour())
        .and_then(|d| d.with_minute(target.minute()))
        .and_then(|d| d.with_second(target.second()))
        .and_then(|d| d.with_nanosecond(target.nanosecond()))
        .expect("valid clock-field replacement")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn days_to_same_weekday_is_a_full_week() {
        for wd in [
            Weekday::Monday,
            Weekday::Tuesday,
            Weekday::Wednesday,
            Weekday::Thursday,
            Weekday::Friday,
            Weekday::Saturday,
            Weekday::Sunday,
        ] {
            assert_eq!(days_to_weekday(wd, wd), 7);
        }
    }

    #[test]
    fn days_to_other_weekday_is_in_one_to_six() {
        let d = days_to_weekday(Weekday::Monday, Weekday::Wednesday);
        assert_eq!(d, 2);
        let d = days_to_weekday(Weekday::Friday, Weekday::Monday);
        assert_eq!(d, 3);
    }

    #[test]
    fn next_time_is_always_strictly_later() {
        let now = Utc::now();
        let target = now.time();
        let next = next_time(now, target);
        assert!(next > now);
        assert_eq!((next - now).num_hours(), 24);
    }
}
