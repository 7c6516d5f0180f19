//! Human-readable table rendering shared by [`crate::dispatcher::Dispatcher`]
//! and [`crate::supervisor::Supervisor`]'s `Display` impls.
//!
//! Fixed-width columns, truncation-with-`#`-marker for overflowing cells,
//! and a `timedelta`-style "due in" column.

use chrono::{DateTime, Duration, Utc};

/// One row of the job table.
pub struct JobRow {
    pub kind: &'static str,
    pub label: String,
    pub due_at: DateTime<Utc>,
    pub tzname: Option<String>,
    pub due_in: Duration,
    pub attempts: u32,
    pub max_attempts: u32,
    pub weight: Option<f64>,
}

const COL_WIDTHS: [usize; 7] = [8, 16, 19, 12, 9, 13, 6];
const COL_NAMES: [&str; 7] = [
    "type",
    "function / alias",
    "due at",
    "tzname",
    "due in",
    "attempts",
    "weight",
];

/// Abbreviate `s` to `max_len` characters, marking the cut with `#`.
///
/// `cut_tail = true` keeps the prefix and drops the tail (`"abcdef#"`);
/// `cut_tail = false` keeps the suffix and drops the head (`"#bcdef"`).
pub fn str_cutoff(s: &str, max_len: usize, cut_tail: bool) -> String {
    assert!(max_len >= 1, "max_len < 1 not allowed");
    let char_count = s.chars().count();
    if char_count <= max_len {
        return s.to_string();
    }
    let keep = max_len - 1;
    if cut_tail {
        let prefix: String = s.chars().take(keep).collect();
        format!("{prefix}#")
    } else {
        let suffix: String = s
            .chars()
            .rev()
            .take(keep)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("#{suffix}")
    }
}

/// Render a `Duration` as a human-readable "due in" string: whole days
/// collapse to `"N day(s)"` dropping the sub-day remainder,
/// otherwise `"H:MM:SS"`; either form gets a leading `-` if negative.
pub fn prettify_timedelta(delta: Duration) -> String {
    let negative = delta < Duration::zero();
    let magnitude = if negative { -delta } else { delta };
    let total_seconds = magnitude.num_seconds();
    let days = total_seconds / 86_400;
    let sign = if negative { "-" } else { "" };
    if days > 0 {
        let unit = if days == 1 { "day" } else { "days" };
        return format!("{sign}{days} {unit}");
    }
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{sign}{hours}:{minutes:02}:{seconds:02}")
}

fn pad(s: &str, width: usize, right_align: bool) -> String {
    if right_align {
        format!("{s:>width$}")
    } else {
        format!("{s:<width$}")
    }
}

/// Render `rows` into the heading + table body shared by both engines.
/// `show_weight` is set only for the dispatcher; `show_tz` is dropped
/// entirely (not just blanked) when the engine has no timezone, mirroring
/// the reference omitting the column rather than leaving it empty.
pub fn render_table(rows: &[JobRow], show_weight: bool, show_tz: bool) -> String {
    let mut active_cols: Vec<usize> = vec![0, 1, 2];
    if show_tz {
        active_cols.push(3);
    }
    active_cols.push(4);
    active_cols.push(5);
    if show_weight {
        active_cols.push(6);
    }
    let right_align = |col: usize| col >= 4;

    let mut out = String::new();
    let header: Vec<String> = active_cols
        .iter()
        .map(|&c| pad(COL_NAMES[c], COL_WIDTHS[c], right_align(c)))
        .collect();
    out.push_str(&header.join(" "));
    out.push('\n');
    let rule: Vec<String> = active_cols
        .iter()
        .map(|&c| pad(&"-".repeat(COL_WIDTHS[c]), COL_WIDTHS[c], right_align(c)))
        .collect();
    out.push_str(&rule.join(" "));
    out.push('\n');

    for row in rows {
        let kind = if row.max_attempts == 1 {
            "ONCE"
        } else {
            row.kind
        };
        let due_at = row.due_at.format("%Y-%m-%d %H:%M:%S").to_string();
        let max_attempts = if row.max_attempts == 0 {
            "inf".to_string()
        } else {
            row.max_attempts.to_string()
        };
        let cells: [String; 7] = [
            kind.to_string(),
            str_cutoff(&row.label, COL_WIDTHS[1], false),
            due_at,
            str_cutoff(row.tzname.as_deref().unwrap_or(""), COL_WIDTHS[3], false),
            str_cutoff(&prettify_timedelta(row.due_in), COL_WIDTHS[4], true),
            str_cutoff(
                &format!("{}/{}", row.attempts, max_attempts),
                COL_WIDTHS[5],
                true,
            ),
            str_cutoff(
                &row.weight.map(|w| format!("{w:.3}")).unwrap_or_default(),
                COL_WIDTHS[6],
                true,
            ),
        ];
        let line: Vec<String> = active_cols
            .iter()
            .map(|&c| pad(&cells[c], COL_WIDTHS[c], right_align(c)))
            .collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_keeps_suffix_when_cutting_head() {
        assert_eq!(str_cutoff("abcdefgh", 5, false), "#efgh");
    }

    #[test]
    fn cutoff_keeps_prefix_when_cutting_tail() {
        assert_eq!(str_cutoff("abcdefgh", 5, true), "abcd#");
    }

    #[test]
    fn cutoff_is_noop_under_limit() {
        assert_eq!(str_cutoff("ab", 5, true), "ab");
    }

    #[test]
    fn pretty_timedelta_sub_day_is_hms() {
        assert_eq!(prettify_timedelta(Duration::seconds(3725)), "1:02:05");
    }

    #[test]
    fn pretty_timedelta_negative_is_signed() {
        assert_eq!(prettify_timedelta(Duration::seconds(-5)), "-0:00:05");
    }

    #[test]
    fn pretty_timedelta_multi_day_collapses_to_days() {
        assert_eq!(prettify_timedelta(Duration::days(2) + Duration::hours(3)), "2 days");
        assert_eq!(prettify_timedelta(Duration::days(1)), "1 day");
    }
}
