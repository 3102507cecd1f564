//! Timestamp parsing and the human-readable renderings used on queues,
//! slips and exports.
//!
//! Writes are always RFC 3339 in the configured display offset. Reads are
//! lenient because older records were written in several formats.

use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, Offset, SecondsFormat, TimeZone,
    Utc,
};

/// India Standard Time, in minutes east of UTC.
pub const DEFAULT_OFFSET_MINUTES: i32 = 330;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d %b %Y, %I:%M %p",
    "%d-%m-%Y %H:%M:%S",
];

pub fn offset(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes * 60).unwrap_or_else(|| Utc.fix())
}

pub fn now_in(offset: FixedOffset) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&offset)
}

pub fn format_timestamp(ts: DateTime<FixedOffset>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Parses any timestamp shape found in stored records. Values without an
/// offset are read in `offset`; a trailing ` IST` marker is ignored.
pub fn parse_timestamp(raw: &str, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts);
    }
    let naive_part = raw.strip_suffix(" IST").unwrap_or(raw).trim();
    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive_part, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(naive_part, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    offset.from_local_datetime(&naive).single()
}

/// `01 Dec 2024, 02:22 PM`
pub fn format_display(ts: DateTime<FixedOffset>) -> String {
    ts.format("%d %b %Y, %I:%M %p").to_string()
}

/// `H:MM:SS`, or `N day(s), H:MM:SS` past 24 hours. Negative durations
/// render as zero.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.num_seconds().max(0);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    let clock = format!("{}:{:02}:{:02}", hours, minutes, seconds);
    match days {
        0 => clock,
        1 => format!("1 day, {}", clock),
        n => format!("{} days, {}", n, clock),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerStatus {
    NotStarted,
    Running { since: DateTime<FixedOffset> },
    Finished { elapsed: Duration },
}

impl TimerStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running { .. } => "running",
            Self::Finished { .. } => "finished",
        }
    }

    /// Time on the clock so far.
    pub fn elapsed(&self, now: DateTime<FixedOffset>) -> Duration {
        match self {
            Self::NotStarted => Duration::zero(),
            Self::Running { since } => now - *since,
            Self::Finished { elapsed } => *elapsed,
        }
    }
}

pub fn timer_status(
    start: Option<DateTime<FixedOffset>>,
    end: Option<DateTime<FixedOffset>>,
) -> TimerStatus {
    match (start, end) {
        (None, None) => TimerStatus::NotStarted,
        (Some(since), None) => TimerStatus::Running { since },
        (Some(start), Some(end)) => TimerStatus::Finished {
            elapsed: (end - start).max(Duration::zero()),
        },
        (None, Some(_)) => TimerStatus::Finished {
            elapsed: Duration::zero(),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineStatus {
    Remaining(Duration),
    Overdue(Duration),
}

impl DeadlineStatus {
    pub fn is_overdue(&self) -> bool {
        matches!(self, Self::Overdue(_))
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Remaining(d) => format!("{} remaining", format_elapsed(*d)),
            Self::Overdue(d) => format!("overdue by {}", format_elapsed(*d)),
        }
    }
}

pub fn deadline_status(
    arrived: DateTime<FixedOffset>,
    now: DateTime<FixedOffset>,
    window: Duration,
) -> DeadlineStatus {
    let deadline = arrived + window;
    if now > deadline {
        DeadlineStatus::Overdue(now - deadline)
    } else {
        DeadlineStatus::Remaining(deadline - now)
    }
}
