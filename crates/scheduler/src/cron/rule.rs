//! Recurrence rules: what makes a registration due and when it fires next.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;

use nucleor_core::{SchedulerError, SchedulerResult};

/// When a registration fires next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Due {
    /// Fixed-step tick count.
    Frame(u64),
    /// Wall-clock instant.
    At(DateTime<Utc>),
}

impl Due {
    pub fn is_due(&self, frame: u64, now: DateTime<Utc>) -> bool {
        match self {
            Due::Frame(f) => *f <= frame,
            Due::At(t) => *t <= now,
        }
    }
}

#[derive(Clone)]
pub enum RuleKind {
    Once,
    Interval(Duration),
    FrameInterval(u64),
    Cron(Box<Schedule>),
}

impl fmt::Debug for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Once => write!(f, "Once"),
            RuleKind::Interval(d) => write!(f, "Interval({d:?})"),
            RuleKind::FrameInterval(n) => write!(f, "FrameInterval({n})"),
            RuleKind::Cron(s) => write!(f, "Cron({s})"),
        }
    }
}

/// Due/repeat policy of a [`CronGod`](super::CronGod) registration.
///
/// ```text
/// once                  next tick
/// every 2h30m           wall-clock interval (d, h, m, s units)
/// every 3 frames        fixed-step interval
/// */5 * * * *           cron expression, 5 or 6 fields
/// ```
#[derive(Debug, Clone)]
pub struct RecurrenceRule {
    pub(super) kind: RuleKind,
    /// Overrides the first due point (delayed or frame-pinned one-shots).
    pub(super) first: Option<First>,
    /// `None` = until cancelled.
    pub(super) remaining: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub(super) enum First {
    After(Duration),
    AtFrame(u64),
}

impl RecurrenceRule {
    /// Fire once, on the next tick.
    pub fn once() -> Self {
        Self {
            kind: RuleKind::Once,
            first: None,
            remaining: Some(1),
        }
    }

    /// Fire once, the first tick at least `delay` after registering.
    pub fn once_after(delay: Duration) -> Self {
        Self {
            first: Some(First::After(delay)),
            ..Self::once()
        }
    }

    /// Fire once, the first tick whose frame count reaches `frame`.
    pub fn once_at_frame(frame: u64) -> Self {
        Self {
            first: Some(First::AtFrame(frame)),
            ..Self::once()
        }
    }

    pub fn interval(every: Duration) -> SchedulerResult<Self> {
        if every.is_zero() {
            return Err(SchedulerError::InvalidRule("interval must be non-zero".into()));
        }
        // Reject intervals chrono cannot add to an instant.
        chrono::Duration::from_std(every)
            .map_err(|e| SchedulerError::InvalidRule(format!("interval {every:?}: {e}")))?;
        Ok(Self {
            kind: RuleKind::Interval(every),
            first: None,
            remaining: None,
        })
    }

    pub fn every_frames(frames: u64) -> SchedulerResult<Self> {
        if frames == 0 {
            return Err(SchedulerError::InvalidRule("frame interval must be non-zero".into()));
        }
        Ok(Self {
            kind: RuleKind::FrameInterval(frames),
            first: None,
            remaining: None,
        })
    }

    /// Standard cron expression; 5-field input gets a leading seconds field.
    pub fn cron(expression: &str) -> SchedulerResult<Self> {
        let normalized = normalize_cron(expression);
        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| SchedulerError::InvalidRule(format!("'{expression}': {e}")))?;
        Ok(Self {
            kind: RuleKind::Cron(Box::new(schedule)),
            first: None,
            remaining: None,
        })
    }

    /// Limit the number of firings.
    pub fn times(mut self, count: u64) -> Self {
        self.remaining = Some(count);
        self
    }

    pub fn kind(&self) -> &RuleKind {
        &self.kind
    }

    pub fn remaining(&self) -> Option<u64> {
        self.remaining
    }

    /// First due point for a registration made at (`frame`, `now`).
    pub(super) fn first_due(&self, frame: u64, now: DateTime<Utc>) -> SchedulerResult<Due> {
        match self.first {
            Some(First::AtFrame(f)) => return Ok(Due::Frame(f)),
            Some(First::After(delay)) => return after(now, delay).map(Due::At),
            None => {}
        }
        match &self.kind {
            RuleKind::Once => Ok(Due::Frame(frame)),
            RuleKind::Interval(every) => after(now, *every).map(Due::At),
            RuleKind::FrameInterval(n) => Ok(Due::Frame(frame.saturating_add(*n))),
            RuleKind::Cron(schedule) => schedule
                .after(&now)
                .next()
                .map(Due::At)
                .ok_or_else(|| SchedulerError::InvalidRule("cron schedule never fires".into())),
        }
    }

    /// Due point after a firing that was due at `due`, strictly later than
    /// (`frame`, `now`). Missed fire points are skipped, not replayed.
    /// `None` when the rule has nothing left to fire.
    pub(super) fn next_due(&self, due: Due, frame: u64, now: DateTime<Utc>) -> Option<Due> {
        match (&self.kind, due) {
            (RuleKind::Once, _) => None,
            (RuleKind::FrameInterval(n), Due::Frame(last)) => {
                let missed = frame.saturating_sub(last) / n;
                last.checked_add(n.checked_mul(missed + 1)?).map(Due::Frame)
            }
            (RuleKind::Interval(every), Due::At(last)) => {
                let behind = (now - last).to_std().unwrap_or_default();
                let steps = behind.as_nanos() / every.as_nanos() + 1;
                let advance = u64::try_from(every.as_nanos().checked_mul(steps)?).ok()?;
                let advance = chrono::Duration::from_std(Duration::from_nanos(advance)).ok()?;
                last.checked_add_signed(advance).map(Due::At)
            }
            (RuleKind::Cron(schedule), _) => schedule.after(&now).next().map(Due::At),
            // First due was pinned in the other domain; continue from now.
            (RuleKind::FrameInterval(n), Due::At(_)) => frame.checked_add(*n).map(Due::Frame),
            (RuleKind::Interval(every), Due::Frame(_)) => after(now, *every).ok().map(Due::At),
        }
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> SchedulerResult<DateTime<Utc>> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| SchedulerError::InvalidRule(format!("delay {delay:?} out of range")))
}

impl FromStr for RecurrenceRule {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("once") {
            return Ok(Self::once());
        }
        if let Some(rest) = s.strip_prefix("every ") {
            let rest = rest.trim();
            if let Some(n) = rest
                .strip_suffix("frames")
                .or_else(|| rest.strip_suffix("frame"))
            {
                let n: u64 = n
                    .trim()
                    .parse()
                    .map_err(|_| SchedulerError::InvalidRule(format!("bad frame count in '{s}'")))?;
                return Self::every_frames(n);
            }
            let every = parse_duration(rest)
                .ok_or_else(|| SchedulerError::InvalidRule(format!("bad interval in '{s}'")))?;
            return Self::interval(every);
        }
        Self::cron(s)
    }
}

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds.
///
/// The `cron` crate requires 6 fields: `sec min hour day-of-month month day-of-week`.
pub(crate) fn normalize_cron(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Parse `Xd`, `Xh`, `Xm`, `Xs` components, combined: "2h30m", "90s".
/// A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();
    let mut found_unit = false;

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            num_buf.push(ch);
        } else {
            let n: u64 = num_buf.parse().ok()?;
            num_buf.clear();
            let unit = match ch {
                'd' => 86_400,
                'h' => 3_600,
                'm' => 60,
                's' => 1,
                _ => return None,
            };
            total_secs = total_secs.checked_add(n.checked_mul(unit)?)?;
            found_unit = true;
        }
    }

    if !num_buf.is_empty() {
        if found_unit {
            // "30m15" is ambiguous.
            return None;
        }
        total_secs = num_buf.parse().ok()?;
    }

    Some(Duration::from_secs(total_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_5_field() {
        assert_eq!(normalize_cron("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_cron("  0 9 * * 1-5  "), "0 0 9 * * 1-5");
    }

    #[test]
    fn normalize_6_field_passthrough() {
        assert_eq!(normalize_cron("30 */5 * * * *"), "30 */5 * * * *");
    }

    #[test]
    fn parse_duration_components() {
        assert_eq!(parse_duration("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("2h30m"), Some(Duration::from_secs(9_000)));
        assert_eq!(parse_duration("1d"), Some(Duration::from_secs(86_400)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("5x"), None);
        assert_eq!(parse_duration("30m15"), None);
    }

    #[test]
    fn grammar() {
        assert!(matches!("once".parse::<RecurrenceRule>().unwrap().kind, RuleKind::Once));
        assert!(matches!(
            "every 3 frames".parse::<RecurrenceRule>().unwrap().kind,
            RuleKind::FrameInterval(3)
        ));
        let every: RecurrenceRule = "every 1m30s".parse().unwrap();
        assert!(matches!(every.kind, RuleKind::Interval(d) if d == Duration::from_secs(90)));
        assert!(matches!(
            "0 0 * * *".parse::<RecurrenceRule>().unwrap().kind,
            RuleKind::Cron(_)
        ));
    }

    #[test]
    fn zero_intervals_are_invalid() {
        assert!(matches!(
            RecurrenceRule::interval(Duration::ZERO),
            Err(SchedulerError::InvalidRule(_))
        ));
        assert!(matches!(
            RecurrenceRule::every_frames(0),
            Err(SchedulerError::InvalidRule(_))
        ));
        assert!("every 0s".parse::<RecurrenceRule>().is_err());
        assert!("not a cron".parse::<RecurrenceRule>().is_err());
    }

    #[test]
    fn frame_interval_skips_missed_points() {
        let rule = RecurrenceRule::every_frames(3).unwrap();
        let now = Utc::now();
        assert_eq!(rule.next_due(Due::Frame(3), 3, now), Some(Due::Frame(6)));
        assert_eq!(rule.next_due(Due::Frame(3), 10, now), Some(Due::Frame(12)));
    }

    #[test]
    fn interval_is_grid_aligned() {
        let rule = RecurrenceRule::interval(Duration::from_secs(10)).unwrap();
        let last = Utc::now();
        let now = last + chrono::Duration::seconds(35);
        assert_eq!(
            rule.next_due(Due::At(last), 0, now),
            Some(Due::At(last + chrono::Duration::seconds(40)))
        );
    }

    #[test]
    fn once_has_no_next() {
        let rule = RecurrenceRule::once();
        assert_eq!(rule.next_due(Due::Frame(0), 0, Utc::now()), None);
        assert_eq!(rule.remaining(), Some(1));
    }
}
