use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How far into the future a sliding-window subscription stays open, in days.
pub const STREAM_HORIZON_DAYS: i64 = 365;

/// Longest accepted `recent` window: one hundred years.
pub const MAX_RECENT_SECONDS: f64 = 100.0 * 365.25 * 86_400.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("invalid time specification: {0}")]
    InvalidTimeSpec(String),
}

/// Declarative description of which slice of the log to show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTimeSpec", into = "RawTimeSpec")]
pub enum TimeSpec {
    /// Fixed bounds. Nothing ever expires.
    Range {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// The most recent `seconds`, sliding with the wall clock.
    Recent { seconds: f64 },
}

/// Wire shape of a [`TimeSpec`]: exactly one of `range` or `recent`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTimeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Vec<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent: Option<f64>,
}

impl TryFrom<RawTimeSpec> for TimeSpec {
    type Error = WindowError;

    fn try_from(raw: RawTimeSpec) -> Result<Self, Self::Error> {
        match (raw.range, raw.recent) {
            (Some(range), None) => {
                let [start, end] = <[DateTime<Utc>; 2]>::try_from(range).map_err(|r| {
                    WindowError::InvalidTimeSpec(format!(
                        "range needs exactly 2 bounds, got {}",
                        r.len()
                    ))
                })?;
                if end < start {
                    return Err(WindowError::InvalidTimeSpec(format!(
                        "range end {} is before start {}",
                        end, start
                    )));
                }
                Ok(TimeSpec::Range { start, end })
            }
            (None, Some(seconds)) => {
                if !seconds.is_finite() || seconds < 0.0 {
                    return Err(WindowError::InvalidTimeSpec(format!(
                        "recent must be a non-negative number of seconds, got {}",
                        seconds
                    )));
                }
                if seconds > MAX_RECENT_SECONDS {
                    return Err(WindowError::InvalidTimeSpec(format!(
                        "recent may span at most {} seconds, got {}",
                        MAX_RECENT_SECONDS, seconds
                    )));
                }
                Ok(TimeSpec::Recent { seconds })
            }
            (Some(_), Some(_)) => Err(WindowError::InvalidTimeSpec(
                "both range and recent specified".to_string(),
            )),
            (None, None) => Err(WindowError::InvalidTimeSpec(
                "expected either range or recent".to_string(),
            )),
        }
    }
}

impl From<TimeSpec> for RawTimeSpec {
    fn from(spec: TimeSpec) -> Self {
        match spec {
            TimeSpec::Range { start, end } => RawTimeSpec {
                range: Some(vec![start, end]),
                recent: None,
            },
            TimeSpec::Recent { seconds } => RawTimeSpec {
                range: None,
                recent: Some(seconds),
            },
        }
    }
}

impl TimeSpec {
    /// Parse a time specification from an arbitrary JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, WindowError> {
        let raw: RawTimeSpec = serde_json::from_value(value)
            .map_err(|e| WindowError::InvalidTimeSpec(e.to_string()))?;
        TimeSpec::try_from(raw)
    }

    /// Resolve against the given wall-clock instant.
    pub fn window(&self, now: DateTime<Utc>) -> TimeWindow {
        match self {
            TimeSpec::Range { start, end } => TimeWindow {
                now,
                start_time: *start,
                end_time: *end,
                purge_boundary: None,
            },
            TimeSpec::Recent { seconds } => {
                let start_time = recent_start(now, *seconds);
                TimeWindow {
                    now,
                    start_time,
                    end_time: now
                        .checked_add_signed(Duration::days(STREAM_HORIZON_DAYS))
                        .unwrap_or(DateTime::<Utc>::MAX_UTC),
                    purge_boundary: Some(to_epoch_seconds(start_time)),
                }
            }
        }
    }

    /// Entries with `when` at or before this value are expired.
    ///
    /// Only sliding windows have a boundary. It moves with `now`, so callers
    /// evaluate it once per operation and never keep it around.
    pub fn purge_boundary(&self, now: DateTime<Utc>) -> Option<f64> {
        match self {
            TimeSpec::Range { .. } => None,
            TimeSpec::Recent { seconds } => Some(to_epoch_seconds(recent_start(now, *seconds))),
        }
    }

    pub fn is_sliding(&self) -> bool {
        matches!(self, TimeSpec::Recent { .. })
    }
}

/// `now - seconds`, saturating at the earliest representable instant.
fn recent_start(now: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
    // Float to int casts saturate, so huge values land on i64::MAX.
    Duration::try_milliseconds((seconds * 1000.0).round() as i64)
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Concrete bounds derived from a [`TimeSpec`] at a given instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub now: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub purge_boundary: Option<f64>,
}

impl TimeWindow {
    /// The window starts after `now`; nothing can match yet.
    pub fn starts_in_future(&self) -> bool {
        self.start_time > self.now
    }

    /// Split at `now` into the historical part `[start, now)` answered by the
    /// backfill and the live part `[now, end)`.
    ///
    /// The two halves never overlap. Transports use the split to decide which
    /// of the entries they already hold belong to the backfill.
    pub fn split_at_now(&self) -> (TimeWindow, TimeWindow) {
        let history = TimeWindow {
            end_time: self.end_time.min(self.now),
            ..*self
        };
        let live = TimeWindow {
            start_time: self.start_time.max(self.now),
            ..*self
        };
        (history, live)
    }

    /// Half-open membership test in epoch seconds.
    pub fn contains(&self, when: f64) -> bool {
        when >= to_epoch_seconds(self.start_time) && when < to_epoch_seconds(self.end_time)
    }
}

/// Seconds since the epoch with millisecond precision, the unit of `LogEntry::when`.
pub fn to_epoch_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 1000.0
}
