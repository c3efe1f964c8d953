//! Time window resolution
//!
//! Turns the start/end/duration/last-day combination given on the command
//! line into a concrete half-open interval `[start, end)`.

use chrono::{DateTime, Duration, DurationRound, NaiveDate, NaiveDateTime, Utc};
use std::fmt;

use crate::error::{Error, Result};

/// Length of the implied window when only one bound is given
pub const DEFAULT_SPAN_SECS: i64 = 86_400;

/// Accepted timestamp layouts, tried in order
const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Time window for a data request (half-open interval: [start, end))
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a window, failing when `end <= start`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start {
            return Err(Error::InvalidWindow(format!(
                "end ({}) must be after start ({})",
                format_timestamp(&end),
                format_timestamp(&start)
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            format_timestamp(&self.start),
            format_timestamp(&self.end)
        )
    }
}

/// The raw window arguments of one command
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowRequest {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Window length in seconds
    pub duration: Option<f64>,
    pub last_day: bool,
}

impl WindowRequest {
    /// Resolve against the wall clock
    pub fn resolve(&self) -> Result<TimeWindow> {
        self.resolve_at(Utc::now())
    }

    /// Resolve with an explicit "now", used by `last_day`
    ///
    /// Precedence: last day, explicit start/end, start + duration,
    /// start + 24h, end - 24h.
    pub fn resolve_at(&self, now: DateTime<Utc>) -> Result<TimeWindow> {
        let day = Duration::seconds(DEFAULT_SPAN_SECS);

        if self.last_day {
            let end = now
                .duration_trunc(Duration::hours(1))
                .map_err(|e| Error::InvalidWindow(e.to_string()))?;
            return TimeWindow::new(end - day, end);
        }

        match (self.start, self.end, self.duration) {
            (Some(start), Some(end), _) => TimeWindow::new(start, end),
            (Some(start), None, Some(secs)) => TimeWindow::new(start, start + seconds(secs)?),
            (Some(start), None, None) => TimeWindow::new(start, start + day),
            (None, Some(end), _) => TimeWindow::new(end - day, end),
            (None, None, _) => Err(Error::InvalidWindow(
                "you must provide a start and/or end time, or --last-day".to_string(),
            )),
        }
    }
}

fn seconds(secs: f64) -> Result<Duration> {
    if !secs.is_finite() {
        return Err(Error::InvalidWindow(format!("duration {} is not finite", secs)));
    }
    let micros = (secs * 1_000_000.0).round();
    if micros.abs() > i64::MAX as f64 {
        return Err(Error::InvalidWindow(format!("duration {} is out of range", secs)));
    }
    Ok(Duration::microseconds(micros as i64))
}

/// Parse a command-line timestamp (UTC)
///
/// Accepts `YYYY-MM-DDTHH:MM:SS` with optional fractional seconds and `Z`,
/// a space separator, RFC 3339 offsets, or a bare date (midnight).
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();

    for fmt in TIMESTAMP_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.and_utc());
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc());
        }
    }

    Err(Error::InvalidTimestamp(s.to_string()))
}

/// Format a timestamp the way the CLI accepts it
pub fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Convert epoch seconds (as used on the wire) to a UTC timestamp
pub fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    let micros = (secs * 1_000_000.0).round();
    if !micros.is_finite() || micros.abs() > i64::MAX as f64 {
        return None;
    }
    let micros = micros as i64;
    DateTime::from_timestamp(
        micros.div_euclid(1_000_000),
        (micros.rem_euclid(1_000_000) * 1_000) as u32,
    )
}

/// Epoch seconds with microsecond resolution
pub fn to_epoch_seconds(t: &DateTime<Utc>) -> f64 {
    t.timestamp_micros() as f64 / 1_000_000.0
}
