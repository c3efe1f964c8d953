//! Core waveform types
//!
//! - `SeedId`: network.station.location.channel code
//! - `Trace`: one contiguous run of samples from one channel
//! - `Stream`: an ordered collection of traces, as returned by a data source

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::processing::ProcessingStep;
use crate::window::{format_timestamp, TimeWindow};

/// SEED station identifier: `NET.STA.LOC.CHAN`
///
/// Location and channel may be empty; `*` and `?` are allowed as wildcards
/// for wave server requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeedId {
    network: String,
    station: String,
    location: String,
    channel: String,
}

impl SeedId {
    pub fn new(
        network: impl Into<String>,
        station: impl Into<String>,
        location: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            network: network.into(),
            station: station.into(),
            location: location.into(),
            channel: channel.into(),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn station(&self) -> &str {
        &self.station
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Whether any code contains `*` or `?`
    pub fn has_wildcards(&self) -> bool {
        [&self.network, &self.station, &self.location, &self.channel]
            .iter()
            .any(|code| code.contains(['*', '?']))
    }

    /// Glob-match a concrete id against this (possibly wildcarded) pattern
    pub fn matches(&self, other: &SeedId) -> bool {
        glob_match(&self.network, &other.network)
            && glob_match(&self.station, &other.station)
            && glob_match(&self.location, &other.location)
            && glob_match(&self.channel, &other.channel)
    }
}

impl FromStr for SeedId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        match parts.as_slice() {
            [net, sta, loc, cha] if !net.is_empty() && !sta.is_empty() => {
                Ok(SeedId::new(*net, *sta, *loc, *cha))
            }
            _ => Err(Error::InvalidSeedId(s.to_string())),
        }
    }
}

impl fmt::Display for SeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }
}

fn glob_match(pattern: &str, value: &str) -> bool {
    if !pattern.contains(['*', '?']) {
        return pattern == value;
    }
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map(|r| r.is_match(value)).unwrap_or(false)
}

/// Read a station file: one SEED id per line, blank lines skipped
pub fn read_station_file(path: &Path) -> Result<Vec<SeedId>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(SeedId::from_str)
        .collect()
}

/// How the samples of a trace were originally encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    Int16,
    Int32,
    Float32,
    Float64,
}

impl SampleEncoding {
    pub fn is_integer(&self) -> bool {
        matches!(self, SampleEncoding::Int16 | SampleEncoding::Int32)
    }
}

/// Convert a (possibly fractional) number of seconds to a duration
pub fn secs_to_duration(secs: f64) -> Duration {
    Duration::microseconds((secs * 1_000_000.0).round() as i64)
}

/// Seconds from `a` to `b`
pub fn secs_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    let d = b - a;
    d.num_microseconds()
        .map(|us| us as f64 / 1_000_000.0)
        .unwrap_or_else(|| d.num_seconds() as f64)
}

/// One contiguous, evenly sampled run of data from one channel
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub id: SeedId,
    /// Time of the first sample
    pub start: DateTime<Utc>,
    /// Samples per second
    pub sample_rate: f64,
    pub data: Vec<f64>,
    pub encoding: SampleEncoding,
    /// Steps applied by the processing pipeline, in order
    pub processing: Vec<ProcessingStep>,
}

impl Trace {
    pub fn new(id: SeedId, start: DateTime<Utc>, sample_rate: f64, data: Vec<f64>) -> Self {
        Self {
            id,
            start,
            sample_rate,
            data,
            encoding: SampleEncoding::Float64,
            processing: Vec::new(),
        }
    }

    /// Builder: set the original sample encoding
    pub fn with_encoding(mut self, encoding: SampleEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sample interval in seconds
    pub fn delta(&self) -> f64 {
        if self.sample_rate > 0.0 {
            1.0 / self.sample_rate
        } else {
            0.0
        }
    }

    /// Time of sample `index`
    pub fn time_of(&self, index: usize) -> DateTime<Utc> {
        self.start + secs_to_duration(index as f64 * self.delta())
    }

    /// Time of the last sample
    pub fn end(&self) -> DateTime<Utc> {
        self.time_of(self.data.len().saturating_sub(1))
    }

    /// Cut the trace down to the samples inside `[start, end]`
    ///
    /// Returns false when no sample is left.
    pub fn trim(&mut self, window: &TimeWindow) -> bool {
        if self.data.is_empty() || self.sample_rate <= 0.0 {
            return false;
        }
        let eps = 1e-6;
        let first = (secs_between(self.start, window.start()) * self.sample_rate - eps).ceil();
        let last = (secs_between(self.start, window.end()) * self.sample_rate + eps).floor();

        let first = first.max(0.0) as usize;
        let last = last.min(self.data.len() as f64 - 1.0);
        if last < 0.0 || first as f64 > last {
            self.data.clear();
            return false;
        }
        let last = last as usize;

        self.start = self.time_of(first);
        self.data.truncate(last + 1);
        self.data.drain(..first);
        true
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} - {} | {} Hz, {} samples",
            self.id,
            format_timestamp(&self.start),
            format_timestamp(&self.end()),
            self.sample_rate,
            self.data.len()
        )
    }
}

/// Ordered collection of traces
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stream {
    traces: Vec<Trace>,
}

impl Stream {
    pub fn new(traces: Vec<Trace>) -> Self {
        Self { traces }
    }

    pub fn push(&mut self, trace: Trace) {
        self.traces.push(trace);
    }

    pub fn extend(&mut self, other: Stream) {
        self.traces.extend(other.traces);
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    pub fn traces(&self) -> &[Trace] {
        &self.traces
    }

    pub fn traces_mut(&mut self) -> &mut [Trace] {
        &mut self.traces
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Trace> {
        self.traces.iter()
    }

    /// Distinct channel ids, in order of first appearance
    pub fn channel_ids(&self) -> Vec<SeedId> {
        let mut ids: Vec<SeedId> = Vec::new();
        for trace in &self.traces {
            if !ids.contains(&trace.id) {
                ids.push(trace.id.clone());
            }
        }
        ids
    }

    /// Sort by id, then start time
    pub fn sort(&mut self) {
        self.traces
            .sort_by(|a, b| a.id.cmp(&b.id).then(a.start.cmp(&b.start)));
    }

    /// Earliest first-sample time and latest last-sample time
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.traces.iter().map(|t| t.start).min()?;
        let end = self.traces.iter().map(|t| t.end()).max()?;
        Some((start, end))
    }

    /// Join traces of the same channel whose samples abut or overlap
    ///
    /// Overlapping samples are taken from the earlier trace. Traces separated
    /// by a gap of half a sample or more stay separate.
    pub fn merge_contiguous(&mut self) {
        self.sort();
        let mut merged: Vec<Trace> = Vec::with_capacity(self.traces.len());

        for trace in std::mem::take(&mut self.traces) {
            if trace.is_empty() {
                continue;
            }
            if let Some(prev) = merged.last_mut() {
                if prev.id == trace.id && same_rate(prev.sample_rate, trace.sample_rate) {
                    let expected = prev.time_of(prev.data.len());
                    let gap = secs_between(expected, trace.start) * prev.sample_rate;

                    if gap.abs() < 0.5 {
                        append(prev, trace.data, trace.encoding);
                        continue;
                    }
                    if gap < 0.0 && trace.start >= prev.start {
                        let skip = (-gap).round() as usize;
                        if skip < trace.data.len() {
                            append(prev, trace.data[skip..].to_vec(), trace.encoding);
                        }
                        continue;
                    }
                }
            }
            merged.push(trace);
        }

        self.traces = merged;
    }

    /// Trim every trace to `window`, dropping traces left empty
    pub fn trim(&mut self, window: &TimeWindow) {
        self.traces.retain_mut(|t| t.trim(window));
    }
}

impl IntoIterator for Stream {
    type Item = Trace;
    type IntoIter = std::vec::IntoIter<Trace>;

    fn into_iter(self) -> Self::IntoIter {
        self.traces.into_iter()
    }
}

impl<'a> IntoIterator for &'a Stream {
    type Item = &'a Trace;
    type IntoIter = std::slice::Iter<'a, Trace>;

    fn into_iter(self) -> Self::IntoIter {
        self.traces.iter()
    }
}

fn same_rate(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 * a.abs().max(b.abs())
}

fn append(prev: &mut Trace, data: Vec<f64>, encoding: SampleEncoding) {
    if prev.encoding != encoding {
        prev.encoding = SampleEncoding::Float64;
    }
    prev.data.extend(data);
}
