//! Waveform files on disk
//!
//! One file per channel, named `NET.STA.LOC.CHAN.FORMAT`:
//! - `MSEED`: miniSEED records
//! - `SLIST`: ASCII header line, then six samples per line
//! - `TSPAIR`: ASCII header line, then one `time value` pair per line

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::mseed::encode_traces;
use crate::processing::ProcessingStep;
use crate::waveform::{SeedId, Stream, Trace};

const ASCII_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
const SLIST_COLUMNS: usize = 6;

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Mseed,
    Slist,
    Tspair,
}

impl OutputFormat {
    /// File extension, upper-cased
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mseed => "MSEED",
            OutputFormat::Slist => "SLIST",
            OutputFormat::Tspair => "TSPAIR",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "MSEED" | "MINISEED" => Ok(OutputFormat::Mseed),
            "SLIST" => Ok(OutputFormat::Slist),
            "TSPAIR" => Ok(OutputFormat::Tspair),
            _ => Err(Error::UnsupportedFormat(format!(
                "{} (use MSEED, SLIST or TSPAIR)",
                s
            ))),
        }
    }
}

/// Whether samples can be written as integers
fn is_integer_trace(trace: &Trace) -> bool {
    trace.encoding.is_integer() && trace.data.iter().all(|x| x.fract() == 0.0)
}

/// Physical units after response removal, `Counts` otherwise
fn units(trace: &Trace) -> &str {
    trace
        .processing
        .iter()
        .rev()
        .find_map(|step| match step {
            ProcessingStep::RemoveResponse { units } => Some(units.as_str()),
            _ => None,
        })
        .unwrap_or("Counts")
}

fn format_value(value: f64, integer: bool) -> String {
    if integer {
        format!("{}", value as i64)
    } else {
        format!("{:+.10e}", value)
    }
}

fn ascii_block(trace: &Trace, format: OutputFormat) -> String {
    let integer = is_integer_trace(trace);
    let mut out = format!(
        "TIMESERIES {}_{}_{}_{}_D, {} samples, {} sps, {}, {}, {}, {}\n",
        trace.id.network(),
        trace.id.station(),
        trace.id.location(),
        trace.id.channel(),
        trace.len(),
        trace.sample_rate,
        trace.start.format(ASCII_TIME_FORMAT),
        format.extension(),
        if integer { "INTEGER" } else { "FLOAT" },
        units(trace)
    );

    match format {
        OutputFormat::Tspair => {
            for (i, value) in trace.data.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "{}  {}",
                    trace.time_of(i).format(ASCII_TIME_FORMAT),
                    format_value(*value, integer)
                );
            }
        }
        _ => {
            for row in trace.data.chunks(SLIST_COLUMNS) {
                let line: Vec<String> = row.iter().map(|v| format_value(*v, integer)).collect();
                let _ = writeln!(out, "{}", line.join("\t"));
            }
        }
    }
    out
}

fn encode_channel(traces: &[&Trace], format: OutputFormat) -> Result<Vec<u8>> {
    match format {
        OutputFormat::Mseed => Ok(encode_traces(traces.iter().copied())?),
        OutputFormat::Slist | OutputFormat::Tspair => Ok(traces
            .iter()
            .map(|t| ascii_block(t, format))
            .collect::<String>()
            .into_bytes()),
    }
}

/// Write every channel of `stream` into `dir`
///
/// All files are encoded before the first one is written. Returns the
/// written paths in channel order.
pub fn write_stream(stream: &Stream, format: OutputFormat, dir: &Path) -> Result<Vec<PathBuf>> {
    let mut encoded: Vec<(PathBuf, Vec<u8>)> = Vec::new();
    for id in stream.channel_ids() {
        let mut traces: Vec<&Trace> = stream.iter().filter(|t| t.id == id).collect();
        traces.sort_by_key(|t| t.start);
        encoded.push((file_path(dir, &id, format), encode_channel(&traces, format)?));
    }

    std::fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(encoded.len());
    for (path, bytes) in encoded {
        std::fs::write(&path, bytes)?;
        tracing::info!("Wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}

fn file_path(dir: &Path, id: &SeedId, format: OutputFormat) -> PathBuf {
    dir.join(format!("{}.{}", id, format.extension()))
}
