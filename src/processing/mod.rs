//! Waveform processing pipeline
//!
//! Applies the optional steps of a `ProcessingSpec` to every trace of a
//! stream, in a fixed order:
//!
//! ```text
//!   demean → detrend (linear) → bandpass → response removal
//! ```
//!
//! Each applied step is appended to the trace's processing log. Processing
//! is destructive: on success the original samples are replaced. All traces
//! are processed on staged copies first, so a failure on any channel leaves
//! the whole stream untouched.

pub mod detrend;
pub mod filter;
pub mod response;

use std::fmt;

use crate::error::{Error, Result};
use crate::waveform::{SampleEncoding, Stream, Trace};

pub use filter::Bandpass;
pub use response::{ChannelResponse, Inventory};

/// One entry of a trace's processing log
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingStep {
    Demean,
    DetrendLinear,
    Bandpass {
        freqmin: f64,
        freqmax: f64,
        corners: usize,
    },
    /// Bandpass whose upper corner was at or above Nyquist
    Highpass { freq: f64, corners: usize },
    RemoveResponse { units: String },
}

impl ProcessingStep {
    /// Short name used in error messages
    pub fn name(&self) -> &'static str {
        match self {
            ProcessingStep::Demean => "demean",
            ProcessingStep::DetrendLinear => "detrend",
            ProcessingStep::Bandpass { .. } | ProcessingStep::Highpass { .. } => "bandpass",
            ProcessingStep::RemoveResponse { .. } => "remove_response",
        }
    }
}

impl fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingStep::Demean => write!(f, "detrend(type='demean')"),
            ProcessingStep::DetrendLinear => write!(f, "detrend(type='linear')"),
            ProcessingStep::Bandpass {
                freqmin,
                freqmax,
                corners,
            } => write!(
                f,
                "filter(type='bandpass', freqmin={}, freqmax={}, corners={})",
                freqmin, freqmax, corners
            ),
            ProcessingStep::Highpass { freq, corners } => write!(
                f,
                "filter(type='highpass', freq={}, corners={})",
                freq, corners
            ),
            ProcessingStep::RemoveResponse { units } => {
                write!(f, "remove_response(output='{}')", units)
            }
        }
    }
}

/// Which optional steps to run
#[derive(Debug, Clone, Default)]
pub struct ProcessingSpec {
    pub remove_mean: bool,
    pub remove_trend: bool,
    pub bandpass: Option<Bandpass>,
    /// Station metadata to deconvolve with; `None` skips response removal
    pub remove_response: Option<Inventory>,
}

impl ProcessingSpec {
    /// Whether no step is requested
    pub fn is_empty(&self) -> bool {
        !self.remove_mean
            && !self.remove_trend
            && self.bandpass.is_none()
            && self.remove_response.is_none()
    }
}

/// Run the pipeline over every trace of `stream`, in place
pub fn apply(stream: &mut Stream, spec: &ProcessingSpec) -> Result<()> {
    if spec.is_empty() {
        return Ok(());
    }

    let mut staged = Vec::with_capacity(stream.len());
    for trace in stream.iter() {
        staged.push(process_trace(trace, spec)?);
    }

    for (trace, (data, steps)) in stream.traces_mut().iter_mut().zip(staged) {
        tracing::debug!(
            "{}: applied {}",
            trace.id,
            steps
                .iter()
                .map(ProcessingStep::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        trace.data = data;
        trace.encoding = SampleEncoding::Float64;
        trace.processing.extend(steps);
    }

    Ok(())
}

fn process_trace(trace: &Trace, spec: &ProcessingSpec) -> Result<(Vec<f64>, Vec<ProcessingStep>)> {
    let channel = trace.id.to_string();
    let mut data = trace.data.clone();
    let mut steps = Vec::new();

    if spec.remove_mean {
        detrend::demean(&mut data);
        steps.push(ProcessingStep::Demean);
    }

    if spec.remove_trend {
        detrend::linear(&mut data);
        steps.push(ProcessingStep::DetrendLinear);
    }

    if let Some(band) = &spec.bandpass {
        let step = filter::bandpass(&mut data, trace.sample_rate, band)
            .map_err(|reason| Error::processing(&channel, "bandpass", reason))?;
        steps.push(step);
    }

    if let Some(inventory) = &spec.remove_response {
        let response = inventory.response_for(&trace.id, trace.start).ok_or_else(|| {
            Error::processing(
                &channel,
                "remove_response",
                "no matching channel epoch in the inventory",
            )
        })?;
        let units = response::remove_response(&mut data, trace.sample_rate, response)
            .map_err(|reason| Error::processing(&channel, "remove_response", reason))?;
        steps.push(ProcessingStep::RemoveResponse { units });
    }

    Ok((data, steps))
}
