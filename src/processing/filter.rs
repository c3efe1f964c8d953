//! Butterworth bandpass built from cascaded biquad sections
//!
//! A `corners`-pole bandpass is the product of a `corners`-pole high-pass at
//! `freqmin` and a `corners`-pole low-pass at `freqmax`. Each is realized as
//! `corners / 2` second-order sections whose Q values place the poles on the
//! Butterworth circle.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};

use super::ProcessingStep;

pub const DEFAULT_CORNERS: usize = 4;

/// Corner frequencies of a bandpass, in Hz
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bandpass {
    pub freqmin: f64,
    pub freqmax: f64,
    pub corners: usize,
}

impl Bandpass {
    pub fn new(freqmin: f64, freqmax: f64) -> Self {
        Self {
            freqmin,
            freqmax,
            corners: DEFAULT_CORNERS,
        }
    }
}

/// Q of each second-order section of an `order`-pole Butterworth filter
fn butterworth_q(order: usize) -> Vec<f64> {
    let order = order.max(2) & !1;
    (0..order / 2)
        .map(|k| {
            let theta = (2 * k + 1) as f64 * std::f64::consts::PI / (2 * order) as f64;
            1.0 / (2.0 * theta.cos())
        })
        .collect()
}

fn cascade(data: &mut [f64], highpass: bool, fs: f64, f0: f64, corners: usize) -> Result<(), String> {
    for q in butterworth_q(corners) {
        let kind = if highpass { Type::HighPass } else { Type::LowPass };
        let coeffs = Coefficients::<f64>::from_params(kind, fs.hz(), f0.hz(), q)
            .map_err(|e| format!("cannot design section at {} Hz: {:?}", f0, e))?;
        let mut section = DirectForm2Transposed::<f64>::new(coeffs);
        for x in data.iter_mut() {
            *x = section.run(*x);
        }
    }
    Ok(())
}

/// Filter `data` in place
///
/// When `freqmax` is at or above Nyquist only the high-pass half is applied
/// and the returned step says so.
pub fn bandpass(data: &mut [f64], sample_rate: f64, band: &Bandpass) -> Result<ProcessingStep, String> {
    if sample_rate <= 0.0 {
        return Err(format!("invalid sample rate {}", sample_rate));
    }
    if band.freqmin <= 0.0 || band.freqmax <= band.freqmin {
        return Err(format!(
            "invalid corner frequencies {} - {} Hz",
            band.freqmin, band.freqmax
        ));
    }

    let nyquist = sample_rate / 2.0;
    if band.freqmin >= nyquist {
        return Err(format!(
            "freqmin {} Hz is above the Nyquist frequency {} Hz",
            band.freqmin, nyquist
        ));
    }

    cascade(data, true, sample_rate, band.freqmin, band.corners)?;

    if band.freqmax >= nyquist {
        tracing::warn!(
            "freqmax {} Hz is at or above the Nyquist frequency {} Hz, applying a highpass instead",
            band.freqmax,
            nyquist
        );
        return Ok(ProcessingStep::Highpass {
            freq: band.freqmin,
            corners: band.corners,
        });
    }

    cascade(data, false, sample_rate, band.freqmax, band.corners)?;

    Ok(ProcessingStep::Bandpass {
        freqmin: band.freqmin,
        freqmax: band.freqmax,
        corners: band.corners,
    })
}
