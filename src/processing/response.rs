//! Instrument response: StationXML parsing and deconvolution
//!
//! Only what response removal needs is read from StationXML: the channel
//! epochs, the overall `InstrumentSensitivity` and the first analog
//! `PolesZeros` stage. Everything else in the document is ignored.

use chrono::{DateTime, Utc};
use num_complex::Complex64;
use rustfft::FftPlanner;
use serde::Deserialize;
use std::f64::consts::PI;
use std::path::Path;

use super::detrend::cosine_taper;
use crate::error::{Error, Result};
use crate::waveform::SeedId;
use crate::window::parse_timestamp;

/// Fraction of the trace tapered before the FFT, split over both ends
const TAPER_FRACTION: f64 = 0.05;

/// Water level in dB below the peak of |H(f)|
const WATER_LEVEL_DB: f64 = 60.0;

// StationXML document model

#[derive(Debug, Deserialize)]
struct StationXml {
    #[serde(rename = "Network", default)]
    networks: Vec<NetworkXml>,
}

#[derive(Debug, Deserialize)]
struct NetworkXml {
    #[serde(rename = "@code")]
    code: String,
    #[serde(rename = "Station", default)]
    stations: Vec<StationElement>,
}

#[derive(Debug, Deserialize)]
struct StationElement {
    #[serde(rename = "@code")]
    code: String,
    #[serde(rename = "Channel", default)]
    channels: Vec<ChannelXml>,
}

#[derive(Debug, Deserialize)]
struct ChannelXml {
    #[serde(rename = "@code")]
    code: String,
    #[serde(rename = "@locationCode", default)]
    location: String,
    #[serde(rename = "@startDate")]
    start_date: Option<String>,
    #[serde(rename = "@endDate")]
    end_date: Option<String>,
    #[serde(rename = "Response")]
    response: Option<ResponseXml>,
}

#[derive(Debug, Deserialize)]
struct ResponseXml {
    #[serde(rename = "InstrumentSensitivity")]
    sensitivity: Option<SensitivityXml>,
    #[serde(rename = "Stage", default)]
    stages: Vec<StageXml>,
}

#[derive(Debug, Deserialize)]
struct SensitivityXml {
    #[serde(rename = "Value")]
    value: FloatValue,
    #[serde(rename = "Frequency")]
    frequency: FloatValue,
    #[serde(rename = "InputUnits")]
    input_units: UnitsXml,
}

#[derive(Debug, Deserialize)]
struct UnitsXml {
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct StageXml {
    #[serde(rename = "PolesZeros")]
    poles_zeros: Option<PolesZerosXml>,
}

#[derive(Debug, Deserialize)]
struct PolesZerosXml {
    #[serde(rename = "PzTransferFunctionType")]
    transfer_function: String,
    #[serde(rename = "Zero", default)]
    zeros: Vec<ComplexXml>,
    #[serde(rename = "Pole", default)]
    poles: Vec<ComplexXml>,
}

#[derive(Debug, Deserialize)]
struct ComplexXml {
    #[serde(rename = "Real")]
    real: FloatValue,
    #[serde(rename = "Imaginary")]
    imaginary: FloatValue,
}

/// Numeric element that may carry error attributes
#[derive(Debug, Deserialize)]
struct FloatValue {
    #[serde(rename = "$text")]
    value: f64,
}

impl ComplexXml {
    fn to_complex(&self) -> Complex64 {
        Complex64::new(self.real.value, self.imaginary.value)
    }
}

/// Poles and zeros units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFunction {
    /// `LAPLACE (RADIANS)`: rad/s
    Radians,
    /// `LAPLACE (HERTZ)`: Hz
    Hertz,
}

impl TransferFunction {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LAPLACE (RADIANS)" => Some(TransferFunction::Radians),
            "LAPLACE (HERTZ)" => Some(TransferFunction::Hertz),
            _ => None,
        }
    }
}

/// Response of one channel epoch
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelResponse {
    /// Overall gain, counts per input unit
    pub sensitivity: f64,
    /// Frequency at which `sensitivity` holds, Hz
    pub sensitivity_frequency: f64,
    /// Physical input units, e.g. `M/S`
    pub input_units: String,
    /// Zeros in rad/s
    pub zeros: Vec<Complex64>,
    /// Poles in rad/s
    pub poles: Vec<Complex64>,
}

impl ChannelResponse {
    /// Build a response, converting Hertz poles and zeros to rad/s
    pub fn new(
        sensitivity: f64,
        sensitivity_frequency: f64,
        input_units: impl Into<String>,
        transfer: TransferFunction,
        zeros: Vec<Complex64>,
        poles: Vec<Complex64>,
    ) -> Self {
        let factor = match transfer {
            TransferFunction::Radians => 1.0,
            TransferFunction::Hertz => 2.0 * PI,
        };
        Self {
            sensitivity,
            sensitivity_frequency,
            input_units: input_units.into(),
            zeros: zeros.into_iter().map(|z| z * factor).collect(),
            poles: poles.into_iter().map(|p| p * factor).collect(),
        }
    }

    /// Poles-and-zeros ratio `prod(s - z) / prod(s - p)` at `freq` Hz
    fn pz_ratio(&self, freq: f64) -> Complex64 {
        let s = Complex64::new(0.0, 2.0 * PI * freq);
        let num: Complex64 = self.zeros.iter().map(|z| s - z).product();
        let den: Complex64 = self.poles.iter().map(|p| s - p).product();
        num / den
    }

    /// Normalization making `|H(sensitivity_frequency)| == sensitivity`
    fn normalization(&self) -> std::result::Result<f64, String> {
        let at_ref = self.pz_ratio(self.sensitivity_frequency).norm();
        if !at_ref.is_finite() || at_ref == 0.0 {
            return Err(format!(
                "response vanishes at the sensitivity frequency {} Hz",
                self.sensitivity_frequency
            ));
        }
        Ok(self.sensitivity / at_ref)
    }

    /// Complex response H(f), counts per input unit
    pub fn evaluate(&self, freq: f64) -> std::result::Result<Complex64, String> {
        Ok(self.pz_ratio(freq) * self.normalization()?)
    }

    /// Output quantity name for the input units
    pub fn output_units(&self) -> String {
        match self.input_units.trim().to_ascii_uppercase().as_str() {
            "M" | "NM" => "DISP".to_string(),
            "M/S" | "NM/S" => "VEL".to_string(),
            "M/S**2" | "M/S/S" | "M/S2" | "NM/S**2" => "ACC".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ChannelEpoch {
    id: SeedId,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    response: ChannelResponse,
}

impl ChannelEpoch {
    fn covers(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| at >= s) && self.end.map_or(true, |e| at < e)
    }
}

/// Channel responses parsed from one or more StationXML documents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    epochs: Vec<ChannelEpoch>,
}

impl Inventory {
    /// Parse a StationXML document
    pub fn from_station_xml(xml: &str) -> Result<Self> {
        let doc: StationXml = quick_xml::de::from_str(xml)
            .map_err(|e| Error::Inventory(format!("invalid StationXML: {}", e)))?;

        let mut epochs = Vec::new();
        for network in &doc.networks {
            for station in &network.stations {
                for channel in &station.channels {
                    let id = SeedId::new(
                        network.code.as_str(),
                        station.code.as_str(),
                        channel.location.as_str(),
                        channel.code.as_str(),
                    );
                    match channel_response(channel)? {
                        Some(response) => epochs.push(ChannelEpoch {
                            id,
                            start: parse_date(channel.start_date.as_deref())?,
                            end: parse_date(channel.end_date.as_deref())?,
                            response,
                        }),
                        None => tracing::debug!("{}: no instrument sensitivity, skipped", id),
                    }
                }
            }
        }

        Ok(Self { epochs })
    }

    /// Read and parse a StationXML file
    pub fn read(path: &Path) -> Result<Self> {
        let xml = std::fs::read_to_string(path)
            .map_err(|e| Error::Inventory(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_station_xml(&xml)
    }

    /// Add the epochs of another inventory
    pub fn extend(&mut self, other: Inventory) {
        self.epochs.extend(other.epochs);
    }

    /// Number of channel epochs
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Response of the epoch of `id` that is active at `at`
    pub fn response_for(&self, id: &SeedId, at: DateTime<Utc>) -> Option<&ChannelResponse> {
        self.epochs
            .iter()
            .find(|epoch| &epoch.id == id && epoch.covers(at))
            .map(|epoch| &epoch.response)
    }
}

fn parse_date(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            parse_timestamp(s)
                .map_err(|_| Error::Inventory(format!("invalid channel epoch date '{}'", s)))
        })
        .transpose()
}

fn channel_response(channel: &ChannelXml) -> Result<Option<ChannelResponse>> {
    let Some(response) = &channel.response else {
        return Ok(None);
    };
    let Some(sensitivity) = &response.sensitivity else {
        return Ok(None);
    };

    let pz = response.stages.iter().find_map(|s| s.poles_zeros.as_ref());
    let (transfer, zeros, poles) = match pz {
        Some(pz) => {
            let transfer = TransferFunction::parse(&pz.transfer_function).ok_or_else(|| {
                Error::Inventory(format!(
                    "unsupported transfer function '{}'",
                    pz.transfer_function
                ))
            })?;
            (
                transfer,
                pz.zeros.iter().map(ComplexXml::to_complex).collect(),
                pz.poles.iter().map(ComplexXml::to_complex).collect(),
            )
        }
        // Sensitivity only: flat response
        None => (TransferFunction::Radians, Vec::new(), Vec::new()),
    };

    Ok(Some(ChannelResponse::new(
        sensitivity.value.value,
        sensitivity.frequency.value,
        sensitivity.input_units.name.as_str(),
        transfer,
        zeros,
        poles,
    )))
}

/// Deconvolve `response` from `data` in place
///
/// Returns the output quantity name (`DISP`, `VEL`, `ACC` or the raw unit).
pub fn remove_response(
    data: &mut [f64],
    sample_rate: f64,
    response: &ChannelResponse,
) -> std::result::Result<String, String> {
    let n = data.len();
    if n == 0 {
        return Err("trace has no samples".to_string());
    }
    if sample_rate <= 0.0 {
        return Err(format!("invalid sample rate {}", sample_rate));
    }

    cosine_taper(data, TAPER_FRACTION / 2.0);

    let nfft = (2 * n).next_power_of_two();
    let mut spectrum: Vec<Complex64> = data
        .iter()
        .map(|&x| Complex64::new(x, 0.0))
        .chain(std::iter::repeat(Complex64::new(0.0, 0.0)))
        .take(nfft)
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(nfft).process(&mut spectrum);

    // Response on the non-negative frequencies; the rest mirror as conjugates
    let half = nfft / 2;
    let mut h = Vec::with_capacity(half + 1);
    for k in 0..=half {
        h.push(response.evaluate(k as f64 * sample_rate / nfft as f64)?);
    }

    let peak = h.iter().map(|v| v.norm()).fold(0.0_f64, f64::max);
    if !peak.is_finite() || peak == 0.0 {
        return Err("response is zero or unbounded".to_string());
    }
    let level = peak * 10f64.powf(-WATER_LEVEL_DB / 20.0);
    for v in h.iter_mut() {
        let mag = v.norm();
        if mag < level {
            *v = if mag > 0.0 {
                *v * (level / mag)
            } else {
                Complex64::new(level, 0.0)
            };
        }
    }

    for (k, bin) in spectrum.iter_mut().enumerate() {
        let hk = if k <= half { h[k] } else { h[nfft - k].conj() };
        *bin /= hk;
    }
    spectrum[0] = Complex64::new(0.0, 0.0);

    planner.plan_fft_inverse(nfft).process(&mut spectrum);
    for (x, y) in data.iter_mut().zip(&spectrum) {
        *x = y.re / nfft as f64;
    }

    Ok(response.output_units())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATION_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<FDSNStationXML xmlns="http://www.fdsn.org/xml/station/1" schemaVersion="1.1">
  <Source>test</Source>
  <Network code="IU">
    <Station code="SSPA" startDate="2000-01-01T00:00:00">
      <Latitude>40.64</Latitude>
      <Channel code="BHZ" locationCode="00" startDate="2010-01-01T00:00:00" endDate="2019-01-01T00:00:00">
        <SampleRate>20</SampleRate>
        <Response>
          <InstrumentSensitivity>
            <Value>1000</Value>
            <Frequency>1.0</Frequency>
            <InputUnits><Name>M/S</Name></InputUnits>
            <OutputUnits><Name>COUNTS</Name></OutputUnits>
          </InstrumentSensitivity>
        </Response>
      </Channel>
      <Channel code="BHZ" locationCode="00" startDate="2019-01-01T00:00:00">
        <SampleRate>40</SampleRate>
        <Response>
          <InstrumentSensitivity>
            <Value>2.5E9</Value>
            <Frequency>1.0</Frequency>
            <InputUnits><Name>M/S</Name></InputUnits>
            <OutputUnits><Name>COUNTS</Name></OutputUnits>
          </InstrumentSensitivity>
          <Stage number="1">
            <PolesZeros>
              <InputUnits><Name>M/S</Name></InputUnits>
              <OutputUnits><Name>V</Name></OutputUnits>
              <PzTransferFunctionType>LAPLACE (RADIANS)</PzTransferFunctionType>
              <NormalizationFactor>1.0</NormalizationFactor>
              <NormalizationFrequency>1.0</NormalizationFrequency>
              <Zero number="0"><Real>0</Real><Imaginary>0</Imaginary></Zero>
              <Zero number="1"><Real>0</Real><Imaginary>0</Imaginary></Zero>
              <Pole number="2"><Real plusError="0.01">-0.037</Real><Imaginary>0.037</Imaginary></Pole>
              <Pole number="3"><Real>-0.037</Real><Imaginary>-0.037</Imaginary></Pole>
            </PolesZeros>
            <StageGain><Value>1500</Value><Frequency>1.0</Frequency></StageGain>
          </Stage>
        </Response>
      </Channel>
    </Station>
  </Network>
</FDSNStationXML>"#;

    fn bhz() -> SeedId {
        "IU.SSPA.00.BHZ".parse().unwrap()
    }

    fn flat(sensitivity: f64) -> ChannelResponse {
        ChannelResponse::new(
            sensitivity,
            1.0,
            "M/S",
            TransferFunction::Radians,
            vec![],
            vec![],
        )
    }

    #[test]
    fn test_parse_station_xml_epochs() {
        let inventory = Inventory::from_station_xml(STATION_XML).unwrap();
        assert_eq!(inventory.len(), 2);

        let old = inventory
            .response_for(&bhz(), parse_timestamp("2015-06-01").unwrap())
            .unwrap();
        assert_eq!(old.sensitivity, 1000.0);
        assert!(old.poles.is_empty());

        let new = inventory
            .response_for(&bhz(), parse_timestamp("2020-06-15T12:30:00").unwrap())
            .unwrap();
        assert_eq!(new.sensitivity, 2.5e9);
        assert_eq!(new.zeros.len(), 2);
        assert_eq!(new.poles.len(), 2);
        assert_eq!(new.poles[0], Complex64::new(-0.037, 0.037));
        assert_eq!(new.output_units(), "VEL");

        assert!(inventory
            .response_for(&bhz(), parse_timestamp("2005-01-01").unwrap())
            .is_none());
        assert!(inventory
            .response_for(
                &"IU.SSPA.00.BHN".parse().unwrap(),
                parse_timestamp("2020-01-01").unwrap()
            )
            .is_none());
    }

    #[test]
    fn test_invalid_xml() {
        assert!(matches!(
            Inventory::from_station_xml("<FDSNStationXML><Network>"),
            Err(Error::Inventory(_))
        ));
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Inventory::read(&dir.path().join("missing.xml")).unwrap_err();
        assert!(matches!(err, Error::Inventory(_)));
    }

    #[test]
    fn test_normalization_at_reference_frequency() {
        let zeros = vec![Complex64::new(0.0, 0.0); 2];
        let poles = vec![Complex64::new(-4.44, 4.44), Complex64::new(-4.44, -4.44)];
        let radians = ChannelResponse::new(
            1e9,
            1.0,
            "M/S",
            TransferFunction::Radians,
            zeros.clone(),
            poles.clone(),
        );
        assert!((radians.evaluate(1.0).unwrap().norm() - 1e9).abs() < 1.0);

        let hertz = ChannelResponse::new(
            1e9,
            1.0,
            "M/S",
            TransferFunction::Hertz,
            zeros,
            poles.iter().map(|p| p / (2.0 * PI)).collect(),
        );
        let a = radians.evaluate(0.3).unwrap();
        let b = hertz.evaluate(0.3).unwrap();
        assert!((a - b).norm() / a.norm() < 1e-9);
    }

    #[test]
    fn test_flat_response_divides_by_sensitivity() {
        let fs = 20.0;
        let mut data: Vec<f64> = (0..400)
            .map(|i| 1000.0 * (2.0 * PI * i as f64 / fs).sin())
            .collect();

        let units = remove_response(&mut data, fs, &flat(1000.0)).unwrap();

        assert_eq!(units, "VEL");
        // Sample 205 is a crest of the 1 Hz sine, away from the taper; DC
        // removal over the padded trace shifts it by under 1e-3
        assert!((data[205] - 1.0).abs() < 1e-2);
        assert!(data[200].abs() < 1e-2);
    }

    #[test]
    fn test_water_level_keeps_output_finite() {
        let response = ChannelResponse::new(
            1e9,
            1.0,
            "M/S",
            TransferFunction::Radians,
            vec![Complex64::new(0.0, 0.0); 2],
            vec![Complex64::new(-4.44, 4.44), Complex64::new(-4.44, -4.44)],
        );
        let mut data: Vec<f64> = (0..1000).map(|i| (i as f64 * 0.3).sin() * 5e4 + 100.0).collect();

        remove_response(&mut data, 40.0, &response).unwrap();

        assert!(data.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_empty_trace_rejected() {
        let mut data: Vec<f64> = vec![];
        assert!(remove_response(&mut data, 20.0, &flat(1.0)).is_err());
    }
}
