//! Record encoding
//!
//! Records are 4096 bytes, big-endian, with blockette 1000 at offset 48,
//! blockette 1001 at offset 56 and data from offset 64. Integer traces are
//! written as int32, everything else as float64.

use chrono::{Datelike, Timelike};

use super::{Encoding, MseedError, FIXED_HEADER_SIZE};
use crate::waveform::Trace;

pub const RECORD_LENGTH: usize = 4096;
const RECORD_EXPONENT: u8 = 12;
const B1000_OFFSET: usize = FIXED_HEADER_SIZE;
const B1001_OFFSET: usize = 56;
const DATA_OFFSET: usize = 64;

/// Header sample rate as (factor, multiplier)
fn rate_factors(rate: f64) -> Result<(i16, i16), MseedError> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(MseedError::Encode(format!("invalid sample rate {}", rate)));
    }
    let integral = |x: f64| (x - x.round()).abs() < 1e-6 && x.round() <= i16::MAX as f64;

    if integral(rate) {
        return Ok((rate.round() as i16, 1));
    }
    let period = 1.0 / rate;
    if integral(period) {
        return Ok((-(period.round() as i16), 1));
    }
    let mut multiplier = 10.0;
    while multiplier <= 10_000.0 {
        if integral(rate * multiplier) {
            return Ok(((rate * multiplier).round() as i16, -(multiplier as i16)));
        }
        multiplier *= 10.0;
    }
    Err(MseedError::Encode(format!(
        "sample rate {} has no factor/multiplier form",
        rate
    )))
}

fn pad_code(code: &str, width: usize, what: &str) -> Result<Vec<u8>, MseedError> {
    if code.len() > width || !code.is_ascii() {
        return Err(MseedError::Encode(format!(
            "{} code '{}' does not fit in {} characters",
            what, code, width
        )));
    }
    let mut out = code.as_bytes().to_vec();
    out.resize(width, b' ');
    Ok(out)
}

fn fits_int32(trace: &Trace) -> bool {
    trace.encoding.is_integer()
        && trace
            .data
            .iter()
            .all(|x| x.fract() == 0.0 && *x >= i32::MIN as f64 && *x <= i32::MAX as f64)
}

/// Encode the traces as consecutive records, numbering them from 1
pub fn encode_traces<'a>(traces: impl IntoIterator<Item = &'a Trace>) -> Result<Vec<u8>, MseedError> {
    let mut out = Vec::new();
    let mut sequence = 1u32;

    for trace in traces {
        let encoding = if fits_int32(trace) {
            Encoding::Int32
        } else {
            Encoding::Float64
        };
        let width = if encoding == Encoding::Int32 { 4 } else { 8 };
        let per_record = (RECORD_LENGTH - DATA_OFFSET) / width;
        let (factor, multiplier) = rate_factors(trace.sample_rate)?;

        let station = pad_code(trace.id.station(), 5, "station")?;
        let location = pad_code(trace.id.location(), 2, "location")?;
        let channel = pad_code(trace.id.channel(), 3, "channel")?;
        let network = pad_code(trace.id.network(), 2, "network")?;

        for (chunk_index, chunk) in trace.data.chunks(per_record).enumerate() {
            let start = trace.time_of(chunk_index * per_record);
            let mut buf = vec![0u8; RECORD_LENGTH];

            buf[0..6].copy_from_slice(format!("{:06}", sequence % 1_000_000).as_bytes());
            buf[6] = b'D';
            buf[7] = b' ';
            buf[8..13].copy_from_slice(&station);
            buf[13..15].copy_from_slice(&location);
            buf[15..18].copy_from_slice(&channel);
            buf[18..20].copy_from_slice(&network);

            let micros = start.timestamp_subsec_micros().min(999_999);
            buf[20..22].copy_from_slice(&(start.year() as u16).to_be_bytes());
            buf[22..24].copy_from_slice(&(start.ordinal() as u16).to_be_bytes());
            buf[24] = start.hour() as u8;
            buf[25] = start.minute() as u8;
            buf[26] = start.second() as u8;
            buf[28..30].copy_from_slice(&((micros / 100) as u16).to_be_bytes());

            buf[30..32].copy_from_slice(&(chunk.len() as u16).to_be_bytes());
            buf[32..34].copy_from_slice(&factor.to_be_bytes());
            buf[34..36].copy_from_slice(&multiplier.to_be_bytes());
            buf[39] = 2;
            buf[44..46].copy_from_slice(&(DATA_OFFSET as u16).to_be_bytes());
            buf[46..48].copy_from_slice(&(B1000_OFFSET as u16).to_be_bytes());

            let b = B1000_OFFSET;
            buf[b..b + 2].copy_from_slice(&1000u16.to_be_bytes());
            buf[b + 2..b + 4].copy_from_slice(&(B1001_OFFSET as u16).to_be_bytes());
            buf[b + 4] = encoding as u8;
            buf[b + 5] = 1;
            buf[b + 6] = RECORD_EXPONENT;

            let b = B1001_OFFSET;
            buf[b..b + 2].copy_from_slice(&1001u16.to_be_bytes());
            buf[b + 5] = (micros % 100) as u8;

            for (i, value) in chunk.iter().enumerate() {
                let at = DATA_OFFSET + i * width;
                if encoding == Encoding::Int32 {
                    buf[at..at + 4].copy_from_slice(&(*value as i32).to_be_bytes());
                } else {
                    buf[at..at + 8].copy_from_slice(&value.to_be_bytes());
                }
            }

            out.extend_from_slice(&buf);
            sequence += 1;
        }
    }

    Ok(out)
}
