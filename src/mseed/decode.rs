//! Record decoding

use chrono::{DateTime, Duration, NaiveDate, Utc};

use super::steim::{self, Steim};
use super::{sample_rate_from, Encoding, MseedError, Record, FIXED_HEADER_SIZE};
use crate::waveform::SeedId;

/// Byte-order aware reader over one record
struct Reader<'a> {
    buf: &'a [u8],
    big_endian: bool,
}

impl<'a> Reader<'a> {
    fn bytes<const N: usize>(&self, offset: usize) -> Result<[u8; N], MseedError> {
        self.buf
            .get(offset..offset + N)
            .and_then(|s| s.try_into().ok())
            .ok_or(MseedError::Truncated {
                needed: offset + N,
                available: self.buf.len(),
            })
    }

    fn u8(&self, offset: usize) -> Result<u8, MseedError> {
        Ok(self.bytes::<1>(offset)?[0])
    }

    fn u16(&self, offset: usize) -> Result<u16, MseedError> {
        let b = self.bytes(offset)?;
        Ok(if self.big_endian {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        })
    }

    fn i16(&self, offset: usize) -> Result<i16, MseedError> {
        Ok(self.u16(offset)? as i16)
    }

    fn i32(&self, offset: usize) -> Result<i32, MseedError> {
        let b = self.bytes(offset)?;
        Ok(if self.big_endian {
            i32::from_be_bytes(b)
        } else {
            i32::from_le_bytes(b)
        })
    }

    fn f32(&self, offset: usize) -> Result<f32, MseedError> {
        let b = self.bytes(offset)?;
        Ok(if self.big_endian {
            f32::from_be_bytes(b)
        } else {
            f32::from_le_bytes(b)
        })
    }

    fn code(&self, offset: usize, len: usize) -> Result<String, MseedError> {
        let raw = self.buf.get(offset..offset + len).ok_or(MseedError::Truncated {
            needed: offset + len,
            available: self.buf.len(),
        })?;
        Ok(String::from_utf8_lossy(raw).trim().to_string())
    }
}

/// Decode the BTIME at `offset`; fractional part in 0.0001 s
fn btime(r: &Reader<'_>, offset: usize) -> Result<DateTime<Utc>, MseedError> {
    let year = r.u16(offset)?;
    let day = r.u16(offset + 2)?;
    let hour = r.u8(offset + 4)?;
    let minute = r.u8(offset + 5)?;
    let second = r.u8(offset + 6)?;
    let fract = r.u16(offset + 8)?;

    let midnight = NaiveDate::from_yo_opt(year as i32, day as u32)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| MseedError::BadHeader(format!("invalid date {}-{:03}", year, day)))?;

    // Seconds are added rather than set so a leap second (60) survives
    let time = midnight
        + Duration::hours(hour as i64)
        + Duration::minutes(minute as i64)
        + Duration::seconds(second as i64)
        + Duration::microseconds(fract as i64 * 100);
    Ok(DateTime::from_naive_utc_and_offset(time, Utc))
}

struct Blockettes {
    encoding: u8,
    word_big_endian: bool,
    record_length: usize,
    microseconds: i64,
    actual_rate: Option<f64>,
}

fn blockettes(r: &Reader<'_>, first: usize, count: u8) -> Result<Blockettes, MseedError> {
    let mut b1000 = None;
    let mut microseconds = 0;
    let mut actual_rate = None;

    let mut offset = first;
    let mut seen = 0;
    while offset != 0 {
        let kind = r.u16(offset)?;
        let next = r.u16(offset + 2)? as usize;
        match kind {
            1000 => {
                let exponent = r.u8(offset + 6)?;
                if !(7..=20).contains(&exponent) {
                    return Err(MseedError::BadHeader(format!(
                        "record length exponent {} out of range",
                        exponent
                    )));
                }
                b1000 = Some((r.u8(offset + 4)?, r.u8(offset + 5)? == 1, 1usize << exponent));
            }
            1001 => microseconds = (r.u8(offset + 5)? as i8) as i64,
            100 => actual_rate = Some(r.f32(offset + 4)? as f64),
            _ => {}
        }
        if next != 0 && next <= offset {
            return Err(MseedError::BadHeader(format!(
                "blockette chain loops back to offset {}",
                next
            )));
        }
        offset = next;
        seen += 1;
    }
    if seen != count as usize {
        tracing::debug!("header lists {} blockettes, chain has {}", count, seen);
    }

    let (encoding, word_big_endian, record_length) = b1000.ok_or(MseedError::MissingBlockette1000)?;
    Ok(Blockettes {
        encoding,
        word_big_endian,
        record_length,
        microseconds,
        actual_rate,
    })
}

/// Decode one record from the start of `buf`
pub fn decode_record(buf: &[u8]) -> Result<Record, MseedError> {
    if buf.len() < FIXED_HEADER_SIZE {
        return Err(MseedError::Truncated {
            needed: FIXED_HEADER_SIZE,
            available: buf.len(),
        });
    }

    let quality = buf[6] as char;
    if !matches!(quality, 'D' | 'R' | 'Q' | 'M') {
        return Err(MseedError::BadHeader(format!(
            "unknown quality indicator {:?}",
            quality
        )));
    }

    // A plausible year in big-endian order means a big-endian header
    let year_be = u16::from_be_bytes([buf[20], buf[21]]);
    let big_endian = (1900..=2100).contains(&year_be);
    let r = Reader { buf, big_endian };

    let sequence = r.code(0, 6)?.parse().unwrap_or(0);
    let id = SeedId::new(r.code(18, 2)?, r.code(8, 5)?, r.code(13, 2)?, r.code(15, 3)?);
    let nsamp = r.u16(30)? as usize;
    let factor = r.i16(32)?;
    let multiplier = r.i16(34)?;
    let activity = r.u8(36)?;
    let num_blockettes = r.u8(39)?;
    let correction = r.i32(40)?;
    let data_offset = r.u16(44)? as usize;
    let first_blockette = r.u16(46)? as usize;

    let b = blockettes(&r, first_blockette, num_blockettes)?;
    if buf.len() < b.record_length {
        return Err(MseedError::Truncated {
            needed: b.record_length,
            available: buf.len(),
        });
    }

    let mut start = btime(&r, 20)? + Duration::microseconds(b.microseconds);
    // Bit 1 set means the correction is already in the start time
    if activity & 0x02 == 0 && correction != 0 {
        start += Duration::microseconds(correction as i64 * 100);
    }

    let sample_rate = b
        .actual_rate
        .filter(|rate| *rate > 0.0)
        .unwrap_or_else(|| sample_rate_from(factor, multiplier));

    let encoding = Encoding::try_from(b.encoding)?;
    let samples = if nsamp == 0 {
        Vec::new()
    } else {
        if data_offset < FIXED_HEADER_SIZE || data_offset >= b.record_length {
            return Err(MseedError::BadHeader(format!(
                "data offset {} outside record of {} bytes",
                data_offset, b.record_length
            )));
        }
        decode_samples(
            encoding,
            &buf[data_offset..b.record_length],
            nsamp,
            b.word_big_endian,
        )?
    };

    Ok(Record {
        sequence,
        quality,
        id,
        start,
        sample_rate,
        encoding,
        record_length: b.record_length,
        samples,
    })
}

fn decode_samples(
    encoding: Encoding,
    data: &[u8],
    nsamp: usize,
    big_endian: bool,
) -> Result<Vec<f64>, MseedError> {
    let width = match encoding {
        Encoding::Int16 => 2,
        Encoding::Int32 | Encoding::Float32 => 4,
        Encoding::Float64 => 8,
        Encoding::Steim1 => {
            return Ok(steim::decode(Steim::One, data, nsamp, big_endian)?
                .into_iter()
                .map(f64::from)
                .collect())
        }
        Encoding::Steim2 => {
            return Ok(steim::decode(Steim::Two, data, nsamp, big_endian)?
                .into_iter()
                .map(f64::from)
                .collect())
        }
    };

    let needed = nsamp * width;
    if data.len() < needed {
        return Err(MseedError::Truncated {
            needed,
            available: data.len(),
        });
    }

    let r = Reader { buf: data, big_endian };
    let mut samples = Vec::with_capacity(nsamp);
    for i in 0..nsamp {
        let offset = i * width;
        let value = match encoding {
            Encoding::Int16 => r.i16(offset)? as f64,
            Encoding::Int32 => r.i32(offset)? as f64,
            Encoding::Float32 => r.f32(offset)? as f64,
            _ => {
                let b = r.bytes::<8>(offset)?;
                if big_endian {
                    f64::from_be_bytes(b)
                } else {
                    f64::from_le_bytes(b)
                }
            }
        };
        samples.push(value);
    }
    Ok(samples)
}

/// Decode every record in a buffer of concatenated records
///
/// Trailing padding shorter than a fixed header is ignored.
pub fn decode_records(mut buf: &[u8]) -> Result<Vec<Record>, MseedError> {
    let mut records = Vec::new();
    while buf.len() >= FIXED_HEADER_SIZE {
        if buf[..FIXED_HEADER_SIZE].iter().all(|&b| b == 0 || b == b' ') {
            break;
        }
        let record = decode_record(buf)?;
        let length = record.record_length;
        records.push(record);
        buf = &buf[length..];
    }
    Ok(records)
}
