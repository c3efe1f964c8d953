//! miniSEED (SEED 2.4 data-only) records
//!
//! Record layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ FIXED HEADER (48 bytes)                 │
//! │   sequence: [u8; 6]  quality: u8        │
//! │   station: [u8; 5]   location: [u8; 2]  │
//! │   channel: [u8; 3]   network: [u8; 2]   │
//! │   start: BTIME (10 bytes)               │
//! │   nsamp: u16                            │
//! │   rate factor: i16  multiplier: i16     │
//! │   flags: [u8; 3]   blockettes: u8       │
//! │   time correction: i32                  │
//! │   data offset: u16  blockette: u16      │
//! ├─────────────────────────────────────────┤
//! │ BLOCKETTES (chained)                    │
//! │   1000: encoding, word order, length    │
//! │   1001: microseconds                    │
//! │   100: actual sample rate               │
//! ├─────────────────────────────────────────┤
//! │ DATA (data offset .. record length)     │
//! └─────────────────────────────────────────┘
//! ```

mod decode;
mod encode;
mod steim;

pub use decode::{decode_record, decode_records};
pub use encode::{encode_traces, RECORD_LENGTH};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::waveform::{SampleEncoding, SeedId, Trace};

/// Fixed header size in bytes
pub const FIXED_HEADER_SIZE: usize = 48;

/// miniSEED codec errors
#[derive(Error, Debug)]
pub enum MseedError {
    #[error("Truncated record: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Bad record header: {0}")]
    BadHeader(String),

    #[error("Unsupported data encoding: {0}")]
    UnsupportedEncoding(u8),

    #[error("Record has no blockette 1000")]
    MissingBlockette1000,

    #[error("Cannot encode record: {0}")]
    Encode(String),
}

/// Data encoding format codes from blockette 1000
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Encoding {
    Int16 = 1,
    Int32 = 3,
    Float32 = 4,
    Float64 = 5,
    Steim1 = 10,
    Steim2 = 11,
}

impl TryFrom<u8> for Encoding {
    type Error = MseedError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Encoding::Int16),
            3 => Ok(Encoding::Int32),
            4 => Ok(Encoding::Float32),
            5 => Ok(Encoding::Float64),
            10 => Ok(Encoding::Steim1),
            11 => Ok(Encoding::Steim2),
            other => Err(MseedError::UnsupportedEncoding(other)),
        }
    }
}

impl Encoding {
    /// Sample type the decoded values keep
    pub fn sample_encoding(&self) -> SampleEncoding {
        match self {
            Encoding::Int16 => SampleEncoding::Int16,
            Encoding::Int32 | Encoding::Steim1 | Encoding::Steim2 => SampleEncoding::Int32,
            Encoding::Float32 => SampleEncoding::Float32,
            Encoding::Float64 => SampleEncoding::Float64,
        }
    }
}

/// One decoded data record
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub sequence: u32,
    pub quality: char,
    pub id: SeedId,
    pub start: DateTime<Utc>,
    pub sample_rate: f64,
    pub encoding: Encoding,
    pub record_length: usize,
    pub samples: Vec<f64>,
}

impl Record {
    pub fn into_trace(self) -> Trace {
        let encoding = self.encoding.sample_encoding();
        Trace::new(self.id, self.start, self.sample_rate, self.samples).with_encoding(encoding)
    }
}

/// Sample rate from the header factor and multiplier
pub fn sample_rate_from(factor: i16, multiplier: i16) -> f64 {
    let (f, m) = (factor as f64, multiplier as f64);
    match (factor.signum(), multiplier.signum()) {
        (0, _) | (_, 0) => 0.0,
        (1, 1) => f * m,
        (1, -1) => -f / m,
        (-1, 1) => -m / f,
        _ => 1.0 / (f * m),
    }
}
