//! Error types
//!
//! Every failure a command can hit is one of these variants. The binary
//! prints the `Display` form as a single line and exits non-zero.

use thiserror::Error;

use crate::config::ConfigError;
use crate::mseed::MseedError;

/// Errors that can occur while resolving, fetching, processing or writing waveforms
#[derive(Error, Debug)]
pub enum Error {
    /// Neither host/port nor archive mode were given
    #[error(
        "You must define the host and port of the earthworm wave server \
         (--host/--port, the config file, or --from-archive). Type plotew --help for more information"
    )]
    ConfigurationMissing,

    /// Time window could not be built from the given arguments
    #[error("Invalid time window: {0}")]
    InvalidWindow(String),

    /// Timestamp string did not parse
    #[error("Invalid timestamp '{0}': expected YYYY-MM-DDTHH:MM:SS")]
    InvalidTimestamp(String),

    /// Station code is not NET.STA.LOC.CHAN
    #[error("Invalid SEED id '{0}': expected NET.STA.LOC.CHAN")]
    InvalidSeedId(String),

    /// Data source unreachable or failed at the transport level
    #[error("Connection to {endpoint} failed: {reason}")]
    Connection { endpoint: String, reason: String },

    /// Data source answered but returned no traces
    #[error("No data returned for {seed_id} between {start} and {end}")]
    NoData {
        seed_id: String,
        start: String,
        end: String,
    },

    /// Malformed reply from a data source
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A processing step failed on one channel
    #[error("Processing failed on {channel} during {step}: {reason}")]
    Processing {
        channel: String,
        step: String,
        reason: String,
    },

    /// Helicorder was handed more than one channel
    #[error("Helicorder plots take exactly one channel, got {}: {}", .ids.len(), .ids.join(", "))]
    MultiChannel { ids: Vec<String> },

    /// Output format or file extension not recognised
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Station metadata missing or unusable for response removal
    #[error("Inventory error: {0}")]
    Inventory(String),

    /// Plot backend failure
    #[error("Render error: {0}")]
    Render(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("miniSEED error: {0}")]
    Mseed(#[from] MseedError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a processing failure
    pub fn processing(
        channel: impl Into<String>,
        step: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::Processing {
            channel: channel.into(),
            step: step.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;
