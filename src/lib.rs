//! # plotew
//!
//! Command-line plotting of seismic waveforms from an Earthworm wave server
//! or a public FDSN archive.
//!
//! ## Modules
//!
//! - [`window`]: time window resolution and timestamp parsing
//! - [`config`]: host/port config file and runtime settings
//! - [`client`]: wave server and FDSN backends
//! - [`mseed`]: miniSEED record codec
//! - [`processing`]: demean, detrend, bandpass and response removal
//! - [`plot`]: stream and helicorder figures
//! - [`output`]: MSEED, SLIST and TSPAIR writers
//! - [`commands`]: the handlers behind each subcommand
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use plotew::client::{EarthwormClient, WaveformSource};
//! use plotew::plot::{render_stream, PlotOptions};
//! use plotew::window::WindowRequest;
//!
//! #[tokio::main]
//! async fn main() -> plotew::Result<()> {
//!     let client = EarthwormClient::new("10.0.0.1", 16030, None);
//!     let window = WindowRequest {
//!         start: Some(plotew::window::parse_timestamp("2020-06-15T12:30:00")?),
//!         duration: Some(500.0),
//!         ..Default::default()
//!     }
//!     .resolve()?;
//!
//!     let stream = client.fetch(&"IU.SSPA.00.BHZ".parse()?, &window).await?;
//!     render_stream(&stream, None, &PlotOptions::default())?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod mseed;
pub mod output;
pub mod plot;
pub mod processing;
pub mod waveform;
pub mod window;

// Re-export top-level types for convenience
pub use error::{Error, Result};

pub use waveform::{SeedId, Stream, Trace};

pub use window::{TimeWindow, WindowRequest};

pub use config::{ArchiveProvider, ConfigStore, ServerEndpoint, Settings};

pub use processing::{Bandpass, Inventory, ProcessingSpec, ProcessingStep};

pub use output::OutputFormat;
