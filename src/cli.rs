//! plotew CLI
//!
//! Command-line surface:
//! - configure the default wave server
//! - plot a stream or a helicorder
//! - save waveforms to disk

use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{ArchiveProvider, DEFAULT_CONFIG_FILE};
use crate::output::OutputFormat;
use crate::processing::Bandpass;
use crate::waveform::SeedId;
use crate::window::{parse_timestamp, WindowRequest};

#[derive(Parser, Debug)]
#[command(name = "plotew")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Plot and save waveforms from an Earthworm wave server or an FDSN archive")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Wave server host (overrides the config file)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Wave server port (overrides the config file)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Path of the host/port config file
    #[arg(long, global = true, env = "PLOTEW_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: PathBuf,

    /// Fetch from a public FDSN archive instead of a wave server
    #[arg(long, global = true)]
    pub from_archive: bool,

    /// Archive to use with --from-archive (IRIS, GEOFON, ORFEUS, ... or a URL)
    #[arg(long, global = true, default_value = "IRIS")]
    pub archive: ArchiveProvider,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store the default wave server host and port
    #[command(alias = "config")]
    Configure,

    /// Plot every matching channel in its own panel
    Plot {
        /// SEED id NET.STA.LOC.CHAN (wildcards * and ? allowed)
        #[arg(short, long)]
        station: SeedId,

        #[command(flatten)]
        window: WindowArgs,

        #[command(flatten)]
        processing: ProcessingArgs,

        /// Output SVG file (default: <id>.svg)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Plot one channel as a helicorder
    #[command(alias = "plot_helicorder")]
    PlotHelicorder {
        /// SEED id NET.STA.LOC.CHAN
        #[arg(short, long)]
        station: SeedId,

        /// Start time (YYYY-MM-DDTHH:MM:SS)
        #[arg(long, value_parser = parse_time)]
        start: Option<DateTime<Utc>>,

        /// End time (YYYY-MM-DDTHH:MM:SS)
        #[arg(long, value_parser = parse_time)]
        end: Option<DateTime<Utc>>,

        /// The 24 hours up to the last full hour
        #[arg(long)]
        last_day: bool,

        /// Minutes per helicorder line
        #[arg(long, default_value_t = 60)]
        interval: u32,

        #[command(flatten)]
        processing: ProcessingArgs,

        /// Output SVG file (default: <id>_helicorder.svg)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Save every matching channel to its own file
    #[command(alias = "save_waveforms")]
    #[command(mut_arg("start", |arg| arg.required(true)))]
    SaveWaveforms {
        /// SEED id NET.STA.LOC.CHAN (wildcards * and ? allowed)
        #[arg(
            short,
            long,
            required_unless_present = "station_file",
            conflicts_with = "station_file"
        )]
        station: Option<SeedId>,

        /// File with one SEED id per line
        #[arg(long)]
        station_file: Option<PathBuf>,

        #[command(flatten)]
        window: WindowArgs,

        #[command(flatten)]
        processing: ProcessingArgs,

        /// MSEED, SLIST or TSPAIR
        #[arg(short, long, default_value = "MSEED")]
        format: OutputFormat,

        /// Directory the files are written to
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
}

/// Start/end/duration arguments
#[derive(Args, Debug, Clone, Default)]
pub struct WindowArgs {
    /// Start time (YYYY-MM-DDTHH:MM:SS)
    #[arg(long, value_parser = parse_time)]
    pub start: Option<DateTime<Utc>>,

    /// End time (YYYY-MM-DDTHH:MM:SS)
    #[arg(long, value_parser = parse_time, conflicts_with = "duration")]
    pub end: Option<DateTime<Utc>>,

    /// Window length in seconds from --start
    #[arg(short, long)]
    pub duration: Option<f64>,
}

impl WindowArgs {
    pub fn request(&self) -> WindowRequest {
        WindowRequest {
            start: self.start,
            end: self.end,
            duration: self.duration,
            last_day: false,
        }
    }
}

/// Processing flags shared by every command that fetches data
#[derive(Args, Debug, Clone, Default)]
pub struct ProcessingArgs {
    /// Bandpass corner frequencies in Hz (implies --demean --detrend)
    #[arg(long, num_args = 2, value_names = ["FREQMIN", "FREQMAX"])]
    pub bandpass: Option<Vec<f64>>,

    /// Remove the mean
    #[arg(long)]
    pub demean: bool,

    /// Remove a linear trend
    #[arg(long)]
    pub detrend: bool,

    /// Deconvolve the instrument response (implies --demean --detrend)
    #[arg(long)]
    pub remove_response: bool,

    /// StationXML file with the responses (required for wave servers)
    #[arg(long, requires = "remove_response")]
    pub inventory: Option<PathBuf>,
}

impl ProcessingArgs {
    pub fn bandpass(&self) -> Option<Bandpass> {
        match self.bandpass.as_deref() {
            Some([freqmin, freqmax]) => Some(Bandpass::new(*freqmin, *freqmax)),
            _ => None,
        }
    }

    /// Whether demean runs, explicitly or implied
    pub fn demean(&self) -> bool {
        self.demean || self.bandpass.is_some() || self.remove_response
    }

    /// Whether linear detrend runs, explicitly or implied
    pub fn detrend(&self) -> bool {
        self.detrend || self.bandpass.is_some() || self.remove_response
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    parse_timestamp(s).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("plotew").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_plot_arguments() {
        let cli = parse(&[
            "--host",
            "10.0.0.1",
            "--port",
            "16030",
            "plot",
            "--station",
            "IU.SSPA.00.BHZ",
            "--start",
            "2020-06-15T12:30:00",
            "--duration",
            "500",
            "--bandpass",
            "0.1",
            "10",
        ]);

        assert_eq!(cli.host.as_deref(), Some("10.0.0.1"));
        assert_eq!(cli.port, Some(16030));
        assert!(!cli.from_archive);

        let Commands::Plot {
            station,
            window,
            processing,
            output,
        } = cli.command
        else {
            panic!("expected plot");
        };
        assert_eq!(station.to_string(), "IU.SSPA.00.BHZ");
        assert_eq!(window.duration, Some(500.0));
        assert_eq!(processing.bandpass(), Some(Bandpass::new(0.1, 10.0)));
        assert!(processing.demean() && processing.detrend());
        assert!(output.is_none());

        let resolved = window.request().resolve().unwrap();
        assert_eq!(
            resolved.end(),
            parse_timestamp("2020-06-15T12:38:20").unwrap()
        );
    }

    #[test]
    fn test_end_conflicts_with_duration() {
        let err = Cli::try_parse_from([
            "plotew",
            "plot",
            "--station",
            "IU.SSPA.00.BHZ",
            "--start",
            "2020-06-15T12:30:00",
            "--end",
            "2020-06-15T13:30:00",
            "--duration",
            "60",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_bad_values_rejected_at_parse_time() {
        for args in [
            ["plotew", "plot", "--station", "IU.SSPA.BHZ", "--start", "2020-06-15"],
            ["plotew", "plot", "--station", "IU.SSPA.00.BHZ", "--start", "yesterday"],
            ["plotew", "save-waveforms", "--station", "IU.SSPA.00.BHZ", "--format", "XYZ"],
        ] {
            let err = Cli::try_parse_from(args).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_unknown_format_names_the_choices() {
        let err = Cli::try_parse_from([
            "plotew",
            "save-waveforms",
            "--station",
            "PE.PAKC..HHZ",
            "--start",
            "2020-06-15",
            "--format",
            "XYZ",
        ])
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ValueValidation);
        assert_eq!(err.exit_code(), 2);
        assert!(err
            .to_string()
            .contains("Unsupported format: XYZ (use MSEED, SLIST or TSPAIR)"));
    }

    #[test]
    fn test_helicorder_aliases_and_defaults() {
        let cli = parse(&[
            "--from-archive",
            "plot_helicorder",
            "--station",
            "IU.ANMO.00.LHZ",
            "--last-day",
        ]);

        assert!(cli.from_archive);
        assert_eq!(cli.archive, ArchiveProvider::Iris);
        match cli.command {
            Commands::PlotHelicorder {
                last_day, interval, ..
            } => {
                assert!(last_day);
                assert_eq!(interval, 60);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_save_waveforms_needs_a_station() {
        let err = Cli::try_parse_from(["plotew", "save-waveforms", "--start", "2020-06-15"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        let cli = parse(&[
            "save-waveforms",
            "--station-file",
            "stations.txt",
            "--start",
            "2020-06-15",
            "--format",
            "tspair",
            "-vv",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::SaveWaveforms {
                station,
                station_file,
                format,
                ..
            } => {
                assert!(station.is_none());
                assert_eq!(station_file, Some(PathBuf::from("stations.txt")));
                assert_eq!(format, OutputFormat::Tspair);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_save_waveforms_needs_a_start() {
        let err = Cli::try_parse_from([
            "plotew",
            "save-waveforms",
            "--station",
            "PE.PAKC..HHZ",
            "--end",
            "2020-06-15T13:00:00",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        // Other commands keep --start optional
        parse(&["plot", "--station", "PE.PAKC..HHZ", "--end", "2020-06-15T13:00:00"]);
    }

    #[test]
    fn test_inventory_requires_remove_response() {
        let err = Cli::try_parse_from([
            "plotew",
            "plot",
            "--station",
            "IU.SSPA.00.BHZ",
            "--inventory",
            "resp.xml",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }
}
