//! Command handlers
//!
//! Each invocation runs `endpoint -> window -> fetch -> process -> dispatch`.
//! The handlers take an explicit [`CommandContext`] and a
//! [`WaveformSource`], so nothing global is read or mutated.

use chrono::{DateTime, Utc};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use crate::cli::{Cli, Commands, ProcessingArgs};
use crate::client::{connect, WaveformSource};
use crate::config::{
    prompt_endpoint, resolve_endpoint, ArchiveProvider, ConfigStore, ServerEndpoint, Settings,
    StoredEndpoint,
};
use crate::error::{Error, Result};
use crate::output::{write_stream, OutputFormat};
use crate::plot::{render_helicorder, render_stream, HelicorderOptions, PlotOptions};
use crate::processing::{self, Inventory, ProcessingSpec};
use crate::waveform::{read_station_file, SeedId, Stream};
use crate::window::{format_timestamp, TimeWindow, WindowRequest};

/// Everything a handler needs from the global flags
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config: ConfigStore,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub from_archive: bool,
    pub archive: ArchiveProvider,
    pub settings: Settings,
}

impl CommandContext {
    pub fn new(cli: &Cli, settings: Settings) -> Self {
        Self {
            config: ConfigStore::new(&cli.config_file),
            host: cli.host.clone(),
            port: cli.port,
            from_archive: cli.from_archive,
            archive: cli.archive.clone(),
            settings,
        }
    }

    /// Resolve the data source; the config file is not read in archive mode
    pub fn endpoint(&self) -> Result<ServerEndpoint> {
        let stored = if self.from_archive {
            None
        } else {
            self.config.load()?
        };
        resolve_endpoint(
            self.from_archive,
            &self.archive,
            self.host.as_deref(),
            self.port,
            stored.as_ref(),
        )
    }
}

/// Dispatch a parsed command line
pub async fn run(cli: Cli, settings: Settings) -> Result<()> {
    let ctx = CommandContext::new(&cli, settings);

    match cli.command {
        Commands::Configure => {
            let stdin = std::io::stdin();
            let mut input = stdin.lock();
            let mut output = std::io::stdout();
            let saved = configure(&ctx, &mut input, &mut output)?;
            println!(
                "Saved {}:{} to {}",
                saved.host,
                saved.port,
                ctx.config.path().display()
            );
        }
        Commands::Plot {
            station,
            window,
            processing,
            output,
        } => {
            let source = open_source(&ctx)?;
            let window = window.request().resolve()?;
            let path = plot(
                &ctx,
                source.as_ref(),
                &station,
                &window,
                &processing,
                output.as_deref(),
            )
            .await?;
            println!("{}", path.display());
        }
        Commands::PlotHelicorder {
            station,
            start,
            end,
            last_day,
            interval,
            processing,
            output,
        } => {
            let source = open_source(&ctx)?;
            let window = helicorder_window(start, end, last_day).resolve()?;
            let path = plot_helicorder(
                &ctx,
                source.as_ref(),
                &station,
                &window,
                interval,
                &processing,
                output.as_deref(),
            )
            .await?;
            println!("{}", path.display());
        }
        Commands::SaveWaveforms {
            station,
            station_file,
            window,
            processing,
            format,
            output_dir,
        } => {
            let ids = match (station, station_file) {
                (Some(id), _) => vec![id],
                (None, Some(path)) => read_station_file(&path)?,
                (None, None) => return Err(Error::InvalidSeedId(String::new())),
            };
            let source = open_source(&ctx)?;
            let window = window.request().resolve()?;
            let paths =
                save_waveforms(source.as_ref(), &ids, &window, &processing, format, &output_dir).await?;
            for path in paths {
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}

fn open_source(ctx: &CommandContext) -> Result<Box<dyn WaveformSource>> {
    let endpoint = ctx.endpoint()?;
    let source = connect(&endpoint, &ctx.settings)?;
    tracing::info!("Using {}", source.describe());
    Ok(source)
}

/// Helicorders take explicit bounds or `--last-day`, never a duration
fn helicorder_window(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    last_day: bool,
) -> WindowRequest {
    WindowRequest {
        start,
        end,
        duration: None,
        last_day,
    }
}

/// Prompt for host and port and persist them
///
/// `--host`/`--port` and then the stored values are offered as defaults.
pub fn configure<R: BufRead, W: Write>(
    ctx: &CommandContext,
    input: &mut R,
    output: &mut W,
) -> Result<StoredEndpoint> {
    let stored = ctx.config.load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable config: {}", e);
        None
    });
    let current = match (&ctx.host, ctx.port, stored) {
        (Some(host), Some(port), _) => Some(StoredEndpoint {
            host: host.clone(),
            port,
        }),
        (host, port, Some(stored)) => Some(StoredEndpoint {
            host: host.clone().unwrap_or(stored.host),
            port: port.unwrap_or(stored.port),
        }),
        (_, _, None) => None,
    };

    let endpoint = prompt_endpoint(input, output, current.as_ref())?;
    ctx.config.save(&endpoint)?;
    Ok(endpoint)
}

/// Fetch every id in turn
///
/// A single id propagates its `NoData`; with several ids the missing ones
/// are skipped and only an entirely empty result fails.
pub async fn fetch_all(source: &dyn WaveformSource, ids: &[SeedId], window: &TimeWindow) -> Result<Stream> {
    if let [id] = ids {
        return source.fetch(id, window).await;
    }

    let mut stream = Stream::default();
    for id in ids {
        match source.fetch(id, window).await {
            Ok(fetched) => stream.extend(fetched),
            Err(Error::NoData { seed_id, .. }) => tracing::warn!("No data for {}, skipping", seed_id),
            Err(e) => return Err(e),
        }
    }

    if stream.is_empty() {
        return Err(Error::NoData {
            seed_id: ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
            start: format_timestamp(&window.start()),
            end: format_timestamp(&window.end()),
        });
    }
    Ok(stream)
}

/// Turn the processing flags into a pipeline, loading responses if needed
pub async fn processing_spec(
    args: &ProcessingArgs,
    source: &dyn WaveformSource,
    ids: &[SeedId],
    window: &TimeWindow,
) -> Result<ProcessingSpec> {
    let remove_response = if !args.remove_response {
        None
    } else if let Some(path) = &args.inventory {
        Some(Inventory::read(path)?)
    } else {
        let inventory = source.fetch_inventory(ids, window).await?.ok_or_else(|| {
            Error::Inventory(format!(
                "no station metadata from {}; pass --inventory with a StationXML file",
                source.describe()
            ))
        })?;
        Some(inventory)
    };

    Ok(ProcessingSpec {
        remove_mean: args.demean(),
        remove_trend: args.detrend(),
        bandpass: args.bandpass(),
        remove_response,
    })
}

async fn fetch_processed(
    source: &dyn WaveformSource,
    ids: &[SeedId],
    window: &TimeWindow,
    args: &ProcessingArgs,
) -> Result<Stream> {
    let spec = processing_spec(args, source, ids, window).await?;
    tracing::info!(
        "Fetching {} channel pattern(s) for {} ({} s)",
        ids.len(),
        window,
        window.duration().num_seconds()
    );
    let mut stream = fetch_all(source, ids, window).await?;
    tracing::info!("Fetched {} trace(s)", stream.len());
    processing::apply(&mut stream, &spec)?;
    Ok(stream)
}

/// Plot a (possibly wildcarded) channel as a stream plot
pub async fn plot(
    ctx: &CommandContext,
    source: &dyn WaveformSource,
    station: &SeedId,
    window: &TimeWindow,
    args: &ProcessingArgs,
    output: Option<&Path>,
) -> Result<PathBuf> {
    let stream = fetch_processed(source, std::slice::from_ref(station), window, args).await?;
    let options = PlotOptions {
        title: Some(window.to_string()),
        ..PlotOptions::from_settings(&ctx.settings)
    };
    render_stream(&stream, output, &options)
}

/// Plot one channel as a helicorder
pub async fn plot_helicorder(
    ctx: &CommandContext,
    source: &dyn WaveformSource,
    station: &SeedId,
    window: &TimeWindow,
    interval_minutes: u32,
    args: &ProcessingArgs,
    output: Option<&Path>,
) -> Result<PathBuf> {
    if !station.channel().starts_with('L') {
        tracing::warn!(
            "{} is not a long-period channel; a helicorder of high sample-rate data can be slow",
            station
        );
    }

    let stream = fetch_processed(source, std::slice::from_ref(station), window, args).await?;
    let options = HelicorderOptions {
        interval_minutes,
        window: Some(*window),
        title: Some(format!("{}  {}", station, window)),
        ..HelicorderOptions::from_settings(&ctx.settings)
    };
    render_helicorder(&stream, output, &options)
}

/// Fetch, process and write one file per channel
pub async fn save_waveforms(
    source: &dyn WaveformSource,
    ids: &[SeedId],
    window: &TimeWindow,
    args: &ProcessingArgs,
    format: OutputFormat,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    if ids.is_empty() {
        return Err(Error::InvalidSeedId("no station given".to_string()));
    }
    let stream = fetch_processed(source, ids, window, args).await?;
    write_stream(&stream, format, dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::ProcessingStep;
    use crate::waveform::{SampleEncoding, Trace};
    use crate::window::parse_timestamp;
    use async_trait::async_trait;
    use std::io::Cursor;
    use tempfile::tempdir;

    /// In-memory source serving a fixed set of traces
    struct FakeSource {
        traces: Vec<Trace>,
        inventory: Option<Inventory>,
    }

    impl FakeSource {
        fn new(traces: Vec<Trace>) -> Self {
            Self {
                traces,
                inventory: None,
            }
        }
    }

    #[async_trait]
    impl WaveformSource for FakeSource {
        fn describe(&self) -> String {
            "fake source".to_string()
        }

        async fn fetch(&self, id: &SeedId, window: &TimeWindow) -> Result<Stream> {
            let mut stream = Stream::new(
                self.traces
                    .iter()
                    .filter(|t| id.matches(&t.id))
                    .cloned()
                    .collect(),
            );
            stream.trim(window);
            if stream.is_empty() {
                return Err(Error::NoData {
                    seed_id: id.to_string(),
                    start: format_timestamp(&window.start()),
                    end: format_timestamp(&window.end()),
                });
            }
            Ok(stream)
        }

        async fn fetch_inventory(&self, _ids: &[SeedId], _window: &TimeWindow) -> Result<Option<Inventory>> {
            Ok(self.inventory.clone())
        }
    }

    fn ts(s: &str) -> DateTime<Utc> {
        parse_timestamp(s).unwrap()
    }

    fn window() -> TimeWindow {
        TimeWindow::new(ts("2020-06-15T12:30:00"), ts("2020-06-15T12:38:20")).unwrap()
    }

    fn trace(id: &str, rate: f64) -> Trace {
        let n = (600.0 * rate) as usize;
        let data = (0..n)
            .map(|i| 1000.0 + ((i as f64 / rate) * 2.0).sin() * 50.0)
            .map(f64::round)
            .collect();
        Trace::new(id.parse().unwrap(), ts("2020-06-15T12:29:00"), rate, data)
            .with_encoding(SampleEncoding::Int32)
    }

    fn context(dir: &Path) -> CommandContext {
        CommandContext {
            config: ConfigStore::new(dir.join("plotEW.cfg")),
            host: None,
            port: None,
            from_archive: false,
            archive: ArchiveProvider::Iris,
            settings: Settings::default(),
        }
    }

    #[test]
    fn test_endpoint_resolution() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());

        assert!(matches!(ctx.endpoint(), Err(Error::ConfigurationMissing)));

        // A broken config file is never read in archive mode
        std::fs::write(ctx.config.path(), "only-a-host\n").unwrap();
        ctx.from_archive = true;
        assert_eq!(
            ctx.endpoint().unwrap(),
            ServerEndpoint::Archive(ArchiveProvider::Iris)
        );

        ctx.from_archive = false;
        std::fs::write(ctx.config.path(), "10.0.0.1\n16030\n").unwrap();
        ctx.port = Some(16022);
        assert_eq!(
            ctx.endpoint().unwrap(),
            ServerEndpoint::Waveserver {
                host: "10.0.0.1".to_string(),
                port: 16022
            }
        );
    }

    #[test]
    fn test_configure_saves_answers() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let mut input = Cursor::new("10.0.0.1\nnot-a-port\n16030\n");
        let mut output = Vec::new();

        let saved = configure(&ctx, &mut input, &mut output).unwrap();

        assert_eq!(saved.host, "10.0.0.1");
        assert_eq!(saved.port, 16030);
        assert_eq!(ctx.config.load().unwrap(), Some(saved));
        assert!(String::from_utf8(output).unwrap().contains("not a valid port"));
    }

    #[tokio::test]
    async fn test_plot_with_bandpass() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let source = FakeSource::new(vec![trace("IU.SSPA.00.BHZ", 20.0)]);
        let args = ProcessingArgs {
            bandpass: Some(vec![0.1, 5.0]),
            ..Default::default()
        };
        let out = dir.path().join("plot.svg");

        let path = plot(
            &ctx,
            &source,
            &"IU.SSPA.00.BHZ".parse().unwrap(),
            &window(),
            &args,
            Some(&out),
        )
        .await
        .unwrap();

        assert_eq!(path, out);
        let svg = std::fs::read_to_string(&out).unwrap();
        assert!(svg.contains("IU.SSPA.00.BHZ"));
        assert!(svg.contains("2020-06-15T12:30:00 - 2020-06-15T12:38:20"));
    }

    #[tokio::test]
    async fn test_helicorder_rejects_wildcard_expansion() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let source = FakeSource::new(vec![trace("IU.SSPA.00.LHZ", 1.0), trace("IU.SSPA.00.LHN", 1.0)]);
        let out = dir.path().join("heli.svg");

        let err = plot_helicorder(
            &ctx,
            &source,
            &"IU.SSPA.00.LH?".parse().unwrap(),
            &window(),
            60,
            &ProcessingArgs::default(),
            Some(&out),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::MultiChannel { ref ids } if ids.len() == 2));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_helicorder_title_shows_window() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        let source = FakeSource::new(vec![trace("IU.SSPA.00.LHZ", 1.0)]);
        let out = dir.path().join("heli.svg");

        plot_helicorder(
            &ctx,
            &source,
            &"IU.SSPA.00.LHZ".parse().unwrap(),
            &window(),
            5,
            &ProcessingArgs::default(),
            Some(&out),
        )
        .await
        .unwrap();

        let svg = std::fs::read_to_string(&out).unwrap();
        assert!(svg.contains("IU.SSPA.00.LHZ  2020-06-15T12:30:00 - 2020-06-15T12:38:20"));
    }

    #[tokio::test]
    async fn test_save_skips_missing_stations() {
        let dir = tempdir().unwrap();
        let source = FakeSource::new(vec![trace("PE.PAKC..HHZ", 10.0)]);
        let ids: Vec<SeedId> = vec!["PE.PAKC..HHZ".parse().unwrap(), "PE.NONE..HHZ".parse().unwrap()];

        let paths = save_waveforms(
            &source,
            &ids,
            &window(),
            &ProcessingArgs::default(),
            OutputFormat::Slist,
            dir.path(),
        )
        .await
        .unwrap();

        assert_eq!(paths, vec![dir.path().join("PE.PAKC..HHZ.SLIST")]);
        let text = std::fs::read_to_string(&paths[0]).unwrap();
        assert!(text.starts_with("TIMESERIES PE_PAKC__HHZ_D, 5001 samples, 10 sps"));
        assert!(text.contains("INTEGER, Counts"));
    }

    #[tokio::test]
    async fn test_save_single_missing_station_is_no_data() {
        let dir = tempdir().unwrap();
        let source = FakeSource::new(Vec::new());

        let err = save_waveforms(
            &source,
            &["PE.NONE..HHZ".parse().unwrap()],
            &window(),
            &ProcessingArgs::default(),
            OutputFormat::Mseed,
            dir.path(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::NoData { ref seed_id, .. } if seed_id == "PE.NONE..HHZ"));
    }

    #[tokio::test]
    async fn test_remove_response_needs_metadata() {
        let source = FakeSource::new(vec![trace("IU.SSPA.00.BHZ", 20.0)]);
        let ids = vec!["IU.SSPA.00.BHZ".parse().unwrap()];
        let args = ProcessingArgs {
            remove_response: true,
            ..Default::default()
        };

        let err = processing_spec(&args, &source, &ids, &window()).await.unwrap_err();
        assert!(matches!(err, Error::Inventory(_)));
    }

    #[tokio::test]
    async fn test_demean_is_logged_on_traces() {
        let source = FakeSource::new(vec![trace("IU.SSPA.00.BHZ", 20.0)]);
        let ids = vec!["IU.SSPA.00.BHZ".parse().unwrap()];
        let args = ProcessingArgs {
            demean: true,
            ..Default::default()
        };

        let stream = fetch_processed(&source, &ids, &window(), &args).await.unwrap();

        let trace = &stream.traces()[0];
        assert_eq!(trace.processing, vec![ProcessingStep::Demean]);
        let mean = trace.data.iter().sum::<f64>() / trace.len() as f64;
        assert!(mean.abs() < 1e-9);
    }

    #[test]
    fn test_helicorder_needs_bounds_or_last_day() {
        let err = helicorder_window(None, None, false).resolve().unwrap_err();
        assert!(matches!(err, Error::InvalidWindow(_)));

        assert!(helicorder_window(None, None, true).resolve().is_ok());
        let window = helicorder_window(Some(ts("2020-06-15T00:00:00")), None, false)
            .resolve()
            .unwrap();
        assert_eq!(window.end(), ts("2020-06-16T00:00:00"));
    }
}
