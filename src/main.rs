//! plotew
//!
//! Fetch, process, plot and save seismic waveforms.

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plotew::cli::Cli;
use plotew::commands;
use plotew::config::Settings;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let (settings, ignored) = Settings::from_env();

    // RUST_LOG wins; otherwise -v/-vv raise the configured level
    let default_filter = match cli.verbose {
        0 => format!("plotew={}", settings.log_level),
        1 => "plotew=debug".to_string(),
        _ => "plotew=trace".to_string(),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    for entry in &ignored {
        tracing::warn!("Ignoring invalid {}", entry);
    }
    tracing::debug!("plotew v{}", env!("CARGO_PKG_VERSION"));

    match commands::run(cli, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
