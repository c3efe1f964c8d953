//! Waveform sources
//!
//! This module provides the backends waveforms are fetched from:
//! - Earthworm wave server (`MENU` / `GETSCNLRAW` over TCP)
//! - FDSN web services archive (dataselect + station)

mod earthworm;
mod fdsn;

pub use earthworm::{parse_tracebufs, EarthwormClient, MenuEntry};
pub use fdsn::FdsnClient;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::config::{ServerEndpoint, Settings};
use crate::error::{Error, Result};
use crate::processing::Inventory;
use crate::waveform::{SeedId, Stream};
use crate::window::{format_timestamp, TimeWindow};

/// Common trait for all waveform backends
#[async_trait]
pub trait WaveformSource: Send + Sync {
    /// Human-readable description of where data comes from
    fn describe(&self) -> String;

    /// Fetch every trace of `id` (wildcards allowed) within `window`
    ///
    /// Fails with `NoData` when nothing overlaps the window.
    async fn fetch(&self, id: &SeedId, window: &TimeWindow) -> Result<Stream>;

    /// Station metadata with responses for `ids`, when the backend serves it
    async fn fetch_inventory(&self, _ids: &[SeedId], _window: &TimeWindow) -> Result<Option<Inventory>> {
        Ok(None)
    }
}

/// Build the backend for `endpoint`
pub fn connect(endpoint: &ServerEndpoint, settings: &Settings) -> Result<Box<dyn WaveformSource>> {
    match endpoint {
        ServerEndpoint::Waveserver { host, port } => Ok(Box::new(EarthwormClient::new(
            host.clone(),
            *port,
            settings.timeout,
        ))),
        ServerEndpoint::Archive(provider) => Ok(Box::new(FdsnClient::new(provider, settings.timeout)?)),
    }
}

/// Merge, sort and trim fetched traces; `NoData` when nothing is left
pub(crate) fn finish(mut stream: Stream, id: &SeedId, window: &TimeWindow) -> Result<Stream> {
    stream.merge_contiguous();
    stream.trim(window);
    if stream.is_empty() {
        return Err(no_data(id, window));
    }
    Ok(stream)
}

pub(crate) fn no_data(id: &SeedId, window: &TimeWindow) -> Error {
    Error::NoData {
        seed_id: id.to_string(),
        start: format_timestamp(&window.start()),
        end: format_timestamp(&window.end()),
    }
}

/// Await `fut`, failing with `Connection` once `timeout` elapses
pub(crate) async fn with_timeout<T>(
    timeout: Option<Duration>,
    endpoint: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Connection {
                endpoint: endpoint.to_string(),
                reason: format!("timed out after {} s", limit.as_secs_f64()),
            })?,
        None => fut.await,
    }
}
