//! FDSN web services client
//!
//! Waveforms come from `fdsnws/dataselect` as miniSEED, station metadata
//! from `fdsnws/station` as StationXML.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use super::{finish, no_data, with_timeout, WaveformSource};
use crate::config::ArchiveProvider;
use crate::error::{Error, Result};
use crate::mseed::decode_records;
use crate::processing::Inventory;
use crate::waveform::{SeedId, Stream};
use crate::window::TimeWindow;

const FDSN_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// FDSN archive client
pub struct FdsnClient {
    client: Client,
    base_url: String,
    timeout: Option<Duration>,
}

impl FdsnClient {
    pub fn new(provider: &ArchiveProvider, timeout: Option<Duration>) -> Result<Self> {
        let base_url = provider.base_url().to_string();
        let mut builder = Client::builder().user_agent(concat!("plotew/", env!("CARGO_PKG_VERSION")));
        if let Some(limit) = timeout {
            builder = builder.timeout(limit);
        }
        let client = builder.build().map_err(|e| Error::Connection {
            endpoint: base_url.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    fn query_params(id: &SeedId, window: &TimeWindow) -> Vec<(&'static str, String)> {
        let location = if id.location().is_empty() {
            "--".to_string()
        } else {
            id.location().to_string()
        };
        vec![
            ("network", id.network().to_string()),
            ("station", id.station().to_string()),
            ("location", location),
            ("channel", id.channel().to_string()),
            ("starttime", window.start().format(FDSN_TIME_FORMAT).to_string()),
            ("endtime", window.end().format(FDSN_TIME_FORMAT).to_string()),
        ]
    }

    /// GET a service endpoint; `None` on 204/404
    async fn get(&self, service: &str, params: &[(&str, String)]) -> Result<Option<Vec<u8>>> {
        let url = format!("{}/fdsnws/{}/1/query", self.base_url, service);
        let connection_error = |reason: String| Error::Connection {
            endpoint: url.clone(),
            reason,
        };

        with_timeout(self.timeout, &url, async {
            let response = self
                .client
                .get(&url)
                .query(params)
                .send()
                .await
                .map_err(|e| connection_error(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let snippet: String = body.chars().take(200).collect();
                return Err(connection_error(format!("HTTP {}: {}", status, snippet.trim())));
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| connection_error(e.to_string()))?;
            Ok(Some(body.to_vec()))
        })
        .await
    }
}

#[async_trait]
impl WaveformSource for FdsnClient {
    fn describe(&self) -> String {
        format!("FDSN archive {}", self.base_url)
    }

    async fn fetch(&self, id: &SeedId, window: &TimeWindow) -> Result<Stream> {
        let mut params = Self::query_params(id, window);
        params.push(("nodata", "404".to_string()));

        let Some(body) = self.get("dataselect", &params).await? else {
            return Err(no_data(id, window));
        };

        let records = decode_records(&body)?;
        tracing::debug!("{}: {} miniSEED records", id, records.len());
        let stream = Stream::new(records.into_iter().map(|r| r.into_trace()).collect());
        finish(stream, id, window)
    }

    async fn fetch_inventory(&self, ids: &[SeedId], window: &TimeWindow) -> Result<Option<Inventory>> {
        let mut inventory = Inventory::default();
        for id in ids {
            let mut params = Self::query_params(id, window);
            params.push(("level", "response".to_string()));
            params.push(("nodata", "404".to_string()));

            match self.get("station", &params).await? {
                Some(body) => {
                    let xml = String::from_utf8_lossy(&body);
                    inventory.extend(Inventory::from_station_xml(&xml)?);
                }
                None => tracing::warn!("No station metadata for {}", id),
            }
        }
        if inventory.is_empty() {
            return Ok(None);
        }
        tracing::debug!("Loaded {} channel response epoch(s)", inventory.len());
        Ok(Some(inventory))
    }
}
