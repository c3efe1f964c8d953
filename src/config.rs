//! Configuration System
//!
//! Two pieces live here:
//! - the config store, a two-line `host\nport\n` file remembering the
//!   default wave server (`~/.plotEW.cfg` unless overridden)
//! - runtime settings (timeouts, log level, plot size) read from
//!   environment variables
//!
//! Endpoint resolution combines CLI flags with the stored values.

use std::fmt;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default location of the config store
pub const DEFAULT_CONFIG_FILE: &str = "~/.plotEW.cfg";

/// Host and port as persisted in the config store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEndpoint {
    pub host: String,
    pub port: u16,
}

/// The two-line config file
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Create a store for `path`, expanding a leading `~`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: expand_home(path.as_ref()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored endpoint, `None` when the file does not exist
    pub fn load(&self) -> std::result::Result<Option<StoredEndpoint>, ConfigError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConfigError::Io {
                    path: self.path.clone(),
                    error: e.to_string(),
                })
            }
        };

        let mut lines = content.lines().map(str::trim);
        let host = lines.next().filter(|l| !l.is_empty());
        let port = lines.next().filter(|l| !l.is_empty());

        let (host, port) = match (host, port) {
            (Some(host), Some(port)) => (host, port),
            _ => {
                return Err(ConfigError::Parse {
                    path: self.path.clone(),
                    error: "expected two lines: host then port".to_string(),
                })
            }
        };

        let port = port.parse::<u16>().map_err(|e| ConfigError::Parse {
            path: self.path.clone(),
            error: format!("invalid port '{}': {}", port, e),
        })?;

        tracing::debug!("Loaded wave server {}:{} from {:?}", host, port, self.path);

        Ok(Some(StoredEndpoint {
            host: host.to_string(),
            port,
        }))
    }

    /// Overwrite the store with `endpoint`
    ///
    /// Writes a sibling temporary file and renames it into place.
    pub fn save(&self, endpoint: &StoredEndpoint) -> std::result::Result<(), ConfigError> {
        let io_err = |e: std::io::Error| ConfigError::Io {
            path: self.path.clone(),
            error: e.to_string(),
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, format!("{}\n{}\n", endpoint.host, endpoint.port)).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;

        tracing::info!("Saved wave server {}:{} to {:?}", endpoint.host, endpoint.port, self.path);
        Ok(())
    }
}

/// Expand a leading `~` to the user's home directory
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Named public FDSN data centres
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveProvider {
    Iris,
    Geofon,
    Orfeus,
    Resif,
    Ingv,
    Ncedc,
    Scedc,
    Eth,
    Usgs,
    /// Any other FDSN web service root
    Custom(String),
}

impl ArchiveProvider {
    /// Root URL under which `/fdsnws/...` lives
    pub fn base_url(&self) -> &str {
        match self {
            ArchiveProvider::Iris => "https://service.iris.edu",
            ArchiveProvider::Geofon => "https://geofon.gfz-potsdam.de",
            ArchiveProvider::Orfeus => "https://www.orfeus-eu.org",
            ArchiveProvider::Resif => "https://ws.resif.fr",
            ArchiveProvider::Ingv => "https://webservices.ingv.it",
            ArchiveProvider::Ncedc => "https://service.ncedc.org",
            ArchiveProvider::Scedc => "https://service.scedc.caltech.edu",
            ArchiveProvider::Eth => "https://eida.ethz.ch",
            ArchiveProvider::Usgs => "https://earthquake.usgs.gov",
            ArchiveProvider::Custom(url) => url.trim_end_matches('/'),
        }
    }
}

impl Default for ArchiveProvider {
    fn default() -> Self {
        ArchiveProvider::Iris
    }
}

impl FromStr for ArchiveProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(ArchiveProvider::Custom(s.trim_end_matches('/').to_string()));
        }
        match s.to_uppercase().as_str() {
            "IRIS" | "EARTHSCOPE" => Ok(ArchiveProvider::Iris),
            "GEOFON" | "GFZ" => Ok(ArchiveProvider::Geofon),
            "ORFEUS" | "ODC" => Ok(ArchiveProvider::Orfeus),
            "RESIF" => Ok(ArchiveProvider::Resif),
            "INGV" => Ok(ArchiveProvider::Ingv),
            "NCEDC" => Ok(ArchiveProvider::Ncedc),
            "SCEDC" => Ok(ArchiveProvider::Scedc),
            "ETH" => Ok(ArchiveProvider::Eth),
            "USGS" => Ok(ArchiveProvider::Usgs),
            other => Err(format!(
                "unknown archive '{}' (use IRIS, GEOFON, ORFEUS, RESIF, INGV, NCEDC, SCEDC, ETH, USGS or a URL)",
                other
            )),
        }
    }
}

impl fmt::Display for ArchiveProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveProvider::Iris => write!(f, "IRIS"),
            ArchiveProvider::Geofon => write!(f, "GEOFON"),
            ArchiveProvider::Orfeus => write!(f, "ORFEUS"),
            ArchiveProvider::Resif => write!(f, "RESIF"),
            ArchiveProvider::Ingv => write!(f, "INGV"),
            ArchiveProvider::Ncedc => write!(f, "NCEDC"),
            ArchiveProvider::Scedc => write!(f, "SCEDC"),
            ArchiveProvider::Eth => write!(f, "ETH"),
            ArchiveProvider::Usgs => write!(f, "USGS"),
            ArchiveProvider::Custom(url) => write!(f, "{}", url),
        }
    }
}

/// Where waveforms come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEndpoint {
    Waveserver { host: String, port: u16 },
    Archive(ArchiveProvider),
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEndpoint::Waveserver { host, port } => write!(f, "{}:{}", host, port),
            ServerEndpoint::Archive(provider) => write!(f, "archive {}", provider),
        }
    }
}

/// Pick the data source for this invocation
///
/// Archive mode wins unconditionally. Otherwise CLI host/port override the
/// stored values field by field, and both must end up present.
pub fn resolve_endpoint(
    from_archive: bool,
    archive: &ArchiveProvider,
    host: Option<&str>,
    port: Option<u16>,
    stored: Option<&StoredEndpoint>,
) -> Result<ServerEndpoint> {
    if from_archive {
        return Ok(ServerEndpoint::Archive(archive.clone()));
    }

    let host = host
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .or_else(|| stored.map(|s| s.host.clone()));
    let port = port.or_else(|| stored.map(|s| s.port));

    match (host, port) {
        (Some(host), Some(port)) => Ok(ServerEndpoint::Waveserver { host, port }),
        _ => Err(Error::ConfigurationMissing),
    }
}

/// Interactively ask for host and port, offering current values as defaults
pub fn prompt_endpoint<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    current: Option<&StoredEndpoint>,
) -> Result<StoredEndpoint> {
    let default_host = current.map(|c| c.host.clone()).unwrap_or_default();
    let default_port = current.map(|c| c.port.to_string()).unwrap_or_default();

    let host = prompt_line(
        input,
        output,
        "Please enter the IP address for the earthworm wave server",
        &default_host,
    )?;

    loop {
        let port = prompt_line(
            input,
            output,
            "Please enter the port number for the earthworm wave server",
            &default_port,
        )?;
        match port.parse::<u16>() {
            Ok(port) if !host.is_empty() => return Ok(StoredEndpoint { host, port }),
            Ok(_) => return Err(Error::ConfigurationMissing),
            Err(_) => {
                writeln!(output, "Error: '{}' is not a valid port number", port)?;
            }
        }
    }
}

fn prompt_line<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    question: &str,
    default: &str,
) -> Result<String> {
    if default.is_empty() {
        write!(output, "{}: ", question)?;
    } else {
        write!(output, "{} [{}]: ", question, default)?;
    }
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "input closed before an answer was given",
        )));
    }

    let answer = line.trim();
    Ok(if answer.is_empty() {
        default.to_string()
    } else {
        answer.to_string()
    })
}

/// Runtime settings with environment overrides
#[derive(Debug, Clone)]
pub struct Settings {
    /// Network timeout; `None` waits forever
    pub timeout: Option<Duration>,
    /// Default log filter for the crate
    pub log_level: String,
    pub plot_width: u32,
    /// Height of a single stream panel, or of the whole helicorder
    pub plot_height: u32,
}

fn default_timeout() -> Option<Duration> {
    Some(Duration::from_secs(120))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            log_level: default_log_level(),
            plot_width: 1000,
            plot_height: 250,
        }
    }
}

impl Settings {
    /// Defaults with `PLOTEW_*` environment overrides
    ///
    /// Also returns the `KEY=value` overrides that were ignored, so they can
    /// be logged once tracing is up.
    pub fn from_env() -> (Self, Vec<String>) {
        let mut settings = Settings::default();
        let ignored = settings.apply_overrides(|key| std::env::var(key).ok());
        (settings, ignored)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Vec<String> {
        let mut ignored = Vec::new();
        let mut reject = |key: &str, value: &str| ignored.push(format!("{}={}", key, value));

        if let Some(secs) = var("PLOTEW_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                Ok(0) => self.timeout = None,
                Ok(s) => self.timeout = Some(Duration::from_secs(s)),
                Err(_) => reject("PLOTEW_TIMEOUT_SECS", &secs),
            }
        }
        if let Some(level) = var("PLOTEW_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(width) = var("PLOTEW_PLOT_WIDTH") {
            match width.parse() {
                Ok(w) => self.plot_width = w,
                Err(_) => reject("PLOTEW_PLOT_WIDTH", &width),
            }
        }
        if let Some(height) = var("PLOTEW_PLOT_HEIGHT") {
            match height.parse() {
                Ok(h) => self.plot_height = h,
                Err(_) => reject("PLOTEW_PLOT_HEIGHT", &height),
            }
        }
        ignored
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}
