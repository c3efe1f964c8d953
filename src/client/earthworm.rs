//! Earthworm wave server client
//!
//! Speaks the wave server V protocol over plain TCP, one connection per
//! request:
//! - `MENU: <reqid> SCNL` lists the tanks (channels) and their time spans
//! - `GETSCNLRAW: <reqid> <sta> <chan> <net> <loc> <start> <end>` returns
//!   raw TraceBuf2 packets
//!
//! TraceBuf2 packet layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (64 bytes)                       │
//! │   pinno: i32        nsamp: i32          │
//! │   starttime: f64    endtime: f64        │
//! │   samprate: f64                         │
//! │   sta: [u8; 7]      net: [u8; 9]        │
//! │   chan: [u8; 4]     loc: [u8; 3]        │
//! │   version: [u8; 2]  datatype: [u8; 3]   │
//! │   quality: [u8; 2]  pad: [u8; 2]        │
//! ├─────────────────────────────────────────┤
//! │ SAMPLES (nsamp * width)                 │
//! └─────────────────────────────────────────┘
//! ```
//! The datatype (`s2`, `s4`, `t4`, `t8`, `i2`, `i4`, `f4`, `f8`) gives the
//! byte order of the whole packet: `s`/`t` big-endian, `i`/`f` little-endian.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::{finish, no_data, with_timeout, WaveformSource};
use crate::error::{Error, Result};
use crate::waveform::{SampleEncoding, SeedId, Stream, Trace};
use crate::window::{from_epoch_seconds, to_epoch_seconds, TimeWindow};

const MENU_REQUEST_ID: &str = "plotew_menu";
const RAW_REQUEST_ID: &str = "plotew_raw";
const TRACEBUF_HEADER_SIZE: usize = 64;

/// One tank listed by `MENU`
#[derive(Debug, Clone, PartialEq)]
pub struct MenuEntry {
    pub pin: i32,
    pub id: SeedId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub datatype: String,
}

/// Wave server client
pub struct EarthwormClient {
    host: String,
    port: u16,
    timeout: Option<Duration>,
}

impl EarthwormClient {
    pub fn new(host: impl Into<String>, port: u16, timeout: Option<Duration>) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn connection_error(&self, reason: impl std::fmt::Display) -> Error {
        Error::Connection {
            endpoint: self.address(),
            reason: reason.to_string(),
        }
    }

    /// Open a connection and send one request line
    async fn send(&self, request: &str) -> Result<BufReader<TcpStream>> {
        tracing::debug!("{} <- {}", self.address(), request.trim_end());
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| self.connection_error(e))?;
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| self.connection_error(e))?;
        Ok(BufReader::new(stream))
    }

    /// List the channels the server holds
    pub async fn menu(&self) -> Result<Vec<MenuEntry>> {
        with_timeout(self.timeout, &self.address(), async {
            let mut conn = self.send(&format!("MENU: {} SCNL\n", MENU_REQUEST_ID)).await?;
            let mut line = Vec::new();
            conn.read_until(b'\n', &mut line)
                .await
                .map_err(|e| self.connection_error(e))?;
            parse_menu(&String::from_utf8_lossy(&line))
        })
        .await
    }

    /// Raw packets for one concrete channel; empty when the server has none
    pub async fn request_raw(&self, id: &SeedId, window: &TimeWindow) -> Result<Vec<Trace>> {
        let location = if id.location().is_empty() {
            "--"
        } else {
            id.location()
        };
        let request = format!(
            "GETSCNLRAW: {} {} {} {} {} {:.6} {:.6}\n",
            RAW_REQUEST_ID,
            id.station(),
            id.channel(),
            id.network(),
            location,
            to_epoch_seconds(&window.start()),
            to_epoch_seconds(&window.end())
        );

        with_timeout(self.timeout, &self.address(), async {
            let mut conn = self.send(&request).await?;
            let mut header = Vec::new();
            conn.read_until(b'\n', &mut header)
                .await
                .map_err(|e| self.connection_error(e))?;
            let header = String::from_utf8_lossy(&header);
            let tokens: Vec<&str> = header.split_whitespace().collect();

            let flag = tokens
                .get(6)
                .ok_or_else(|| Error::Protocol(format!("short reply header '{}'", header.trim())))?;
            if *flag != "F" {
                tracing::warn!("{}: {} ({})", id, flag_meaning(flag), flag);
                return Ok(Vec::new());
            }

            let nbytes: usize = tokens
                .last()
                .and_then(|t| t.parse().ok())
                .ok_or_else(|| Error::Protocol(format!("no byte count in '{}'", header.trim())))?;
            let mut payload = vec![0u8; nbytes];
            conn.read_exact(&mut payload)
                .await
                .map_err(|e| self.connection_error(e))?;
            parse_tracebufs(&payload)
        })
        .await
    }
}

#[async_trait]
impl WaveformSource for EarthwormClient {
    fn describe(&self) -> String {
        format!("Earthworm wave server {}", self.address())
    }

    async fn fetch(&self, id: &SeedId, window: &TimeWindow) -> Result<Stream> {
        let targets: Vec<SeedId> = if id.has_wildcards() {
            let matches: Vec<SeedId> = self
                .menu()
                .await?
                .into_iter()
                .filter(|entry| id.matches(&entry.id))
                .filter(|entry| entry.end >= window.start() && entry.start <= window.end())
                .map(|entry| entry.id)
                .collect();
            tracing::debug!("{} expands to {} channel(s)", id, matches.len());
            matches
        } else {
            vec![id.clone()]
        };

        if targets.is_empty() {
            return Err(no_data(id, window));
        }

        let mut stream = Stream::default();
        for target in &targets {
            for trace in self.request_raw(target, window).await? {
                stream.push(trace);
            }
        }
        finish(stream, id, window)
    }
}

fn flag_meaning(flag: &str) -> &'static str {
    match flag {
        "FR" => "requested window is later than the tank",
        "FL" => "requested window is earlier than the tank",
        "FG" => "requested window falls in a gap",
        "FB" => "request syntax error",
        "FC" => "tank is corrupt",
        "FN" => "no such tank on the server",
        "FU" => "unknown server error",
        _ => "unrecognised return flag",
    }
}

fn parse_epoch(token: &str) -> Result<DateTime<Utc>> {
    token
        .parse::<f64>()
        .ok()
        .and_then(from_epoch_seconds)
        .ok_or_else(|| Error::Protocol(format!("invalid time '{}' in menu", token)))
}

/// Parse a `MENU` reply line
pub fn parse_menu(line: &str) -> Result<Vec<MenuEntry>> {
    let mut tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.first() == Some(&MENU_REQUEST_ID) {
        tokens.remove(0);
    }
    if tokens.len() % 8 == 1 {
        if let Some(flag) = tokens.pop() {
            if matches!(flag, "FN" | "FC" | "FU") {
                tracing::warn!("Menu request failed: {} ({})", flag_meaning(flag), flag);
                return Ok(Vec::new());
            }
        }
    }
    if tokens.len() % 8 != 0 {
        return Err(Error::Protocol(format!(
            "menu reply has {} tokens, not a multiple of 8",
            tokens.len()
        )));
    }

    tokens
        .chunks_exact(8)
        .map(|t| {
            let location = if t[4] == "--" { "" } else { t[4] };
            Ok(MenuEntry {
                pin: t[0]
                    .parse()
                    .map_err(|_| Error::Protocol(format!("invalid pin '{}'", t[0])))?,
                id: SeedId::new(t[3], t[1], location, t[2]),
                start: parse_epoch(t[5])?,
                end: parse_epoch(t[6])?,
                datatype: t[7].to_string(),
            })
        })
        .collect()
}

struct PacketReader<'a> {
    buf: &'a [u8],
    big_endian: bool,
}

impl PacketReader<'_> {
    fn array<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[offset..offset + N]);
        out
    }

    fn i16(&self, offset: usize) -> i16 {
        let b = self.array(offset);
        if self.big_endian { i16::from_be_bytes(b) } else { i16::from_le_bytes(b) }
    }

    fn i32(&self, offset: usize) -> i32 {
        let b = self.array(offset);
        if self.big_endian { i32::from_be_bytes(b) } else { i32::from_le_bytes(b) }
    }

    fn f32(&self, offset: usize) -> f32 {
        let b = self.array(offset);
        if self.big_endian { f32::from_be_bytes(b) } else { f32::from_le_bytes(b) }
    }

    fn f64(&self, offset: usize) -> f64 {
        let b = self.array(offset);
        if self.big_endian { f64::from_be_bytes(b) } else { f64::from_le_bytes(b) }
    }

    fn code(&self, offset: usize, len: usize) -> String {
        let raw = &self.buf[offset..offset + len];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(len);
        String::from_utf8_lossy(&raw[..end]).trim().to_string()
    }
}

/// Decode concatenated TraceBuf2 packets, one trace per packet
///
/// A truncated final packet ends decoding.
pub fn parse_tracebufs(mut buf: &[u8]) -> Result<Vec<Trace>> {
    let mut traces = Vec::new();

    while buf.len() >= TRACEBUF_HEADER_SIZE {
        let datatype = [buf[57], buf[58]];
        let (big_endian, integer) = match datatype[0] {
            b's' => (true, true),
            b't' => (true, false),
            b'i' => (false, true),
            b'f' => (false, false),
            _ => {
                return Err(Error::Protocol(format!(
                    "unknown TraceBuf2 datatype {:?}",
                    String::from_utf8_lossy(&datatype)
                )))
            }
        };
        let (width, encoding) = match (datatype[1], integer) {
            (b'2', true) => (2, SampleEncoding::Int16),
            (b'4', true) => (4, SampleEncoding::Int32),
            (b'4', false) => (4, SampleEncoding::Float32),
            (b'8', false) => (8, SampleEncoding::Float64),
            _ => {
                return Err(Error::Protocol(format!(
                    "unsupported TraceBuf2 datatype {:?}",
                    String::from_utf8_lossy(&datatype)
                )))
            }
        };

        let header = PacketReader { buf, big_endian };
        let nsamp = header.i32(4);
        if nsamp < 0 {
            return Err(Error::Protocol(format!("negative sample count {}", nsamp)));
        }
        let nsamp = nsamp as usize;
        let packet_len = TRACEBUF_HEADER_SIZE + nsamp * width;
        if buf.len() < packet_len {
            tracing::warn!(
                "Truncated TraceBuf2 packet: need {} bytes, have {}",
                packet_len,
                buf.len()
            );
            break;
        }

        let start = from_epoch_seconds(header.f64(8))
            .ok_or_else(|| Error::Protocol(format!("invalid packet start {}", header.f64(8))))?;
        let sample_rate = header.f64(24);
        let location = header.code(52, 3);
        let location = if location == "--" { String::new() } else { location };
        let id = SeedId::new(header.code(39, 9), header.code(32, 7), location, header.code(48, 4));

        let data: Vec<f64> = (0..nsamp)
            .map(|i| {
                let at = TRACEBUF_HEADER_SIZE + i * width;
                match encoding {
                    SampleEncoding::Int16 => header.i16(at) as f64,
                    SampleEncoding::Int32 => header.i32(at) as f64,
                    SampleEncoding::Float32 => header.f32(at) as f64,
                    SampleEncoding::Float64 => header.f64(at),
                }
            })
            .collect();

        traces.push(Trace::new(id, start, sample_rate, data).with_encoding(encoding));
        buf = &buf[packet_len..];
    }

    Ok(traces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::parse_timestamp;
    use tokio::net::TcpListener;

    const START: f64 = 1_592_224_200.0; // 2020-06-15T12:30:00Z

    fn put(buf: &mut [u8], offset: usize, text: &str) {
        buf[offset..offset + text.len()].copy_from_slice(text.as_bytes());
    }

    fn tracebuf(chan: &str, loc: &str, start: f64, samples: &[i32], big_endian: bool) -> Vec<u8> {
        let rate = 1.0;
        let mut buf = vec![0u8; TRACEBUF_HEADER_SIZE];
        let end = start + (samples.len() as f64 - 1.0) / rate;
        let ints = |v: i32| if big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        let floats = |v: f64| if big_endian { v.to_be_bytes() } else { v.to_le_bytes() };

        buf[0..4].copy_from_slice(&ints(7));
        buf[4..8].copy_from_slice(&ints(samples.len() as i32));
        buf[8..16].copy_from_slice(&floats(start));
        buf[16..24].copy_from_slice(&floats(end));
        buf[24..32].copy_from_slice(&floats(rate));
        put(&mut buf, 32, "SSPA");
        put(&mut buf, 39, "IU");
        put(&mut buf, 48, chan);
        put(&mut buf, 52, loc);
        put(&mut buf, 55, "20");
        put(&mut buf, 57, if big_endian { "s4" } else { "i4" });
        for s in samples {
            buf.extend_from_slice(&ints(*s));
        }
        buf
    }

    fn window() -> TimeWindow {
        TimeWindow::new(
            parse_timestamp("2020-06-15T12:30:00").unwrap(),
            parse_timestamp("2020-06-15T12:31:00").unwrap(),
        )
        .unwrap()
    }

    /// Serve every connection with `reply(request_line)`
    async fn fake_server<F>(reply: F) -> u16
    where
        F: Fn(&str) -> Vec<u8> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let mut conn = BufReader::new(socket);
                let mut line = String::new();
                conn.read_line(&mut line).await.unwrap();
                conn.get_mut().write_all(&reply(&line)).await.unwrap();
                conn.get_mut().shutdown().await.ok();
            }
        });
        port
    }

    fn raw_reply(chan: &str, packets: Vec<u8>) -> Vec<u8> {
        let mut out = format!(
            "{} 7 SSPA {} IU 00 F s4 {:.1} {:.1} {}\n",
            RAW_REQUEST_ID,
            chan,
            START,
            START + 59.0,
            packets.len()
        )
        .into_bytes();
        out.extend(packets);
        out
    }

    #[test]
    fn test_parse_menu() {
        let line = format!(
            "{} 1 SSPA BHZ IU 00 {START} {} s4 2 ALLY HHZ LD -- {START} {} i4 \n",
            MENU_REQUEST_ID,
            START + 3600.0,
            START + 60.0
        );
        let menu = parse_menu(&line).unwrap();
        assert_eq!(menu.len(), 2);
        assert_eq!(menu[0].id.to_string(), "IU.SSPA.00.BHZ");
        assert_eq!(menu[0].start, parse_timestamp("2020-06-15T12:30:00").unwrap());
        assert_eq!(menu[1].id.to_string(), "LD.ALLY..HHZ");
        assert_eq!(menu[1].datatype, "i4");

        assert!(parse_menu(&format!("{} FN\n", MENU_REQUEST_ID)).unwrap().is_empty());
        assert!(parse_menu("1 SSPA BHZ IU 00 0.0\n").is_err());
    }

    #[test]
    fn test_parse_tracebufs_both_byte_orders() {
        let mut buf = tracebuf("BHZ", "00", START, &[1, -2, 3], true);
        buf.extend(tracebuf("BHN", "--", START, &[40000, 5], false));

        let traces = parse_tracebufs(&buf).unwrap();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].id.to_string(), "IU.SSPA.00.BHZ");
        assert_eq!(traces[0].data, vec![1.0, -2.0, 3.0]);
        assert_eq!(traces[0].encoding, SampleEncoding::Int32);
        assert_eq!(traces[1].id.to_string(), "IU.SSPA..BHN");
        assert_eq!(traces[1].data, vec![40000.0, 5.0]);
        assert_eq!(traces[1].start, parse_timestamp("2020-06-15T12:30:00").unwrap());
    }

    #[test]
    fn test_truncated_packet_ends_parsing() {
        let mut buf = tracebuf("BHZ", "00", START, &[1, 2, 3], true);
        let second = tracebuf("BHZ", "00", START + 3.0, &[4, 5, 6], true);
        buf.extend_from_slice(&second[..second.len() - 2]);

        let traces = parse_tracebufs(&buf).unwrap();
        assert_eq!(traces.len(), 1);
    }

    #[test]
    fn test_unknown_datatype() {
        let mut buf = tracebuf("BHZ", "00", START, &[1], true);
        buf[57] = b'x';
        assert!(matches!(parse_tracebufs(&buf), Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_fetch_merges_packets() {
        let port = fake_server(|line| {
            assert!(line.starts_with("GETSCNLRAW: plotew_raw SSPA BHZ IU 00 1592224200.000000"));
            let first: Vec<i32> = (0..30).collect();
            let second: Vec<i32> = (30..70).collect();
            let mut packets = tracebuf("BHZ", "00", START, &first, true);
            packets.extend(tracebuf("BHZ", "00", START + 30.0, &second, true));
            raw_reply("BHZ", packets)
        })
        .await;

        let client = EarthwormClient::new("127.0.0.1", port, Some(Duration::from_secs(5)));
        let stream = client
            .fetch(&"IU.SSPA.00.BHZ".parse().unwrap(), &window())
            .await
            .unwrap();

        assert_eq!(stream.len(), 1);
        let trace = &stream.traces()[0];
        // Trimmed to 12:30:00 ..= 12:31:00
        assert_eq!(trace.len(), 61);
        assert_eq!(trace.data[60], 60.0);
    }

    #[tokio::test]
    async fn test_wildcard_fetch_uses_menu() {
        let port = fake_server(|line| {
            if line.starts_with("MENU") {
                return format!(
                    "{} 1 SSPA BHZ IU 00 {START} {} s4 2 SSPA BHN IU 00 {START} {} s4 3 SSPA HHZ IU 00 {START} {} s4\n",
                    MENU_REQUEST_ID,
                    START + 3600.0,
                    START + 3600.0,
                    START + 3600.0
                )
                .into_bytes();
            }
            let chan = line.split_whitespace().nth(3).unwrap_or("BHZ").to_string();
            raw_reply(&chan, tracebuf(&chan, "00", START, &[1, 2, 3], true))
        })
        .await;

        let client = EarthwormClient::new("127.0.0.1", port, Some(Duration::from_secs(5)));
        let stream = client
            .fetch(&"IU.SSPA.00.BH?".parse().unwrap(), &window())
            .await
            .unwrap();

        let ids: Vec<String> = stream.channel_ids().iter().map(ToString::to_string).collect();
        assert_eq!(ids, vec!["IU.SSPA.00.BHN", "IU.SSPA.00.BHZ"]);
    }

    #[tokio::test]
    async fn test_gap_flag_is_no_data() {
        let port = fake_server(|_| format!("{} 7 SSPA BHZ IU 00 FG s4\n", RAW_REQUEST_ID).into_bytes()).await;

        let client = EarthwormClient::new("127.0.0.1", port, Some(Duration::from_secs(5)));
        let err = client
            .fetch(&"IU.SSPA.00.BHZ".parse().unwrap(), &window())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoData { .. }));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let client = EarthwormClient::new("127.0.0.1", port, Some(Duration::from_secs(5)));
        let err = client
            .fetch(&"IU.SSPA.00.BHZ".parse().unwrap(), &window())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection { ref endpoint, .. } if endpoint.ends_with(&port.to_string())));
    }
}
