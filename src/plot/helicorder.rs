//! Helicorder (drum recorder style) plot of one channel
//!
//! The record is cut into lines of `interval_minutes`, stacked top to
//! bottom. Each line is demeaned on its own; all lines share one amplitude
//! scale so the largest excursion fills half a line spacing.

use chrono::{DateTime, Utc};
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::{Path, PathBuf};

use super::{envelope, render_error, render_svg, Figure};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::waveform::{secs_between, secs_to_duration, Stream};
use crate::window::{format_timestamp, TimeWindow};

const LINE_COLORS: [RGBColor; 4] = [BLACK, RED, GREEN, BLUE];
const DEFAULT_INTERVAL_MINUTES: u32 = 60;
const MIN_LINE_HEIGHT: u32 = 30;

/// Helicorder layout
#[derive(Debug, Clone)]
pub struct HelicorderOptions {
    pub width: u32,
    /// Minimum height of the whole figure
    pub height: u32,
    /// Length of one line
    pub interval_minutes: u32,
    /// Figure title; defaults to the channel id and start date
    pub title: Option<String>,
    /// Requested window, quoted when there is nothing to plot
    pub window: Option<TimeWindow>,
}

impl Default for HelicorderOptions {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 250,
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            title: None,
            window: None,
        }
    }
}

impl HelicorderOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            width: settings.plot_width,
            height: settings.plot_height,
            ..Default::default()
        }
    }
}

/// Points of one line, split wherever the data has a gap
type Line = Vec<Vec<(f64, f64)>>;

/// Cut the stream into lines; x in minutes from the line start
fn fold(stream: &Stream, origin: DateTime<Utc>, interval: f64, n_lines: usize) -> Vec<Line> {
    let mut lines: Vec<Line> = vec![Vec::new(); n_lines];

    for trace in stream {
        let offset = secs_between(origin, trace.start);
        let delta = trace.delta();
        let mut current = None;

        for (i, value) in trace.data.iter().enumerate() {
            let t = offset + i as f64 * delta;
            let line = ((t / interval).floor().max(0.0) as usize).min(n_lines - 1);
            if current != Some(line) {
                lines[line].push(Vec::new());
                current = Some(line);
            }
            let x = (t - line as f64 * interval) / 60.0;
            if let Some(segment) = lines[line].last_mut() {
                segment.push((x, *value));
            }
        }
    }

    lines
}

/// Demean each line, scale globally and offset line `l` to `n - 1 - l`
fn stack(lines: &mut [Line]) {
    for line in lines.iter_mut() {
        let (sum, count) = line
            .iter()
            .flatten()
            .fold((0.0, 0usize), |(s, c), p| (s + p.1, c + 1));
        if count > 0 {
            let mean = sum / count as f64;
            for p in line.iter_mut().flatten() {
                p.1 -= mean;
            }
        }
    }

    let peak = lines
        .iter()
        .flatten()
        .flatten()
        .fold(0.0_f64, |acc, p| acc.max(p.1.abs()));
    let peak = if peak > 0.0 { peak } else { 1.0 };

    let n = lines.len();
    for (l, line) in lines.iter_mut().enumerate() {
        let base = (n - 1 - l) as f64;
        for p in line.iter_mut().flatten() {
            p.1 = base + 0.5 * p.1 / peak;
        }
    }
}

struct HelicorderFigure<'a> {
    lines: Vec<Line>,
    origin: DateTime<Utc>,
    options: &'a HelicorderOptions,
    title: String,
}

impl Figure for HelicorderFigure<'_> {
    fn size(&self) -> (u32, u32) {
        let needed = 80 + MIN_LINE_HEIGHT * self.lines.len() as u32;
        (self.options.width, self.options.height.max(needed))
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>) -> Result<()> {
        let n = self.lines.len();
        let interval = self.options.interval_minutes as f64;
        let origin = self.origin;
        let line_label = move |y: &f64| {
            let k = y.round();
            if (y - k).abs() > 1e-6 || k < 0.0 || k >= n as f64 {
                return String::new();
            }
            let line = n - 1 - k as usize;
            (origin + secs_to_duration(line as f64 * interval * 60.0))
                .format("%H:%M")
                .to_string()
        };

        let mut chart = ChartBuilder::on(root)
            .caption(&self.title, ("sans-serif", 18))
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(60)
            .build_cartesian_2d(0.0..interval, -1.0..n as f64)
            .map_err(render_error)?;

        chart
            .configure_mesh()
            .disable_mesh()
            .x_desc("Minutes")
            .y_labels(n + 2)
            .y_label_formatter(&line_label)
            .draw()
            .map_err(render_error)?;

        let columns = self.options.width as usize;
        for (l, line) in self.lines.iter().enumerate() {
            let color = LINE_COLORS[l % LINE_COLORS.len()];
            for segment in line {
                chart
                    .draw_series(LineSeries::new(envelope(segment, columns), &color))
                    .map_err(render_error)?;
            }
        }

        Ok(())
    }
}

fn empty_stream(options: &HelicorderOptions) -> Error {
    let (start, end) = options
        .window
        .map(|w| (format_timestamp(&w.start()), format_timestamp(&w.end())))
        .unwrap_or_default();
    Error::NoData {
        seed_id: "any channel".to_string(),
        start,
        end,
    }
}

/// Plot a single-channel stream as a helicorder
///
/// Fails before anything is written when the stream is empty or holds more
/// than one channel. Without `output` the figure goes to
/// `<id>_helicorder.svg`. Returns the written path.
pub fn render_helicorder(
    stream: &Stream,
    output: Option<&Path>,
    options: &HelicorderOptions,
) -> Result<PathBuf> {
    let ids = stream.channel_ids();
    if ids.len() > 1 {
        return Err(Error::MultiChannel {
            ids: ids.iter().map(ToString::to_string).collect(),
        });
    }
    let (Some(id), Some((start, end))) = (ids.first(), stream.span()) else {
        return Err(empty_stream(options));
    };
    if options.interval_minutes == 0 {
        return Err(Error::InvalidWindow(
            "helicorder interval must be at least one minute".to_string(),
        ));
    }

    let interval = options.interval_minutes as f64 * 60.0;
    let n_lines = ((secs_between(start, end) / interval).ceil() as usize).max(1);
    let mut lines = fold(stream, start, interval, n_lines);
    stack(&mut lines);

    let path = match output {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(format!("{}_helicorder.svg", id)),
    };

    let figure = HelicorderFigure {
        lines,
        origin: start,
        options,
        title: options
            .title
            .clone()
            .unwrap_or_else(|| format!("{}  {}", id, start.format("%Y-%m-%d"))),
    };

    render_svg(&figure, &path)
}
