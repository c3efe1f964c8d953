//! Multi-panel stream plot

use chrono::{DateTime, Utc};
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::{Path, PathBuf};

use super::{envelope, render_error, render_svg, value_range, Figure};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::waveform::{secs_between, secs_to_duration, SeedId, Stream, Trace};
use crate::window::format_timestamp;

const TITLE_HEIGHT: u32 = 40;

/// Stream plot layout
#[derive(Debug, Clone)]
pub struct PlotOptions {
    pub width: u32,
    /// Height of each trace panel
    pub panel_height: u32,
    /// Figure title; defaults to the plotted time span
    pub title: Option<String>,
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self {
            width: 1000,
            panel_height: 250,
            title: None,
        }
    }
}

impl PlotOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            width: settings.plot_width,
            panel_height: settings.plot_height,
            title: None,
        }
    }
}

/// One panel: every trace of one channel, in time order
struct Panel<'a> {
    id: SeedId,
    traces: Vec<&'a Trace>,
}

struct StreamFigure<'a> {
    panels: Vec<Panel<'a>>,
    options: &'a PlotOptions,
    origin: DateTime<Utc>,
    span: f64,
    title: String,
}

impl Figure for StreamFigure<'_> {
    fn size(&self) -> (u32, u32) {
        (
            self.options.width,
            TITLE_HEIGHT + self.options.panel_height * self.panels.len() as u32,
        )
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>) -> Result<()> {
        let body = root
            .titled(&self.title, ("sans-serif", 20))
            .map_err(render_error)?;
        let areas = body.split_evenly((self.panels.len(), 1));

        let origin = self.origin;
        let time_label = move |x: &f64| {
            (origin + secs_to_duration(*x))
                .format("%H:%M:%S")
                .to_string()
        };

        for (area, panel) in areas.iter().zip(&self.panels) {
            // Gaps stay gaps: one series per trace
            let series: Vec<Vec<(f64, f64)>> = panel
                .traces
                .iter()
                .map(|trace| {
                    let offset = secs_between(origin, trace.start);
                    let delta = trace.delta();
                    let points: Vec<(f64, f64)> = trace
                        .data
                        .iter()
                        .enumerate()
                        .map(|(i, v)| (offset + i as f64 * delta, *v))
                        .collect();
                    envelope(&points, self.options.width as usize)
                })
                .collect();
            let (lo, hi) = value_range(series.iter().flatten().map(|p| p.1));

            let mut chart = ChartBuilder::on(area)
                .caption(panel.id.to_string(), ("sans-serif", 14))
                .margin(8)
                .x_label_area_size(25)
                .y_label_area_size(70)
                .build_cartesian_2d(0.0..self.span, lo..hi)
                .map_err(render_error)?;

            chart
                .configure_mesh()
                .disable_mesh()
                .x_labels(8)
                .x_label_formatter(&time_label)
                .y_labels(4)
                .draw()
                .map_err(render_error)?;

            for points in series {
                chart
                    .draw_series(LineSeries::new(points, &BLACK))
                    .map_err(render_error)?;
            }
        }

        Ok(())
    }
}

/// Plot every channel of `stream` in its own panel
///
/// Without `output` the figure goes to `<first id>.svg` in the working
/// directory. Returns the written path.
pub fn render_stream(stream: &Stream, output: Option<&Path>, options: &PlotOptions) -> Result<PathBuf> {
    let (start, end) = stream
        .span()
        .ok_or_else(|| Error::Render("stream holds no traces".to_string()))?;

    let path = match output {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(format!("{}.svg", stream.traces()[0].id)),
    };

    let panels = stream
        .channel_ids()
        .into_iter()
        .map(|id| Panel {
            traces: stream.iter().filter(|t| t.id == id).collect(),
            id,
        })
        .collect();

    let span = secs_between(start, end);
    let figure = StreamFigure {
        panels,
        options,
        origin: start,
        span: if span > 0.0 { span } else { 1.0 },
        title: options
            .title
            .clone()
            .unwrap_or_else(|| format!("{} - {}", format_timestamp(&start), format_timestamp(&end))),
    };

    render_svg(&figure, &path)
}
