//! Waveform figures
//!
//! Two figures are drawn with plotters and written as SVG:
//! - stream plot: one panel per channel on a shared time axis
//! - helicorder: one channel folded into fixed-length lines

mod helicorder;
mod stream;

pub use helicorder::{render_helicorder, HelicorderOptions};
pub use stream::{render_stream, PlotOptions};

use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Something that can be drawn onto a plotters drawing area
pub(crate) trait Figure {
    /// Pixel size of the whole figure
    fn size(&self) -> (u32, u32);

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>) -> Result<()>;
}

/// Convert any plotters drawing error
pub(crate) fn render_error<E: std::error::Error + Send + Sync>(
    err: DrawingAreaErrorKind<E>,
) -> Error {
    Error::Render(err.to_string())
}

/// Only SVG output is produced
pub(crate) fn ensure_svg(path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("svg") => Ok(()),
        Some(ext) => Err(Error::UnsupportedFormat(format!(
            "{} (plots are written as .svg)",
            ext
        ))),
        None => Err(Error::UnsupportedFormat(format!(
            "{} has no extension (plots are written as .svg)",
            path.display()
        ))),
    }
}

/// Draw `figure` into an SVG file at `path`
pub(crate) fn render_svg<F: Figure>(figure: &F, path: &Path) -> Result<PathBuf> {
    ensure_svg(path)?;
    {
        let root = SVGBackend::new(path, figure.size()).into_drawing_area();
        root.fill(&WHITE).map_err(render_error)?;
        figure.draw(&root)?;
        root.present().map_err(render_error)?;
    }
    tracing::info!("Wrote {}", path.display());
    Ok(path.to_path_buf())
}

/// Reduce `points` to a min/max pair per column
///
/// Shorter inputs come back unchanged. Each pair keeps the order in which
/// the extremes occur so the line does not zigzag backwards.
pub(crate) fn envelope(points: &[(f64, f64)], columns: usize) -> Vec<(f64, f64)> {
    let columns = columns.max(1);
    if points.len() <= 2 * columns {
        return points.to_vec();
    }
    let chunk = points.len().div_ceil(columns);
    let mut out = Vec::with_capacity(2 * columns);
    for bucket in points.chunks(chunk) {
        let (mut lo, mut hi) = (0, 0);
        for (i, p) in bucket.iter().enumerate() {
            if p.1 < bucket[lo].1 {
                lo = i;
            }
            if p.1 > bucket[hi].1 {
                hi = i;
            }
        }
        let (first, second) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        out.push(bucket[first]);
        if second != first {
            out.push(bucket[second]);
        }
    }
    out
}

/// Padded y range of a series
pub(crate) fn value_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if !lo.is_finite() {
        return (-1.0, 1.0);
    }
    if hi - lo < f64::EPSILON {
        return (lo - 1.0, hi + 1.0);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad, hi + pad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_svg() {
        assert!(ensure_svg(Path::new("out/plot.svg")).is_ok());
        assert!(ensure_svg(Path::new("plot.SVG")).is_ok());
        assert!(matches!(
            ensure_svg(Path::new("plot.png")),
            Err(Error::UnsupportedFormat(_))
        ));
        assert!(matches!(
            ensure_svg(Path::new("plot")),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_envelope_keeps_extremes() {
        let points: Vec<(f64, f64)> = (0..1000)
            .map(|i| (i as f64, if i == 517 { 50.0 } else { (i % 7) as f64 }))
            .collect();
        let reduced = envelope(&points, 100);
        assert!(reduced.len() <= 200);
        assert!(reduced.iter().any(|p| p.1 == 50.0));
        assert!(reduced.windows(2).all(|w| w[0].0 <= w[1].0));

        let short = vec![(0.0, 1.0), (1.0, 2.0)];
        assert_eq!(envelope(&short, 100), short);
    }

    #[test]
    fn test_value_range() {
        assert_eq!(value_range([1.0, 1.0].into_iter()), (0.0, 2.0));
        assert_eq!(value_range(std::iter::empty()), (-1.0, 1.0));
        let (lo, hi) = value_range([0.0, 10.0].into_iter());
        assert!(lo < 0.0 && hi > 10.0);
    }
}
