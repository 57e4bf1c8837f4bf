//! Two-series line chart projection for the connection graph.

use serde::Serialize;
use std::fmt::Write;

use super::Sample;

/// Lower bound of the vertical scale, in Mbps.
pub const SCALE_FLOOR: f64 = 100.0;

pub const DOWNLOAD_COLOR: &str = "#39ff14";
pub const UPLOAD_COLOR: &str = "#ff2e97";

/// Points in chart coordinates (origin top-left, y grows downward).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
    pub width: f64,
    pub height: f64,
    /// Value mapped to the top edge.
    pub scale_max: f64,
    pub download: Vec<(f64, f64)>,
    pub upload: Vec<(f64, f64)>,
}

/// Vertical scale for `samples`: the largest buffered value, never below
/// [`SCALE_FLOOR`].
pub fn scale_max(samples: &[Sample]) -> f64 {
    samples
        .iter()
        .flat_map(|s| [s.download, s.upload])
        .fold(SCALE_FLOOR, f64::max)
}

/// Map samples onto a `width` x `height` canvas, oldest on the left.
///
/// A single sample sits at `x = 0`; no spacing is computed for fewer than two
/// points.
pub fn project(samples: &[Sample], width: f64, height: f64) -> ChartSeries {
    let max = scale_max(samples);
    let step = if samples.len() > 1 {
        width / (samples.len() - 1) as f64
    } else {
        0.0
    };
    let y = |v: f64| height - (v.max(0.0) / max) * height;

    let mut download = Vec::with_capacity(samples.len());
    let mut upload = Vec::with_capacity(samples.len());
    for (i, s) in samples.iter().enumerate() {
        let x = i as f64 * step;
        download.push((x, y(s.download)));
        upload.push((x, y(s.upload)));
    }

    ChartSeries {
        width,
        height,
        scale_max: max,
        download,
        upload,
    }
}

/// `points` attribute value for an SVG polyline.
pub fn polyline_points(points: &[(f64, f64)]) -> String {
    let mut out = String::new();
    for (i, (x, y)) in points.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{x:.1},{y:.1}");
    }
    out
}

/// Standalone SVG document with the download and upload polylines.
pub fn render_svg(samples: &[Sample], width: f64, height: f64) -> String {
    let series = project(samples, width, height);
    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}" data-scale-max="{max:.1}">"#,
        w = width,
        h = height,
        max = series.scale_max,
    );
    for (name, color, points) in [
        ("download", DOWNLOAD_COLOR, &series.download),
        ("upload", UPLOAD_COLOR, &series.upload),
    ] {
        let _ = write!(
            svg,
            r#"<polyline class="{name}" fill="none" stroke="{color}" stroke-width="2" points="{}"/>"#,
            polyline_points(points)
        );
    }
    svg.push_str("</svg>");
    svg
}
