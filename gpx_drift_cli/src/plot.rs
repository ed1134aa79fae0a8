use std::panic;
use std::path::Path;

use anyhow::Result;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};

const SERIES_COLORS: [RGBColor; 4] = [
    RGBColor(200, 0, 100),
    RGBColor(30, 144, 255),
    RGBColor(34, 139, 34),
    RGBColor(90, 90, 90),
];

#[derive(Clone, Copy, Debug)]
pub enum ChartKind {
    Png,
    Svg,
}

impl ChartKind {
    pub fn extension(self) -> &'static str {
        match self {
            ChartKind::Png => "png",
            ChartKind::Svg => "svg",
        }
    }
}

/// A labelled sequence where `None` entries are drawn as gaps.
#[derive(Clone, Debug)]
pub struct NamedSeries {
    pub label: String,
    pub values: Vec<Option<f64>>,
}

impl NamedSeries {
    pub fn new(label: &str, values: Vec<Option<f64>>) -> Self {
        Self {
            label: label.to_string(),
            values,
        }
    }

    pub fn dense(label: &str, values: &[f64]) -> Self {
        Self::new(label, values.iter().copied().map(Some).collect())
    }

    /// Contiguous runs of defined points as `(index, value)` pairs.
    fn runs(&self) -> Vec<Vec<(f64, f64)>> {
        let mut runs = Vec::new();
        let mut current = Vec::new();
        for (i, value) in self.values.iter().enumerate() {
            match value {
                Some(v) if v.is_finite() => current.push((i as f64, *v)),
                _ => {
                    if !current.is_empty() {
                        runs.push(std::mem::take(&mut current));
                    }
                }
            }
        }
        if !current.is_empty() {
            runs.push(current);
        }
        runs
    }
}

pub fn render_chart_guard(
    path: &Path,
    title: &str,
    series: &[NamedSeries],
    kind: ChartKind,
) -> Result<(), String> {
    let render = || -> Result<(), String> {
        render_chart(path, title, series, kind).map_err(|e| format!("plotting error: {}", e))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn render_chart(path: &Path, title: &str, series: &[NamedSeries], kind: ChartKind) -> Result<()> {
    match kind {
        ChartKind::Png => {
            let root = BitMapBackend::new(path, (1280, 720)).into_drawing_area();
            draw_series_chart(root, title, series)
        }
        ChartKind::Svg => {
            let root = SVGBackend::new(path, (1280, 720)).into_drawing_area();
            draw_series_chart(root, title, series)
        }
    }
}

fn value_bounds(series: &[NamedSeries]) -> (f64, f64) {
    let (lo, hi) = series
        .iter()
        .flat_map(|s| s.values.iter().flatten())
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !lo.is_finite() || !hi.is_finite() {
        return (-1.0, 1.0);
    }
    let pad = ((hi - lo) * 0.1).max(0.5);
    (lo - pad, hi + pad)
}

fn draw_series_chart<DB>(
    root: DrawingArea<DB, plotters::coord::Shift>,
    title: &str,
    series: &[NamedSeries],
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;

    let x_max = series
        .iter()
        .map(|s| s.values.len())
        .max()
        .unwrap_or(0)
        .max(2) as f64
        - 1.0;
    let (y_min, y_max) = value_bounds(series);

    let mut chart = ChartBuilder::on(&root)
        .caption(
            title,
            FontDesc::new(FontFamily::SansSerif, 22.0, FontStyle::Normal),
        )
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(0.0..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Track point")
        .y_desc("Error (s)")
        .x_label_formatter(&|v| format!("{:.0}", v))
        .y_label_formatter(&|v| format!("{:.1}", v))
        .label_style(FontDesc::new(
            FontFamily::SansSerif,
            16.0,
            FontStyle::Normal,
        ))
        .draw()?;

    for (idx, named) in series.iter().enumerate() {
        let color = SERIES_COLORS[idx % SERIES_COLORS.len()];
        let mut labelled = false;
        for run in named.runs() {
            let drawn = chart.draw_series(LineSeries::new(run, color.stroke_width(2)))?;
            if !labelled {
                drawn
                    .label(named.label.as_str())
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], color));
                labelled = true;
            }
        }
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.7))
        .border_style(&BLACK.mix(0.3))
        .label_font(FontDesc::new(
            FontFamily::SansSerif,
            16.0,
            FontStyle::Normal,
        ))
        .position(SeriesLabelPosition::UpperLeft)
        .draw()?;

    root.present()?;
    Ok(())
}
