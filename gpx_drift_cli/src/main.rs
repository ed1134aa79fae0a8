use std::fs;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, ValueHint};
use gpx_drift::{
    count_steps, format_gpx_time, FixReport, GpxTrack, Params, TimestampSource, TrackHandler,
};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod plot;

use plot::{render_chart_guard, ChartKind, NamedSeries};

const DEFAULT_RUNNING_AVG_WINDOW: usize = 60;
const DEFAULT_HYSTERESIS: f64 = 0.7;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "GPX timestamp drift analysis and correction",
    long_about = None
)]
struct Cli {
    /// GPX files to analyse and fix
    #[arg(required = true, value_name = "FILE", value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Plot errors, running average and gated errors before and after the fix
    #[arg(short, long, action = ArgAction::SetTrue)]
    plot: bool,

    /// Write plots as SVG instead of PNG
    #[arg(long, action = ArgAction::SetTrue)]
    svg: bool,

    /// Running-average window in samples (odd values are rounded up)
    #[arg(long = "running-avg", default_value_t = DEFAULT_RUNNING_AVG_WINDOW)]
    running_avg: usize,

    /// Hysteresis band for the gated error (seconds)
    #[arg(long, default_value_t = DEFAULT_HYSTERESIS)]
    hysteresis: f64,

    /// Ideal sampling interval (seconds)
    #[arg(long, default_value_t = 1.0)]
    interval: f64,

    /// Export per-point errors to `<base>.drift.csv`
    #[arg(long, action = ArgAction::SetTrue)]
    csv: bool,

    /// Write a JSON summary of every processed file
    #[arg(long, value_hint = ValueHint::FilePath)]
    summary: Option<PathBuf>,

    /// Analyse and fix in memory without writing `<base>.fixed.gpx`
    #[arg(long, action = ArgAction::SetTrue)]
    dry_run: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Clone, Debug, Serialize)]
struct FileSummary {
    input: PathBuf,
    params: Params,
    gated_steps: usize,
    fix: FixReport,
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    run(&cli)?;
    Ok(())
}

/// Load every input, then analyse and fix each one.
///
/// A parse failure in any input aborts before any output is written.
fn run(cli: &Cli) -> Result<Vec<FileSummary>> {
    let params = params_from_cli(cli)?;
    let tracks = cli
        .inputs
        .par_iter()
        .map(|path| load_track(path).map(|track| (path.as_path(), track)))
        .collect::<Result<Vec<_>>>()?;

    let summaries = tracks
        .into_par_iter()
        .map(|(path, track)| process_file(path, track, &params, cli))
        .collect::<Result<Vec<_>>>()?;

    if let Some(path) = cli.summary.as_ref() {
        write_summary(&summaries, path)?;
        info!("Wrote summary: {}", path.display());
    }
    Ok(summaries)
}

fn params_from_cli(cli: &Cli) -> Result<Params> {
    let window = Params::even_window(cli.running_avg);
    if window != cli.running_avg {
        debug!("Running-average window {} rounded up to {}", cli.running_avg, window);
    }
    let params = Params {
        interval_s: cli.interval,
        window,
        hysteresis: cli.hysteresis,
    };
    params.validate()?;
    Ok(params)
}

/// Read and parse one input, including every track-point time.
fn load_track(path: &Path) -> Result<GpxTrack> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let track = GpxTrack::from_bytes(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    track
        .timestamps()
        .with_context(|| format!("failed to parse {}", path.display()))?;
    if track.is_empty() {
        warn!("{}: no timed track points", path.display());
    }
    Ok(track)
}

fn process_file(path: &Path, track: GpxTrack, params: &Params, cli: &Cli) -> Result<FileSummary> {
    let mut handler = TrackHandler::new(track, params.clone())?;
    let chart_kind = if cli.svg { ChartKind::Svg } else { ChartKind::Png };

    let errors_before = handler.errors()?.to_vec();
    let running_avg = handler.running_average()?.to_vec();
    let gated = handler.gated_errors()?.to_vec();
    let gated_steps = count_steps(&gated);
    info!(
        "{}: {} points, {} gated error changes",
        path.display(),
        errors_before.len(),
        gated_steps
    );

    if cli.plot {
        let chart_path = derived_path(path, "analysis", chart_kind.extension());
        let series = [
            NamedSeries::dense("Errors", &errors_before),
            NamedSeries::new("Running average", running_avg.clone()),
            NamedSeries::new("Gated errors", gated.clone()),
        ];
        render_or_warn(&chart_path, "Timing error analysis", &series, chart_kind);
    }

    if cli.csv {
        let csv_path = derived_path(path, "drift", "csv");
        let timestamps = handler.track().timestamps()?;
        write_series_csv(&csv_path, &timestamps, &errors_before, &running_avg, &gated)?;
        info!("Wrote series CSV: {}", csv_path.display());
    }

    let report = handler.fix()?;
    match report.seed {
        Some(seed) => info!(
            "{}: corrected {} of {} timestamps (seed {:+.0}s)",
            path.display(),
            report.adjusted,
            report.points,
            seed
        ),
        None => warn!(
            "{}: track shorter than the {}-point window, timestamps left unchanged",
            path.display(),
            params.window
        ),
    }

    if cli.plot {
        let errors_after = handler.errors()?.to_vec();
        let chart_path = derived_path(path, "comparison", chart_kind.extension());
        let series = [
            NamedSeries::dense("Errors before fix", &errors_before),
            NamedSeries::dense("Errors after fix", &errors_after),
        ];
        render_or_warn(&chart_path, "Timing error before and after fix", &series, chart_kind);
    }

    let output = if cli.dry_run {
        None
    } else {
        let out_path = fixed_output_path(path);
        let file = File::create(&out_path)
            .with_context(|| format!("failed to create {}", out_path.display()))?;
        let mut writer = BufWriter::new(file);
        handler
            .save(&mut writer)
            .with_context(|| format!("failed to write {}", out_path.display()))?;
        writer.flush()?;
        info!("Wrote corrected track: {}", out_path.display());
        Some(out_path)
    };

    Ok(FileSummary {
        input: path.to_path_buf(),
        params: handler.params().clone(),
        gated_steps,
        fix: report,
        output,
    })
}

fn render_or_warn(path: &Path, title: &str, series: &[NamedSeries], kind: ChartKind) {
    if let Err(err) = render_chart_guard(path, title, series, kind) {
        warn!("Skipping plot ({}): {}", path.display(), err);
    } else {
        info!("Wrote plot: {}", path.display());
    }
}

/// `<dir>/<stem>.fixed.gpx` next to the input.
fn fixed_output_path(input: &Path) -> PathBuf {
    input.with_extension("fixed.gpx")
}

fn derived_path(input: &Path, tag: &str, ext: &str) -> PathBuf {
    input.with_extension(format!("{}.{}", tag, ext))
}

fn write_series_csv(
    path: &Path,
    timestamps: &[chrono::DateTime<chrono::Utc>],
    errors: &[f64],
    running_avg: &[Option<f64>],
    gated: &[Option<f64>],
) -> Result<()> {
    if timestamps.len() != errors.len() {
        return Err(anyhow!(
            "{} timestamps but {} errors",
            timestamps.len(),
            errors.len()
        ));
    }
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_series_rows(&mut writer, timestamps, errors, running_avg, gated)
}

fn write_series_rows<W: Write>(
    writer: &mut csv::Writer<W>,
    timestamps: &[chrono::DateTime<chrono::Utc>],
    errors: &[f64],
    running_avg: &[Option<f64>],
    gated: &[Option<f64>],
) -> Result<()> {
    writer.write_record([
        "index",
        "timestamp",
        "error_s",
        "running_avg_s",
        "gated_error_s",
    ])?;
    for (i, (ts, err)) in timestamps.iter().zip(errors).enumerate() {
        writer.write_record([
            i.to_string(),
            format_gpx_time(ts),
            format!("{:.3}", err),
            optional_cell(running_avg.get(i).copied().flatten(), 3),
            optional_cell(gated.get(i).copied().flatten(), 0),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn optional_cell(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_default()
}

fn write_summary(summaries: &[FileSummary], path: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(summaries)?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
