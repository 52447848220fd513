//! outliner-bench: CLI tool for running the outline pipeline on image files.
//!
//! Decodes an image, runs the pipeline on a background job with live
//! progress, and prints per-stage diagnostics. Useful for:
//!
//! - Tuning threshold, blur radius and contour length limits
//! - Measuring per-stage durations to identify bottlenecks
//! - Seeing which guards (budget, count valve, truncation) trip on
//!   large or noisy images
//! - Capturing the exact result message a web worker would post
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin outliner-bench -- [OPTIONS] <IMAGE_PATH>
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `warn`).

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use outliner_pipeline::message::{ResultMessage, WorkerMessage};
use outliner_pipeline::{
    JobEvent, Limits, Outline, OutlineRequest, PipelineDiagnostics, PipelineError,
    PipelineOptions, job,
};
use tracing_subscriber::EnvFilter;

/// Outline extraction diagnostics.
///
/// Runs the pipeline on a given image with configurable parameters and
/// prints detailed per-stage timing and count diagnostics.
#[derive(Parser)]
#[command(name = "outliner-bench", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Global threshold: luminance below this is foreground.
    #[arg(long, default_value_t = PipelineOptions::DEFAULT_THRESHOLD)]
    threshold: u8,

    /// Box blur radius (0 disables the blur).
    #[arg(long, default_value_t = PipelineOptions::DEFAULT_BLUR_RADIUS)]
    blur_radius: u32,

    /// Force a downsample factor instead of deriving it from the image size.
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    downsample: Option<u32>,

    /// Force adaptive (`true`) or global (`false`) thresholding.
    #[arg(long)]
    adaptive: Option<bool>,

    /// Force the minimum kept contour length.
    #[arg(long)]
    min_length: Option<usize>,

    /// Points at which a contour walk is cut off.
    #[arg(long, default_value_t = PipelineOptions::DEFAULT_MAX_CONTOUR_LENGTH, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    max_length: usize,

    /// Contour count cap.
    #[arg(long, default_value_t = PipelineOptions::DEFAULT_MAX_CONTOUR_COUNT)]
    max_contours: usize,

    /// Tracing time budget in milliseconds.
    #[arg(long, default_value_t = PipelineOptions::DEFAULT_TIME_BUDGET_MS)]
    budget_ms: u64,

    /// Cancel each run after this many milliseconds.
    #[arg(long)]
    cancel_after_ms: Option<u64>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,

    /// Print the worker result message (contours included) instead of
    /// diagnostics.
    #[arg(long, conflicts_with = "json")]
    wire: bool,

    /// Full pipeline options as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// The JSON must be a valid `PipelineOptions` serialization; missing
    /// fields take their defaults.
    #[arg(long)]
    options_json: Option<String>,
}

/// Build [`PipelineOptions`] from CLI arguments.
///
/// If `--options-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn options_from_cli(cli: &Cli) -> Result<PipelineOptions, String> {
    if let Some(ref json) = cli.options_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --options-json: {e}"));
    }

    Ok(PipelineOptions {
        threshold: cli.threshold,
        blur_radius: cli.blur_radius,
        downsample_factor: cli.downsample,
        adaptive_threshold: cli.adaptive,
        min_contour_length: cli.min_length,
        max_contour_length: cli.max_length,
        max_contour_count: cli.max_contours,
        time_budget_ms: cli.budget_ms,
        limits: Limits::default(),
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let options = match options_from_cli(&cli) {
        Ok(o) => o,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let image = match image::open(&cli.image_path) {
        Ok(image) => image.into_rgba8(),
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Image: {} ({}x{})",
        cli.image_path.display(),
        image.width(),
        image.height(),
    );
    eprintln!("Options: {options:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let request = OutlineRequest::from_image(image.clone());
        let outcome = run_job(request, options.clone(), cli.cancel_after_ms);

        if cli.wire {
            let failed = outcome.is_err();
            let message = WorkerMessage::Result(ResultMessage::from(outcome));
            match serde_json::to_string(&message) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing result: {e}");
                    return ExitCode::FAILURE;
                }
            }
            if failed {
                return ExitCode::FAILURE;
            }
            continue;
        }

        match outcome {
            Ok(outline) => {
                if cli.json {
                    match serde_json::to_string_pretty(&outline.diagnostics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", outline.diagnostics.report());
                    print_notes(&outline);
                }
                all_diagnostics.push(outline.diagnostics);
            }
            Err(e) => {
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if all_diagnostics.len() > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// Run one request on a background job, echoing progress to stderr.
fn run_job(
    request: OutlineRequest,
    options: PipelineOptions,
    cancel_after_ms: Option<u64>,
) -> Result<Outline, PipelineError> {
    let job = job::spawn(request, options)?;

    // The watchdog only holds the token; a run that finishes first
    // leaves it sleeping harmlessly until the process exits.
    if let Some(ms) = cancel_after_ms {
        let token = job.cancel_token().clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(ms));
            tracing::info!(after_ms = ms, "cancelling run");
            token.cancel();
        });
    }

    while let Some(event) = job.recv() {
        match event {
            JobEvent::State(state) => tracing::debug!(?state, "state"),
            JobEvent::Progress(progress) => eprintln!(
                "  {:>3}% scanned, {} contours",
                progress.percent_complete(),
                progress.contours_found,
            ),
            JobEvent::Finished(result) => return result,
        }
    }
    job.wait()
}

/// Print the guards that tripped during a run.
fn print_notes(outline: &Outline) {
    let stats = &outline.stats;
    println!(
        "Result: {} contours, downsample x{}, {} tracer, {:.3}ms",
        stats.contour_count,
        stats.downsample_factor,
        stats.tracer.name(),
        stats.processing_time_ms,
    );
    let notes = [
        (stats.budget_exceeded, "time budget exceeded; contours are partial"),
        (stats.count_capped, "contour count valve tripped"),
        (stats.simplified, "contours ranked, capped and simplified"),
        (stats.truncated_count > 0, "some contours truncated at max length"),
        (stats.stuck_count > 0, "some walks abandoned as stuck"),
    ];
    for (_, note) in notes.iter().filter(|(tripped, _)| *tripped) {
        println!("  note: {note}");
    }
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&PipelineDiagnostics) -> Option<Duration>;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len().max(1) as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Grayscale", |d| Some(d.grayscale.duration)),
        ("Blur", |d| Some(d.blur.duration)),
        ("Threshold", |d| Some(d.threshold.duration)),
        ("Contour Tracing", |d| Some(d.contour_tracing.duration)),
        ("Simplification", |d| d.simplification.as_ref().map(|s| s.duration)),
    ];

    for (name, extractor) in stage_extractors {
        let stage_durations: Vec<f64> = all_diagnostics
            .iter()
            .filter_map(extractor)
            .map(|dur| dur.as_secs_f64() * 1000.0)
            .collect();

        if stage_durations.is_empty() {
            continue;
        }

        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
