//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! These diagnostics are permanent instrumentation intended for
//! threshold and budget tuning. Every successful run collects them
//! alongside the contours.
//!
//! Durations come from the run's [`Clock`](crate::progress::Clock), so
//! they are `performance.now()` based on wasm and `std::time::Instant`
//! based on native.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::contour::ContourTracerKind;
use crate::types::Contour;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single pipeline run.
///
/// Each field captures metrics for one logical stage of the pipeline.
/// Simplification only runs when tracing returned more contours than the
/// cap, so its entry is `None` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 1: grayscale conversion and downsampling.
    pub grayscale: StageDiagnostics,
    /// Stage 2: box blur.
    pub blur: StageDiagnostics,
    /// Stage 3: binarization.
    pub threshold: StageDiagnostics,
    /// Stage 4: contour tracing.
    pub contour_tracing: StageDiagnostics,
    /// Stage 5: rank, cap and simplify (only when the cap was exceeded).
    pub simplification: Option<StageDiagnostics>,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics (counts, sizes, etc.).
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Grayscale conversion metrics.
    Grayscale {
        /// Processing width in pixels.
        width: u32,
        /// Processing height in pixels.
        height: u32,
        /// Factor the source was downsampled by.
        downsample_factor: u32,
    },
    /// Box blur metrics.
    Blur {
        /// Blur radius; 0 means the stage was an identity.
        radius: u32,
    },
    /// Binarization metrics.
    Threshold {
        /// Local-adaptive rather than global thresholding.
        adaptive: bool,
        /// Global threshold (unused in adaptive mode).
        threshold: u8,
        /// Adaptive window size, when adaptive.
        block_size: Option<u32>,
        /// Number of foreground (value == 0) pixels.
        foreground_pixels: u64,
        /// Total pixel count for computing foreground density.
        total_pixels: u64,
    },
    /// Contour tracing metrics.
    ContourTracing {
        /// Which tracer ran.
        tracer: ContourTracerKind,
        /// Number of contours kept.
        contour_count: usize,
        /// Total number of points across all contours.
        total_point_count: usize,
        /// Minimum points in any single contour.
        min_contour_points: usize,
        /// Maximum points in any single contour.
        max_contour_points: usize,
        /// Mean points per contour.
        mean_contour_points: f64,
        /// Walks discarded as too short.
        discarded_short: usize,
        /// Contours cut off at the maximum length.
        truncated: usize,
        /// Walks ended by the oscillation detector.
        stuck: usize,
        /// The time budget ran out.
        budget_exceeded: bool,
        /// The contour-count valve tripped.
        count_capped: bool,
    },
    /// Rank, cap and simplify metrics.
    Simplification {
        /// RDP tolerance in pixels.
        epsilon: f64,
        /// Contours before capping.
        contours_before: usize,
        /// Contours after capping.
        contours_after: usize,
        /// Total points before capping and simplification.
        points_before: usize,
        /// Total points after.
        points_after: usize,
    },
}

/// High-level summary counts for the entire pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Total source pixel count.
    pub pixel_count: u64,
    /// Number of contours returned.
    pub contour_count: usize,
    /// Points across all returned contours.
    pub final_point_count: usize,
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} pixels)",
            self.summary.image_width, self.summary.image_height, self.summary.pixel_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);

        let mut stages: Vec<(&str, &StageDiagnostics)> = vec![
            ("Grayscale", &self.grayscale),
            ("Blur", &self.blur),
            ("Threshold", &self.threshold),
            ("Contour Tracing", &self.contour_tracing),
        ];
        if let Some(ref s) = self.simplification {
            stages.push(("Simplification", s));
        }

        for (name, diag) in &stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Contours: {}  |  Points: {}",
            self.summary.contour_count, self.summary.final_point_count,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
pub(crate) fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Grayscale {
            width,
            height,
            downsample_factor,
        } => format!("{width}x{height} (1/{downsample_factor})"),
        StageMetrics::Blur { radius } => format!("radius={radius}"),
        StageMetrics::Threshold {
            adaptive,
            threshold,
            block_size,
            foreground_pixels,
            total_pixels,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let density = if *total_pixels > 0 {
                *foreground_pixels as f64 / *total_pixels as f64 * 100.0
            } else {
                0.0
            };
            let mode = match (adaptive, block_size) {
                (true, Some(block)) => format!("adaptive block={block}"),
                (true, None) => "adaptive".to_string(),
                (false, _) => format!("global t={threshold}"),
            };
            format!("{mode} fg={foreground_pixels} ({density:.1}%)")
        }
        StageMetrics::ContourTracing {
            tracer,
            contour_count,
            total_point_count,
            min_contour_points,
            max_contour_points,
            mean_contour_points,
            discarded_short,
            truncated,
            stuck,
            budget_exceeded,
            count_capped,
        } => {
            let mut details = format!(
                "{} {contour_count} contours, {total_point_count} pts (min={min_contour_points} max={max_contour_points} mean={mean_contour_points:.1}) short={discarded_short} truncated={truncated} stuck={stuck}",
                tracer.name(),
            );
            if *budget_exceeded {
                details.push_str(" [budget]");
            }
            if *count_capped {
                details.push_str(" [capped]");
            }
            details
        }
        StageMetrics::Simplification {
            epsilon,
            contours_before,
            contours_after,
            points_before,
            points_after,
        } => {
            format!(
                "eps={epsilon:.1} contours={contours_before}->{contours_after} pts={points_before}->{points_after}",
            )
        }
    }
}

/// Statistics for a set of contours.
pub(crate) struct ContourStats {
    /// Total number of points across all contours.
    pub total: usize,
    /// Minimum number of points in any single contour.
    pub min: usize,
    /// Maximum number of points in any single contour.
    pub max: usize,
    /// Mean number of points per contour.
    pub mean: f64,
}

/// Compute contour statistics.
pub(crate) fn contour_stats(contours: &[Contour]) -> ContourStats {
    let total = crate::simplify::total_points(contours);
    let min = contours.iter().map(Contour::len).min().unwrap_or(0);
    let max = contours.iter().map(Contour::len).max().unwrap_or(0);
    #[allow(clippy::cast_precision_loss)]
    let mean = if contours.is_empty() {
        0.0
    } else {
        total as f64 / contours.len() as f64
    };
    ContourStats {
        total,
        min,
        max,
        mean,
    }
}
