//! The coordinator: typed pipeline stages and the driver that runs them.
//!
//! Each stage struct owns the output of the step that produced it, and
//! each advancing method consumes `self` and returns the next stage, so
//! stages can only run in order:
//!
//! ```rust
//! # use outliner_pipeline::pipeline::Pending;
//! # use outliner_pipeline::progress::{Host, Silent};
//! # use outliner_pipeline::{OutlineRequest, PipelineError, PipelineOptions};
//! # fn run(request: OutlineRequest) -> Result<(), PipelineError> {
//! let mut silent = Silent;
//! let mut host = Host::new(&mut silent);
//! let reduced = Pending::new(request, PipelineOptions::default())
//!     .validate()?
//!     .grayscale()
//!     .blur()
//!     .binarize()
//!     .trace(&mut host)?
//!     .reduce();
//! println!("{} contours", reduced.contours().len());
//! # Ok(())
//! # }
//! ```
//!
//! [`process_with`] drives the same chain, inserting yield points between
//! stages, reporting [`PipelineState`] transitions, timing every stage,
//! and turning any fault into a single terminal [`PipelineError`].
//!
//! # Memory
//!
//! Raster intermediates are dropped as soon as the next stage has been
//! computed: [`Traced`] and later hold only vector data.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{Limits, PipelineConfig, PipelineOptions};
use crate::contour::{ContourTracer, ContourTracerKind, TraceReport};
use crate::diagnostics::{PipelineDiagnostics, PipelineSummary, StageDiagnostics, StageMetrics};
use crate::progress::{Host, Silent};
use crate::simplify::Reduction;
use crate::types::{
    Contour, ContourKind, Dimensions, GrayImage, Outline, OutlineRequest, PipelineError,
    PipelineStats, PixelBuffer,
};

/// Observable coordinator state.
///
/// A run moves `Idle → Preprocessing → Tracing → Simplifying → Done`, or
/// to `Failed` from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    /// Not started.
    Idle,
    /// Validating, converting, blurring and binarizing.
    Preprocessing,
    /// Walking contours.
    Tracing,
    /// Rescaling and, if needed, capping and simplifying.
    Simplifying,
    /// Finished with a result.
    Done,
    /// Finished with an error.
    Failed,
}

impl PipelineState {
    /// Whether the run is over.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Per-run values carried through every stage.
#[derive(Debug, Clone)]
struct Context {
    config: PipelineConfig,
    limits: Limits,
    /// Original (pre-downsample) dimensions.
    dimensions: Dimensions,
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before anything has been checked.
///
/// Call [`validate`](Self::validate) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing — call .validate() to continue"]
pub struct Pending {
    request: OutlineRequest,
    options: PipelineOptions,
}

impl Pending {
    /// Stage a request with its options.
    pub const fn new(request: OutlineRequest, options: PipelineOptions) -> Self {
        Self { request, options }
    }

    /// The request as supplied.
    #[must_use]
    pub const fn request(&self) -> &OutlineRequest {
        &self.request
    }

    /// Check the request and resolve the run configuration.
    ///
    /// The pixel count is checked against the size ceiling before the
    /// buffer is looked at.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InputTooLarge`] above the ceiling, and
    /// [`PipelineError::InvalidInput`] for zero dimensions, a buffer of
    /// the wrong length, or options that cannot apply to this image.
    pub fn validate(self) -> Result<Validated, PipelineError> {
        let dimensions = self.request.dimensions();
        let limit = self.options.limits.max_input_pixels;
        if dimensions.pixel_count() > limit {
            return Err(PipelineError::InputTooLarge {
                width: dimensions.width,
                height: dimensions.height,
                limit,
            });
        }

        let buffer =
            PixelBuffer::from_raw(dimensions.width, dimensions.height, self.request.into_pixels())?;
        let config = PipelineConfig::resolve(&self.options, dimensions)?;

        tracing::debug!(
            downsample_factor = config.downsample_factor,
            adaptive = config.use_adaptive_threshold,
            min_len = config.min_contour_length,
            "resolved configuration",
        );

        Ok(Validated {
            context: Context {
                config,
                limits: self.options.limits,
                dimensions,
            },
            buffer,
        })
    }
}

// ───────────────────────── Stage 1: Validated ────────────────────────

/// Pipeline state after validation.
///
/// Call [`grayscale`](Self::grayscale) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing — call .grayscale() to continue"]
pub struct Validated {
    context: Context,
    buffer: PixelBuffer,
}

impl Validated {
    /// The resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.context.config
    }

    /// Convert to luminance at processing resolution.
    pub fn grayscale(self) -> Grayscaled {
        let gray = crate::grayscale::to_luma_downsampled(
            self.buffer.image(),
            self.context.config.downsample_factor,
        );
        Grayscaled {
            context: self.context,
            gray,
        }
    }
}

// ───────────────────────── Stage 2: Grayscaled ───────────────────────

/// Pipeline state after grayscale conversion and downsampling.
///
/// Call [`blur`](Self::blur) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing — call .blur() to continue"]
pub struct Grayscaled {
    context: Context,
    gray: GrayImage,
}

impl Grayscaled {
    /// The luminance image.
    #[must_use]
    pub const fn gray(&self) -> &GrayImage {
        &self.gray
    }

    /// Apply the box blur.
    pub fn blur(self) -> Blurred {
        let blurred = crate::blur::box_blur(&self.gray, self.context.config.blur_radius);
        Blurred {
            context: self.context,
            blurred,
        }
    }
}

// ───────────────────────── Stage 3: Blurred ──────────────────────────

/// Pipeline state after blurring.
///
/// Call [`binarize`](Self::binarize) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing — call .binarize() to continue"]
pub struct Blurred {
    context: Context,
    blurred: GrayImage,
}

impl Blurred {
    /// The blurred luminance image.
    #[must_use]
    pub const fn blurred(&self) -> &GrayImage {
        &self.blurred
    }

    /// Threshold into a binary mask.
    pub fn binarize(self) -> Binarized {
        let mask = crate::threshold::binarize(&self.blurred, &self.context.config);
        let foreground = crate::threshold::foreground_count(&mask);
        Binarized {
            context: self.context,
            mask,
            foreground,
        }
    }
}

// ───────────────────────── Stage 4: Binarized ────────────────────────

/// Pipeline state after binarization.
///
/// Call [`trace`](Self::trace) to advance to the next stage. This is the
/// only stage that checkpoints, so it is the only fallible advance after
/// validation.
#[must_use = "pipeline stages are consumed by advancing — call .trace() to continue"]
pub struct Binarized {
    context: Context,
    mask: GrayImage,
    foreground: u64,
}

impl Binarized {
    /// The binary mask: 0 foreground, 255 background.
    #[must_use]
    pub const fn mask(&self) -> &GrayImage {
        &self.mask
    }

    /// Trace contours, choosing the sampling fallback for oversized masks.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Cancelled`] if `host` is cancelled while
    /// tracing.
    pub fn trace(self, host: &mut Host<'_>) -> Result<Traced, PipelineError> {
        let pixels = u64::from(self.mask.width()) * u64::from(self.mask.height());
        let tracer = ContourTracerKind::for_mask(pixels, &self.context.limits);
        let report = tracer.trace(&self.mask, &self.context.config, &self.context.limits, host)?;
        Ok(Traced {
            context: self.context,
            report,
        })
    }
}

// ───────────────────────── Stage 5: Traced ───────────────────────────

/// Pipeline state after contour tracing. Points are still in processing
/// coordinates.
///
/// Call [`reduce`](Self::reduce) to advance to the final stage.
#[must_use = "pipeline stages are consumed by advancing — call .reduce() to continue"]
pub struct Traced {
    context: Context,
    report: TraceReport,
}

impl Traced {
    /// Contours and counters from the tracer.
    #[must_use]
    pub const fn report(&self) -> &TraceReport {
        &self.report
    }

    /// Rescale to original coordinates, then rank, cap and simplify if
    /// there are more contours than `max_contour_count`.
    pub fn reduce(self) -> Reduced {
        let Self {
            context,
            mut report,
        } = self;
        #[allow(clippy::cast_possible_wrap)]
        let factor = context.config.downsample_factor as i32;
        let contours: Vec<Contour> = std::mem::take(&mut report.contours)
            .into_iter()
            .map(|c| c.scaled(factor))
            .collect();

        let cap = context.config.max_contour_count;
        let (contours, reduction) = if contours.len() > cap {
            let epsilon = crate::simplify::epsilon_for(context.dimensions);
            tracing::info!(
                count = contours.len(),
                cap,
                epsilon,
                "too many contours, keeping the longest and simplifying",
            );
            let mut reduction = crate::simplify::reduce_contours(contours, cap, epsilon);
            (std::mem::take(&mut reduction.contours), Some(reduction))
        } else {
            (contours, None)
        };

        Reduced {
            context,
            report,
            contours,
            reduction,
        }
    }
}

// ───────────────────────── Stage 6: Reduced ──────────────────────────

/// Final pipeline state: contours in original-image coordinates.
///
/// Call [`into_outline`](Self::into_outline) to package the result.
#[must_use = "pipeline stages are consumed by advancing — call .into_outline() to finish"]
pub struct Reduced {
    context: Context,
    /// Tracer counters; its contour list has been moved out.
    report: TraceReport,
    contours: Vec<Contour>,
    reduction: Option<Reduction>,
}

impl Reduced {
    /// The final contours.
    #[must_use]
    pub fn contours(&self) -> &[Contour] {
        &self.contours
    }

    /// Whether the rank-cap-simplify step ran.
    #[must_use]
    pub const fn simplified(&self) -> bool {
        self.reduction.is_some()
    }

    /// Package the contours with stats and the given diagnostics.
    pub fn into_outline(self, diagnostics: PipelineDiagnostics) -> Outline {
        let truncated_count = self
            .contours
            .iter()
            .filter(|c| c.kind() == ContourKind::Truncated)
            .count();
        let stats = PipelineStats {
            processing_time_ms: crate::diagnostics::duration_ms(diagnostics.total_duration),
            contour_count: self.contours.len(),
            downsample_factor: self.context.config.downsample_factor,
            tracer: self.report.tracer,
            adaptive_threshold: self.context.config.use_adaptive_threshold,
            budget_exceeded: self.report.budget_exceeded,
            count_capped: self.report.count_capped,
            simplified: self.reduction.is_some(),
            truncated_count,
            stuck_count: self.report.stuck,
            discarded_count: self.report.discarded_short,
        };
        Outline {
            contours: self.contours,
            stats,
            dimensions: self.context.dimensions,
            diagnostics,
        }
    }
}

// ──────────────────────── PipelineStage trait ────────────────────────

/// Common metadata for every stage struct.
pub trait PipelineStage: Sized {
    /// Human-readable name of this stage (e.g. `"source"`, `"blur"`).
    const NAME: &str;

    /// Zero-based index of this stage (`0` for Pending through `6` for
    /// Reduced).
    const INDEX: usize;

    /// Stage-specific metrics for diagnostics.
    ///
    /// `None` for stages that did no measurable work, and for
    /// [`Reduced`] when no simplification was needed.
    fn metrics(&self) -> Option<StageMetrics>;
}

impl PipelineStage for Pending {
    const NAME: &str = "source";
    const INDEX: usize = 0;

    fn metrics(&self) -> Option<StageMetrics> {
        None
    }
}

impl PipelineStage for Validated {
    const NAME: &str = "validate";
    const INDEX: usize = 1;

    fn metrics(&self) -> Option<StageMetrics> {
        None
    }
}

impl PipelineStage for Grayscaled {
    const NAME: &str = "grayscale";
    const INDEX: usize = 2;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Grayscale {
            width: self.gray.width(),
            height: self.gray.height(),
            downsample_factor: self.context.config.downsample_factor,
        })
    }
}

impl PipelineStage for Blurred {
    const NAME: &str = "blur";
    const INDEX: usize = 3;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Blur {
            radius: self.context.config.blur_radius,
        })
    }
}

impl PipelineStage for Binarized {
    const NAME: &str = "threshold";
    const INDEX: usize = 4;

    fn metrics(&self) -> Option<StageMetrics> {
        let config = &self.context.config;
        Some(StageMetrics::Threshold {
            adaptive: config.use_adaptive_threshold,
            threshold: config.threshold,
            block_size: config.use_adaptive_threshold.then(|| {
                crate::threshold::adaptive_block_size(self.mask.width(), self.mask.height())
            }),
            foreground_pixels: self.foreground,
            total_pixels: u64::from(self.mask.width()) * u64::from(self.mask.height()),
        })
    }
}

impl PipelineStage for Traced {
    const NAME: &str = "contours";
    const INDEX: usize = 5;

    fn metrics(&self) -> Option<StageMetrics> {
        let stats = crate::diagnostics::contour_stats(&self.report.contours);
        Some(StageMetrics::ContourTracing {
            tracer: self.report.tracer,
            contour_count: self.report.contours.len(),
            total_point_count: stats.total,
            min_contour_points: stats.min,
            max_contour_points: stats.max,
            mean_contour_points: stats.mean,
            discarded_short: self.report.discarded_short,
            truncated: self.report.truncated,
            stuck: self.report.stuck,
            budget_exceeded: self.report.budget_exceeded,
            count_capped: self.report.count_capped,
        })
    }
}

impl PipelineStage for Reduced {
    const NAME: &str = "simplify";
    const INDEX: usize = 6;

    fn metrics(&self) -> Option<StageMetrics> {
        self.reduction
            .as_ref()
            .map(|r| StageMetrics::Simplification {
                epsilon: r.epsilon,
                contours_before: r.contours_before,
                contours_after: self.contours.len(),
                points_before: r.points_before,
                points_after: r.points_after,
            })
    }
}

// ───────────────────────────── Driver ────────────────────────────────

/// Run the full pipeline with no progress reporting or cancellation.
///
/// # Errors
///
/// See [`process_with`].
pub fn process(request: OutlineRequest, options: &PipelineOptions) -> Result<Outline, PipelineError> {
    let mut silent = Silent;
    process_with(request, options, &mut Host::new(&mut silent))
}

/// Run the full pipeline on `host`.
///
/// Reports every state transition to the host's observer, ending in
/// exactly one of [`PipelineState::Done`] or [`PipelineState::Failed`].
/// A time-budget overrun is not a failure: the contours found so far are
/// returned and [`PipelineStats::budget_exceeded`] is set.
///
/// # Errors
///
/// Returns [`PipelineError::InputTooLarge`] or
/// [`PipelineError::InvalidInput`] from validation,
/// [`PipelineError::Cancelled`] if the host's token is set at a yield
/// point, and [`PipelineError::InternalFault`] if a stage panics.
pub fn process_with(
    request: OutlineRequest,
    options: &PipelineOptions,
    host: &mut Host<'_>,
) -> Result<Outline, PipelineError> {
    let dimensions = request.dimensions();
    let span = tracing::info_span!(
        "outline",
        width = dimensions.width,
        height = dimensions.height
    );
    let _guard = span.enter();

    host.enter(PipelineState::Idle);
    let result = catch_unwind(AssertUnwindSafe(|| run(request, options, host)))
        .unwrap_or_else(|payload| Err(PipelineError::InternalFault(panic_message(&*payload))));

    match &result {
        Ok(outline) => {
            tracing::info!(
                contours = outline.stats.contour_count,
                ms = outline.stats.processing_time_ms,
                "outline complete",
            );
            host.enter(PipelineState::Done);
        }
        Err(e) => {
            tracing::warn!(error = %e, "outline failed");
            host.enter(PipelineState::Failed);
        }
    }
    result
}

fn run(
    request: OutlineRequest,
    options: &PipelineOptions,
    host: &mut Host<'_>,
) -> Result<Outline, PipelineError> {
    let started = host.now();

    host.enter(PipelineState::Preprocessing);
    let validated = Pending::new(request, options.clone()).validate()?;
    host.yield_point()?;

    let t = host.now();
    let gray = validated.grayscale();
    let grayscale = stage_diagnostics(&gray, host.now().saturating_sub(t))?;
    host.yield_point()?;

    let t = host.now();
    let blurred = gray.blur();
    let blur = stage_diagnostics(&blurred, host.now().saturating_sub(t))?;
    host.yield_point()?;

    let t = host.now();
    let binarized = blurred.binarize();
    let threshold = stage_diagnostics(&binarized, host.now().saturating_sub(t))?;
    host.yield_point()?;

    host.enter(PipelineState::Tracing);
    let t = host.now();
    let traced = binarized.trace(host)?;
    let contour_tracing = stage_diagnostics(&traced, host.now().saturating_sub(t))?;
    host.yield_point()?;

    host.enter(PipelineState::Simplifying);
    let t = host.now();
    let reduced = traced.reduce();
    let simplification = reduced.metrics().map(|metrics| StageDiagnostics {
        duration: host.now().saturating_sub(t),
        metrics,
    });

    let dimensions = reduced.context.dimensions;
    let diagnostics = PipelineDiagnostics {
        grayscale,
        blur,
        threshold,
        contour_tracing,
        simplification,
        total_duration: host.now().saturating_sub(started),
        summary: PipelineSummary {
            image_width: dimensions.width,
            image_height: dimensions.height,
            pixel_count: dimensions.pixel_count(),
            contour_count: reduced.contours.len(),
            final_point_count: crate::simplify::total_points(&reduced.contours),
        },
    };
    Ok(reduced.into_outline(diagnostics))
}

fn stage_diagnostics<S: PipelineStage>(
    stage: &S,
    duration: Duration,
) -> Result<StageDiagnostics, PipelineError> {
    stage
        .metrics()
        .map(|metrics| StageDiagnostics { duration, metrics })
        .ok_or_else(|| PipelineError::InternalFault(format!("stage {} has no metrics", S::NAME)))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "stage panicked".to_string())
}
