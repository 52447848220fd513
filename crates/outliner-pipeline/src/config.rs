//! Pipeline options and the per-invocation configuration resolved from
//! them.
//!
//! [`PipelineOptions`] is what a caller tunes. [`PipelineConfig`] is the
//! immutable record a single run works from: the downsample factor,
//! threshold mode and minimum contour length depend on the image size, so
//! they are resolved once the request dimensions are known.

use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, PipelineError};

/// Hard ceilings, cutoffs and cadences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Requests with more pixels than this fail with `InputTooLarge`.
    pub max_input_pixels: u64,
    /// Masks with more pixels than this are traced in sampling mode.
    pub sampling_mask_pixels: u64,
    /// Images with more pixels than this use adaptive thresholding.
    pub adaptive_above_pixels: u64,
    /// Scanned mask positions between tracer checkpoints.
    pub yield_interval: u64,
    /// Minimum wall time between progress events, in milliseconds.
    pub progress_interval_ms: u64,
}

impl Limits {
    /// 25 megapixels.
    pub const DEFAULT_MAX_INPUT_PIXELS: u64 = 25_000_000;
    /// 16 megapixels.
    pub const DEFAULT_SAMPLING_MASK_PIXELS: u64 = 16_000_000;
    /// Half a megapixel.
    pub const DEFAULT_ADAPTIVE_ABOVE_PIXELS: u64 = 500_000;
    /// Default checkpoint cadence.
    pub const DEFAULT_YIELD_INTERVAL: u64 = 100_000;
    /// One progress event per second at most.
    pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 1000;
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_input_pixels: Self::DEFAULT_MAX_INPUT_PIXELS,
            sampling_mask_pixels: Self::DEFAULT_SAMPLING_MASK_PIXELS,
            adaptive_above_pixels: Self::DEFAULT_ADAPTIVE_ABOVE_PIXELS,
            yield_interval: Self::DEFAULT_YIELD_INTERVAL,
            progress_interval_ms: Self::DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }
}

/// Caller-facing pipeline settings.
///
/// `None` overrides mean "derive from the image size".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Global threshold: luminance below this is foreground.
    pub threshold: u8,
    /// Box blur radius; 0 disables the blur.
    pub blur_radius: u32,
    /// Force a downsample factor instead of the size breakpoints.
    pub downsample_factor: Option<u32>,
    /// Force adaptive (`true`) or global (`false`) thresholding.
    pub adaptive_threshold: Option<bool>,
    /// Force the minimum kept contour length.
    pub min_contour_length: Option<usize>,
    /// Points at which a walk is cut off.
    pub max_contour_length: usize,
    /// Contour count safety valve, also the cap applied when reducing.
    pub max_contour_count: usize,
    /// Wall-clock budget for the whole tracing pass, in milliseconds.
    pub time_budget_ms: u64,
    /// Ceilings and cadences.
    pub limits: Limits,
}

impl PipelineOptions {
    /// Default global threshold.
    pub const DEFAULT_THRESHOLD: u8 = 128;
    /// Default blur radius.
    pub const DEFAULT_BLUR_RADIUS: u32 = 1;
    /// Default maximum contour length.
    pub const DEFAULT_MAX_CONTOUR_LENGTH: usize = 1000;
    /// Default maximum contour count.
    pub const DEFAULT_MAX_CONTOUR_COUNT: usize = 5000;
    /// Default tracing budget (20 s).
    pub const DEFAULT_TIME_BUDGET_MS: u64 = 20_000;
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            threshold: Self::DEFAULT_THRESHOLD,
            blur_radius: Self::DEFAULT_BLUR_RADIUS,
            downsample_factor: None,
            adaptive_threshold: None,
            min_contour_length: None,
            max_contour_length: Self::DEFAULT_MAX_CONTOUR_LENGTH,
            max_contour_count: Self::DEFAULT_MAX_CONTOUR_COUNT,
            time_budget_ms: Self::DEFAULT_TIME_BUDGET_MS,
            limits: Limits::default(),
        }
    }
}

/// The resolved, immutable configuration of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Global threshold, `0..=255`.
    pub threshold: u8,
    /// Integer downsample factor, at least 1.
    pub downsample_factor: u32,
    /// Box blur radius.
    pub blur_radius: u32,
    /// Local-adaptive instead of global thresholding.
    pub use_adaptive_threshold: bool,
    /// Shorter walks are discarded as noise.
    pub min_contour_length: usize,
    /// Walks are cut off at this many points.
    pub max_contour_length: usize,
    /// Tracing stops once more contours than this have been kept.
    pub max_contour_count: usize,
    /// Budget for the whole tracing pass, in milliseconds.
    pub time_budget_ms: u64,
}

impl PipelineConfig {
    /// Resolve options against the dimensions of the original image.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] for a zero downsample
    /// factor, a factor larger than either dimension, or a zero
    /// `max_contour_length`.
    pub fn resolve(options: &PipelineOptions, dimensions: Dimensions) -> Result<Self, PipelineError> {
        let pixel_count = dimensions.pixel_count();
        let shortest = dimensions.width.min(dimensions.height);

        let downsample_factor = match options.downsample_factor {
            Some(0) => {
                return Err(PipelineError::InvalidInput(
                    "downsample factor must be at least 1".into(),
                ));
            }
            Some(f) if f > shortest => {
                return Err(PipelineError::InvalidInput(format!(
                    "downsample factor {f} leaves no pixels of a {}x{} image",
                    dimensions.width, dimensions.height,
                )));
            }
            Some(f) => f,
            None => downsample_factor_for(pixel_count).min(shortest.max(1)),
        };

        if options.max_contour_length == 0 {
            return Err(PipelineError::InvalidInput(
                "max contour length must be at least 1".into(),
            ));
        }

        let processing = processing_dimensions(dimensions, downsample_factor);
        let min_contour_length = options
            .min_contour_length
            .unwrap_or_else(|| default_min_contour_length(processing));

        Ok(Self {
            threshold: options.threshold,
            downsample_factor,
            blur_radius: options.blur_radius,
            use_adaptive_threshold: options
                .adaptive_threshold
                .unwrap_or(pixel_count > options.limits.adaptive_above_pixels),
            min_contour_length,
            max_contour_length: options.max_contour_length,
            max_contour_count: options.max_contour_count,
            time_budget_ms: options.time_budget_ms,
        })
    }
}

/// Downsample factor from fixed pixel-count breakpoints.
#[must_use]
pub const fn downsample_factor_for(pixel_count: u64) -> u32 {
    if pixel_count > 4_000_000 {
        4
    } else if pixel_count > 2_000_000 {
        3
    } else if pixel_count > 1_000_000 {
        2
    } else {
        1
    }
}

/// Processing resolution: `floor(width / f) x floor(height / f)`.
#[must_use]
pub const fn processing_dimensions(dimensions: Dimensions, factor: u32) -> Dimensions {
    Dimensions {
        width: dimensions.width / factor,
        height: dimensions.height / factor,
    }
}

/// `max(5, floor(min(w, h) / 100))` at processing resolution.
#[must_use]
pub fn default_min_contour_length(processing: Dimensions) -> usize {
    let shortest = processing.width.min(processing.height) / 100;
    (shortest as usize).max(5)
}
