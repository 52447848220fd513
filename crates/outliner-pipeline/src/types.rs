//! Shared types for the outline extraction pipeline.

use serde::{Deserialize, Serialize};

use crate::contour::ContourTracerKind;
use crate::diagnostics::PipelineDiagnostics;

/// Re-export `GrayImage` so downstream crates can reference
/// intermediate raster data without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbaImage` so callers can build requests from decoded
/// images without depending on `image` directly.
pub use image::RgbaImage;

/// A pixel position.
///
/// Inside the pipeline coordinates are in processing (possibly
/// downsampled) space; every point that leaves the pipeline has been
/// rescaled to the original image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: i32,
    /// Vertical position (pixels from top edge).
    pub y: i32,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Multiply both coordinates by `factor`.
    #[must_use]
    pub const fn scaled(self, factor: i32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
        }
    }
}

/// How a contour came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContourKind {
    /// The walk returned to its start pixel. The start point is repeated
    /// as the last point.
    Closed,
    /// The walk stopped early: dead end, oscillation, or step ceiling.
    Open,
    /// The walk reached `max_contour_length` points and was cut off.
    Truncated,
    /// Single-point contour emitted by the sampling fallback.
    Sampled,
}

/// One traced boundary: an ordered, non-empty list of points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contour {
    points: Vec<Point>,
    kind: ContourKind,
}

impl Contour {
    /// Create a contour from its points and termination kind.
    #[must_use]
    pub const fn new(points: Vec<Point>, kind: ContourKind) -> Self {
        Self { points, kind }
    }

    /// How the walk that produced this contour ended.
    #[must_use]
    pub const fn kind(&self) -> ContourKind {
        self.kind
    }

    /// Returns `true` if the walk returned to its start pixel.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.kind, ContourKind::Closed)
    }

    /// Returns `true` if the contour has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns the number of points in the contour.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns a slice of all points.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Consumes the contour and returns the underlying vector of points.
    #[must_use]
    pub fn into_points(self) -> Vec<Point> {
        self.points
    }

    /// Rescale every point by `factor`, keeping the kind.
    #[must_use]
    pub fn scaled(self, factor: i32) -> Self {
        if factor == 1 {
            return self;
        }
        Self {
            points: self.points.into_iter().map(|p| p.scaled(factor)).collect(),
            kind: self.kind,
        }
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Total pixel count, computed without overflow.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Raw, unvalidated input: interleaved RGBA bytes plus dimensions.
///
/// Nothing is checked on construction. The coordinator validates the
/// dimensions against the size ceiling *before* looking at the buffer,
/// so an oversized request is rejected without further allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineRequest {
    pixels: Vec<u8>,
    dimensions: Dimensions,
}

impl OutlineRequest {
    /// Wrap raw RGBA bytes (`width * height * 4`, row-major, top-left
    /// origin).
    #[must_use]
    pub const fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            pixels,
            dimensions: Dimensions { width, height },
        }
    }

    /// Build a request from a decoded image.
    #[must_use]
    pub fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height)
    }

    /// Declared dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// The raw bytes as supplied.
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub(crate) fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

/// Validated, immutable RGBA pixel buffer.
#[derive(Debug, Clone)]
pub struct PixelBuffer(RgbaImage);

impl PixelBuffer {
    /// Validate raw bytes against the declared dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] if either dimension is zero
    /// or the buffer length is not `width * height * 4`.
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, PipelineError> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidInput(format!(
                "image dimensions must be positive, got {width}x{height}"
            )));
        }
        let expected = u64::from(width) * u64::from(height) * 4;
        let actual = pixels.len() as u64;
        if actual != expected {
            return Err(PipelineError::InvalidInput(format!(
                "pixel buffer holds {actual} bytes, expected {expected} for {width}x{height} RGBA"
            )));
        }
        RgbaImage::from_raw(width, height, pixels)
            .map(Self)
            .ok_or_else(|| PipelineError::InvalidInput("pixel buffer does not fit image".into()))
    }

    /// Image dimensions.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        let (width, height) = self.0.dimensions();
        Dimensions { width, height }
    }

    /// The underlying image.
    #[must_use]
    pub const fn image(&self) -> &RgbaImage {
        &self.0
    }
}

/// Counters describing one successful run.
///
/// The first three fields are the stats carried by the wire result
/// message; the rest note which guards tripped along the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Wall-clock time from request to result, in milliseconds.
    pub processing_time_ms: f64,
    /// Number of contours returned.
    pub contour_count: usize,
    /// Factor the image was downsampled by before tracing.
    pub downsample_factor: u32,
    /// Which tracer walked the mask.
    pub tracer: ContourTracerKind,
    /// Whether local-adaptive thresholding was used.
    pub adaptive_threshold: bool,
    /// The tracing time budget ran out; contours are partial.
    pub budget_exceeded: bool,
    /// Tracing stopped at the contour-count safety valve.
    pub count_capped: bool,
    /// Contours were ranked, capped and simplified.
    pub simplified: bool,
    /// Contours cut off at `max_contour_length`.
    pub truncated_count: usize,
    /// Walks abandoned by the oscillation detector.
    pub stuck_count: usize,
    /// Walks discarded as shorter than `min_contour_length`.
    pub discarded_count: usize,
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outline {
    /// Traced contours in original-image coordinates.
    pub contours: Vec<Contour>,
    /// Summary counters.
    pub stats: PipelineStats,
    /// Dimensions of the original image.
    pub dimensions: Dimensions,
    /// Per-stage timings and metrics.
    pub diagnostics: PipelineDiagnostics,
}

/// Coarse category of a [`PipelineError`], for callers that branch on
/// the failure type without matching payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Pixel count exceeds the hard ceiling.
    InputTooLarge,
    /// Malformed request.
    InvalidInput,
    /// Cancellation was observed at a yield point.
    Cancelled,
    /// A stage faulted unexpectedly.
    InternalFault,
}

/// Errors that end a pipeline run.
///
/// Budget overruns and abandoned walks are not errors: they are reported
/// through [`PipelineStats`] and [`ContourKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum PipelineError {
    /// The image has more pixels than the configured ceiling.
    #[error("image too large ({width}x{height}) - exceeds maximum size limit of {limit} pixels")]
    InputTooLarge {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
        /// Pixel ceiling in force.
        limit: u64,
    },

    /// The request or options are malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The caller cancelled the run.
    #[error("processing was cancelled")]
    Cancelled,

    /// A stage faulted; the message describes the fault.
    #[error("internal fault: {0}")]
    InternalFault(String),
}

impl PipelineError {
    /// The failure category.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::InputTooLarge { .. } => FailureKind::InputTooLarge,
            Self::InvalidInput(_) => FailureKind::InvalidInput,
            Self::Cancelled => FailureKind::Cancelled,
            Self::InternalFault(_) => FailureKind::InternalFault,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // --- Point tests ---

    #[test]
    fn point_scaled() {
        assert_eq!(Point::new(3, 4).scaled(3), Point::new(9, 12));
    }

    #[test]
    fn point_serializes_as_xy_object() {
        let json = serde_json::to_string(&Point::new(7, -2)).unwrap();
        assert_eq!(json, r#"{"x":7,"y":-2}"#);
    }

    // --- Contour tests ---

    #[test]
    fn contour_accessors() {
        let c = Contour::new(vec![Point::new(0, 0), Point::new(1, 0)], ContourKind::Open);
        assert_eq!(c.len(), 2);
        assert!(!c.is_empty());
        assert!(!c.is_closed());
        assert_eq!(c.kind(), ContourKind::Open);
        assert_eq!(c.points()[1], Point::new(1, 0));
    }

    #[test]
    fn contour_scaled_keeps_kind() {
        let c = Contour::new(vec![Point::new(1, 2), Point::new(3, 4)], ContourKind::Closed);
        let scaled = c.scaled(2);
        assert!(scaled.is_closed());
        assert_eq!(scaled.into_points(), vec![Point::new(2, 4), Point::new(6, 8)]);
    }

    // --- PixelBuffer tests ---

    #[test]
    fn pixel_buffer_accepts_exact_length() {
        let buffer = PixelBuffer::from_raw(3, 2, vec![0; 24]).unwrap();
        assert_eq!(
            buffer.dimensions(),
            Dimensions {
                width: 3,
                height: 2
            }
        );
    }

    #[test]
    fn pixel_buffer_rejects_length_mismatch() {
        let result = PixelBuffer::from_raw(3, 2, vec![0; 23]);
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }

    #[test]
    fn pixel_buffer_rejects_zero_dimension() {
        let result = PixelBuffer::from_raw(0, 2, Vec::new());
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }

    #[test]
    fn request_from_image_keeps_bytes() {
        let img = RgbaImage::from_pixel(2, 1, image::Rgba([1, 2, 3, 4]));
        let request = OutlineRequest::from_image(img);
        assert_eq!(request.pixels(), &[1, 2, 3, 4, 1, 2, 3, 4]);
        assert_eq!(request.dimensions().pixel_count(), 2);
    }

    // --- PipelineError tests ---

    #[test]
    fn error_kinds() {
        let too_large = PipelineError::InputTooLarge {
            width: 6000,
            height: 6000,
            limit: 25_000_000,
        };
        assert_eq!(too_large.kind(), FailureKind::InputTooLarge);
        assert_eq!(PipelineError::Cancelled.kind(), FailureKind::Cancelled);
        assert_eq!(
            PipelineError::InternalFault("x".into()).kind(),
            FailureKind::InternalFault
        );
    }

    #[test]
    fn error_input_too_large_display() {
        let err = PipelineError::InputTooLarge {
            width: 6000,
            height: 6000,
            limit: 25_000_000,
        };
        assert_eq!(
            err.to_string(),
            "image too large (6000x6000) - exceeds maximum size limit of 25000000 pixels",
        );
    }

    #[test]
    fn pipeline_error_serde_round_trip() {
        let err = PipelineError::InvalidInput("bad value".to_string());
        let json = serde_json::to_string(&err).unwrap();
        let deserialized: PipelineError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, deserialized);
    }
}
