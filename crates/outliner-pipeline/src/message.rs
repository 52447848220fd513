//! Wire messages exchanged with a worker host.
//!
//! A request carries raw RGBA pixels, the image size and an optional
//! threshold. The worker answers with zero or more progress messages and
//! exactly one result message, all tagged on `"type"` with camelCase
//! fields.

use serde::{Deserialize, Serialize};

use crate::config::PipelineOptions;
use crate::progress::Progress;
use crate::types::{FailureKind, Outline, OutlineRequest, PipelineError, PipelineStats, Point};

/// An incoming processing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Interleaved RGBA bytes, row-major, top-left origin.
    pub pixels: Vec<u8>,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Global threshold; accepted as any integer and range-checked.
    #[serde(default = "default_threshold")]
    pub threshold: i64,
}

fn default_threshold() -> i64 {
    i64::from(PipelineOptions::DEFAULT_THRESHOLD)
}

impl Request {
    /// Split into a pipeline request and `base` options with this
    /// request's threshold applied.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] if the threshold is outside
    /// `0..=255`.
    pub fn into_parts(
        self,
        base: PipelineOptions,
    ) -> Result<(OutlineRequest, PipelineOptions), PipelineError> {
        let threshold = u8::try_from(self.threshold).map_err(|_| {
            PipelineError::InvalidInput(format!(
                "threshold {} is outside 0..=255",
                self.threshold
            ))
        })?;
        let options = PipelineOptions { threshold, ..base };
        Ok((
            OutlineRequest::new(self.pixels, self.width, self.height),
            options,
        ))
    }
}

/// Any message sent from the worker to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    /// Tracing progress.
    Progress(ProgressMessage),
    /// Terminal result.
    Result(ResultMessage),
}

/// Progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMessage {
    /// Whole percent of the mask scanned, `0..=100`.
    pub percent_complete: u32,
    /// Contours kept so far.
    pub contours_found: usize,
}

impl From<Progress> for ProgressMessage {
    fn from(progress: Progress) -> Self {
        Self {
            percent_complete: progress.percent_complete(),
            contours_found: progress.contours_found,
        }
    }
}

/// Terminal result: contours and stats on success, an error otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMessage {
    /// Whether the run succeeded.
    pub success: bool,
    /// Contours as point lists, in original-image coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contours: Option<Vec<Vec<Point>>>,
    /// Run statistics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatsMessage>,
    /// Human-readable failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
}

impl From<Result<Outline, PipelineError>> for ResultMessage {
    fn from(result: Result<Outline, PipelineError>) -> Self {
        match result {
            Ok(outline) => Self {
                success: true,
                stats: Some(StatsMessage::from(&outline.stats)),
                contours: Some(
                    outline
                        .contours
                        .into_iter()
                        .map(crate::types::Contour::into_points)
                        .collect(),
                ),
                error: None,
                kind: None,
            },
            Err(e) => Self {
                success: false,
                contours: None,
                stats: None,
                error: Some(e.to_string()),
                kind: Some(e.kind()),
            },
        }
    }
}

/// Statistics carried by a successful result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsMessage {
    /// Wall-clock processing time in milliseconds.
    pub processing_time_ms: f64,
    /// Number of contours returned.
    pub contour_count: usize,
    /// Factor the image was downsampled by.
    pub downsample_factor: u32,
    /// The tracing budget ran out; contours are partial.
    #[serde(default)]
    pub budget_exceeded: bool,
    /// Contours were capped and simplified.
    #[serde(default)]
    pub simplified: bool,
    /// The sampling fallback produced single-point contours.
    #[serde(default)]
    pub sampling_mode: bool,
    /// Contours cut off at the maximum length.
    #[serde(default)]
    pub truncated_count: usize,
}

impl From<&PipelineStats> for StatsMessage {
    fn from(stats: &PipelineStats) -> Self {
        Self {
            processing_time_ms: stats.processing_time_ms,
            contour_count: stats.contour_count,
            downsample_factor: stats.downsample_factor,
            budget_exceeded: stats.budget_exceeded,
            simplified: stats.simplified,
            sampling_mode: stats.tracer == crate::contour::ContourTracerKind::Sampling,
            truncated_count: stats.truncated_count,
        }
    }
}
