//! Contour tracing: walk the boundaries of foreground regions in a
//! binary mask.
//!
//! This module defines the [`ContourTracer`] trait for tracing strategies
//! and the [`ContourTracerKind`] enum that selects one at runtime.
//!
//! # Moore-neighbor tracing
//!
//! The mask is raster-scanned (strided on very wide or tall masks) in
//! bands of [`CHUNK_ROWS`] rows. Every unvisited foreground pixel with at
//! least one in-bounds background neighbor starts a walk. The walk
//! searches the 8-neighborhood clockwise from a direction just behind
//! the last background pixel and moves to the first foreground pixel it
//! finds, until it returns to the start, runs out of neighbors, or trips
//! one of the guards: a point ceiling, a step ceiling, and an
//! oscillation detector. A pass-wide time budget and a contour-count
//! valve bound the scan as a whole.
//!
//! # Sampling fallback
//!
//! Masks above [`Limits::sampling_mask_pixels`] skip walking altogether.
//! A coarse grid is sampled and every foreground sample touching the
//! background becomes a single-point [`ContourKind::Sampled`] contour.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::config::{Limits, PipelineConfig};
use crate::progress::{Flow, Host, Monitor};
use crate::threshold::{BACKGROUND, FOREGROUND};
use crate::types::{Contour, ContourKind, PipelineError, Point};

/// Rows per scan band. Budget and progress are checked at each band.
pub const CHUNK_ROWS: u32 = 200;

/// Upper bound on the number of single-point contours in sampling mode.
pub const SAMPLE_LIMIT: usize = 1000;

/// Neighbor offsets, clockwise from north.
const DX: [i32; 8] = [0, 1, 1, 1, 0, -1, -1, -1];
const DY: [i32; 8] = [-1, -1, 0, 1, 1, 1, 0, -1];

/// Rotation applied to a direction to get the next search start.
const BACKTRACK: usize = 6;

/// Selects which contour tracing strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ContourTracerKind {
    /// Full Moore-neighbor boundary walks.
    #[default]
    MooreNeighbor,
    /// Coarse grid sampling with single-point contours, for masks too
    /// large to walk.
    Sampling,
}

impl ContourTracerKind {
    /// The strategy for a mask of `pixel_count` pixels.
    #[must_use]
    pub const fn for_mask(pixel_count: u64, limits: &Limits) -> Self {
        if pixel_count > limits.sampling_mask_pixels {
            Self::Sampling
        } else {
            Self::MooreNeighbor
        }
    }

    /// Human-readable name, used in logs and diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MooreNeighbor => "moore-neighbor",
            Self::Sampling => "sampling",
        }
    }
}

/// Everything a tracing pass produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceReport {
    /// Kept contours, in processing coordinates and discovery order.
    pub contours: Vec<Contour>,
    /// Strategy that produced them.
    pub tracer: ContourTracerKind,
    /// Mask positions scanned before the pass ended.
    pub scanned: u64,
    /// Mask positions a complete pass scans.
    pub total: u64,
    /// Walks dropped for being shorter than the minimum length.
    pub discarded_short: usize,
    /// Kept contours cut off at the maximum length.
    pub truncated: usize,
    /// Walks ended by the oscillation detector.
    pub stuck: usize,
    /// The time budget ran out before the scan finished.
    pub budget_exceeded: bool,
    /// The scan stopped at the contour-count valve.
    pub count_capped: bool,
}

impl TraceReport {
    const fn empty(tracer: ContourTracerKind, total: u64) -> Self {
        Self {
            contours: Vec::new(),
            tracer,
            scanned: 0,
            total,
            discarded_short: 0,
            truncated: 0,
            stuck: 0,
            budget_exceeded: false,
            count_capped: false,
        }
    }
}

/// Trait for contour tracing strategies.
///
/// Input: a binary mask (0 = foreground, 255 = background). Output: the
/// traced contours plus counters. Implementations check `host` for
/// cancellation and report progress through it.
pub trait ContourTracer {
    /// Trace contours in `mask`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Cancelled`] if cancellation is observed
    /// at a checkpoint.
    fn trace(
        &self,
        mask: &GrayImage,
        config: &PipelineConfig,
        limits: &Limits,
        host: &mut Host<'_>,
    ) -> Result<TraceReport, PipelineError>;
}

impl ContourTracer for ContourTracerKind {
    fn trace(
        &self,
        mask: &GrayImage,
        config: &PipelineConfig,
        limits: &Limits,
        host: &mut Host<'_>,
    ) -> Result<TraceReport, PipelineError> {
        match *self {
            Self::MooreNeighbor => trace_moore(mask, config, limits, host),
            Self::Sampling => trace_sampled(mask, config, limits, host),
        }
    }
}

/// Bounds-checked read access to a binary mask.
#[derive(Clone, Copy)]
struct MaskView<'m> {
    data: &'m [u8],
    width: i32,
    height: i32,
}

impl<'m> MaskView<'m> {
    #[allow(clippy::cast_possible_wrap)]
    fn new(mask: &'m GrayImage) -> Self {
        Self {
            data: mask.as_raw(),
            width: mask.width() as i32,
            height: mask.height() as i32,
        }
    }

    const fn contains(self, p: Point) -> bool {
        p.x >= 0 && p.x < self.width && p.y >= 0 && p.y < self.height
    }

    #[allow(clippy::cast_sign_loss)]
    const fn index(self, p: Point) -> usize {
        p.y as usize * self.width as usize + p.x as usize
    }

    fn value(self, p: Point) -> Option<u8> {
        if self.contains(p) {
            self.data.get(self.index(p)).copied()
        } else {
            None
        }
    }

    fn is_foreground(self, p: Point) -> bool {
        self.value(p) == Some(FOREGROUND)
    }

    fn is_background(self, p: Point) -> bool {
        self.value(p) == Some(BACKGROUND)
    }

    /// First direction, clockwise from north, with an in-bounds
    /// background neighbor.
    fn first_background_dir(self, p: Point) -> Option<usize> {
        (0..8).find(|&d| self.is_background(neighbor(p, d)))
    }
}

const fn neighbor(p: Point, dir: usize) -> Point {
    Point::new(p.x + DX[dir], p.y + DY[dir])
}

/// One flag per mask pixel, bit-packed.
#[derive(Debug, Clone)]
pub struct VisitedSet {
    bits: Vec<u64>,
    len: usize,
}

impl VisitedSet {
    /// An empty set covering `len` pixels.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![0; len.div_ceil(64)],
            len,
        }
    }

    /// Number of pixels covered.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the set covers no pixels.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether pixel `index` is marked. Out-of-range indices are not.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.len && self.bits[index / 64] & (1 << (index % 64)) != 0
    }

    /// Mark pixel `index`. Returns `true` if it was not marked before.
    pub fn insert(&mut self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        let mask = 1 << (index % 64);
        let word = &mut self.bits[index / 64];
        let fresh = *word & mask == 0;
        *word |= mask;
        fresh
    }
}

/// Flags a walk whose position stops changing.
#[derive(Debug, Clone, Copy, Default)]
pub struct StuckDetector {
    last: Option<Point>,
    repeats: u32,
}

impl StuckDetector {
    /// Consecutive repeats of one position tolerated before giving up.
    pub const MAX_REPEATS: u32 = 8;

    /// Record the current position. Returns `true` once it has repeated
    /// more than [`Self::MAX_REPEATS`] times in a row.
    pub fn observe(&mut self, at: Point) -> bool {
        if self.last == Some(at) {
            self.repeats += 1;
            self.repeats > Self::MAX_REPEATS
        } else {
            self.last = Some(at);
            self.repeats = 0;
            false
        }
    }
}

/// Result of one Moore step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Moved to an unvisited boundary pixel.
    Moved(Point),
    /// Moved to a pixel already visited; no point is recorded.
    Revisited(Point),
    /// Returned to the start pixel with more than two points recorded.
    Closed,
    /// No foreground neighbor.
    DeadEnd,
}

/// Search the 8-neighborhood of `at` clockwise from `dir`.
///
/// Returns the transition and the search direction for the next step:
/// `(found + 6) mod 8`, or `dir` unchanged on a dead end.
fn step(
    mask: MaskView<'_>,
    visited: &VisitedSet,
    at: Point,
    dir: usize,
    start: Point,
    recorded: usize,
) -> (Step, usize) {
    for i in 0..8 {
        let d = (dir + i) % 8;
        let next = neighbor(at, d);
        if !mask.is_foreground(next) {
            continue;
        }
        let next_dir = (d + BACKTRACK) % 8;
        let transition = if next == start && recorded > 2 {
            Step::Closed
        } else if visited.contains(mask.index(next)) {
            Step::Revisited(next)
        } else {
            Step::Moved(next)
        };
        return (transition, next_dir);
    }
    (Step::DeadEnd, dir)
}

/// Why a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkEnd {
    Closed,
    Truncated,
    DeadEnd,
    MaxSteps,
    Stuck,
}

impl WalkEnd {
    const fn kind(self) -> ContourKind {
        match self {
            Self::Closed => ContourKind::Closed,
            Self::Truncated => ContourKind::Truncated,
            Self::DeadEnd | Self::MaxSteps | Self::Stuck => ContourKind::Open,
        }
    }
}

/// Walk one boundary from `start`, marking every recorded pixel visited.
///
/// At most `max_len` points are recorded and at most `2 * max_len`
/// steps taken. A closed walk repeats its start point at the end.
fn walk(
    mask: MaskView<'_>,
    visited: &mut VisitedSet,
    start: Point,
    max_len: usize,
) -> (Vec<Point>, WalkEnd) {
    visited.insert(mask.index(start));
    let mut points = vec![start];

    let Some(background) = mask.first_background_dir(start) else {
        return (points, WalkEnd::DeadEnd);
    };
    if points.len() >= max_len {
        return (points, WalkEnd::Truncated);
    }

    let mut dir = (background + BACKTRACK) % 8;
    let mut at = start;
    let mut stuck = StuckDetector::default();
    let max_steps = max_len.saturating_mul(2);

    for _ in 0..max_steps {
        // Never trips through `step` alone: `Moved` and `Revisited` both
        // change `at`.
        if stuck.observe(at) {
            return (points, WalkEnd::Stuck);
        }
        let (transition, next_dir) = step(mask, visited, at, dir, start, points.len());
        dir = next_dir;
        match transition {
            Step::Moved(next) => {
                visited.insert(mask.index(next));
                points.push(next);
                at = next;
                if points.len() >= max_len {
                    return (points, WalkEnd::Truncated);
                }
            }
            Step::Revisited(next) => at = next,
            Step::Closed => {
                points.push(start);
                return (points, WalkEnd::Closed);
            }
            Step::DeadEnd => return (points, WalkEnd::DeadEnd),
        }
    }
    (points, WalkEnd::MaxSteps)
}

/// Row offsets visited by the strided, banded scan.
fn scan_rows(height: u32, stride: u32) -> impl Iterator<Item = u32> {
    (0..height)
        .step_by(CHUNK_ROWS as usize)
        .flat_map(move |band| (band..(band + CHUNK_ROWS).min(height)).step_by(stride as usize))
}

/// Scan stride for one axis: `max(1, floor(len / 1000))`.
#[must_use]
pub const fn scan_stride(len: u32) -> u32 {
    let stride = len / 1000;
    if stride == 0 { 1 } else { stride }
}

fn trace_moore(
    mask: &GrayImage,
    config: &PipelineConfig,
    limits: &Limits,
    host: &mut Host<'_>,
) -> Result<TraceReport, PipelineError> {
    let (width, height) = mask.dimensions();
    let view = MaskView::new(mask);
    let (stride_x, stride_y) = (scan_stride(width), scan_stride(height));
    let row_len = u64::from(width.div_ceil(stride_x));
    let total = scan_rows(height, stride_y).count() as u64 * row_len;

    let mut report = TraceReport::empty(ContourTracerKind::MooreNeighbor, total);
    let mut visited = VisitedSet::new(mask.len());
    let mut monitor = Monitor::new(host, config.time_budget_ms, limits, total);

    tracing::debug!(
        width,
        height,
        stride_x,
        stride_y,
        min_len = config.min_contour_length,
        max_len = config.max_contour_length,
        "tracing contours",
    );

    'scan: for band in (0..height).step_by(CHUNK_ROWS as usize) {
        if monitor.checkpoint(report.scanned, report.contours.len())? == Flow::OverBudget {
            report.budget_exceeded = true;
            break;
        }
        let band_end = (band + CHUNK_ROWS).min(height);
        for y in (band..band_end).step_by(stride_y as usize) {
            for x in (0..width).step_by(stride_x as usize) {
                if monitor.due(report.scanned)
                    && monitor.checkpoint(report.scanned, report.contours.len())?
                        == Flow::OverBudget
                {
                    report.budget_exceeded = true;
                    break 'scan;
                }
                report.scanned += 1;

                #[allow(clippy::cast_possible_wrap)]
                let p = Point::new(x as i32, y as i32);
                if !view.is_foreground(p)
                    || visited.contains(view.index(p))
                    || view.first_background_dir(p).is_none()
                {
                    continue;
                }

                let (points, end) = walk(view, &mut visited, p, config.max_contour_length);
                if end == WalkEnd::Stuck {
                    report.stuck += 1;
                    tracing::debug!(x, y, len = points.len(), "walk stuck, keeping partial");
                }
                if end == WalkEnd::Truncated {
                    report.truncated += 1;
                } else if points.len() < config.min_contour_length {
                    report.discarded_short += 1;
                    continue;
                }
                report.contours.push(Contour::new(points, end.kind()));

                if report.contours.len() > config.max_contour_count {
                    report.count_capped = true;
                    tracing::warn!(
                        count = report.contours.len(),
                        "contour count valve tripped, stopping scan",
                    );
                    break 'scan;
                }
            }
        }
    }

    if report.budget_exceeded {
        tracing::warn!(
            budget_ms = config.time_budget_ms,
            contours = report.contours.len(),
            "tracing budget exceeded, returning partial contours",
        );
    }
    tracing::debug!(
        contours = report.contours.len(),
        discarded_short = report.discarded_short,
        truncated = report.truncated,
        stuck = report.stuck,
        "tracing complete",
    );
    Ok(report)
}

/// Sampling grid step: `max(5, floor(min(w, h) / 100))`.
#[must_use]
pub fn sample_step(width: u32, height: u32) -> u32 {
    (width.min(height) / 100).max(5)
}

fn trace_sampled(
    mask: &GrayImage,
    config: &PipelineConfig,
    limits: &Limits,
    host: &mut Host<'_>,
) -> Result<TraceReport, PipelineError> {
    let (width, height) = mask.dimensions();
    let view = MaskView::new(mask);
    let step = sample_step(width, height);
    let total = u64::from(width.div_ceil(step)) * u64::from(height.div_ceil(step));

    let mut report = TraceReport::empty(ContourTracerKind::Sampling, total);
    let mut monitor = Monitor::new(host, config.time_budget_ms, limits, total);

    tracing::warn!(width, height, step, "mask too large to walk, using sampling mode");

    if monitor.checkpoint(0, 0)? == Flow::OverBudget {
        report.budget_exceeded = true;
        return Ok(report);
    }

    'scan: for y in (0..height).step_by(step as usize) {
        for x in (0..width).step_by(step as usize) {
            if monitor.due(report.scanned)
                && monitor.checkpoint(report.scanned, report.contours.len())? == Flow::OverBudget
            {
                report.budget_exceeded = true;
                break 'scan;
            }
            report.scanned += 1;

            #[allow(clippy::cast_possible_wrap)]
            let p = Point::new(x as i32, y as i32);
            let on_edge = [0, 2, 4, 6]
                .into_iter()
                .any(|d| view.is_background(neighbor(p, d)));
            if view.is_foreground(p) && on_edge {
                report
                    .contours
                    .push(Contour::new(vec![p], ContourKind::Sampled));
                if report.contours.len() >= SAMPLE_LIMIT {
                    report.count_capped = true;
                    break 'scan;
                }
            }
        }
    }

    tracing::debug!(contours = report.contours.len(), "sampling complete");
    Ok(report)
}
