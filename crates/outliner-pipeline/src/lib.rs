//! outliner-pipeline: Pure outline extraction pipeline (sans-IO).
//!
//! Converts an RGBA raster into outline polylines through:
//! grayscale + downsample -> box blur -> threshold -> contour tracing ->
//! rank, cap and simplify.
//!
//! This crate has **no I/O dependencies**: it operates on in-memory pixel
//! buffers and returns structured data. Progress, cancellation and time
//! come in through a [`Host`], so the same code runs on a native thread
//! ([`job::spawn`]), in a web worker (`outliner-worker`), or in a test
//! with a hand-advanced clock.
//!
//! # Example
//!
//! ```rust
//! use outliner_pipeline::{OutlineRequest, PipelineOptions, process};
//!
//! // A 4x4 white image with a 2x2 black square in the middle.
//! let mut pixels = vec![255u8; 4 * 4 * 4];
//! for (x, y) in [(1, 1), (2, 1), (1, 2), (2, 2)] {
//!     let i = (y * 4 + x) * 4;
//!     pixels[i..i + 3].fill(0);
//! }
//! let request = OutlineRequest::new(pixels, 4, 4);
//! let options = PipelineOptions {
//!     blur_radius: 0,
//!     min_contour_length: Some(1),
//!     ..PipelineOptions::default()
//! };
//! let outline = process(request, &options).unwrap();
//! assert_eq!(outline.contours.len(), 1);
//! assert!(outline.contours[0].is_closed());
//! ```

pub mod blur;
pub mod config;
pub mod contour;
pub mod diagnostics;
pub mod grayscale;
pub mod job;
pub mod message;
pub mod pipeline;
pub mod progress;
pub mod simplify;
pub mod threshold;
pub mod types;

pub use config::{Limits, PipelineConfig, PipelineOptions};
pub use contour::{ContourTracer, ContourTracerKind, TraceReport};
pub use diagnostics::PipelineDiagnostics;
pub use job::{JobEvent, OutlineJob};
pub use pipeline::{PipelineState, process, process_with};
pub use progress::{CancelToken, Clock, Host, Observer, Progress, Silent, SystemClock};
pub use types::{
    Contour, ContourKind, Dimensions, FailureKind, Outline, OutlineRequest, PipelineError,
    PipelineStats, Point,
};
