//! Host plumbing for a pipeline run: progress events, cooperative
//! yielding, cancellation, and the clock that drives budgets.
//!
//! The pipeline itself is synchronous. A [`Host`] bundles everything it
//! needs from its environment so the same code runs on a native thread,
//! inside a web worker, or under a test with a hand-advanced clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Limits;
use crate::pipeline::PipelineState;
use crate::types::PipelineError;

/// A snapshot of tracing progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Mask positions scanned so far.
    pub scanned: u64,
    /// Mask positions the scan will visit in total.
    pub total: u64,
    /// Contours kept so far.
    pub contours_found: usize,
}

impl Progress {
    /// Whole percent of the scan completed, clamped to `0..=100`.
    ///
    /// An empty scan counts as complete.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn percent_complete(&self) -> u32 {
        if self.total == 0 {
            return 100;
        }
        let scanned = if self.scanned > self.total {
            self.total
        } else {
            self.scanned
        };
        // Round half up without floating point.
        ((scanned * 200 + self.total) / (self.total * 2)) as u32
    }
}

/// Receives events from a running pipeline.
///
/// All methods default to no-ops. Any `FnMut(Progress)` closure is an
/// observer that only listens to progress.
pub trait Observer {
    /// The pipeline entered `state`.
    fn state(&mut self, _state: PipelineState) {}

    /// Tracing progress; delivered at most once per progress interval.
    fn progress(&mut self, _progress: Progress) {}

    /// A yield point: hand control back to the host scheduler.
    fn yield_now(&mut self) {}
}

impl<F: FnMut(Progress)> Observer for F {
    fn progress(&mut self, progress: Progress) {
        self(progress);
    }
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl Observer for Silent {}

/// Shared flag a caller sets to stop a run at its next yield point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Monotonic time source.
pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// [`Clock`] backed by [`web_time::Instant`], which is
/// `performance.now()` on wasm and `std::time::Instant` elsewhere.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: web_time::Instant,
}

impl SystemClock {
    /// A clock whose origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: web_time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// The environment a pipeline run executes in.
pub struct Host<'a> {
    cancel: CancelToken,
    clock: Box<dyn Clock + 'a>,
    observer: &'a mut dyn Observer,
}

impl<'a> Host<'a> {
    /// A host with a fresh cancel token and the system clock.
    #[must_use]
    pub fn new(observer: &'a mut dyn Observer) -> Self {
        Self {
            cancel: CancelToken::new(),
            clock: Box::new(SystemClock::new()),
            observer,
        }
    }

    /// Use `cancel` as the cancellation signal.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Use `clock` for budgets, cadence and timings.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'a) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// The token this run is watching.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub(crate) fn now(&self) -> Duration {
        self.clock.now()
    }

    pub(crate) fn enter(&mut self, state: PipelineState) {
        tracing::debug!(?state, "pipeline state");
        self.observer.state(state);
    }

    /// Yield to the host, then honour any cancellation that arrived.
    pub(crate) fn yield_point(&mut self) -> Result<(), PipelineError> {
        self.observer.yield_now();
        self.check_cancelled()
    }

    fn check_cancelled(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for Host<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

/// Outcome of a tracer checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// The tracing budget ran out; stop and keep what was found.
    OverBudget,
}

/// Checkpoint bookkeeping for one tracing pass.
pub(crate) struct Monitor<'h, 'a> {
    host: &'h mut Host<'a>,
    started: Duration,
    budget: Duration,
    progress_interval: Duration,
    last_report: Duration,
    yield_interval: u64,
    total: u64,
}

impl<'h, 'a> Monitor<'h, 'a> {
    /// Start timing a pass that will scan `total` positions.
    pub(crate) fn new(host: &'h mut Host<'a>, budget_ms: u64, limits: &Limits, total: u64) -> Self {
        let started = host.now();
        Self {
            host,
            started,
            budget: Duration::from_millis(budget_ms),
            progress_interval: Duration::from_millis(limits.progress_interval_ms),
            last_report: started,
            yield_interval: limits.yield_interval.max(1),
            total,
        }
    }

    /// Whether `scanned` lands on a yield-interval boundary.
    pub(crate) const fn due(&self, scanned: u64) -> bool {
        scanned > 0 && scanned % self.yield_interval == 0
    }

    /// Cancellation, then budget, then progress, then yield.
    pub(crate) fn checkpoint(
        &mut self,
        scanned: u64,
        contours_found: usize,
    ) -> Result<Flow, PipelineError> {
        self.host.check_cancelled()?;

        let now = self.host.now();
        if now.saturating_sub(self.started) >= self.budget {
            return Ok(Flow::OverBudget);
        }

        if now.saturating_sub(self.last_report) >= self.progress_interval {
            self.last_report = now;
            self.host.observer.progress(Progress {
                scanned,
                total: self.total,
                contours_found,
            });
        }

        self.host.observer.yield_now();
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use super::*;

    /// Clock advanced by hand.
    struct ManualClock<'c>(&'c Cell<Duration>);

    impl Clock for ManualClock<'_> {
        fn now(&self) -> Duration {
            self.0.get()
        }
    }

    fn limits(progress_ms: u64) -> Limits {
        Limits {
            progress_interval_ms: progress_ms,
            yield_interval: 10,
            ..Limits::default()
        }
    }

    #[test]
    fn percent_complete_rounds_and_clamps() {
        let p = |scanned, total| Progress {
            scanned,
            total,
            contours_found: 0,
        };
        assert_eq!(p(0, 10).percent_complete(), 0);
        assert_eq!(p(1, 200).percent_complete(), 1);
        assert_eq!(p(1, 3).percent_complete(), 33);
        assert_eq!(p(2, 3).percent_complete(), 67);
        assert_eq!(p(10, 10).percent_complete(), 100);
        assert_eq!(p(15, 10).percent_complete(), 100);
        assert_eq!(p(0, 0).percent_complete(), 100);
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn closure_is_an_observer() {
        let mut seen = Vec::new();
        let mut record = |p: Progress| seen.push(p.scanned);
        let observer: &mut dyn Observer = &mut record;
        observer.progress(Progress {
            scanned: 7,
            total: 10,
            contours_found: 0,
        });
        observer.yield_now();
        assert_eq!(seen, vec![7]);
    }

    #[test]
    fn yield_point_reports_cancellation() {
        let mut silent = Silent;
        let cancel = CancelToken::new();
        let mut host = Host::new(&mut silent).with_cancel(cancel.clone());
        assert!(host.yield_point().is_ok());
        cancel.cancel();
        assert_eq!(host.yield_point(), Err(PipelineError::Cancelled));
    }

    #[test]
    fn due_on_interval_boundaries_only() {
        let mut silent = Silent;
        let mut host = Host::new(&mut silent);
        let monitor = Monitor::new(&mut host, 1000, &limits(0), 100);
        assert!(!monitor.due(0));
        assert!(!monitor.due(9));
        assert!(monitor.due(10));
        assert!(monitor.due(20));
    }

    #[test]
    fn checkpoint_throttles_progress() {
        let time = Cell::new(Duration::ZERO);
        let mut reports = Vec::new();
        let mut record = |p: Progress| reports.push(p.scanned);
        {
            let mut host = Host::new(&mut record).with_clock(ManualClock(&time));
            let mut monitor = Monitor::new(&mut host, 10_000, &limits(1000), 100);

            // Less than one interval since the start: no report.
            time.set(Duration::from_millis(500));
            assert_eq!(monitor.checkpoint(10, 0).unwrap(), Flow::Continue);

            time.set(Duration::from_millis(1000));
            assert_eq!(monitor.checkpoint(20, 1).unwrap(), Flow::Continue);

            time.set(Duration::from_millis(1500));
            assert_eq!(monitor.checkpoint(30, 1).unwrap(), Flow::Continue);

            time.set(Duration::from_millis(2100));
            assert_eq!(monitor.checkpoint(40, 2).unwrap(), Flow::Continue);
        }
        assert_eq!(reports, vec![20, 40]);
    }

    #[test]
    fn checkpoint_stops_at_budget() {
        let time = Cell::new(Duration::from_secs(5));
        let mut silent = Silent;
        let mut host = Host::new(&mut silent).with_clock(ManualClock(&time));
        let mut monitor = Monitor::new(&mut host, 2000, &limits(0), 100);

        time.set(Duration::from_millis(6999));
        assert_eq!(monitor.checkpoint(10, 0).unwrap(), Flow::Continue);
        time.set(Duration::from_millis(7000));
        assert_eq!(monitor.checkpoint(20, 0).unwrap(), Flow::OverBudget);
    }

    #[test]
    fn cancellation_wins_over_budget() {
        let time = Cell::new(Duration::ZERO);
        let mut silent = Silent;
        let cancel = CancelToken::new();
        let mut host = Host::new(&mut silent)
            .with_cancel(cancel.clone())
            .with_clock(ManualClock(&time));
        let mut monitor = Monitor::new(&mut host, 0, &limits(0), 100);
        cancel.cancel();
        assert_eq!(monitor.checkpoint(10, 0), Err(PipelineError::Cancelled));
    }
}
