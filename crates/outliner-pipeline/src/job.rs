//! Run the pipeline on a background thread.
//!
//! [`spawn`] moves a request onto its own thread and hands back an
//! [`OutlineJob`]: a stream of [`JobEvent`]s ending in exactly one
//! [`JobEvent::Finished`], plus a cancel switch. Concurrent jobs share
//! nothing, so any number may run at once.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::config::PipelineOptions;
use crate::pipeline::{PipelineState, process_with};
use crate::progress::{CancelToken, Host, Observer, Progress};
use crate::types::{Outline, OutlineRequest, PipelineError};

/// Something that happened in a background run.
#[derive(Debug)]
pub enum JobEvent {
    /// The run entered a new state.
    State(PipelineState),
    /// Tracing progress.
    Progress(Progress),
    /// The terminal result. Always the last event.
    Finished(Result<Outline, PipelineError>),
}

/// Forwards pipeline events over a channel.
struct ChannelObserver {
    events: Sender<JobEvent>,
}

impl Observer for ChannelObserver {
    fn state(&mut self, state: PipelineState) {
        // A dropped receiver only means nobody is listening.
        let _ = self.events.send(JobEvent::State(state));
    }

    fn progress(&mut self, progress: Progress) {
        let _ = self.events.send(JobEvent::Progress(progress));
    }

    fn yield_now(&mut self) {
        thread::yield_now();
    }
}

/// Handle to a pipeline run on a background thread.
///
/// Dropping the handle cancels the run and waits for its thread to exit.
#[derive(Debug)]
pub struct OutlineJob {
    cancel: CancelToken,
    events: Receiver<JobEvent>,
    handle: Option<JoinHandle<()>>,
}

/// Start processing `request` on a new thread.
///
/// # Errors
///
/// Returns [`PipelineError::InternalFault`] if the thread cannot be
/// spawned.
pub fn spawn(request: OutlineRequest, options: PipelineOptions) -> Result<OutlineJob, PipelineError> {
    let cancel = CancelToken::new();
    let (tx, rx) = mpsc::channel();

    let token = cancel.clone();
    let handle = thread::Builder::new()
        .name("outline".to_owned())
        .spawn(move || {
            let mut observer = ChannelObserver { events: tx.clone() };
            let result = {
                let mut host = Host::new(&mut observer).with_cancel(token);
                process_with(request, &options, &mut host)
            };
            let _ = tx.send(JobEvent::Finished(result));
        })
        .map_err(|e| PipelineError::InternalFault(format!("failed to spawn worker thread: {e}")))?;

    Ok(OutlineJob {
        cancel,
        events: rx,
        handle: Some(handle),
    })
}

impl OutlineJob {
    /// Ask the run to stop at its next yield point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The token watched by this run, for cancelling from elsewhere.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Block for the next event. `None` once the run has finished and
    /// every event has been received.
    pub fn recv(&self) -> Option<JobEvent> {
        self.events.recv().ok()
    }

    /// Discard events until the run finishes and return its result.
    ///
    /// # Errors
    ///
    /// The run's own error, or [`PipelineError::InternalFault`] if the
    /// thread exited without producing a result.
    pub fn wait(mut self) -> Result<Outline, PipelineError> {
        let result = loop {
            match self.events.recv() {
                Ok(JobEvent::Finished(result)) => break result,
                Ok(_) => {}
                Err(_) => {
                    break Err(PipelineError::InternalFault(
                        "worker thread exited without a result".to_owned(),
                    ));
                }
            }
        };
        self.join();
        result
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!("outline worker thread panicked");
        }
    }
}

impl Drop for OutlineJob {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel();
            self.join();
        }
    }
}
