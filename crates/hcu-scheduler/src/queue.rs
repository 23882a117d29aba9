//! Job queue. Delayed delivery of jobs to the dispatcher.

use std::time::Duration;

use hcu_core::error::{HcuError, Result};
use tokio::sync::mpsc;

use crate::args::Job;

/// Where the scheduler puts jobs. Delivery is at-least-once.
pub trait JobQueue: Send + Sync {
    /// Deliver `job` after `delay`.
    fn perform_in(&self, job: Job, delay: Duration) -> Result<()>;
}

/// Receiving end drained by [`crate::Scheduler::serve`].
pub type JobReceiver = mpsc::UnboundedReceiver<Job>;

/// In-process queue built on tokio timers and an unbounded channel.
#[derive(Clone)]
pub struct TokioQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl TokioQueue {
    pub fn new() -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl JobQueue for TokioQueue {
    fn perform_in(&self, job: Job, delay: Duration) -> Result<()> {
        if self.tx.is_closed() {
            return Err(HcuError::Scheduler("job queue is closed".into()));
        }
        if delay.is_zero() {
            return self
                .tx
                .send(job)
                .map_err(|e| HcuError::Scheduler(format!("enqueue {}: queue closed", e.0.worker)));
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| HcuError::Scheduler(format!("no runtime for delayed job: {e}")))?;
        let tx = self.tx.clone();
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(job).is_err() {
                tracing::debug!("job queue closed before delayed job fired");
            }
        });
        Ok(())
    }
}
