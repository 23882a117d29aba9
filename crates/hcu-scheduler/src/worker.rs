//! Worker capability and per-worker bookkeeping.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hcu_core::error::Result;
use serde::Serialize;

use crate::args::JobArgs;

/// A named unit of background work.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Registry key, e.g. `worker.ResourceSync`.
    fn name(&self) -> &str;

    /// Delay before the first periodic run.
    fn initial_delay(&self) -> Duration {
        Duration::ZERO
    }

    /// Repeat period. Zero means the worker only runs when triggered.
    fn period(&self) -> Duration {
        Duration::ZERO
    }

    /// Called once at scheduler start. An error disables this worker.
    async fn reset(&self) -> Result<()> {
        Ok(())
    }

    async fn handle(&self, args: JobArgs) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Registered,
    Ready,
    /// `reset` failed; jobs for this worker are dropped.
    Failed,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Registered => write!(f, "registered"),
            WorkerState::Ready => write!(f, "ready"),
            WorkerState::Failed => write!(f, "failed"),
        }
    }
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    pub name: String,
    pub state: WorkerState,
    pub period_secs: u64,
    pub times_queued: u64,
    pub last_queued_at: Option<DateTime<Utc>>,
}
