//! # hcu Scheduler
//!
//! In-process background job scheduler.
//!
//! ```text
//! Scheduler (Arc, one per process)
//!   ├── registry: name → Worker (Registered → Ready | Failed)
//!   ├── run / queue → JobQueue::perform_in → TokioQueue (sleep + channel)
//!   ├── serve: channel → dispatch → one tokio task per job
//!   └── worker.Repeater: invoke periodic target, re-enqueue after period
//! ```

pub mod args;
pub mod engine;
pub mod queue;
pub mod repeater;
pub mod worker;

pub use args::{Job, JobArgs};
pub use engine::Scheduler;
pub use queue::{JobQueue, JobReceiver, TokioQueue};
pub use repeater::REPEATER;
pub use worker::{Worker, WorkerState, WorkerStats};
