//! Scheduler engine. Owns the worker registry, seeds periodic chains and
//! dispatches queued jobs, each on its own task.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hcu_core::config::SchedulerConfig;
use hcu_core::error::{HcuError, Result};

use crate::args::{Job, JobArgs};
use crate::queue::{JobQueue, JobReceiver};
use crate::repeater::{REPEATER, Repeater};
use crate::worker::{Worker, WorkerState, WorkerStats};

struct Entry {
    worker: Arc<dyn Worker>,
    state: WorkerState,
    times_queued: u64,
    last_queued_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(worker: Arc<dyn Worker>) -> Self {
        Self {
            worker,
            state: WorkerState::Registered,
            times_queued: 0,
            last_queued_at: None,
        }
    }
}

/// One scheduler per process, shared by `Arc`.
pub struct Scheduler {
    workers: RwLock<HashMap<String, Entry>>,
    queue: Arc<dyn JobQueue>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler with the system repeater already registered.
    pub fn new(config: SchedulerConfig, queue: Arc<dyn JobQueue>) -> Arc<Self> {
        Arc::new_cyclic(|me| {
            let repeater: Arc<dyn Worker> = Arc::new(Repeater::new(me.clone()));
            let mut workers = HashMap::new();
            workers.insert(REPEATER.to_string(), Entry::new(repeater));
            Self {
                workers: RwLock::new(workers),
                queue,
                config,
            }
        })
    }

    /// Add workers to the registry. A later registration under the same name
    /// replaces the earlier one.
    pub fn register_workers(&self, workers: Vec<Arc<dyn Worker>>) -> Result<()> {
        let mut registry = self.write()?;
        for worker in workers {
            let name = worker.name().to_string();
            if registry.insert(name.clone(), Entry::new(worker)).is_some() {
                tracing::debug!("worker {name} re-registered, replacing previous");
            }
        }
        Ok(())
    }

    /// Reset every registered worker and seed the repeater for periodic ones.
    ///
    /// A worker whose reset fails is marked failed and never scheduled; the
    /// others start normally.
    pub async fn start(&self) -> Result<()> {
        let pending: Vec<(String, Arc<dyn Worker>)> = self
            .read()?
            .iter()
            .filter(|(_, e)| e.state == WorkerState::Registered)
            .map(|(name, e)| (name.clone(), e.worker.clone()))
            .collect();

        let mut periodic = Vec::new();
        for (name, worker) in pending {
            let state = match worker.reset().await {
                Ok(()) => WorkerState::Ready,
                Err(e) => {
                    tracing::error!("⚠️ Worker {name} failed to reset, skipped: {e}");
                    WorkerState::Failed
                }
            };
            if let Some(entry) = self.write()?.get_mut(&name) {
                entry.state = state;
            }
            if state == WorkerState::Ready && !worker.period().is_zero() {
                periodic.push(worker);
            }
        }

        let min_period = Duration::from_secs(self.config.min_period_secs);
        for worker in periodic {
            let period = worker.period();
            if period < min_period {
                tracing::warn!(
                    "worker {} period {}s is below the {}s minimum, not repeated",
                    worker.name(),
                    period.as_secs(),
                    min_period.as_secs()
                );
                continue;
            }
            let args = JobArgs::Repeat {
                worker: worker.name().to_string(),
                args: Box::new(JobArgs::None),
                repeat_secs: period.as_secs(),
            };
            if let Err(e) = self.queue(REPEATER, args, worker.initial_delay()) {
                tracing::error!("⚠️ could not schedule {}: {e}", worker.name());
                continue;
            }
            tracing::info!(
                "📅 {} scheduled every {}s (first run in {}s)",
                worker.name(),
                period.as_secs(),
                worker.initial_delay().as_secs()
            );
        }
        Ok(())
    }

    /// Enqueue a job for immediate execution.
    pub fn run(&self, worker: &str, args: JobArgs) -> Result<()> {
        self.queue(worker, args, Duration::ZERO)
    }

    /// Enqueue a job after `delay`.
    pub fn queue(&self, worker: &str, args: JobArgs, delay: Duration) -> Result<()> {
        if !self.read()?.contains_key(worker) {
            return Err(HcuError::NotFound(format!("worker {worker}")));
        }
        self.queue.perform_in(Job::new(worker, args), delay)?;
        if let Some(entry) = self.write()?.get_mut(worker) {
            entry.times_queued += 1;
            entry.last_queued_at = Some(Utc::now());
        }
        tracing::debug!("queued {worker} in {}s", delay.as_secs());
        Ok(())
    }

    /// Drain the queue until every sender is gone.
    pub async fn serve(self: Arc<Self>, mut jobs: JobReceiver) {
        tracing::info!("⏰ Scheduler dispatching jobs");
        while let Some(job) = jobs.recv().await {
            self.dispatch(job);
        }
        tracing::info!("Scheduler queue closed");
    }

    /// Run one job on its own task.
    pub fn dispatch(&self, job: Job) {
        let Some(worker) = self.ready_worker(&job.worker) else {
            return;
        };
        tokio::spawn(async move {
            let name = job.worker;
            if let Err(e) = worker.handle(job.args).await {
                tracing::warn!("⚠️ Job {name} failed: {e}");
            }
        });
    }

    /// Invoke a worker inline, on the caller's task.
    pub async fn perform(&self, worker: &str, args: JobArgs) -> Result<()> {
        let handler = self
            .read()?
            .get(worker)
            .map(|e| e.worker.clone())
            .ok_or_else(|| HcuError::NotFound(format!("worker {worker}")))?;
        handler.handle(args).await
    }

    /// Per-worker state and counters, sorted by name.
    pub fn stats(&self) -> Result<Vec<WorkerStats>> {
        let mut stats: Vec<WorkerStats> = self
            .read()?
            .iter()
            .map(|(name, e)| WorkerStats {
                name: name.clone(),
                state: e.state,
                period_secs: e.worker.period().as_secs(),
                times_queued: e.times_queued,
                last_queued_at: e.last_queued_at,
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stats)
    }

    pub(crate) fn jitter_secs(&self) -> u64 {
        self.config.jitter_secs
    }

    /// Handler of a worker that passed reset. Logs and returns `None` for
    /// anything else.
    pub(crate) fn ready_worker(&self, name: &str) -> Option<Arc<dyn Worker>> {
        let registry = match self.read() {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("{e}");
                return None;
            }
        };
        match registry.get(name) {
            Some(e) if e.state == WorkerState::Ready => Some(e.worker.clone()),
            Some(e) => {
                tracing::warn!("⚠️ Dropping job for {name}: worker is {}", e.state);
                None
            }
            None => {
                tracing::warn!("⚠️ Dropping job for unknown worker {name}");
                None
            }
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Entry>>> {
        self.workers
            .read()
            .map_err(|e| HcuError::Scheduler(format!("worker registry poisoned: {e}")))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Entry>>> {
        self.workers
            .write()
            .map_err(|e| HcuError::Scheduler(format!("worker registry poisoned: {e}")))
    }
}
