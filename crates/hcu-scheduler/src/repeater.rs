//! System repeater. Keeps periodic workers alive by re-enqueueing itself.

use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use hcu_core::error::{HcuError, Result};
use rand::Rng;

use crate::args::JobArgs;
use crate::engine::Scheduler;
use crate::worker::Worker;

/// Registry name of the repeater.
pub const REPEATER: &str = "worker.Repeater";

pub(crate) struct Repeater {
    scheduler: Weak<Scheduler>,
}

impl Repeater {
    pub(crate) fn new(scheduler: Weak<Scheduler>) -> Self {
        Self { scheduler }
    }
}

/// `repeat` plus a uniform random spread of up to `jitter_secs`.
fn next_delay(repeat_secs: u64, jitter_secs: u64) -> Duration {
    let jitter = if jitter_secs == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_secs)
    };
    Duration::from_secs(repeat_secs + jitter)
}

#[async_trait]
impl Worker for Repeater {
    fn name(&self) -> &str {
        REPEATER
    }

    async fn handle(&self, args: JobArgs) -> Result<()> {
        let JobArgs::Repeat {
            worker,
            args: inner,
            repeat_secs,
        } = args
        else {
            return Err(HcuError::Decode("repeater payload".into()));
        };
        let Some(scheduler) = self.scheduler.upgrade() else {
            tracing::debug!("scheduler gone, {worker} chain ends");
            return Ok(());
        };

        // 1. invoke the target inline; its outcome never stops the chain
        if let Some(target) = scheduler.ready_worker(&worker) {
            if let Err(e) = target.handle((*inner).clone()).await {
                tracing::warn!("⚠️ Periodic run of {worker} failed: {e}");
            }
        }

        // 2. come back after the period
        let delay = next_delay(repeat_secs, scheduler.jitter_secs());
        let again = JobArgs::Repeat {
            worker: worker.clone(),
            args: inner,
            repeat_secs,
        };
        scheduler.queue(REPEATER, again, delay)?;
        tracing::debug!("🔁 {worker} next run in {}s", delay.as_secs());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_without_jitter_is_exact() {
        assert_eq!(next_delay(30, 0), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..100 {
            let d = next_delay(30, 5).as_secs();
            assert!((30..=35).contains(&d));
        }
    }

    #[tokio::test]
    async fn test_rejects_foreign_payload() {
        let repeater = Repeater::new(Weak::new());
        let err = repeater.handle(JobArgs::None).await.unwrap_err();
        assert!(matches!(err, HcuError::Decode(_)));
    }
}
