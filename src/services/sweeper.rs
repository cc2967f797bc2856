//! Expiry sweeper: purges trash entries whose retention window has elapsed.
//!
//! The sweep is system-wide and owner-agnostic. Expiry is decided from the
//! timestamp embedded in each trash key, so a plain listing is enough; no
//! metadata reads are needed. A target that is already gone (restored or
//! purged concurrently) counts as done, not as a failure.

use crate::{
    models::trash::SweepReport,
    services::{
        key_codec,
        lifecycle::{LifecycleManager, LifecycleResult},
    },
};
use chrono::DateTime;
use std::future::Future;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone)]
pub struct ExpirySweeper {
    lifecycle: LifecycleManager,
}

impl ExpirySweeper {
    pub fn new(lifecycle: LifecycleManager) -> Self {
        Self { lifecycle }
    }

    /// Scan the whole trash container once and delete every expired entry.
    ///
    /// Safe to call repeatedly and concurrently with user operations. Backend
    /// failures other than "already absent" abort the pass and propagate.
    pub async fn cleanup_expired_trash(&self) -> LifecycleResult<SweepReport> {
        let container = &self.lifecycle.config().trash_container;
        let objects = self.lifecycle.store().list_by_prefix(container, "").await?;
        let now = self.lifecycle.now();
        let retention = self.lifecycle.retention();

        let mut deleted = 0usize;
        let mut skipped = 0usize;
        for obj in objects {
            let decoded = match key_codec::decode_trash_key(&obj.key) {
                Ok(decoded) => decoded,
                Err(err) => {
                    warn!(key = %obj.key, %err, "sweep skipping undecodable trash key");
                    skipped += 1;
                    continue;
                }
            };
            let Some(deleted_at) = DateTime::from_timestamp_millis(decoded.deleted_at_millis)
            else {
                warn!(key = %obj.key, "sweep skipping out-of-range timestamp");
                skipped += 1;
                continue;
            };
            if !retention.is_expired(deleted_at, now) {
                continue;
            }

            match self.lifecycle.purge_trash_object(&obj.key).await {
                Ok(true) => {
                    debug!(key = %obj.key, "purged expired trash entry");
                    deleted += 1;
                }
                Ok(false) => {}
                Err(err) => {
                    error!(key = %obj.key, deleted, %err, "sweep aborted");
                    return Err(err);
                }
            }
        }

        info!(deleted, skipped, "expiry sweep finished");
        Ok(SweepReport::new(deleted, skipped))
    }
}

/// Cumulative counters kept by [`SweepWorker`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub sweep_count: u64,
    pub failed_sweeps: u64,
    pub total_deleted: u64,
}

/// Background task that runs [`ExpirySweeper`] on a fixed interval.
pub struct SweepWorker {
    sweeper: ExpirySweeper,
    interval: Duration,
    stats: SweepStats,
}

impl SweepWorker {
    pub fn new(sweeper: ExpirySweeper, interval: Duration) -> Self {
        Self {
            sweeper,
            interval: interval.max(MIN_SWEEP_INTERVAL),
            stats: SweepStats::default(),
        }
    }

    pub fn stats(&self) -> SweepStats {
        self.stats
    }

    async fn sweep_once(&mut self) -> LifecycleResult<SweepReport> {
        let result = self.sweeper.cleanup_expired_trash().await;
        self.stats.sweep_count += 1;
        match &result {
            Ok(report) => self.stats.total_deleted += report.deleted_count as u64,
            Err(_) => self.stats.failed_sweeps += 1,
        }
        result
    }

    /// Sweep on every tick until `shutdown` resolves. The first sweep runs immediately.
    ///
    /// A failed sweep is logged and retried on the next tick.
    pub async fn run<F>(mut self, shutdown: F) -> SweepStats
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!("sweep worker started (interval: {:?})", self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        error!("scheduled sweep failed: {}", err);
                    }
                }
                _ = &mut shutdown => {
                    info!("shutdown signal received, stopping sweep worker");
                    break;
                }
            }
        }

        info!(
            sweeps = self.stats.sweep_count,
            deleted = self.stats.total_deleted,
            failed = self.stats.failed_sweeps,
            "sweep worker stopped"
        );
        self.stats
    }

    /// Run a fixed number of ticks, stopping at the first failure.
    pub async fn run_cycles(&mut self, cycles: usize) -> LifecycleResult<()> {
        let mut ticker = interval(self.interval);
        for cycle in 0..cycles {
            ticker.tick().await;
            let report = self.sweep_once().await?;
            debug!(
                "sweep {}/{} deleted {} entries",
                cycle + 1,
                cycles,
                report.deleted_count
            );
        }
        Ok(())
    }
}
