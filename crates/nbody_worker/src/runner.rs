//! Worker runner — the dequeue/compute/publish/acknowledge loop.
//!
//! The runner is transport-agnostic: it drives any [`JobSource`] against any
//! [`StateStore`]. The binary plugs in the NATS backends; the coordinator's
//! in-process mode and the tests plug in the in-memory ones.

use std::time::Instant;

use anyhow::{Context, Result};
use nbody_core::Gravity;
use nbody_net::queue::DEFAULT_MAX_DELIVERIES;
use nbody_net::state;
use nbody_net::{Job, JobSource, StateStore, Task};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::StateCache;

/// Counters reported when a worker leaves its loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Integration jobs completed.
    pub jobs: u64,
    /// Clear-cache sentinels handled.
    pub sentinels: u64,
    /// Failed attempts, whether left for redelivery or dropped.
    pub failures: u64,
    /// Jobs acknowledged without a result after their last allowed delivery.
    pub dropped: u64,
    /// Times the mutable columns were fetched from the store.
    pub state_fetches: u64,
    /// Times masses and count were fetched from the store.
    pub constant_fetches: u64,
}

/// One worker: a job source, a state store and a local state cache.
#[derive(Debug)]
pub struct WorkerRunner<J, S> {
    source: J,
    store: S,
    gravity: Gravity,
    max_deliveries: u32,
    instance_id: String,
    cache: StateCache,
    stats: WorkerStats,
}

impl<J: JobSource, S: StateStore> WorkerRunner<J, S> {
    /// Create a runner with a fresh instance id.
    #[must_use]
    pub fn new(source: J, store: S, gravity: Gravity) -> Self {
        Self {
            source,
            store,
            gravity,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            instance_id: Uuid::new_v4().to_string(),
            cache: StateCache::new(),
            stats: WorkerStats::default(),
        }
    }

    /// Give up on a failing job once it has been delivered `max_deliveries`
    /// times.
    #[must_use]
    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = max_deliveries.max(1);
        self
    }

    /// Returns the unique instance ID for this runner.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            state_fetches: self.cache.state_fetches(),
            constant_fetches: self.cache.constant_fetches(),
            ..self.stats
        }
    }

    /// Process jobs until the shutdown signal is observed.
    ///
    /// A job that fails is logged and left unacknowledged, so its lease
    /// expires and another worker retries it. On its last allowed delivery
    /// it is acknowledged without a result instead; the coordinator then
    /// fails the step on the missing chunk rather than waiting forever.
    ///
    /// # Errors
    ///
    /// Returns an error if the job source itself fails.
    pub async fn run(mut self) -> Result<WorkerStats> {
        info!(instance_id = self.instance_id, "worker started");

        while let Some(delivery) = self.source.dequeue().await.context("dequeue failed")? {
            if let Err(err) = self.process(&delivery.job).await {
                self.stats.failures += 1;
                let message = format!("{err:#}");
                if delivery.attempt < self.max_deliveries {
                    warn!(
                        instance_id = self.instance_id,
                        job_id = delivery.job.id,
                        attempt = delivery.attempt,
                        error = %message,
                        "job failed, leaving it for redelivery"
                    );
                    continue;
                }
                error!(
                    instance_id = self.instance_id,
                    job_id = delivery.job.id,
                    attempt = delivery.attempt,
                    error = %message,
                    "job failed on its last delivery, dropping it"
                );
                self.stats.dropped += 1;
            }
            self.source
                .acknowledge(delivery, &self.instance_id)
                .await
                .context("acknowledge failed")?;
        }

        let stats = self.stats();
        info!(
            instance_id = self.instance_id,
            jobs = stats.jobs,
            sentinels = stats.sentinels,
            dropped = stats.dropped,
            state_fetches = stats.state_fetches,
            "worker stopped"
        );
        Ok(stats)
    }

    /// Execute one job without acknowledging it.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be fetched, the range does not
    /// fit the body set, or the result cannot be published.
    pub async fn process(&mut self, job: &Job) -> Result<()> {
        match job.task {
            Task::ClearCache => {
                self.cache.clear();
                self.stats.sentinels += 1;
                debug!(instance_id = self.instance_id, "cache cleared");
            }
            Task::Integrate { range, delta_t } => {
                let start = Instant::now();
                let view = self
                    .cache
                    .refresh(&self.store, job.run, job.generation)
                    .await
                    .context("fetching state")?;
                let chunk = self.gravity.integrate(&view, range, delta_t)?;
                state::publish_partial(&self.store, job.run, job.generation, &chunk)
                    .await
                    .context("publishing partial result")?;
                self.stats.jobs += 1;
                debug!(
                    instance_id = self.instance_id,
                    job_id = job.id,
                    generation = job.generation,
                    %range,
                    elapsed_us = start.elapsed().as_micros() as u64,
                    "chunk integrated"
                );
            }
        }
        Ok(())
    }
}
