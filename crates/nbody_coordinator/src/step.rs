//! The per-step protocol.
//!
//! One [`Coordinator::step`] call, distributed:
//!
//! 1. Drain jobs left over from an earlier step.
//! 2. Publish the mutable columns (masses and count only once per run).
//! 3. Partition the bodies and enqueue one job per chunk.
//! 4. Block on the acknowledgment barrier.
//! 5. Read, merge and delete every chunk's partial result, then sweep any
//!    result a lease-expired worker wrote late for the previous generation.
//! 6. Advance the generation.
//!
//! Without a worker pool the same kernel runs in process over the whole set.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use nbody_core::{BodySet, ChunkRange, Gravity, partition};
use nbody_net::state;
use nbody_net::{Field, Job, JobQueue, RunId, StateStore, StoreKey, Task};
use tracing::{debug, error, info, warn};

/// Default time step: one hour.
pub const DEFAULT_DELTA_T: f64 = 3600.0;

/// Step parameters. Chunks and time step may change between steps.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Number of chunks each step is split into (clamped to the body count).
    pub chunks: usize,
    /// Time step in seconds.
    pub delta_t: f64,
    /// Give up on a step if the barrier has not released by then.
    pub barrier_timeout: Option<Duration>,
    /// Kernel parameters for the in-process fallback.
    pub gravity: Gravity,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            chunks: 4,
            delta_t: DEFAULT_DELTA_T,
            barrier_timeout: None,
            gravity: Gravity::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Override the number of chunks per step.
    #[must_use]
    pub fn with_chunks(mut self, chunks: usize) -> Self {
        self.chunks = chunks;
        self
    }

    /// Override the time step.
    #[must_use]
    pub fn with_delta_t(mut self, delta_t: f64) -> Self {
        self.delta_t = delta_t;
        self
    }

    /// Fail a step whose barrier has not released within `timeout`.
    #[must_use]
    pub fn with_barrier_timeout(mut self, timeout: Duration) -> Self {
        self.barrier_timeout = Some(timeout);
        self
    }

    /// Override the kernel parameters used without a worker pool.
    #[must_use]
    pub fn with_gravity(mut self, gravity: Gravity) -> Self {
        self.gravity = gravity;
        self
    }
}

/// Wall-clock time spent in each phase of one step.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepTimings {
    /// Discarding jobs left over from an earlier step.
    pub drain: Duration,
    /// Writing the body state (and masses, once per run) to the store.
    pub publish: Duration,
    /// Partitioning and enqueueing the chunk jobs.
    pub dispatch: Duration,
    /// Waiting for every job to be acknowledged.
    pub barrier: Duration,
    /// Collecting partial results into the next state. The whole kernel
    /// run when stepping in process.
    pub merge: Duration,
}

impl StepTimings {
    /// Sum of all phases.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.drain + self.publish + self.dispatch + self.barrier + self.merge
    }
}

/// The job queue and state store a distributed coordinator talks to.
#[derive(Debug)]
struct Pool<Q, S> {
    queue: Q,
    store: S,
}

/// Owns the canonical body state and advances it one step at a time.
#[derive(Debug)]
pub struct Coordinator<Q, S> {
    config: CoordinatorConfig,
    pool: Option<Pool<Q, S>>,
    bodies: BodySet,
    run: RunId,
    generation: u64,
    next_job_id: u64,
    constants_published: bool,
    /// Ranges dispatched by the last completed step.
    last_ranges: Vec<ChunkRange>,
}

impl<Q: JobQueue, S: StateStore> Coordinator<Q, S> {
    /// A coordinator that steps in process without any workers.
    #[must_use]
    pub fn local(config: CoordinatorConfig, bodies: BodySet) -> Self {
        Self::build(config, None, bodies)
    }

    /// A coordinator that hands chunks to the workers attached to `queue`.
    #[must_use]
    pub fn distributed(config: CoordinatorConfig, queue: Q, store: S, bodies: BodySet) -> Self {
        Self::build(config, Some(Pool { queue, store }), bodies)
    }

    fn build(config: CoordinatorConfig, pool: Option<Pool<Q, S>>, bodies: BodySet) -> Self {
        let run = RunId::new();
        info!(
            %run,
            bodies = bodies.count(),
            chunks = config.chunks,
            delta_t = config.delta_t,
            distributed = pool.is_some(),
            "coordinator ready"
        );
        Self {
            config,
            pool,
            bodies,
            run,
            generation: 0,
            next_job_id: 0,
            constants_published: false,
            last_ranges: Vec::new(),
        }
    }

    #[must_use]
    pub fn bodies(&self) -> &BodySet {
        &self.bodies
    }

    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Completed steps in the current run.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn run(&self) -> RunId {
        self.run
    }

    #[must_use]
    pub fn is_distributed(&self) -> bool {
        self.pool.is_some()
    }

    /// Change the chunk count used from the next step on.
    pub fn set_chunks(&mut self, chunks: usize) {
        self.config.chunks = chunks;
    }

    /// Change the time step used from the next step on.
    pub fn set_delta_t(&mut self, delta_t: f64) {
        self.config.delta_t = delta_t;
    }

    /// Advance the bodies by one time step.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue or store fails, the barrier times out,
    /// or a partial result is missing or malformed. The body state is left
    /// untouched on error.
    pub async fn step(&mut self) -> Result<StepTimings> {
        // Reserve ids up front so a failed step never reuses them.
        let first_job = self.next_job_id;
        self.next_job_id += self.config.chunks.max(1) as u64;

        let (next, timings, ranges) = match &self.pool {
            None => {
                let start = Instant::now();
                let next = self
                    .config
                    .gravity
                    .step(&self.bodies, self.config.delta_t)?;
                let timings = StepTimings {
                    merge: start.elapsed(),
                    ..StepTimings::default()
                };
                (next, timings, Vec::new())
            }
            Some(pool) => self.distributed_step(pool, first_job).await?,
        };
        self.constants_published = true;
        self.last_ranges = ranges;

        if !next.is_finite() {
            error!(
                generation = self.generation,
                "non-finite values in merged body state"
            );
        }
        self.bodies = next;
        self.generation += 1;

        debug!(
            generation = self.generation,
            drain_us = timings.drain.as_micros() as u64,
            publish_us = timings.publish.as_micros() as u64,
            dispatch_us = timings.dispatch.as_micros() as u64,
            barrier_us = timings.barrier.as_micros() as u64,
            merge_us = timings.merge.as_micros() as u64,
            total_us = timings.total().as_micros() as u64,
            "step complete"
        );
        Ok(timings)
    }

    async fn distributed_step(
        &self,
        pool: &Pool<Q, S>,
        first_job: u64,
    ) -> Result<(BodySet, StepTimings, Vec<ChunkRange>)> {
        let mut timings = StepTimings::default();
        let count = self.bodies.count();
        if count == 0 {
            return Ok((self.bodies.clone(), timings, Vec::new()));
        }

        let phase = Instant::now();
        let drained = pool.queue.drain_stale().await.context("draining stale jobs")?;
        if drained > 0 {
            warn!(drained, generation = self.generation, "discarded leftover jobs");
        }
        timings.drain = phase.elapsed();

        let phase = Instant::now();
        state::publish_state(&pool.store, self.run, &self.bodies)
            .await
            .context("publishing state")?;
        if !self.constants_published {
            state::publish_constants(&pool.store, self.run, &self.bodies)
                .await
                .context("publishing masses")?;
        }
        timings.publish = phase.elapsed();

        let phase = Instant::now();
        let ranges = partition(count, self.config.chunks.clamp(1, count))?;
        let mut job_id = first_job;
        for &range in &ranges {
            let job = Job {
                id: job_id,
                run: self.run,
                generation: self.generation,
                task: Task::Integrate {
                    range,
                    delta_t: self.config.delta_t,
                },
            };
            job_id += 1;
            pool.queue.enqueue(job).await.context("enqueueing job")?;
        }
        timings.dispatch = phase.elapsed();

        let phase = Instant::now();
        pool.queue
            .await_all_acknowledged(self.config.barrier_timeout)
            .await
            .with_context(|| format!("waiting for {} chunk(s)", ranges.len()))?;
        timings.barrier = phase.elapsed();

        let phase = Instant::now();
        let mut next = self.bodies.clone();
        for &range in &ranges {
            let chunk = state::take_partial(&pool.store, self.run, self.generation, range)
                .await
                .with_context(|| format!("collecting chunk {range}"))?;
            next.write_chunk(&chunk)?;
        }
        if let Some(previous) = self.generation.checked_sub(1) {
            for &range in &self.last_ranges {
                state::discard_partial(&pool.store, self.run, previous, range)
                    .await
                    .context("discarding late partial results")?;
            }
        }
        timings.merge = phase.elapsed();

        Ok((next, timings, ranges))
    }

    /// Start a new run from `bodies`.
    ///
    /// Mints a fresh run id, resets the generation and republishes masses on
    /// the next step. The previous run's published state is deleted and
    /// workers are told to drop their caches.
    ///
    /// # Errors
    ///
    /// Returns an error if the old state cannot be deleted or the cache
    /// clearing barrier fails.
    pub async fn reset_run(&mut self, bodies: BodySet) -> Result<()> {
        let previous = self.run;
        let last_generation = self.generation.checked_sub(1);
        let last_ranges = std::mem::take(&mut self.last_ranges);
        self.run = RunId::new();
        self.bodies = bodies;
        self.generation = 0;
        self.constants_published = false;
        info!(%previous, run = %self.run, bodies = self.bodies.count(), "new run");

        if let Some(pool) = &self.pool {
            let mut keys = vec![StoreKey::Mass { run: previous }, StoreKey::Count { run: previous }];
            keys.extend(Field::ALL.map(|field| StoreKey::State {
                run: previous,
                field,
            }));
            for key in &keys {
                pool.store.delete(key).await.context("deleting old run state")?;
            }
            if let Some(generation) = last_generation {
                for &range in &last_ranges {
                    state::discard_partial(&pool.store, previous, generation, range)
                        .await
                        .context("deleting old run state")?;
                }
            }
        }
        self.clear_worker_caches().await
    }

    /// Enqueue one clear-cache sentinel per chunk and wait for them.
    ///
    /// Delivery is competing-consumer, so this reaches as many distinct
    /// workers as there are chunks at most.
    ///
    /// # Errors
    ///
    /// Returns an error if enqueueing or the barrier fails.
    pub async fn clear_worker_caches(&mut self) -> Result<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };
        pool.queue.drain_stale().await?;
        let sentinels = self.config.chunks.max(1);
        for _ in 0..sentinels {
            let job = Job {
                id: self.next_job_id,
                run: self.run,
                generation: self.generation,
                task: Task::ClearCache,
            };
            self.next_job_id += 1;
            pool.queue.enqueue(job).await?;
        }
        pool.queue
            .await_all_acknowledged(self.config.barrier_timeout)
            .await
            .context("waiting for workers to clear caches")?;
        debug!(sentinels, "worker caches cleared");
        Ok(())
    }

    /// Tell every attached worker to leave its loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the broadcast fails.
    pub async fn shutdown(&self, reason: &str) -> Result<()> {
        if let Some(pool) = &self.pool {
            pool.queue
                .shutdown_workers(reason)
                .await
                .context("broadcasting shutdown")?;
        }
        info!(reason, generation = self.generation, "coordinator shut down");
        Ok(())
    }
}
