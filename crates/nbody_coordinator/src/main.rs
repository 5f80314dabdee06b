//! # nbody_coordinator — Coordinator
//!
//! The coordinator owns the canonical body state and drives the simulation
//! one step at a time, either in process or across a pool of workers.
//!
//! ## Backends
//!
//! - `local` — the kernel runs in this process over the whole body set.
//! - `in-process` — worker tasks in this process, in-memory queue and store.
//! - `nats` — remote `nbody_worker` processes through NATS JetStream.
//!
//! ## Startup Sequence
//!
//! 1. Build the initial bodies (scenario or snapshot).
//! 2. Connect the selected backend.
//! 3. Start the control front end (stdin, Ctrl-C, NATS control subject).
//! 4. Run the simulation loop until the control stream ends.

mod control;
mod driver;
mod snapshot;
mod step;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use nbody_core::scenario::{ClusterParams, random_cluster, two_body_circular};
use nbody_core::{BodySet, Gravity};
use nbody_net::connection::resolve_url;
use nbody_net::{
    ControlMessage, JobQueue, MemoryQueue, MemoryStore, NatsConnection, NatsJobQueue, NatsStore,
    StateStore,
};
use nbody_worker::WorkerRunner;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use driver::{Driver, DriverConfig};
use step::{Coordinator, CoordinatorConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Local,
    InProcess,
    Nats,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    TwoBody,
    Cluster,
}

#[derive(Parser)]
#[command(name = "nbody_coordinator", about = "Distributed n-body simulation coordinator")]
struct Args {
    /// Where chunk integration runs
    #[arg(short, long, value_enum, default_value_t = Backend::Local)]
    backend: Backend,

    /// Worker tasks for the in-process backend
    #[arg(short, long, default_value_t = 4)]
    workers: usize,

    /// Chunks per step
    #[arg(short, long, default_value_t = 4)]
    chunks: usize,

    /// Time step in seconds
    #[arg(long, default_value_t = step::DEFAULT_DELTA_T)]
    dt: f64,

    /// Initial conditions
    #[arg(long, value_enum, default_value_t = Scenario::Cluster)]
    scenario: Scenario,

    /// Orbiting bodies in the cluster scenario
    #[arg(long, default_value_t = 200)]
    bodies: usize,

    /// Seed for the cluster scenario
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Start from a saved snapshot instead of a scenario
    #[arg(long)]
    load: Option<PathBuf>,

    /// Target steps per second (0 = unpaced)
    #[arg(long, default_value_t = 0.0)]
    step_rate: f64,

    /// Stop after this many steps (0 = run until told to quit)
    #[arg(long, default_value_t = 0)]
    max_steps: u64,

    /// Log momentum every this many steps
    #[arg(long, default_value_t = 100)]
    print_every: u64,

    /// Fail a step if workers have not finished within this many seconds
    #[arg(long)]
    barrier_timeout_secs: Option<u64>,

    /// Lease before an in-process job is redelivered, in seconds
    #[arg(long, default_value_t = 30)]
    lease_secs: u64,

    /// Minimum separation used in the force law, in metres
    #[arg(long, default_value_t = nbody_core::kernel::DEFAULT_MIN_SEPARATION)]
    min_separation: f64,

    /// NATS server URL (defaults to $NATS_URL, then nats://localhost:4222)
    #[arg(short, long)]
    nats_url: Option<String>,
}

impl Args {
    fn coordinator_config(&self, delta_t: f64) -> CoordinatorConfig {
        let mut config = CoordinatorConfig::default()
            .with_chunks(self.chunks.max(1))
            .with_delta_t(delta_t)
            .with_gravity(self.gravity());
        if let Some(secs) = self.barrier_timeout_secs {
            config = config.with_barrier_timeout(Duration::from_secs(secs));
        }
        config
    }

    fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            step_rate: self.step_rate,
            max_steps: self.max_steps,
            print_every: self.print_every,
        }
    }

    fn gravity(&self) -> Gravity {
        Gravity::new().with_min_separation(self.min_separation)
    }
}

async fn initial_bodies(args: &Args) -> Result<(BodySet, f64)> {
    if let Some(path) = &args.load {
        let snapshot = snapshot::load(path).await?;
        return Ok((snapshot.bodies, snapshot.delta_t));
    }
    let bodies = match args.scenario {
        Scenario::TwoBody => two_body_circular(1.0e30, 1.0e24, 1.0e11),
        Scenario::Cluster => random_cluster(args.bodies, &ClusterParams::default(), args.seed),
    };
    Ok((bodies, args.dt))
}

async fn drive<Q: JobQueue, S: StateStore>(
    coordinator: Coordinator<Q, S>,
    config: DriverConfig,
    control: mpsc::Receiver<ControlMessage>,
) -> Result<()> {
    let mut driver = Driver::new(coordinator, config, control);
    let result = driver.run().await;
    info!(
        run = %driver.coordinator().run(),
        distributed = driver.coordinator().is_distributed(),
        steps = driver.steps(),
        generation = driver.coordinator().generation(),
        paused = driver.is_paused(),
        "simulation stopped"
    );
    result
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("nbody_coordinator=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!(backend = ?args.backend, "n-body coordinator starting");

    let (bodies, delta_t) = initial_bodies(&args).await?;
    let config = args.coordinator_config(delta_t);

    let (tx, rx) = mpsc::channel(64);
    control::spawn_stdin(tx.clone());
    control::spawn_ctrl_c(tx.clone());

    match args.backend {
        Backend::Local => {
            drop(tx);
            let coordinator = Coordinator::<MemoryQueue, MemoryStore>::local(config, bodies);
            drive(coordinator, args.driver_config(), rx).await
        }
        Backend::InProcess => {
            drop(tx);
            let queue = MemoryQueue::with_lease(Duration::from_secs(args.lease_secs));
            let store = MemoryStore::new();
            let workers: Vec<_> = (0..args.workers.max(1))
                .map(|_| {
                    let runner = WorkerRunner::new(queue.clone(), store.clone(), args.gravity());
                    tokio::spawn(runner.run())
                })
                .collect();
            info!(workers = workers.len(), "in-process workers started");

            let coordinator = Coordinator::distributed(config, queue, store, bodies);
            let result = drive(coordinator, args.driver_config(), rx).await;
            for worker in workers {
                match worker.await {
                    Ok(Ok(stats)) => info!(jobs = stats.jobs, "worker joined"),
                    Ok(Err(err)) => warn!(error = %err, "worker failed"),
                    Err(err) => warn!(%err, "worker panicked"),
                }
            }
            result
        }
        Backend::Nats => {
            let url = resolve_url(args.nats_url.as_deref());
            let conn = NatsConnection::connect_to(&url)
                .await
                .with_context(|| format!("could not reach NATS at {url}"))?;
            let queue = NatsJobQueue::connect(&conn).await.context("opening job queue")?;
            let store = NatsStore::open(&conn).await.context("opening state bucket")?;
            control::spawn_nats(&conn, tx).await?;

            let coordinator = Coordinator::distributed(config, queue, store, bodies);
            drive(coordinator, args.driver_config(), rx).await
        }
    }
}
