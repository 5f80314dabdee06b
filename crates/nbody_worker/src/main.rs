//! # nbody_worker — worker process
//!
//! Attaches to the shared JetStream job queue and state bucket and runs the
//! worker loop until the coordinator broadcasts shutdown.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nbody_core::Gravity;
use nbody_net::connection::resolve_url;
use nbody_net::{NatsConnection, NatsJobSource, NatsStore};
use nbody_worker::{WorkerConfig, WorkerRunner};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nbody_worker", about = "Chunk integration worker for the n-body simulator")]
struct Args {
    /// NATS server URL (defaults to $NATS_URL, then nats://localhost:4222)
    #[arg(short, long)]
    nats_url: Option<String>,

    /// Seconds a job may stay unacknowledged before it is redelivered
    #[arg(long, default_value_t = 30)]
    lease_secs: u64,

    /// Deliveries a failing job gets before this worker drops it
    #[arg(long, default_value_t = nbody_net::queue::DEFAULT_MAX_DELIVERIES)]
    max_deliveries: u32,

    /// Minimum separation used in the force law, in metres
    #[arg(long, default_value_t = nbody_core::kernel::DEFAULT_MIN_SEPARATION)]
    min_separation: f64,

    /// Connection attempts before giving up
    #[arg(long, default_value_t = 10)]
    connect_attempts: u32,
}

impl Args {
    fn into_config(self) -> WorkerConfig {
        let mut config = WorkerConfig::new()
            .with_gravity(Gravity::new().with_min_separation(self.min_separation))
            .with_lease(Duration::from_secs(self.lease_secs))
            .with_max_deliveries(self.max_deliveries)
            .with_connect_retry(self.connect_attempts, Duration::from_millis(250));
        if let Some(url) = self.nats_url {
            config = config.with_nats_url(url);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("nbody_worker=info".parse()?))
        .init();

    let config = Args::parse().into_config();
    let url = resolve_url(config.nats_url.as_deref());

    let conn = NatsConnection::connect_with_backoff(
        &url,
        config.connect_attempts,
        config.connect_backoff,
        Duration::from_secs(10),
    )
    .await
    .with_context(|| format!("could not reach NATS at {url}"))?;

    let store = NatsStore::open(&conn).await.context("opening state bucket")?;
    let source = NatsJobSource::connect(&conn, &config.queue)
        .await
        .context("attaching to job queue")?;

    let runner = WorkerRunner::new(source, store, config.gravity)
        .with_max_deliveries(config.queue.max_deliveries);
    info!(instance_id = runner.instance_id(), url, "worker ready");
    let stats = runner.run().await?;

    info!(
        jobs = stats.jobs,
        sentinels = stats.sentinels,
        failures = stats.failures,
        dropped = stats.dropped,
        "worker shut down"
    );
    Ok(())
}
