//! # nbody_worker
//!
//! Worker runtime for the distributed n-body simulator.
//!
//! A worker repeatedly:
//!
//! 1. Dequeues a job under a lease.
//! 2. Refreshes its cached copy of the body state if the job's generation is
//!    new (masses and count once per run).
//! 3. Integrates its chunk against the full cached state.
//! 4. Publishes the chunk's partial result, then acknowledges the job.
//!
//! It leaves the loop when the coordinator broadcasts shutdown.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use nbody_core::Gravity;
//! use nbody_net::{MemoryQueue, MemoryStore};
//! use nbody_worker::WorkerRunner;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runner = WorkerRunner::new(MemoryQueue::new(), MemoryStore::new(), Gravity::new());
//!     let stats = runner.run().await?;
//!     println!("{} jobs", stats.jobs);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod runner;

pub use cache::StateCache;
pub use config::WorkerConfig;
pub use runner::{WorkerRunner, WorkerStats};
