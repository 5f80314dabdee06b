//! Message types exchanged between coordinator and workers.
//!
//! Queue payloads and completion notices are MessagePack; [`ControlMessage`]
//! is also accepted as JSON on the control subject because it is typed by
//! humans and scripts.

use std::fmt;
use std::path::PathBuf;

use nbody_core::ChunkRange;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one simulation run. Every store key and job carries it so a
/// worker can never mix cached state from two runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Mint a fresh random run identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Jobs ────────────────────────────────────────────────────────────────────

/// One unit of work handed to exactly one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Coordinator-assigned identifier, unique within a run. The barrier
    /// counts acknowledgments by this id.
    pub id: u64,
    /// The run this job belongs to.
    pub run: RunId,
    /// Snapshot generation the result must be computed against.
    pub generation: u64,
    /// What to do.
    pub task: Task,
}

impl Job {
    /// The JetStream de-duplication id for this job.
    #[must_use]
    pub fn message_id(&self) -> String {
        format!("{}.{}", self.run, self.id)
    }
}

/// The work a [`Job`] requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Task {
    /// Integrate the bodies of `range` by `delta_t` seconds and publish the
    /// partial result.
    Integrate {
        /// Bodies to advance.
        range: ChunkRange,
        /// Time step in seconds.
        delta_t: f64,
    },
    /// Sentinel: drop every cached column, acknowledge and keep looping.
    ClearCache,
}

/// A worker reports that it finished a job. Published on
/// [`subjects::JOBS_DONE`](crate::subjects::JOBS_DONE) before the JetStream
/// acknowledgment, so a crash in between causes a redelivery rather than a
/// lost completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDone {
    /// Run of the finished job.
    pub run: RunId,
    /// Id of the finished job.
    pub job_id: u64,
    /// The worker instance that finished it.
    pub instance_id: String,
}

/// Broadcast to every attached worker to make it leave its job loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shutdown {
    /// Human-readable reason, logged by the workers.
    pub reason: String,
}

// ── Control ─────────────────────────────────────────────────────────────────

/// A command for a running coordinator, applied between steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlMessage {
    /// Change the number of chunks each step is split into.
    Chunks(usize),
    /// Change the time step, in seconds.
    DeltaT(f64),
    /// Pause or resume stepping.
    Paused(bool),
    /// Write a snapshot of the current state to the given path.
    SavePlanets(PathBuf),
    /// Start a new run from the snapshot at the given path.
    LoadPlanets(PathBuf),
    /// Change the target number of steps per second.
    StepRate(f64),
    /// End of the control stream; the coordinator shuts down.
    End,
}

// ── NATS header keys ────────────────────────────────────────────────────────

/// Standard NATS header keys used for routing metadata.
pub mod headers {
    /// JetStream de-duplication header.
    pub const MSG_ID: &str = "Nats-Msg-Id";
    /// Generation the job belongs to, for observability tooling.
    pub const GENERATION: &str = "nbody-generation";
}
