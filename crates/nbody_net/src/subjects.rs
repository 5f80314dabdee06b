//! NATS subject, stream and bucket names.
//!
//! All simulator subjects are prefixed with `nbody.` to namespace within a
//! shared NATS cluster.

/// Root prefix for all simulator NATS subjects.
pub const PREFIX: &str = "nbody";

// ── Job queue ───────────────────────────────────────────────────────────────

/// Job descriptors. Coordinator → JetStream work queue → one worker.
pub const JOBS: &str = "nbody.jobs";

/// Completion notices for acknowledged jobs. Workers → Coordinator.
pub const JOBS_DONE: &str = "nbody.jobs.done";

/// JetStream stream backing the job queue (work-queue retention).
pub const JOBS_STREAM: &str = "NBODY_JOBS";

/// Durable pull consumer shared by every worker (competing consumers).
pub const JOBS_CONSUMER: &str = "nbody-workers";

// ── Worker lifecycle ────────────────────────────────────────────────────────

/// Shutdown broadcast. Coordinator → every worker.
pub const WORKERS_SHUTDOWN: &str = "nbody.workers.shutdown";

// ── Control ─────────────────────────────────────────────────────────────────

/// JSON control messages for a running coordinator. Any → Coordinator.
pub const CONTROL: &str = "nbody.control";

// ── State store ─────────────────────────────────────────────────────────────

/// JetStream key/value bucket holding published body state and partial
/// results.
pub const STATE_BUCKET: &str = "nbody_state";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subjects_share_prefix() {
        for subject in [JOBS, JOBS_DONE, WORKERS_SHUTDOWN, CONTROL] {
            assert!(subject.starts_with(PREFIX), "{subject}");
        }
    }

    #[test]
    fn test_done_subject_not_captured_by_jobs_stream() {
        // The work-queue stream binds exactly `nbody.jobs`; completion notices
        // on a child subject must stay on core NATS.
        assert_ne!(JOBS, JOBS_DONE);
        assert!(!JOBS.ends_with('>') && !JOBS.ends_with('*'));
    }
}
