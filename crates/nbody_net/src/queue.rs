//! The job queue and its completion barrier.
//!
//! The queue is split by role:
//!
//! - [`JobQueue`] — the coordinator's side: enqueue, drain leftovers, wait on
//!   the barrier, broadcast shutdown.
//! - [`JobSource`] — a worker's side: dequeue under a lease, acknowledge.
//!
//! Delivery is competing-consumer: each job goes to one worker at a time.
//! Every delivery is a lease; a job whose lease expires before it is
//! acknowledged goes back to the queue and is delivered again, so a worker
//! that dies mid-job cannot stall the barrier forever. Acknowledging a job
//! twice (after a redelivery) counts once. Each delivery carries its attempt
//! number so a worker can give up on a job that keeps failing.
//!
//! [`MemoryQueue`] implements both sides in-process. The NATS backend lives in
//! [`crate::jetstream`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::NetError;
use crate::messages::Job;

/// Default lease length before an unacknowledged job is redelivered.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// Default number of deliveries a failing job gets before a worker drops it.
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

/// A dequeued job plus whatever the backend needs to acknowledge it.
#[derive(Debug)]
pub struct Delivery<H> {
    /// The job to execute.
    pub job: Job,
    /// Backend acknowledgment handle.
    pub handle: H,
    /// How many times this job has been delivered, starting at 1.
    pub attempt: u32,
}

/// Producer side of the queue. Only the coordinator holds one.
pub trait JobQueue: Send + Sync {
    /// Add a job and count it towards the current barrier.
    fn enqueue(&self, job: Job) -> impl Future<Output = Result<(), NetError>> + Send;

    /// Discard every job still waiting or leased and reset the barrier.
    /// Returns how many waiting jobs were discarded.
    fn drain_stale(&self) -> impl Future<Output = Result<usize, NetError>> + Send;

    /// Returns `true` if no job is waiting to be dequeued.
    fn is_empty(&self) -> impl Future<Output = Result<bool, NetError>> + Send;

    /// Block until every job enqueued since the last reset is acknowledged.
    ///
    /// With a `timeout`, fails with [`NetError::BarrierTimeout`] once it
    /// elapses; without one, waits indefinitely.
    fn await_all_acknowledged(
        &self,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<(), NetError>> + Send;

    /// Tell every attached worker to leave its job loop.
    fn shutdown_workers(&self, reason: &str) -> impl Future<Output = Result<(), NetError>> + Send;
}

/// Consumer side of the queue. Every worker holds one.
pub trait JobSource: Send + Sync {
    /// Backend-specific acknowledgment handle.
    type Handle: Send;

    /// Block until a job is available. Returns `None` once the shutdown
    /// signal has been observed.
    fn dequeue(&self) -> impl Future<Output = Result<Option<Delivery<Self::Handle>>, NetError>> + Send;

    /// Mark a delivered job as done.
    fn acknowledge(
        &self,
        delivery: Delivery<Self::Handle>,
        instance_id: &str,
    ) -> impl Future<Output = Result<(), NetError>> + Send;
}

// ── In-memory backend ───────────────────────────────────────────────────────

#[derive(Debug)]
struct Lease {
    job: Job,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Job>,
    leased: HashMap<u64, Lease>,
    /// Job ids enqueued since the last reset and not yet acknowledged.
    outstanding: HashSet<u64>,
    /// Deliveries so far, by job id.
    attempts: HashMap<u64, u32>,
    next_lease: u64,
    closed: bool,
}

impl QueueState {
    /// Put every job whose lease has expired back at the front of the queue.
    fn reclaim_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<u64> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(&id, _)| id)
            .collect();
        for lease_id in &expired {
            if let Some(lease) = self.leased.remove(lease_id) {
                warn!(job_id = lease.job.id, "lease expired, requeueing job");
                self.ready.push_front(lease.job);
            }
        }
        expired.len()
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    /// Signalled when jobs become available or the queue closes.
    available: Notify,
    /// Signalled on every acknowledgment.
    acknowledged: Notify,
    lease: Duration,
}

/// In-process job queue implementing both [`JobQueue`] and [`JobSource`].
/// Clones share the same queue.
#[derive(Debug, Clone)]
pub struct MemoryQueue {
    shared: Arc<Shared>,
}

impl MemoryQueue {
    /// Create a queue with the default lease.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lease(DEFAULT_LEASE)
    }

    /// Create a queue whose deliveries expire after `lease`.
    #[must_use]
    pub fn with_lease(lease: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                available: Notify::new(),
                acknowledged: Notify::new(),
                lease,
            }),
        }
    }

    /// Number of jobs enqueued since the last reset and not yet acknowledged.
    pub async fn outstanding(&self) -> usize {
        self.shared.state.lock().await.outstanding.len()
    }

    /// Number of jobs currently leased to workers.
    pub async fn leased(&self) -> usize {
        self.shared.state.lock().await.leased.len()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: Job) -> Result<(), NetError> {
        {
            let mut state = self.shared.state.lock().await;
            if state.closed {
                return Err(NetError::Closed);
            }
            state.outstanding.insert(job.id);
            state.ready.push_back(job);
        }
        self.shared.available.notify_waiters();
        Ok(())
    }

    async fn drain_stale(&self) -> Result<usize, NetError> {
        let mut state = self.shared.state.lock().await;
        let drained = state.ready.len();
        state.ready.clear();
        state.leased.clear();
        state.outstanding.clear();
        state.attempts.clear();
        Ok(drained)
    }

    async fn is_empty(&self) -> Result<bool, NetError> {
        Ok(self.shared.state.lock().await.ready.is_empty())
    }

    async fn await_all_acknowledged(&self, timeout: Option<Duration>) -> Result<(), NetError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let acked = self.shared.acknowledged.notified();
            {
                let mut state = self.shared.state.lock().await;
                if state.outstanding.is_empty() {
                    return Ok(());
                }
                if state.reclaim_expired(Instant::now()) > 0 {
                    self.shared.available.notify_waiters();
                }
                if let Some(deadline) = deadline
                    && Instant::now() >= deadline
                {
                    return Err(NetError::BarrierTimeout {
                        pending: state.outstanding.len(),
                    });
                }
            }

            // Wake on an acknowledgment, or periodically to reclaim leases.
            let mut wake = Instant::now() + self.shared.lease;
            if let Some(deadline) = deadline {
                wake = wake.min(deadline);
            }
            tokio::select! {
                () = acked => {}
                () = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    async fn shutdown_workers(&self, reason: &str) -> Result<(), NetError> {
        self.shared.state.lock().await.closed = true;
        debug!(reason, "closing in-memory job queue");
        self.shared.available.notify_waiters();
        Ok(())
    }
}

impl JobSource for MemoryQueue {
    type Handle = u64;

    async fn dequeue(&self) -> Result<Option<Delivery<u64>>, NetError> {
        loop {
            let available = self.shared.available.notified();
            {
                let mut state = self.shared.state.lock().await;
                if state.closed {
                    return Ok(None);
                }
                let now = Instant::now();
                state.reclaim_expired(now);
                if let Some(job) = state.ready.pop_front() {
                    let lease_id = state.next_lease;
                    state.next_lease += 1;
                    let attempt = state.attempts.entry(job.id).or_default();
                    *attempt += 1;
                    let attempt = *attempt;
                    state.leased.insert(
                        lease_id,
                        Lease {
                            job: job.clone(),
                            deadline: now + self.shared.lease,
                        },
                    );
                    return Ok(Some(Delivery {
                        job,
                        handle: lease_id,
                        attempt,
                    }));
                }
            }

            tokio::select! {
                () = available => {}
                () = tokio::time::sleep(self.shared.lease) => {}
            }
        }
    }

    async fn acknowledge(&self, delivery: Delivery<u64>, instance_id: &str) -> Result<(), NetError> {
        {
            let mut state = self.shared.state.lock().await;
            let job_id = delivery.job.id;
            if state.leased.remove(&delivery.handle).is_none() {
                // The lease expired; drop any requeued copy so it is not run again.
                state.ready.retain(|job| job.id != job_id);
                state.leased.retain(|_, lease| lease.job.id != job_id);
            }
            state.attempts.remove(&job_id);
            if !state.outstanding.remove(&job_id) {
                debug!(job_id, instance_id, "duplicate or stale acknowledgment ignored");
            }
        }
        self.shared.acknowledged.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use nbody_core::ChunkRange;

    use super::*;
    use crate::messages::{RunId, Task};

    fn make_job(id: u64) -> Job {
        Job {
            id,
            run: RunId::new(),
            generation: 0,
            task: Task::Integrate {
                range: ChunkRange::new(id as usize, id as usize + 1),
                delta_t: 1.0,
            },
        }
    }

    #[tokio::test]
    async fn test_fifo_delivery() {
        let queue = MemoryQueue::new();
        for id in 0..3 {
            queue.enqueue(make_job(id)).await.unwrap();
        }
        for id in 0..3 {
            let delivery = queue.dequeue().await.unwrap().unwrap();
            assert_eq!(delivery.job.id, id);
        }
        assert!(JobQueue::is_empty(&queue).await.unwrap());
    }

    #[tokio::test]
    async fn test_barrier_waits_for_every_ack() {
        let queue = MemoryQueue::new();
        for id in 0..5 {
            queue.enqueue(make_job(id)).await.unwrap();
        }
        let mut deliveries = Vec::new();
        for _ in 0..5 {
            deliveries.push(queue.dequeue().await.unwrap().unwrap());
        }
        let last = deliveries.pop().unwrap();
        for delivery in deliveries {
            queue.acknowledge(delivery, "w").await.unwrap();
        }

        let barrier = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.await_all_acknowledged(None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!barrier.is_finished(), "barrier released with a job pending");

        queue.acknowledge(last, "w").await.unwrap();
        let released = tokio::time::timeout(Duration::from_secs(1), barrier).await;
        assert!(matches!(released, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn test_barrier_with_nothing_enqueued() {
        let queue = MemoryQueue::new();
        queue.await_all_acknowledged(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_barrier_timeout_reports_pending() {
        let queue = MemoryQueue::new();
        queue.enqueue(make_job(1)).await.unwrap();
        queue.enqueue(make_job(2)).await.unwrap();
        let err = queue
            .await_all_acknowledged(Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::BarrierTimeout { pending: 2 }));
    }

    #[tokio::test]
    async fn test_competing_consumers_get_distinct_jobs() {
        let queue = MemoryQueue::new();
        let mut consumers = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            consumers.push(tokio::spawn(async move {
                let delivery = queue.dequeue().await.unwrap().unwrap();
                let id = delivery.job.id;
                queue.acknowledge(delivery, "w").await.unwrap();
                id
            }));
        }
        for id in 0..4 {
            queue.enqueue(make_job(id)).await.unwrap();
        }
        queue.await_all_acknowledged(None).await.unwrap();

        let mut ids = Vec::new();
        for consumer in consumers {
            ids.push(consumer.await.unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let queue = MemoryQueue::with_lease(Duration::from_millis(20));
        queue.enqueue(make_job(9)).await.unwrap();

        // A worker takes the job and "dies" without acknowledging.
        let abandoned = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(abandoned.attempt, 1);
        assert_eq!(queue.leased().await, 1);

        let redelivered = tokio::time::timeout(Duration::from_secs(1), queue.dequeue())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(redelivered.job.id, 9);
        assert_eq!(redelivered.attempt, 2);

        queue.acknowledge(redelivered, "survivor").await.unwrap();
        queue.await_all_acknowledged(None).await.unwrap();

        // The original holder finally acknowledges: ignored, nothing breaks.
        queue.acknowledge(abandoned, "zombie").await.unwrap();
        assert_eq!(queue.outstanding().await, 0);
    }

    #[tokio::test]
    async fn test_late_ack_removes_requeued_copy() {
        let queue = MemoryQueue::with_lease(Duration::from_millis(10));
        queue.enqueue(make_job(5)).await.unwrap();
        let slow = queue.dequeue().await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        // The barrier poll reclaims the expired lease.
        let _ = queue
            .await_all_acknowledged(Some(Duration::from_millis(1)))
            .await;
        assert!(!JobQueue::is_empty(&queue).await.unwrap());

        queue.acknowledge(slow, "slow").await.unwrap();
        assert!(JobQueue::is_empty(&queue).await.unwrap());
        queue.await_all_acknowledged(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_stale_resets_barrier() {
        let queue = MemoryQueue::new();
        queue.enqueue(make_job(1)).await.unwrap();
        queue.enqueue(make_job(2)).await.unwrap();
        let _taken = queue.dequeue().await.unwrap().unwrap();

        assert_eq!(queue.drain_stale().await.unwrap(), 1);
        assert!(JobQueue::is_empty(&queue).await.unwrap());
        queue.await_all_acknowledged(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_releases_every_waiting_worker() {
        let queue = MemoryQueue::new();
        let mut workers = Vec::new();
        for _ in 0..3 {
            let queue = queue.clone();
            workers.push(tokio::spawn(async move { queue.dequeue().await }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shutdown_workers("test").await.unwrap();

        for worker in workers {
            let result = tokio::time::timeout(Duration::from_secs(1), worker)
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(result, Ok(None)));
        }
        assert!(matches!(
            queue.enqueue(make_job(1)).await,
            Err(NetError::Closed)
        ));
    }
}
