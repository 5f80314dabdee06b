//! NATS JetStream job queue.
//!
//! Jobs are published to a work-queue-retention stream bound to
//! [`subjects::JOBS`]. Every worker pulls from the same durable consumer, so
//! JetStream hands each job to exactly one of them. The consumer's `ack_wait`
//! is the lease: a job not acknowledged in time is redelivered to another
//! worker.
//!
//! Each worker pulls one message per request, so it never holds more than
//! the job in hand and one prefetched job. Larger batches would park several
//! jobs in one worker's buffer while their leases run down.
//!
//! The barrier does not rely on stream state. Before acknowledging a job a
//! worker publishes a [`JobDone`] notice on [`subjects::JOBS_DONE`]; the
//! coordinator counts notices against the ids it enqueued.

use std::collections::HashSet;
use std::time::Duration;

use async_nats::jetstream::{self, consumer::pull, stream};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::codec;
use crate::connection::NatsConnection;
use crate::error::NetError;
use crate::messages::{self, Job, JobDone, RunId, Shutdown};
use crate::queue::{DEFAULT_LEASE, DEFAULT_MAX_DELIVERIES, Delivery, JobQueue, JobSource};
use crate::subjects;

/// Worker-side queue settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a delivered job may stay unacknowledged before JetStream
    /// redelivers it.
    pub lease: Duration,
    /// Deliveries a failing job gets before a worker acknowledges and drops
    /// it.
    pub max_deliveries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease: DEFAULT_LEASE,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
        }
    }
}

/// Jobs requested per pull. A worker holds the job in hand plus at most
/// this many prefetched.
const JOBS_PER_PULL: usize = 1;

fn consumer_config(config: &QueueConfig) -> pull::Config {
    pull::Config {
        durable_name: Some(subjects::JOBS_CONSUMER.to_string()),
        ack_wait: config.lease,
        // One more than the worker-side cap, so a job that kills its worker
        // before it can be dropped stops circulating.
        max_deliver: i64::from(config.max_deliveries) + 1,
        ..Default::default()
    }
}

async fn ensure_stream(js: &jetstream::Context) -> Result<stream::Stream, NetError> {
    let stream = js
        .get_or_create_stream(stream::Config {
            name: subjects::JOBS_STREAM.to_string(),
            subjects: vec![subjects::JOBS.to_string()],
            retention: stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        })
        .await
        .map_err(NetError::nats)?;
    debug!(stream = subjects::JOBS_STREAM, "job stream ready");
    Ok(stream)
}

// ── Coordinator side ────────────────────────────────────────────────────────

/// The coordinator's handle on the JetStream job queue.
pub struct NatsJobQueue {
    conn: NatsConnection,
    js: jetstream::Context,
    stream: Mutex<stream::Stream>,
    done: Mutex<async_nats::Subscriber>,
    outstanding: Mutex<HashSet<(RunId, u64)>>,
}

impl NatsJobQueue {
    /// Create the job stream if needed and start listening for completion
    /// notices.
    ///
    /// # Errors
    ///
    /// Returns [`NetError`] if the stream or the subscription cannot be set up.
    pub async fn connect(conn: &NatsConnection) -> Result<Self, NetError> {
        let js = jetstream::new(conn.client().clone());
        let stream = ensure_stream(&js).await?;
        let done = conn.subscribe(subjects::JOBS_DONE).await?;
        info!(subject = subjects::JOBS_DONE, "listening for job completions");
        Ok(Self {
            conn: conn.clone(),
            js,
            stream: Mutex::new(stream),
            done: Mutex::new(done),
            outstanding: Mutex::new(HashSet::new()),
        })
    }
}

impl JobQueue for NatsJobQueue {
    async fn enqueue(&self, job: Job) -> Result<(), NetError> {
        let payload = codec::encode(&job)?;
        let mut headers = async_nats::HeaderMap::new();
        headers.insert(messages::headers::MSG_ID, job.message_id().as_str());
        headers.insert(
            messages::headers::GENERATION,
            job.generation.to_string().as_str(),
        );

        self.outstanding.lock().await.insert((job.run, job.id));
        let ack = self
            .js
            .publish_with_headers(subjects::JOBS, headers, payload.into())
            .await
            .map_err(NetError::nats)?;
        ack.await.map_err(NetError::nats)?;
        Ok(())
    }

    async fn drain_stale(&self) -> Result<usize, NetError> {
        let response = self
            .stream
            .lock()
            .await
            .purge()
            .await
            .map_err(NetError::nats)?;
        self.outstanding.lock().await.clear();
        Ok(response.purged as usize)
    }

    async fn is_empty(&self) -> Result<bool, NetError> {
        let mut stream = self.stream.lock().await;
        let info = stream.info().await.map_err(NetError::nats)?;
        Ok(info.state.messages == 0)
    }

    async fn await_all_acknowledged(&self, timeout: Option<Duration>) -> Result<(), NetError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut done = self.done.lock().await;
        loop {
            let pending = self.outstanding.lock().await.len();
            if pending == 0 {
                return Ok(());
            }

            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, done.next()).await {
                    Ok(next) => next,
                    Err(_) => return Err(NetError::BarrierTimeout { pending }),
                },
                None => done.next().await,
            };
            let Some(message) = next else {
                return Err(NetError::Closed);
            };

            let notice: JobDone = match codec::decode(&message.payload) {
                Ok(notice) => notice,
                Err(err) => {
                    warn!(%err, "ignoring undecodable completion notice");
                    continue;
                }
            };
            if !self
                .outstanding
                .lock()
                .await
                .remove(&(notice.run, notice.job_id))
            {
                debug!(
                    job_id = notice.job_id,
                    instance_id = notice.instance_id,
                    "duplicate or stale completion ignored"
                );
            }
        }
    }

    async fn shutdown_workers(&self, reason: &str) -> Result<(), NetError> {
        let signal = Shutdown {
            reason: reason.to_string(),
        };
        self.conn.publish(subjects::WORKERS_SHUTDOWN, &signal).await?;
        self.conn.client().flush().await.map_err(NetError::nats)?;
        info!(reason, "shutdown broadcast sent");
        Ok(())
    }
}

// ── Worker side ─────────────────────────────────────────────────────────────

/// A worker's handle on the JetStream job queue.
pub struct NatsJobSource {
    conn: NatsConnection,
    messages: Mutex<pull::Stream>,
    shutdown: Mutex<async_nats::Subscriber>,
}

impl NatsJobSource {
    /// Attach to the shared durable consumer and subscribe to the shutdown
    /// broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`NetError`] if the consumer or subscription cannot be set up.
    pub async fn connect(conn: &NatsConnection, config: &QueueConfig) -> Result<Self, NetError> {
        let js = jetstream::new(conn.client().clone());
        let stream = ensure_stream(&js).await?;
        let consumer: jetstream::consumer::PullConsumer = stream
            .get_or_create_consumer(subjects::JOBS_CONSUMER, consumer_config(config))
            .await
            .map_err(NetError::nats)?;
        let messages = consumer
            .stream()
            .max_messages_per_batch(JOBS_PER_PULL)
            .messages()
            .await
            .map_err(NetError::nats)?;
        let shutdown = conn.subscribe(subjects::WORKERS_SHUTDOWN).await?;
        info!(
            consumer = subjects::JOBS_CONSUMER,
            lease_ms = config.lease.as_millis() as u64,
            max_deliveries = config.max_deliveries,
            "attached to job queue"
        );
        Ok(Self {
            conn: conn.clone(),
            messages: Mutex::new(messages),
            shutdown: Mutex::new(shutdown),
        })
    }
}

impl JobSource for NatsJobSource {
    type Handle = jetstream::Message;

    async fn dequeue(&self) -> Result<Option<Delivery<jetstream::Message>>, NetError> {
        let mut messages = self.messages.lock().await;
        let mut shutdown = self.shutdown.lock().await;
        loop {
            tokio::select! {
                biased;
                signal = shutdown.next() => {
                    match signal.map(|msg| codec::decode::<Shutdown>(&msg.payload)) {
                        Some(Ok(signal)) => info!(reason = signal.reason, "shutdown signal received"),
                        _ => info!("shutdown signal received"),
                    }
                    return Ok(None);
                }
                next = messages.next() => {
                    let message = match next {
                        Some(Ok(message)) => message,
                        Some(Err(err)) => return Err(NetError::nats(err)),
                        None => return Ok(None),
                    };
                    match codec::decode::<Job>(&message.payload) {
                        Ok(job) => {
                            let attempt = message
                                .info()
                                .map_or(1, |info| u32::try_from(info.delivered).unwrap_or(1));
                            return Ok(Some(Delivery {
                                job,
                                handle: message,
                                attempt,
                            }));
                        }
                        Err(err) => {
                            // Acknowledge so the poison message is not redelivered forever.
                            warn!(%err, "discarding undecodable job");
                            message.ack().await.map_err(NetError::nats)?;
                        }
                    }
                }
            }
        }
    }

    async fn acknowledge(
        &self,
        delivery: Delivery<jetstream::Message>,
        instance_id: &str,
    ) -> Result<(), NetError> {
        let notice = JobDone {
            run: delivery.job.run,
            job_id: delivery.job.id,
            instance_id: instance_id.to_string(),
        };
        // Completion first: a crash before the ack means a redelivery and a
        // duplicate notice, which the barrier ignores.
        self.conn.publish(subjects::JOBS_DONE, &notice).await?;
        delivery.handle.ack().await.map_err(NetError::nats)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_lease_and_delivery_cap() {
        let config = QueueConfig {
            lease: Duration::from_secs(7),
            max_deliveries: 3,
        };
        let consumer = consumer_config(&config);
        assert_eq!(consumer.durable_name.as_deref(), Some(subjects::JOBS_CONSUMER));
        assert_eq!(consumer.ack_wait, Duration::from_secs(7));
        assert_eq!(consumer.max_deliver, 4);
    }
}
