//! Worker configuration.

use std::time::Duration;

use nbody_core::Gravity;
use nbody_net::QueueConfig;

/// Configuration for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Optional NATS URL override (defaults to `NATS_URL` env or localhost).
    pub nats_url: Option<String>,
    /// Kernel parameters. Must match the coordinator's for distributed and
    /// local runs to agree.
    pub gravity: Gravity,
    /// Queue lease and redelivery settings.
    pub queue: QueueConfig,
    /// Connection attempts before giving up at startup.
    pub connect_attempts: u32,
    /// First reconnect delay; doubles after each failure.
    pub connect_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            nats_url: None,
            gravity: Gravity::default(),
            queue: QueueConfig::default(),
            connect_attempts: 10,
            connect_backoff: Duration::from_millis(250),
        }
    }
}

impl WorkerConfig {
    /// Create a config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the NATS URL.
    #[must_use]
    pub fn with_nats_url(mut self, url: impl Into<String>) -> Self {
        self.nats_url = Some(url.into());
        self
    }

    /// Override the kernel parameters.
    #[must_use]
    pub fn with_gravity(mut self, gravity: Gravity) -> Self {
        self.gravity = gravity;
        self
    }

    /// Override how long a job may run before it is redelivered elsewhere.
    #[must_use]
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.queue.lease = lease;
        self
    }

    /// Override how many deliveries a failing job gets before it is dropped.
    #[must_use]
    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.queue.max_deliveries = max_deliveries.max(1);
        self
    }

    /// Override the startup connection retry policy.
    #[must_use]
    pub fn with_connect_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.connect_attempts = attempts.max(1);
        self.connect_backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = WorkerConfig::new()
            .with_nats_url("nats://cluster:4222")
            .with_lease(Duration::from_secs(5))
            .with_max_deliveries(0)
            .with_connect_retry(0, Duration::from_millis(10));
        assert_eq!(config.nats_url.as_deref(), Some("nats://cluster:4222"));
        assert_eq!(config.queue.lease, Duration::from_secs(5));
        assert_eq!(config.queue.max_deliveries, 1);
        assert_eq!(config.connect_attempts, 1);
    }
}
