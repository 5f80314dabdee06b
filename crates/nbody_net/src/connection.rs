//! NATS client setup shared by the coordinator and the workers.

use std::time::Duration;

use tracing::{info, warn};

use crate::error::NetError;

/// NATS server used when nothing else is configured.
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

/// Environment variable consulted for the server URL.
pub const NATS_URL_ENV: &str = "NATS_URL";

/// Resolve the server URL: an explicit value wins, then `NATS_URL`, then
/// [`DEFAULT_NATS_URL`].
#[must_use]
pub fn resolve_url(explicit: Option<&str>) -> String {
    match explicit {
        Some(url) => url.to_string(),
        None => std::env::var(NATS_URL_ENV).unwrap_or_else(|_| DEFAULT_NATS_URL.to_string()),
    }
}

/// A cloneable handle on one NATS client.
#[derive(Debug, Clone)]
pub struct NatsConnection {
    client: async_nats::Client,
}

impl NatsConnection {
    /// Connect to the server named by `NATS_URL`, or the default one.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Connect`] if the server is unreachable.
    pub async fn connect() -> Result<Self, NetError> {
        Self::connect_to(&resolve_url(None)).await
    }

    /// Connect to the server at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Connect`] if the server is unreachable.
    pub async fn connect_to(url: &str) -> Result<Self, NetError> {
        info!(url, "connecting to NATS");
        let client = async_nats::connect(url).await?;
        info!(url, "connected to NATS");
        Ok(Self { client })
    }

    /// Connect to `url`, retrying with exponential backoff.
    ///
    /// The delay starts at `initial` and doubles after every failure, capped
    /// at `max`. Gives up after `attempts` tries.
    ///
    /// # Errors
    ///
    /// Returns the last [`NetError::Connect`] once every attempt has failed.
    pub async fn connect_with_backoff(
        url: &str,
        attempts: u32,
        initial: Duration,
        max: Duration,
    ) -> Result<Self, NetError> {
        let mut delay = initial;
        let mut attempt = 1;
        loop {
            match Self::connect_to(url).await {
                Ok(conn) => return Ok(conn),
                Err(err) if attempt < attempts => {
                    warn!(%err, attempt, retry_in_ms = delay.as_millis() as u64, "NATS connect failed");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(max);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// The underlying client, for JetStream contexts.
    #[must_use]
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Publish a MessagePack-encoded message on a core subject.
    ///
    /// # Errors
    ///
    /// Returns [`NetError`] if encoding or publishing fails.
    pub async fn publish<T: serde::Serialize>(
        &self,
        subject: &str,
        message: &T,
    ) -> Result<(), NetError> {
        let payload = crate::codec::encode(message)?;
        self.client
            .publish(subject.to_string(), payload.into())
            .await?;
        Ok(())
    }

    /// Subscribe to a core subject.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Subscribe`] if the subscription fails.
    pub async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber, NetError> {
        Ok(self.client.subscribe(subject.to_string()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_url_wins() {
        assert_eq!(
            resolve_url(Some("nats://cluster:4222")),
            "nats://cluster:4222"
        );
    }
}
