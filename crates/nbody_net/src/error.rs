//! Network-layer error types.

use nbody_core::CoreError;

/// Errors that can occur while talking to the job queue or the state store.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to encode a message to MessagePack.
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Failed to decode a message from MessagePack.
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// NATS or JetStream operation error.
    #[error("NATS error: {0}")]
    Nats(String),

    /// NATS subscription error.
    #[error("NATS subscribe error: {0}")]
    Subscribe(#[from] async_nats::SubscribeError),

    /// NATS publish error.
    #[error("NATS publish error: {0}")]
    Publish(#[from] async_nats::PublishError),

    /// NATS connection error.
    #[error("NATS connection error: {0}")]
    Connect(#[from] async_nats::ConnectError),

    /// A key the protocol requires was absent from the state store.
    #[error("missing state store key: {0}")]
    MissingKey(String),

    /// Data read back from the store does not fit the body set.
    #[error("state shape mismatch: {0}")]
    Shape(#[from] CoreError),

    /// The step barrier gave up waiting for acknowledgments.
    #[error("barrier timed out with {pending} job(s) unacknowledged")]
    BarrierTimeout {
        /// Jobs still outstanding when the timeout fired.
        pending: usize,
    },

    /// The queue was shut down while an operation was in flight.
    #[error("job queue closed")]
    Closed,
}

impl NetError {
    /// Wrap any displayable JetStream/NATS error.
    pub(crate) fn nats(err: impl std::fmt::Display) -> Self {
        Self::Nats(err.to_string())
    }
}
