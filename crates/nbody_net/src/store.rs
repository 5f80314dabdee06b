//! The shared key/value state store.
//!
//! [`StateStore`] is the minimal `SET`/`GET`/`DELETE` contract the step
//! protocol needs. There are no cross-key transactions; each chunk owns a
//! disjoint set of keys, so concurrent writers never touch the same key.
//!
//! Two backends:
//!
//! - [`MemoryStore`] — an in-process `DashMap`, shared by cloning. It counts
//!   reads per key, which the worker cache tests rely on.
//! - [`NatsStore`] — a JetStream key/value bucket.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_nats::jetstream;
use dashmap::DashMap;
use tracing::info;

use crate::connection::NatsConnection;
use crate::error::NetError;
use crate::keys::StoreKey;
use crate::subjects;

/// A flat key/value map holding opaque byte blobs.
pub trait StateStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &StoreKey, value: Vec<u8>)
    -> impl Future<Output = Result<(), NetError>> + Send;

    /// Fetch the value under `key`, or `None` if it is absent.
    fn get(&self, key: &StoreKey) -> impl Future<Output = Result<Option<Vec<u8>>, NetError>> + Send;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, key: &StoreKey) -> impl Future<Output = Result<(), NetError>> + Send;
}

// ── In-memory backend ───────────────────────────────────────────────────────

/// In-process state store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<StoreKey, Vec<u8>>>,
    reads: Arc<DashMap<StoreKey, AtomicU64>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains(&self, key: &StoreKey) -> bool {
        self.entries.contains_key(key)
    }

    /// How many times `key` has been read with [`StateStore::get`].
    #[must_use]
    pub fn read_count(&self, key: &StoreKey) -> u64 {
        self.reads
            .get(key)
            .map_or(0, |count| count.load(Ordering::Relaxed))
    }
}

impl StateStore for MemoryStore {
    async fn set(&self, key: &StoreKey, value: Vec<u8>) -> Result<(), NetError> {
        self.entries.insert(*key, value);
        Ok(())
    }

    async fn get(&self, key: &StoreKey) -> Result<Option<Vec<u8>>, NetError> {
        self.reads
            .entry(*key)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, key: &StoreKey) -> Result<(), NetError> {
        self.entries.remove(key);
        Ok(())
    }
}

// ── NATS JetStream backend ──────────────────────────────────────────────────

/// State store backed by a JetStream key/value bucket.
#[derive(Clone)]
pub struct NatsStore {
    kv: jetstream::kv::Store,
}

impl NatsStore {
    /// Open (creating if needed) the state bucket.
    ///
    /// The bucket keeps a single revision per key: old generations are
    /// overwritten, never replayed.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Nats`] if the bucket cannot be created.
    pub async fn open(conn: &NatsConnection) -> Result<Self, NetError> {
        let js = jetstream::new(conn.client().clone());
        let kv = js
            .create_key_value(jetstream::kv::Config {
                bucket: subjects::STATE_BUCKET.to_string(),
                history: 1,
                ..Default::default()
            })
            .await
            .map_err(NetError::nats)?;
        info!(bucket = subjects::STATE_BUCKET, "state bucket ready");
        Ok(Self { kv })
    }
}

impl StateStore for NatsStore {
    async fn set(&self, key: &StoreKey, value: Vec<u8>) -> Result<(), NetError> {
        self.kv
            .put(key.to_string(), value.into())
            .await
            .map_err(NetError::nats)?;
        Ok(())
    }

    async fn get(&self, key: &StoreKey) -> Result<Option<Vec<u8>>, NetError> {
        let value = self.kv.get(key.to_string()).await.map_err(NetError::nats)?;
        Ok(value.map(|bytes| bytes.to_vec()))
    }

    async fn delete(&self, key: &StoreKey) -> Result<(), NetError> {
        self.kv
            .delete(key.to_string())
            .await
            .map_err(NetError::nats)
    }
}
