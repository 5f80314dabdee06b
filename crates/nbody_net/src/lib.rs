//! # nbody_net
//!
//! Coordination plumbing for the distributed n-body simulator.
//!
//! This crate provides:
//!
//! - [`store`] — the shared key/value [`StateStore`] and its backends.
//! - [`keys`] — structured store keys.
//! - [`state`] — typed publish/fetch of body columns and chunk results.
//! - [`queue`] — the [`JobQueue`]/[`JobSource`] contract, the barrier and the
//!   in-process [`MemoryQueue`].
//! - [`jetstream`] — the NATS JetStream queue backend.
//! - [`messages`] — jobs, completion notices and control messages.
//! - [`subjects`] — NATS subject, stream and bucket names.
//! - [`codec`] — MessagePack helpers.
//! - [`connection`] — NATS client setup.
//! - [`error`] — error types.

pub mod codec;
pub mod connection;
pub mod error;
pub mod jetstream;
pub mod keys;
pub mod messages;
pub mod queue;
pub mod state;
pub mod store;
pub mod subjects;

pub use codec::{decode, encode};
pub use connection::NatsConnection;
pub use error::NetError;
pub use jetstream::{NatsJobQueue, NatsJobSource, QueueConfig};
pub use keys::{Field, StoreKey};
pub use messages::{ControlMessage, Job, JobDone, RunId, Shutdown, Task};
pub use queue::{Delivery, JobQueue, JobSource, MemoryQueue};
pub use state::Constants;
pub use store::{MemoryStore, NatsStore, StateStore};
