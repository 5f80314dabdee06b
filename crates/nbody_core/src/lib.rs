//! # nbody_core
//!
//! The pure, network-free half of the distributed n-body simulator.
//!
//! This crate provides:
//!
//! - [`BodySet`] — structure-of-arrays body state (position, velocity,
//!   acceleration, mass).
//! - [`ChunkRange`] and [`partition`] — deterministic splitting of the body
//!   index space into jobs.
//! - [`Gravity`] — the direct-summation kernel shared by workers and the
//!   single-process fallback.
//! - [`scenario`] — builders for initial conditions.

pub mod body;
pub mod chunk;
pub mod error;
pub mod kernel;
pub mod scenario;

// Re-export glam's double precision vector for convenience.
pub use glam::DVec3;

pub use body::{BodySet, ChunkState, StateView};
pub use chunk::{ChunkRange, partition};
pub use error::CoreError;
pub use kernel::{G, Gravity, momentum};
