//! Typed body-state exchange on top of a [`StateStore`].
//!
//! The coordinator publishes columns and collects partial results; workers
//! fetch columns and publish partial results. Both sides go through these
//! helpers so key layout and encoding live in one place.

use nbody_core::{BodySet, ChunkRange, ChunkState, CoreError, DVec3};

use crate::codec;
use crate::error::NetError;
use crate::keys::{Field, StoreKey};
use crate::messages::RunId;
use crate::store::StateStore;

/// The per-run immutable part of the body state.
#[derive(Debug, Clone, PartialEq)]
pub struct Constants {
    /// Number of bodies.
    pub count: usize,
    /// Body masses, `count` entries.
    pub mass: Vec<f64>,
}

fn column(bodies: &BodySet, field: Field) -> &[DVec3] {
    match field {
        Field::Position => bodies.position(),
        Field::Velocity => bodies.velocity(),
        Field::Acceleration => bodies.acceleration(),
    }
}

async fn get_required<S: StateStore>(store: &S, key: &StoreKey) -> Result<Vec<u8>, NetError> {
    store
        .get(key)
        .await?
        .ok_or_else(|| NetError::MissingKey(key.to_string()))
}

/// Publish the three mutable columns of `bodies`.
///
/// # Errors
///
/// Returns [`NetError`] if encoding or a store write fails.
pub async fn publish_state<S: StateStore>(
    store: &S,
    run: RunId,
    bodies: &BodySet,
) -> Result<(), NetError> {
    for field in Field::ALL {
        let bytes = codec::encode(column(bodies, field))?;
        store.set(&StoreKey::State { run, field }, bytes).await?;
    }
    Ok(())
}

/// Publish the masses and the body count. Done once per run.
///
/// # Errors
///
/// Returns [`NetError`] if encoding or a store write fails.
pub async fn publish_constants<S: StateStore>(
    store: &S,
    run: RunId,
    bodies: &BodySet,
) -> Result<(), NetError> {
    store
        .set(&StoreKey::Mass { run }, codec::encode(bodies.mass())?)
        .await?;
    store
        .set(&StoreKey::Count { run }, codec::encode(&(bodies.count() as u64))?)
        .await
}

/// Fetch one published mutable column.
///
/// # Errors
///
/// Returns [`NetError::MissingKey`] if the column was never published.
pub async fn fetch_field<S: StateStore>(
    store: &S,
    run: RunId,
    field: Field,
) -> Result<Vec<DVec3>, NetError> {
    let bytes = get_required(store, &StoreKey::State { run, field }).await?;
    codec::decode(&bytes)
}

/// Fetch the published masses and count.
///
/// # Errors
///
/// Returns [`NetError::MissingKey`] if they were never published and
/// [`NetError::Shape`] if they disagree with each other.
pub async fn fetch_constants<S: StateStore>(store: &S, run: RunId) -> Result<Constants, NetError> {
    let count: u64 = codec::decode(&get_required(store, &StoreKey::Count { run }).await?)?;
    let mass: Vec<f64> = codec::decode(&get_required(store, &StoreKey::Mass { run }).await?)?;
    let count = count as usize;
    if mass.len() != count {
        return Err(CoreError::LengthMismatch {
            field: "mass",
            expected: count,
            actual: mass.len(),
        }
        .into());
    }
    Ok(Constants { count, mass })
}

/// Publish a chunk's partial result for `generation`.
///
/// # Errors
///
/// Returns [`NetError`] if encoding or a store write fails.
pub async fn publish_partial<S: StateStore>(
    store: &S,
    run: RunId,
    generation: u64,
    chunk: &ChunkState,
) -> Result<(), NetError> {
    let range = chunk.range;
    let columns = [
        (Field::Position, &chunk.position),
        (Field::Velocity, &chunk.velocity),
        (Field::Acceleration, &chunk.acceleration),
    ];
    for (field, values) in columns {
        let bytes = codec::encode(values)?;
        let key = StoreKey::Partial {
            run,
            generation,
            range,
            field,
        };
        store.set(&key, bytes).await?;
    }
    Ok(())
}

fn partial_keys(run: RunId, generation: u64, range: ChunkRange) -> [StoreKey; 3] {
    Field::ALL.map(|field| StoreKey::Partial {
        run,
        generation,
        range,
        field,
    })
}

/// Read a chunk's partial result for `generation` and delete its keys.
///
/// # Errors
///
/// Returns [`NetError::MissingKey`] if any field is absent and
/// [`NetError::Shape`] if a slice does not match the range length.
pub async fn take_partial<S: StateStore>(
    store: &S,
    run: RunId,
    generation: u64,
    range: ChunkRange,
) -> Result<ChunkState, NetError> {
    let keys = partial_keys(run, generation, range);
    let mut columns = Vec::with_capacity(keys.len());
    for key in &keys {
        let values: Vec<DVec3> = codec::decode(&get_required(store, key).await?)?;
        columns.push(values);
    }
    for key in &keys {
        store.delete(key).await?;
    }

    let acceleration = columns.pop().unwrap_or_default();
    let velocity = columns.pop().unwrap_or_default();
    let position = columns.pop().unwrap_or_default();
    let chunk = ChunkState {
        range,
        position,
        velocity,
        acceleration,
    };
    chunk.check_shape()?;
    Ok(chunk)
}

/// Delete whatever is stored for a chunk of `generation`. Absent keys are
/// fine; this sweeps up results written after the merge by a worker whose
/// lease had expired.
///
/// # Errors
///
/// Returns [`NetError`] if a store delete fails.
pub async fn discard_partial<S: StateStore>(
    store: &S,
    run: RunId,
    generation: u64,
    range: ChunkRange,
) -> Result<(), NetError> {
    for key in &partial_keys(run, generation, range) {
        store.delete(key).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use nbody_core::scenario::two_body_circular;

    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_publish_and_fetch_state() {
        let store = MemoryStore::new();
        let run = RunId::new();
        let bodies = two_body_circular(1.0e30, 1.0e24, 1.0e11);

        publish_state(&store, run, &bodies).await.unwrap();
        publish_constants(&store, run, &bodies).await.unwrap();

        let velocity = fetch_field(&store, run, Field::Velocity).await.unwrap();
        assert_eq!(velocity, bodies.velocity());
        let constants = fetch_constants(&store, run).await.unwrap();
        assert_eq!(constants.count, 2);
        assert_eq!(constants.mass, bodies.mass());
    }

    #[tokio::test]
    async fn test_missing_constants() {
        let store = MemoryStore::new();
        let err = fetch_constants(&store, RunId::new()).await.unwrap_err();
        assert!(matches!(err, NetError::MissingKey(key) if key.ends_with(".count")));
    }

    #[tokio::test]
    async fn test_partial_is_removed_after_take() {
        let store = MemoryStore::new();
        let run = RunId::new();
        let chunk = ChunkState {
            range: ChunkRange::new(4, 6),
            position: vec![DVec3::X, DVec3::Y],
            velocity: vec![DVec3::Z, DVec3::ONE],
            acceleration: vec![DVec3::NEG_X, DVec3::NEG_Y],
        };

        publish_partial(&store, run, 2, &chunk).await.unwrap();
        assert_eq!(store.len(), 3);

        let taken = take_partial(&store, run, 2, chunk.range).await.unwrap();
        assert_eq!(taken, chunk);
        assert!(store.is_empty());

        assert!(take_partial(&store, run, 2, chunk.range).await.is_err());
    }

    #[tokio::test]
    async fn test_late_partial_does_not_shadow_current_generation() {
        let store = MemoryStore::new();
        let run = RunId::new();
        let range = ChunkRange::new(0, 1);
        let current = ChunkState {
            range,
            position: vec![DVec3::X],
            velocity: vec![DVec3::Y],
            acceleration: vec![DVec3::Z],
        };
        let stale = ChunkState {
            range,
            position: vec![DVec3::NEG_X],
            velocity: vec![DVec3::NEG_Y],
            acceleration: vec![DVec3::NEG_Z],
        };

        publish_partial(&store, run, 5, &current).await.unwrap();
        // A worker still finishing generation 4 writes after the current one.
        publish_partial(&store, run, 4, &stale).await.unwrap();

        assert_eq!(take_partial(&store, run, 5, range).await.unwrap(), current);
        assert_eq!(store.len(), 3);
        discard_partial(&store, run, 4, range).await.unwrap();
        assert!(store.is_empty());
        // Sweeping keys that were never written is not an error.
        discard_partial(&store, run, 6, range).await.unwrap();
    }

    #[tokio::test]
    async fn test_take_partial_checks_shape() {
        let store = MemoryStore::new();
        let run = RunId::new();
        let chunk = ChunkState {
            range: ChunkRange::new(0, 3),
            position: vec![DVec3::X],
            velocity: vec![DVec3::X],
            acceleration: vec![DVec3::X],
        };
        publish_partial(&store, run, 0, &chunk).await.unwrap();
        let err = take_partial(&store, run, 0, chunk.range).await.unwrap_err();
        assert!(matches!(err, NetError::Shape(_)));
    }
}
