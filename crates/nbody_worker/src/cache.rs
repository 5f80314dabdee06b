//! Worker-local copy of the published body state.
//!
//! Mutable columns are refetched only when a job carries a generation the
//! cache has not seen. Masses and the body count are fetched once per run.
//! A job from a different run drops everything first, so state from two runs
//! can never be mixed.

use nbody_core::{DVec3, StateView};
use nbody_net::state::{self, Constants};
use nbody_net::{Field, NetError, RunId, StateStore};
use tracing::debug;

/// Cached body state for one run.
#[derive(Debug, Default)]
pub struct StateCache {
    run: Option<RunId>,
    generation: Option<u64>,
    constants: Option<Constants>,
    position: Vec<DVec3>,
    velocity: Vec<DVec3>,
    acceleration: Vec<DVec3>,
    state_fetches: u64,
    constant_fetches: u64,
}

impl StateCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every cached column and the constants.
    pub fn clear(&mut self) {
        self.run = None;
        self.generation = None;
        self.constants = None;
        self.position.clear();
        self.velocity.clear();
        self.acceleration.clear();
    }

    /// Bring the cache up to `generation` of `run` and return a view of it.
    ///
    /// # Errors
    ///
    /// Returns [`NetError`] if a required key is missing or the fetched
    /// columns disagree in length.
    pub async fn refresh<S: StateStore>(
        &mut self,
        store: &S,
        run: RunId,
        generation: u64,
    ) -> Result<StateView<'_>, NetError> {
        if self.run != Some(run) {
            if let Some(previous) = self.run {
                debug!(%previous, %run, "new run, dropping cached state");
            }
            self.clear();
            self.run = Some(run);
        }

        if self.constants.is_none() {
            self.constants = Some(state::fetch_constants(store, run).await?);
            self.constant_fetches += 1;
        }

        if self.generation != Some(generation) {
            self.generation = None;
            self.position = state::fetch_field(store, run, Field::Position).await?;
            self.velocity = state::fetch_field(store, run, Field::Velocity).await?;
            self.acceleration = state::fetch_field(store, run, Field::Acceleration).await?;
            self.generation = Some(generation);
            self.state_fetches += 1;
            debug!(generation, bodies = self.position.len(), "state refetched");
        }

        let mass = self
            .constants
            .as_ref()
            .map_or(&[][..], |constants| constants.mass.as_slice());
        Ok(StateView::new(
            &self.position,
            &self.velocity,
            &self.acceleration,
            mass,
        )?)
    }

    /// Generation currently cached, if any.
    #[must_use]
    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    /// Number of times the mutable columns were fetched.
    #[must_use]
    pub fn state_fetches(&self) -> u64 {
        self.state_fetches
    }

    /// Number of times masses and count were fetched.
    #[must_use]
    pub fn constant_fetches(&self) -> u64 {
        self.constant_fetches
    }
}

#[cfg(test)]
mod tests {
    use nbody_core::scenario::two_body_circular;
    use nbody_net::{MemoryStore, StoreKey};

    use super::*;

    async fn published(run: RunId) -> MemoryStore {
        let store = MemoryStore::new();
        let bodies = two_body_circular(1.0e30, 1.0e24, 1.0e11);
        state::publish_state(&store, run, &bodies).await.unwrap();
        state::publish_constants(&store, run, &bodies).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_same_generation_does_not_refetch() {
        let run = RunId::new();
        let store = published(run).await;
        let position_key = StoreKey::State {
            run,
            field: Field::Position,
        };
        let mut cache = StateCache::new();

        for _ in 0..3 {
            let view = cache.refresh(&store, run, 0).await.unwrap();
            assert_eq!(view.count(), 2);
        }
        assert_eq!(store.read_count(&position_key), 1);
        assert_eq!(store.read_count(&StoreKey::Mass { run }), 1);
        assert_eq!(cache.state_fetches(), 1);
    }

    #[tokio::test]
    async fn test_generation_change_refetches() {
        let run = RunId::new();
        let store = published(run).await;
        let position_key = StoreKey::State {
            run,
            field: Field::Position,
        };
        let mut cache = StateCache::new();

        cache.refresh(&store, run, 0).await.unwrap();
        cache.refresh(&store, run, 1).await.unwrap();
        cache.refresh(&store, run, 1).await.unwrap();

        assert_eq!(store.read_count(&position_key), 2);
        assert_eq!(cache.generation(), Some(1));
        // Constants stay cached across generations.
        assert_eq!(cache.constant_fetches(), 1);
    }

    #[tokio::test]
    async fn test_run_change_drops_constants() {
        let first = RunId::new();
        let second = RunId::new();
        let store = published(first).await;
        let bodies = two_body_circular(2.0e30, 1.0e24, 1.0e11);
        state::publish_state(&store, second, &bodies).await.unwrap();
        state::publish_constants(&store, second, &bodies).await.unwrap();

        let mut cache = StateCache::new();
        cache.refresh(&store, first, 0).await.unwrap();
        let view = cache.refresh(&store, second, 0).await.unwrap();
        assert_eq!(view.mass()[0], 2.0e30);
        assert_eq!(cache.constant_fetches(), 2);
        assert_eq!(cache.state_fetches(), 2);
    }

    #[tokio::test]
    async fn test_clear_forces_refetch() {
        let run = RunId::new();
        let store = published(run).await;
        let mut cache = StateCache::new();

        cache.refresh(&store, run, 4).await.unwrap();
        cache.clear();
        assert_eq!(cache.generation(), None);
        cache.refresh(&store, run, 4).await.unwrap();
        assert_eq!(cache.state_fetches(), 2);
        assert_eq!(cache.constant_fetches(), 2);
    }

    #[tokio::test]
    async fn test_missing_state_is_an_error() {
        let mut cache = StateCache::new();
        let err = cache
            .refresh(&MemoryStore::new(), RunId::new(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::MissingKey(_)));
        assert_eq!(cache.generation(), None);
    }
}
