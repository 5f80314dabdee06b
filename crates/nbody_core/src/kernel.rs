//! Direct-summation gravity kernel (O(N²) per step).
//!
//! The same [`Gravity::integrate`] call runs inside every worker for its
//! chunk and in the coordinator's single-process fallback for the whole set,
//! so distributed and local runs produce bit-identical results.

use glam::DVec3;

use crate::body::{BodySet, ChunkState, StateView};
use crate::chunk::ChunkRange;
use crate::error::CoreError;

/// Newtonian gravitational constant in m³ kg⁻¹ s⁻².
pub const G: f64 = 6.67408e-11;

/// Default floor on the separation used in the force law, in metres.
pub const DEFAULT_MIN_SEPARATION: f64 = 1.0;

/// Parameters of the gravity kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gravity {
    /// Gravitational constant.
    pub g: f64,
    /// Separations below this value are clamped to it, so coincident bodies
    /// produce a finite force instead of dividing by zero.
    pub min_separation: f64,
}

impl Gravity {
    /// Kernel with the physical `G` and the default separation floor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            g: G,
            min_separation: DEFAULT_MIN_SEPARATION,
        }
    }

    /// Override the minimum separation floor.
    #[must_use]
    pub fn with_min_separation(mut self, min_separation: f64) -> Self {
        self.min_separation = min_separation;
        self
    }

    /// Acceleration of body `i` from every other body of `state`.
    #[must_use]
    pub fn acceleration(&self, i: usize, state: &StateView<'_>) -> DVec3 {
        let position = state.position();
        let mass = state.mass();
        let xi = position[i];
        let mi = mass[i];

        let mut force = DVec3::ZERO;
        for (j, (&xj, &mj)) in position.iter().zip(mass).enumerate() {
            if j == i {
                continue;
            }
            let dr = xj - xi;
            let dist = dr.length().max(self.min_separation);
            force += dr * (self.g * (mi * mj) / (dist * dist * dist));
        }
        force / mi
    }

    /// Advance the bodies in `range` by one step of `delta_t` seconds.
    ///
    /// Forces are summed over the whole of `state`, not just `range`. The
    /// position update uses the acceleration stored from the previous step;
    /// the velocity update uses the acceleration computed here.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RangeOutOfBounds`] if `range` does not fit.
    pub fn integrate(
        &self,
        state: &StateView<'_>,
        range: ChunkRange,
        delta_t: f64,
    ) -> Result<ChunkState, CoreError> {
        range.check_within(state.count())?;
        let half_dt_sq = delta_t * delta_t / 2.0;

        let mut chunk = ChunkState {
            range,
            position: Vec::with_capacity(range.len()),
            velocity: Vec::with_capacity(range.len()),
            acceleration: Vec::with_capacity(range.len()),
        };
        for i in range.as_range() {
            let accel = self.acceleration(i, state);
            let old_vel = state.velocity()[i];
            chunk.position.push(
                state.position()[i] + old_vel * delta_t + state.acceleration()[i] * half_dt_sq,
            );
            chunk.velocity.push(old_vel + accel * delta_t);
            chunk.acceleration.push(accel);
        }
        Ok(chunk)
    }

    /// Single-process step over the whole body set.
    ///
    /// # Errors
    ///
    /// Propagates [`CoreError`] from [`Gravity::integrate`]; cannot fail for
    /// a well-formed [`BodySet`].
    pub fn step(&self, bodies: &BodySet, delta_t: f64) -> Result<BodySet, CoreError> {
        let chunk = self.integrate(&bodies.view(), ChunkRange::full(bodies.count()), delta_t)?;
        let mut next = bodies.clone();
        next.write_chunk(&chunk)?;
        Ok(next)
    }
}

impl Default for Gravity {
    fn default() -> Self {
        Self::new()
    }
}

/// Total linear momentum, `Σ mᵢ vᵢ`.
#[must_use]
pub fn momentum(bodies: &BodySet) -> DVec3 {
    bodies
        .velocity()
        .iter()
        .zip(bodies.mass())
        .fold(DVec3::ZERO, |acc, (&v, &m)| acc + v * m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::partition;
    use crate::scenario::{ClusterParams, random_cluster, two_body_circular};

    #[test]
    fn test_two_bodies_attract() {
        let mut bodies = BodySet::new();
        bodies.push(DVec3::ZERO, DVec3::ZERO, 1.0e20);
        bodies.push(DVec3::new(1.0e6, 0.0, 0.0), DVec3::ZERO, 1.0e20);

        let next = Gravity::new().step(&bodies, 1.0).unwrap();
        assert!(next.acceleration()[0].x > 0.0);
        assert!(next.acceleration()[1].x < 0.0);
        // a = G m / r²
        let expected = G * 1.0e20 / 1.0e12;
        assert!((next.acceleration()[0].x - expected).abs() / expected < 1e-12);
    }

    #[test]
    fn test_position_uses_previous_acceleration() {
        let bodies = BodySet::from_parts(
            vec![DVec3::ZERO],
            vec![DVec3::X],
            vec![DVec3::new(0.0, 2.0, 0.0)],
            vec![1.0],
        )
        .unwrap();

        let next = Gravity::new().step(&bodies, 2.0).unwrap();
        // x = x0 + dt v + dt²/2 a_prev = (2, 4, 0); a lone body feels nothing.
        assert_eq!(next.position()[0], DVec3::new(2.0, 4.0, 0.0));
        assert_eq!(next.velocity()[0], DVec3::X);
        assert_eq!(next.acceleration()[0], DVec3::ZERO);
    }

    #[test]
    fn test_coincident_bodies_stay_finite() {
        let mut bodies = BodySet::new();
        bodies.push(DVec3::ONE, DVec3::ZERO, 5.0e24);
        bodies.push(DVec3::ONE, DVec3::ZERO, 5.0e24);

        let next = Gravity::new().step(&bodies, 60.0).unwrap();
        assert!(next.is_finite());
    }

    #[test]
    fn test_momentum_conserved_across_step() {
        let bodies = random_cluster(40, &ClusterParams::default(), 7);
        let before = momentum(&bodies);
        let next = Gravity::new().step(&bodies, 3600.0).unwrap();
        let after = momentum(&next);

        let scale: f64 = bodies
            .velocity()
            .iter()
            .zip(bodies.mass())
            .map(|(v, m)| v.length() * m)
            .sum();
        assert!(
            (after - before).length() <= scale * 1e-12,
            "momentum drifted from {before} to {after}"
        );
    }

    #[test]
    fn test_chunked_integration_matches_full_step() {
        let bodies = random_cluster(23, &ClusterParams::default(), 11);
        let gravity = Gravity::new();
        let full = gravity.step(&bodies, 600.0).unwrap();

        for chunks in 1..=bodies.count() {
            let mut merged = bodies.clone();
            for range in partition(bodies.count(), chunks).unwrap() {
                let chunk = gravity.integrate(&bodies.view(), range, 600.0).unwrap();
                merged.write_chunk(&chunk).unwrap();
            }
            assert_eq!(merged, full, "chunks = {chunks}");
        }
    }

    #[test]
    fn test_integrate_rejects_out_of_bounds_range() {
        let bodies = random_cluster(3, &ClusterParams::default(), 1);
        let result = Gravity::new().integrate(&bodies.view(), ChunkRange::new(2, 9), 1.0);
        assert!(result.is_err());
    }

    #[test]
    fn test_circular_orbit_stays_bounded() {
        let separation = 1.0e11;
        let mut bodies = two_body_circular(1.0e30, 1.0e24, separation);
        let gravity = Gravity::new();

        for _ in 0..1000 {
            bodies = gravity.step(&bodies, 3600.0).unwrap();
        }

        let distance = (bodies.position()[1] - bodies.position()[0]).length();
        let drift = (distance - separation).abs() / separation;
        assert!(drift < 0.01, "separation drifted by {:.4}%", drift * 100.0);
    }
}
