//! Initial conditions.
//!
//! Two builders: an analytic two-body circular orbit (used for sanity
//! checks) and a seeded random cluster orbiting a central heavy body.

use glam::DVec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaChaRng;

use crate::body::BodySet;
use crate::kernel::G;

/// A heavy body at rest at the origin and a light body on a circular orbit
/// around it, `separation` metres away along +x, moving along +y.
#[must_use]
pub fn two_body_circular(heavy_mass: f64, light_mass: f64, separation: f64) -> BodySet {
    let speed = (G * (heavy_mass + light_mass) / separation).sqrt();
    let mut bodies = BodySet::new();
    bodies.push(DVec3::ZERO, DVec3::ZERO, heavy_mass);
    bodies.push(
        DVec3::new(separation, 0.0, 0.0),
        DVec3::new(0.0, speed, 0.0),
        light_mass,
    );
    bodies
}

/// Parameters for [`random_cluster`]. Distances in metres, masses in kg.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterParams {
    /// Mass of the body placed at rest at the origin.
    pub central_mass: f64,
    /// Lower bound of the random radial scale.
    pub min_distance: f64,
    /// Upper bound of the random radial scale.
    pub max_distance: f64,
    /// Lower bound of orbiting body masses.
    pub min_mass: f64,
    /// Upper bound of orbiting body masses.
    pub max_mass: f64,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            central_mass: 2.0e30,
            min_distance: 5.0e10,
            max_distance: 5.0e11,
            min_mass: 1.0e22,
            max_mass: 1.0e26,
        }
    }
}

/// A central body plus `count` randomly placed bodies, each launched on a
/// roughly circular orbit around the rest of the system.
///
/// The same `seed` always produces the same cluster.
#[must_use]
pub fn random_cluster(count: usize, params: &ClusterParams, seed: u64) -> BodySet {
    let mut rng = ChaChaRng::seed_from_u64(seed);
    let mut bodies = BodySet::new();
    bodies.push(DVec3::ZERO, DVec3::ZERO, params.central_mass);

    let mut positions = Vec::with_capacity(count + 1);
    let mut masses = Vec::with_capacity(count + 1);
    positions.push(DVec3::ZERO);
    masses.push(params.central_mass);

    for _ in 0..count {
        // Reject directions too close to the origin before scaling.
        let direction = loop {
            let candidate = DVec3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            if candidate.length() >= 0.01 {
                break candidate;
            }
        };
        let scale = rng.gen_range(params.min_distance..=params.max_distance);
        positions.push(direction * scale);
        masses.push(rng.gen_range(params.min_mass..=params.max_mass));
    }

    let total_mass: f64 = masses.iter().sum();
    let weighted: DVec3 = positions
        .iter()
        .zip(&masses)
        .fold(DVec3::ZERO, |acc, (&x, &m)| acc + x * m);

    for i in 1..positions.len() {
        // Everything except body i, collapsed to a point mass at its centre.
        let point_mass = total_mass - masses[i];
        let centre = (weighted - positions[i] * masses[i]) / point_mass;
        let velocity = orbital_velocity(positions[i], masses[i], centre, point_mass);
        bodies.push(positions[i], velocity, masses[i]);
    }
    bodies
}

/// Initial velocity of a body of `mass` at `position` orbiting a point mass
/// `bulk_mass` located at `bulk_position`.
///
/// The speed is `((M - m) / M) * sqrt(G M / r)`, directed perpendicular to
/// both the radius vector and the z axis.
#[must_use]
pub fn orbital_velocity(position: DVec3, mass: f64, bulk_position: DVec3, bulk_mass: f64) -> DVec3 {
    let radius = position - bulk_position;
    let r = radius.length();
    let speed = ((bulk_mass - mass) / bulk_mass) * (G * bulk_mass / r).sqrt();

    let mut direction = radius.cross(DVec3::Z);
    if direction.length_squared() == 0.0 {
        // Radius along the z axis; any perpendicular will do.
        direction = radius.cross(DVec3::X);
    }
    direction.normalize() * speed
}
