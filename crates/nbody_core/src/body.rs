//! Body state storage.
//!
//! [`BodySet`] keeps the simulated bodies in structure-of-arrays form, the
//! same shape in which the fields are shipped to the state store: each field
//! travels as its own array so the immutable `mass` column is sent once per
//! run while the three mutable columns are republished every step.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::chunk::ChunkRange;
use crate::error::CoreError;

/// The full state of every body in a simulation.
///
/// All four arrays have the same length at all times; the constructors and
/// deserialisation reject mismatched input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBodySet")]
pub struct BodySet {
    position: Vec<DVec3>,
    velocity: Vec<DVec3>,
    acceleration: Vec<DVec3>,
    mass: Vec<f64>,
}

/// Unchecked wire form of [`BodySet`], validated on conversion.
#[derive(Deserialize)]
struct RawBodySet {
    position: Vec<DVec3>,
    velocity: Vec<DVec3>,
    acceleration: Vec<DVec3>,
    mass: Vec<f64>,
}

impl TryFrom<RawBodySet> for BodySet {
    type Error = CoreError;

    fn try_from(raw: RawBodySet) -> Result<Self, Self::Error> {
        Self::from_parts(raw.position, raw.velocity, raw.acceleration, raw.mass)
    }
}

impl BodySet {
    /// Create an empty body set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            position: Vec::new(),
            velocity: Vec::new(),
            acceleration: Vec::new(),
            mass: Vec::new(),
        }
    }

    /// Assemble a body set from its columns.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LengthMismatch`] if the columns differ in length.
    pub fn from_parts(
        position: Vec<DVec3>,
        velocity: Vec<DVec3>,
        acceleration: Vec<DVec3>,
        mass: Vec<f64>,
    ) -> Result<Self, CoreError> {
        check_len("velocity", position.len(), velocity.len())?;
        check_len("acceleration", position.len(), acceleration.len())?;
        check_len("mass", position.len(), mass.len())?;
        Ok(Self {
            position,
            velocity,
            acceleration,
            mass,
        })
    }

    /// Append a body with zero initial acceleration. Returns its index.
    pub fn push(&mut self, position: DVec3, velocity: DVec3, mass: f64) -> usize {
        self.position.push(position);
        self.velocity.push(velocity);
        self.acceleration.push(DVec3::ZERO);
        self.mass.push(mass);
        self.position.len() - 1
    }

    /// Number of bodies.
    #[must_use]
    pub fn count(&self) -> usize {
        self.position.len()
    }

    /// Returns `true` if the set holds no bodies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    /// Body positions in metres.
    #[must_use]
    pub fn position(&self) -> &[DVec3] {
        &self.position
    }

    /// Body velocities in metres per second.
    #[must_use]
    pub fn velocity(&self) -> &[DVec3] {
        &self.velocity
    }

    /// Accelerations computed during the previous step.
    #[must_use]
    pub fn acceleration(&self) -> &[DVec3] {
        &self.acceleration
    }

    /// Body masses in kilograms.
    #[must_use]
    pub fn mass(&self) -> &[f64] {
        &self.mass
    }

    /// Borrow the whole set as a [`StateView`].
    #[must_use]
    pub fn view(&self) -> StateView<'_> {
        StateView {
            position: &self.position,
            velocity: &self.velocity,
            acceleration: &self.acceleration,
            mass: &self.mass,
        }
    }

    /// Overwrite the bodies of `chunk.range` with the chunk's new state.
    ///
    /// # Errors
    ///
    /// Returns an error if the range does not fit this set or the chunk's
    /// slices do not match the range length.
    pub fn write_chunk(&mut self, chunk: &ChunkState) -> Result<(), CoreError> {
        chunk.range.check_within(self.count())?;
        chunk.check_shape()?;
        let span = chunk.range.as_range();
        self.position[span.clone()].copy_from_slice(&chunk.position);
        self.velocity[span.clone()].copy_from_slice(&chunk.velocity);
        self.acceleration[span].copy_from_slice(&chunk.acceleration);
        Ok(())
    }

    /// Returns `true` if every position, velocity and acceleration is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.position
            .iter()
            .chain(&self.velocity)
            .chain(&self.acceleration)
            .all(|v| v.is_finite())
    }
}

impl Default for BodySet {
    fn default() -> Self {
        Self::new()
    }
}

/// A borrowed, length-checked view of the four body columns.
///
/// Workers hold the columns they fetched from the store in separate buffers;
/// this view lets the kernel read them without assembling a [`BodySet`].
#[derive(Debug, Clone, Copy)]
pub struct StateView<'a> {
    position: &'a [DVec3],
    velocity: &'a [DVec3],
    acceleration: &'a [DVec3],
    mass: &'a [f64],
}

impl<'a> StateView<'a> {
    /// Build a view over separately stored columns.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LengthMismatch`] if the columns differ in length.
    pub fn new(
        position: &'a [DVec3],
        velocity: &'a [DVec3],
        acceleration: &'a [DVec3],
        mass: &'a [f64],
    ) -> Result<Self, CoreError> {
        check_len("velocity", position.len(), velocity.len())?;
        check_len("acceleration", position.len(), acceleration.len())?;
        check_len("mass", position.len(), mass.len())?;
        Ok(Self {
            position,
            velocity,
            acceleration,
            mass,
        })
    }

    /// Number of bodies in the view.
    #[must_use]
    pub fn count(&self) -> usize {
        self.position.len()
    }

    #[must_use]
    pub fn position(&self) -> &'a [DVec3] {
        self.position
    }

    #[must_use]
    pub fn velocity(&self) -> &'a [DVec3] {
        self.velocity
    }

    #[must_use]
    pub fn acceleration(&self) -> &'a [DVec3] {
        self.acceleration
    }

    #[must_use]
    pub fn mass(&self) -> &'a [f64] {
        self.mass
    }
}

/// New state for the bodies of one chunk, as produced by the kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkState {
    /// The bodies this state belongs to.
    pub range: ChunkRange,
    /// New positions, one per body in `range`.
    pub position: Vec<DVec3>,
    /// New velocities, one per body in `range`.
    pub velocity: Vec<DVec3>,
    /// Newly computed accelerations, one per body in `range`.
    pub acceleration: Vec<DVec3>,
}

impl ChunkState {
    /// Check that every slice holds exactly `range.len()` entries.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LengthMismatch`] naming the first bad slice.
    pub fn check_shape(&self) -> Result<(), CoreError> {
        let expected = self.range.len();
        check_len("position", expected, self.position.len())?;
        check_len("velocity", expected, self.velocity.len())?;
        check_len("acceleration", expected, self.acceleration.len())
    }
}

fn check_len(field: &'static str, expected: usize, actual: usize) -> Result<(), CoreError> {
    if expected == actual {
        Ok(())
    } else {
        Err(CoreError::LengthMismatch {
            field,
            expected,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_bodies() -> BodySet {
        let mut bodies = BodySet::new();
        bodies.push(DVec3::ZERO, DVec3::ZERO, 1.0);
        bodies.push(DVec3::X, DVec3::Y, 2.0);
        bodies.push(DVec3::Y, DVec3::Z, 3.0);
        bodies
    }

    #[test]
    fn test_push_keeps_columns_aligned() {
        let bodies = three_bodies();
        assert_eq!(bodies.count(), 3);
        assert_eq!(bodies.velocity().len(), 3);
        assert_eq!(bodies.acceleration(), &[DVec3::ZERO; 3]);
        assert_eq!(bodies.mass(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_from_parts_rejects_mismatch() {
        let err = BodySet::from_parts(
            vec![DVec3::ZERO; 2],
            vec![DVec3::ZERO; 2],
            vec![DVec3::ZERO; 2],
            vec![1.0],
        )
        .unwrap_err();
        assert_eq!(
            err,
            CoreError::LengthMismatch {
                field: "mass",
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_write_chunk() {
        let mut bodies = three_bodies();
        let chunk = ChunkState {
            range: ChunkRange::new(1, 3),
            position: vec![DVec3::splat(5.0), DVec3::splat(6.0)],
            velocity: vec![DVec3::ONE, DVec3::ONE],
            acceleration: vec![DVec3::NEG_X, DVec3::NEG_Y],
        };
        bodies.write_chunk(&chunk).unwrap();
        assert_eq!(bodies.position()[0], DVec3::ZERO);
        assert_eq!(bodies.position()[2], DVec3::splat(6.0));
        assert_eq!(bodies.acceleration()[1], DVec3::NEG_X);
    }

    #[test]
    fn test_write_chunk_rejects_bad_shape() {
        let mut bodies = three_bodies();
        let chunk = ChunkState {
            range: ChunkRange::new(0, 2),
            position: vec![DVec3::ONE],
            velocity: vec![DVec3::ONE; 2],
            acceleration: vec![DVec3::ONE; 2],
        };
        assert!(bodies.write_chunk(&chunk).is_err());

        let out_of_bounds = ChunkState {
            range: ChunkRange::new(2, 4),
            position: vec![DVec3::ONE; 2],
            velocity: vec![DVec3::ONE; 2],
            acceleration: vec![DVec3::ONE; 2],
        };
        assert!(matches!(
            bodies.write_chunk(&out_of_bounds),
            Err(CoreError::RangeOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_is_finite() {
        let mut bodies = three_bodies();
        assert!(bodies.is_finite());
        bodies.position[1] = DVec3::new(f64::NAN, 0.0, 0.0);
        assert!(!bodies.is_finite());
    }

    #[test]
    fn test_deserialize_validates_lengths() {
        let bodies = three_bodies();
        let bytes = rmp_serde::to_vec(&bodies).unwrap();
        let restored: BodySet = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(restored, bodies);

        let broken = RawBodySetOut {
            position: vec![DVec3::ZERO; 2],
            velocity: vec![DVec3::ZERO; 1],
            acceleration: vec![DVec3::ZERO; 2],
            mass: vec![1.0; 2],
        };
        let bytes = rmp_serde::to_vec(&broken).unwrap();
        assert!(rmp_serde::from_slice::<BodySet>(&bytes).is_err());
    }

    #[derive(Serialize)]
    struct RawBodySetOut {
        position: Vec<DVec3>,
        velocity: Vec<DVec3>,
        acceleration: Vec<DVec3>,
        mass: Vec<f64>,
    }
}
