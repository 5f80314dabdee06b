//! Structured state store keys.
//!
//! Keys are built from typed parts and rendered with `.` separators, so two
//! different ranges can never render to the same key (`1.20` vs `12.0`).
//! The rendered form is valid for NATS key/value buckets.
//!
//! ```text
//! <run>.position                 current positions
//! <run>.mass                     masses (published once per run)
//! <run>.count                    body count (published once per run)
//! <run>.chunk.<gen>.<start>.<end>.velocity   partial result of one chunk
//! ```
//!
//! Partial keys carry the generation that produced them. A worker that lost
//! its lease and finishes late writes under its own generation, never over
//! the slice the coordinator is about to merge.

use std::fmt;

use nbody_core::ChunkRange;

use crate::messages::RunId;

/// A mutable per-body column republished every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Position,
    Velocity,
    Acceleration,
}

impl Field {
    /// All mutable fields, in publishing order.
    pub const ALL: [Field; 3] = [Field::Position, Field::Velocity, Field::Acceleration];

    /// The key segment for this field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Field::Position => "position",
            Field::Velocity => "velocity",
            Field::Acceleration => "acceleration",
        }
    }
}

/// A key in the state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    /// Published full-set column of a mutable field.
    State { run: RunId, field: Field },
    /// Published masses.
    Mass { run: RunId },
    /// Published body count.
    Count { run: RunId },
    /// One field of one chunk's partial result for one generation.
    Partial {
        run: RunId,
        generation: u64,
        range: ChunkRange,
        field: Field,
    },
}

impl StoreKey {
    /// The run this key belongs to.
    #[must_use]
    pub fn run(&self) -> RunId {
        match *self {
            StoreKey::State { run, .. }
            | StoreKey::Mass { run }
            | StoreKey::Count { run }
            | StoreKey::Partial { run, .. } => run,
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKey::State { run, field } => write!(f, "{run}.{}", field.as_str()),
            StoreKey::Mass { run } => write!(f, "{run}.mass"),
            StoreKey::Count { run } => write!(f, "{run}.count"),
            StoreKey::Partial {
                run,
                generation,
                range,
                field,
            } => write!(
                f,
                "{run}.chunk.{generation}.{}.{}.{}",
                range.start,
                range.end,
                field.as_str()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_fixed_keys() {
        let run = RunId::new();
        assert_eq!(
            StoreKey::State {
                run,
                field: Field::Position
            }
            .to_string(),
            format!("{run}.position")
        );
        assert_eq!(StoreKey::Mass { run }.to_string(), format!("{run}.mass"));
        assert_eq!(StoreKey::Count { run }.to_string(), format!("{run}.count"));
    }

    #[test]
    fn test_prefix_ambiguous_ranges_do_not_collide() {
        let run = RunId::new();
        let a = StoreKey::Partial {
            run,
            generation: 0,
            range: ChunkRange::new(1, 20),
            field: Field::Position,
        };
        let b = StoreKey::Partial {
            run,
            generation: 0,
            range: ChunkRange::new(12, 0),
            field: Field::Position,
        };
        assert_ne!(a.to_string(), b.to_string());
        assert!(a.to_string().ends_with(".chunk.0.1.20.position"));
    }

    #[test]
    fn test_all_partial_keys_unique() {
        let run = RunId::new();
        let mut seen = HashSet::new();
        for start in 0..40 {
            for end in 0..40 {
                for field in Field::ALL {
                    let key = StoreKey::Partial {
                        run,
                        generation: 3,
                        range: ChunkRange::new(start, end),
                        field,
                    };
                    assert!(seen.insert(key.to_string()), "collision on {key}");
                }
            }
        }
    }

    #[test]
    fn test_generations_are_separated() {
        let run = RunId::new();
        let range = ChunkRange::new(0, 4);
        let keys: HashSet<String> = (0..50)
            .map(|generation| {
                StoreKey::Partial {
                    run,
                    generation,
                    range,
                    field: Field::Velocity,
                }
                .to_string()
            })
            .collect();
        assert_eq!(keys.len(), 50);
        // Generation and range segments never run together.
        let a = StoreKey::Partial {
            run,
            generation: 1,
            range: ChunkRange::new(10, 20),
            field: Field::Position,
        };
        let b = StoreKey::Partial {
            run,
            generation: 11,
            range: ChunkRange::new(0, 20),
            field: Field::Position,
        };
        assert_ne!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_runs_are_separated() {
        let a = StoreKey::Mass { run: RunId::new() };
        let b = StoreKey::Mass { run: RunId::new() };
        assert_ne!(a.to_string(), b.to_string());
        assert_ne!(a.run(), b.run());
    }

    #[test]
    fn test_keys_use_bucket_safe_characters() {
        let key = StoreKey::Partial {
            run: RunId::new(),
            generation: 12,
            range: ChunkRange::new(3, 9),
            field: Field::Acceleration,
        }
        .to_string();
        assert!(
            key.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        );
    }
}
