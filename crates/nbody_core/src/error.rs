//! Core error types.

/// Errors raised by body-state bookkeeping and partitioning.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    /// `partition` was asked to split nothing, or into nothing.
    #[error("cannot partition {count} bodies into {chunks} chunks")]
    InvalidPartition {
        /// Requested body count.
        count: usize,
        /// Requested chunk count.
        chunks: usize,
    },

    /// The per-body arrays of a body set disagree in length.
    #[error("body arrays disagree in length: {field} has {actual}, expected {expected}")]
    LengthMismatch {
        /// Name of the offending array.
        field: &'static str,
        /// Length every array must have.
        expected: usize,
        /// Length found.
        actual: usize,
    },

    /// A chunk range does not fit inside the body set.
    #[error("chunk {start}..{end} is out of bounds for {count} bodies")]
    RangeOutOfBounds {
        /// Inclusive start of the range.
        start: usize,
        /// Exclusive end of the range.
        end: usize,
        /// Number of bodies in the set.
        count: usize,
    },
}
