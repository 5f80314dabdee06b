//! Chunk ranges and the partitioner.
//!
//! A [`ChunkRange`] is a half-open slice of body indices assigned to one job.
//! The coordinator and every worker must agree on ranges because store keys
//! are derived from them, so [`partition`] is a pure, deterministic function.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A half-open range of body indices, `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkRange {
    /// First index in the chunk (inclusive).
    pub start: usize,
    /// One past the last index in the chunk (exclusive).
    pub end: usize,
}

impl ChunkRange {
    /// Create a range covering `start..end`.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// The single range covering a whole body set of `count` bodies.
    #[must_use]
    pub const fn full(count: usize) -> Self {
        Self { start: 0, end: count }
    }

    /// Number of bodies in the range.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Returns `true` if the range contains no bodies.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Returns the range as a `std::ops::Range` for slicing.
    #[must_use]
    pub const fn as_range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }

    /// Check that the range lies inside a set of `count` bodies.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RangeOutOfBounds`] if it does not.
    pub fn check_within(&self, count: usize) -> Result<(), CoreError> {
        if self.start > self.end || self.end > count {
            return Err(CoreError::RangeOutOfBounds {
                start: self.start,
                end: self.end,
                count,
            });
        }
        Ok(())
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Split `count` bodies into at most `chunks` contiguous ranges.
///
/// Every range has `ceil(count / chunks)` bodies except the last, which is
/// clipped to end exactly at `count`. Fewer than `chunks` ranges come back
/// when `count` is small relative to `chunks`.
///
/// ```
/// use nbody_core::{ChunkRange, partition};
///
/// let ranges = partition(100, 3).unwrap();
/// assert_eq!(
///     ranges,
///     vec![ChunkRange::new(0, 34), ChunkRange::new(34, 68), ChunkRange::new(68, 100)]
/// );
/// ```
///
/// # Errors
///
/// Returns [`CoreError::InvalidPartition`] if `count` or `chunks` is zero.
pub fn partition(count: usize, chunks: usize) -> Result<Vec<ChunkRange>, CoreError> {
    if count == 0 || chunks == 0 {
        return Err(CoreError::InvalidPartition { count, chunks });
    }

    let chunk_size = count.div_ceil(chunks);
    let ranges = (0..count)
        .step_by(chunk_size)
        .map(|start| ChunkRange::new(start, (start + chunk_size).min(count)))
        .collect();
    Ok(ranges)
}
