//! Segments: the fixed hash buckets of the key space.

use crate::partitioner::Partitioner;
use crate::token::Token;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of segments per cache.
pub const DEFAULT_NUM_SEGMENTS: u32 = 256;

/// One of the `N` hash buckets covering the key space.
///
/// Stateless; existence is implicit in `[0, N)`.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Segment(pub u32);

impl Segment {
    /// Segment of `key`: the partitioner's token modulo `num_segments`.
    pub fn for_key(partitioner: &dyn Partitioner, key: &[u8], num_segments: u32) -> Segment {
        debug_assert!(num_segments > 0);
        Segment((partitioner.partition(key).0 % u64::from(num_segments)) as u32)
    }

    /// Position of this segment on the ring.
    ///
    /// Segments sit evenly spaced: segment `s` at `s * (2^64 / N)`.
    pub fn ring_position(self, num_segments: u32) -> Token {
        let width = (u128::from(u64::MAX) + 1) / u128::from(num_segments.max(1));
        Token((u128::from(self.0) * width) as u64)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// All segments of a cache with `num_segments` buckets.
    pub fn all(num_segments: u32) -> impl Iterator<Item = Segment> {
        (0..num_segments).map(Segment)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitioner::Xxh3Partitioner;

    #[test]
    fn test_segment_for_key_in_range() {
        for key in [&b"a"[..], b"b", b"some longer key", b""] {
            let segment = Segment::for_key(&Xxh3Partitioner, key, 16);
            assert!(segment.0 < 16);
            assert_eq!(segment, Segment::for_key(&Xxh3Partitioner, key, 16));
        }
    }

    #[test]
    fn test_ring_positions_evenly_spaced() {
        assert_eq!(Segment(0).ring_position(4), Token(0));
        assert_eq!(Segment(1).ring_position(4), Token(1 << 62));
        assert_eq!(Segment(3).ring_position(4), Token(3 << 62));
        assert_eq!(Segment(0).ring_position(1), Token(0));
    }
}
