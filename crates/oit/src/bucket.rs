//! Per-pixel sorter selection from the observed fragment count.
//!
//! Most pixels carry only a handful of transparent layers, so the resolve
//! phase offers fixed-capacity sorters sized to each bucket and sends every
//! pixel to the smallest one that holds its count. Counts above the largest
//! bucket fall through to the unbounded sorter.

use serde::Serialize;

/// Upper bounds of the fixed-capacity buckets, smallest first.
pub const BUCKET_BOUNDARIES: [u32; 7] = [4, 8, 16, 32, 64, 128, 256];

/// Sort strategy for one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SortBucket {
    /// No fragments; the input color is kept.
    Empty,
    /// Up to 4 fragments.
    Fixed4,
    /// Up to 8 fragments.
    Fixed8,
    /// Up to 16 fragments.
    Fixed16,
    /// Up to 32 fragments.
    Fixed32,
    /// Up to 64 fragments.
    Fixed64,
    /// Up to 128 fragments.
    Fixed128,
    /// Up to 256 fragments.
    Fixed256,
    /// Any number of fragments.
    Unbounded,
}

impl SortBucket {
    /// Every bucket in dispatch order.
    pub const ALL: [Self; 9] = [
        Self::Empty,
        Self::Fixed4,
        Self::Fixed8,
        Self::Fixed16,
        Self::Fixed32,
        Self::Fixed64,
        Self::Fixed128,
        Self::Fixed256,
        Self::Unbounded,
    ];

    /// Fragments the bucket's sorter can hold, `None` for unbounded.
    pub const fn capacity(self) -> Option<u32> {
        match self {
            Self::Empty => Some(0),
            Self::Fixed4 => Some(4),
            Self::Fixed8 => Some(8),
            Self::Fixed16 => Some(16),
            Self::Fixed32 => Some(32),
            Self::Fixed64 => Some(64),
            Self::Fixed128 => Some(128),
            Self::Fixed256 => Some(256),
            Self::Unbounded => None,
        }
    }

    /// Position in [`SortBucket::ALL`].
    pub const fn ordinal(self) -> usize {
        self as usize
    }
}

/// Pick the cheapest sorter for a pixel with `count` fragments.
///
/// With `optimize_sort` off every non-empty pixel uses the unbounded sorter.
pub fn classify(count: u32, optimize_sort: bool) -> SortBucket {
    if count == 0 {
        return SortBucket::Empty;
    }
    if !optimize_sort {
        return SortBucket::Unbounded;
    }
    BUCKET_BOUNDARIES
        .iter()
        .position(|&bound| count <= bound)
        .map_or(SortBucket::Unbounded, |slot| SortBucket::ALL[slot + 1])
}

/// Number of pixels routed to each bucket in one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketHistogram {
    /// Pixel totals indexed by [`SortBucket::ordinal`].
    pub pixels: [u32; 9],
}

impl BucketHistogram {
    /// Count one pixel in `bucket`.
    #[inline]
    pub fn add(&mut self, bucket: SortBucket) {
        self.pixels[bucket.ordinal()] += 1;
    }

    /// Pixels routed to `bucket`.
    #[inline]
    pub fn get(&self, bucket: SortBucket) -> u32 {
        self.pixels[bucket.ordinal()]
    }

    /// Element-wise sum.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        for (total, extra) in self.pixels.iter_mut().zip(other.pixels) {
            *total += extra;
        }
        self
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::float_cmp,
    reason = "Tests assert on exact, known values"
)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_are_inclusive() {
        assert_eq!(classify(0, true), SortBucket::Empty);
        assert_eq!(classify(1, true), SortBucket::Fixed4);
        assert_eq!(classify(4, true), SortBucket::Fixed4);
        assert_eq!(classify(5, true), SortBucket::Fixed8);
        assert_eq!(classify(16, true), SortBucket::Fixed16);
        assert_eq!(classify(17, true), SortBucket::Fixed32);
        assert_eq!(classify(128, true), SortBucket::Fixed128);
        assert_eq!(classify(256, true), SortBucket::Fixed256);
        assert_eq!(classify(257, true), SortBucket::Unbounded);
        assert_eq!(classify(260, true), SortBucket::Unbounded);
    }

    #[test]
    fn general_path_when_not_optimizing() {
        assert_eq!(classify(0, false), SortBucket::Empty);
        assert_eq!(classify(3, false), SortBucket::Unbounded);
        assert_eq!(classify(300, false), SortBucket::Unbounded);
    }

    #[test]
    fn capacities_hold_their_counts() {
        for count in 0..=300 {
            let bucket = classify(count, true);
            if let Some(capacity) = bucket.capacity() {
                assert!(count <= capacity, "{count} does not fit {bucket:?}");
            }
        }
    }

    #[test]
    fn histogram_merge() {
        let mut first = BucketHistogram::default();
        first.add(SortBucket::Fixed4);
        let mut second = BucketHistogram::default();
        second.add(SortBucket::Fixed4);
        second.add(SortBucket::Unbounded);
        let merged = first.merge(second);
        assert_eq!(merged.get(SortBucket::Fixed4), 2);
        assert_eq!(merged.get(SortBucket::Unbounded), 1);
        assert_eq!(merged.get(SortBucket::Empty), 0);
    }
}
