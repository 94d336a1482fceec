//! Per-pixel list heads and fragment counters.

use crate::fragment::RecordIndex;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};

/// One atomically swappable list head per pixel.
#[derive(Debug)]
pub struct HeadTable {
    heads: Box<[AtomicU32]>,
}

impl HeadTable {
    /// Create a table of `pixels` empty heads.
    pub fn new(pixels: usize) -> Self {
        Self {
            heads: (0..pixels)
                .map(|_| AtomicU32::new(RecordIndex::NONE.get()))
                .collect(),
        }
    }

    /// Number of pixels covered.
    #[inline]
    pub fn len(&self) -> usize {
        self.heads.len()
    }

    /// Whether the table covers no pixels.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    /// Publish `index` as the new head of `pixel` and return the old head.
    ///
    /// This is a single read-and-replace. Two producers racing on the same
    /// pixel always observe different previous heads, so neither record
    /// falls out of the chain. Returns `None` for an out-of-range pixel.
    #[inline]
    pub fn exchange(&self, pixel: usize, index: RecordIndex) -> Option<RecordIndex> {
        let slot = self.heads.get(pixel)?;
        Some(RecordIndex::new(slot.swap(index.get(), Ordering::AcqRel)))
    }

    /// Current head of `pixel`, NONE when empty or out of range.
    #[inline]
    pub fn head(&self, pixel: usize) -> RecordIndex {
        self.heads.get(pixel).map_or(RecordIndex::NONE, |slot| {
            RecordIndex::new(slot.load(Ordering::Acquire))
        })
    }

    /// Reset every head to NONE.
    pub fn clear(&mut self) {
        self.heads
            .par_iter_mut()
            .for_each(|slot| *slot.get_mut() = RecordIndex::NONE.get());
    }
}

/// Per-pixel count of successful insertions.
#[derive(Debug)]
pub struct PixelCounts {
    counts: Box<[AtomicU32]>,
}

impl PixelCounts {
    /// Create zeroed counters for `pixels` pixels.
    pub fn new(pixels: usize) -> Self {
        Self {
            counts: (0..pixels).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Number of pixels covered.
    #[inline]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether no pixels are covered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Record one more fragment on `pixel`.
    #[inline]
    pub fn increment(&self, pixel: usize) {
        if let Some(count) = self.counts.get(pixel) {
            count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Fragments inserted on `pixel` so far.
    #[inline]
    pub fn get(&self, pixel: usize) -> u32 {
        self.counts
            .get(pixel)
            .map_or(0, |count| count.load(Ordering::Relaxed))
    }

    /// Copy the counters out.
    pub fn snapshot(&self) -> Vec<u32> {
        self.counts
            .par_iter()
            .map(|count| count.load(Ordering::Relaxed))
            .collect()
    }

    /// Zero every counter.
    pub fn clear(&mut self) {
        self.counts
            .par_iter_mut()
            .for_each(|count| *count.get_mut() = 0);
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
    use std::thread;

    #[test]
    fn exchange_returns_previous_head() {
        let heads = HeadTable::new(2);
        assert_eq!(heads.head(0), RecordIndex::NONE);
        assert_eq!(
            heads.exchange(0, RecordIndex::new(4)),
            Some(RecordIndex::NONE)
        );
        assert_eq!(
            heads.exchange(0, RecordIndex::new(9)),
            Some(RecordIndex::new(4))
        );
        assert_eq!(heads.head(0), RecordIndex::new(9));
        assert_eq!(heads.head(1), RecordIndex::NONE);
        assert_eq!(heads.exchange(2, RecordIndex::new(1)), None);
        assert_eq!(heads.head(2), RecordIndex::NONE);
    }

    #[test]
    fn racing_exchanges_never_observe_the_same_previous_head() {
        let heads = HeadTable::new(1);
        let previous: Vec<u32> = thread::scope(|scope| {
            let workers: Vec<_> = (0..8_u32)
                .map(|worker| {
                    let heads = &heads;
                    scope.spawn(move || {
                        (0..500_u32)
                            .map(|step| {
                                heads
                                    .exchange(0, RecordIndex::new(worker * 500 + step))
                                    .map_or(u32::MAX, RecordIndex::get)
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|worker| worker.join().unwrap())
                .collect()
        });
        let mut sorted = previous.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), previous.len());
    }

    #[test]
    fn clear_resets_heads_and_counts() {
        let mut heads = HeadTable::new(3);
        let mut counts = PixelCounts::new(3);
        heads.exchange(1, RecordIndex::new(0));
        counts.increment(1);
        counts.increment(1);
        counts.increment(7);
        assert_eq!(counts.snapshot(), vec![0, 2, 0]);

        heads.clear();
        counts.clear();
        assert_eq!(heads.head(1), RecordIndex::NONE);
        assert_eq!(counts.get(1), 0);
    }
}
