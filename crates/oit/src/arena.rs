//! Fixed-capacity fragment arena with a shared bump cursor.
//!
//! Records are handed out exactly once per frame by an atomic fetch-add on
//! the cursor. Each slot is written by the single producer that received
//! its index, then only read after the insertion barrier. There is no
//! per-record free; [`FragmentArena::reset`] recycles the whole pool.

use crate::fragment::{FragmentRecord, RecordIndex};
use core::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Bytes of backing storage per record.
pub const RECORD_BYTES: usize = size_of::<RecordSlot>();

/// Returned when the arena has no free record left this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow {
    /// Capacity of the exhausted arena.
    pub capacity: u32,
}

impl fmt::Display for Overflow {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "fragment arena exhausted ({} records)",
            self.capacity
        )
    }
}

impl std::error::Error for Overflow {}

/// Storage for one record. Color channels and depth are kept as `f32` bits.
#[derive(Debug)]
struct RecordSlot {
    depth: AtomicU32,
    color: [AtomicU32; 4],
    next: AtomicU32,
}

impl RecordSlot {
    fn empty() -> Self {
        Self {
            depth: AtomicU32::new(0),
            color: [
                AtomicU32::new(0),
                AtomicU32::new(0),
                AtomicU32::new(0),
                AtomicU32::new(0),
            ],
            next: AtomicU32::new(RecordIndex::NONE.get()),
        }
    }
}

/// Bump-allocated pool of fragment records shared by all producers.
///
/// The cursor is 64 bits wide so that failed requests past the capacity can
/// never wrap it back into the valid range, however many of them race.
#[derive(Debug)]
pub struct FragmentArena {
    records: Box<[RecordSlot]>,
    cursor: AtomicU64,
    overflowed: AtomicU32,
}

impl FragmentArena {
    /// Allocate an arena holding `capacity` records.
    pub fn new(capacity: u32) -> Self {
        let records = (0..capacity).map(|_| RecordSlot::empty()).collect();
        Self {
            records,
            cursor: AtomicU64::new(0),
            overflowed: AtomicU32::new(0),
        }
    }

    /// Number of records the arena can hold.
    #[inline]
    pub fn capacity(&self) -> u32 {
        // Built from a `u32` count, so the length always fits.
        self.records.len() as u32
    }

    /// Size of the backing storage in bytes.
    #[inline]
    pub fn size_in_bytes(&self) -> usize {
        self.records.len() * RECORD_BYTES
    }

    /// Claim a fresh record index.
    ///
    /// # Errors
    /// Returns [`Overflow`] once every record has been handed out this frame.
    /// The failure is also counted in [`FragmentArena::overflow_count`].
    #[inline]
    pub fn allocate(&self) -> Result<RecordIndex, Overflow> {
        let claimed = self.cursor.fetch_add(1, Ordering::Relaxed);
        match u32::try_from(claimed) {
            Ok(raw) if raw < self.capacity() => Ok(RecordIndex::new(raw)),
            _ => {
                self.overflowed.fetch_add(1, Ordering::Relaxed);
                Err(Overflow {
                    capacity: self.capacity(),
                })
            }
        }
    }

    /// Write depth and color of a freshly allocated record.
    ///
    /// `next` is reset to NONE and filled in later by [`FragmentArena::link`].
    /// Only the producer that received `index` from
    /// [`FragmentArena::allocate`] may call this.
    #[inline]
    pub fn write(&self, index: RecordIndex, depth: f32, color: [f32; 4]) {
        let Some(slot) = self.slot(index) else {
            return;
        };
        slot.depth.store(depth.to_bits(), Ordering::Relaxed);
        for (dst, channel) in slot.color.iter().zip(color) {
            dst.store(channel.to_bits(), Ordering::Relaxed);
        }
        slot.next.store(RecordIndex::NONE.get(), Ordering::Relaxed);
    }

    /// Point a record at its successor in the pixel chain.
    #[inline]
    pub fn link(&self, index: RecordIndex, next: RecordIndex) {
        if let Some(slot) = self.slot(index) {
            slot.next.store(next.get(), Ordering::Release);
        }
    }

    /// Read back a record. Out-of-range indices and NONE yield `None`.
    #[inline]
    pub fn read(&self, index: RecordIndex) -> Option<FragmentRecord> {
        let slot = self.slot(index)?;
        let color = [
            f32::from_bits(slot.color[0].load(Ordering::Relaxed)),
            f32::from_bits(slot.color[1].load(Ordering::Relaxed)),
            f32::from_bits(slot.color[2].load(Ordering::Relaxed)),
            f32::from_bits(slot.color[3].load(Ordering::Relaxed)),
        ];
        Some(FragmentRecord {
            depth: f32::from_bits(slot.depth.load(Ordering::Relaxed)),
            color,
            next: RecordIndex::new(slot.next.load(Ordering::Acquire)),
        })
    }

    /// Records handed out so far this frame, capped at the capacity.
    #[inline]
    pub fn allocated(&self) -> u32 {
        let claimed = self.cursor.load(Ordering::Relaxed);
        u32::try_from(claimed.min(u64::from(self.capacity()))).unwrap_or(u32::MAX)
    }

    /// Allocation requests that failed this frame.
    #[inline]
    pub fn overflow_count(&self) -> u32 {
        self.overflowed.load(Ordering::Relaxed)
    }

    /// Rewind the cursor and the overflow counter for a new frame.
    ///
    /// Record contents are left in place; every index is rewritten before it
    /// becomes reachable again.
    pub fn reset(&mut self) {
        *self.cursor.get_mut() = 0;
        *self.overflowed.get_mut() = 0;
    }

    /// Resize the pool to exactly `capacity` records.
    ///
    /// Storage is only reallocated when the count actually changes. Returns
    /// whether a reallocation happened.
    pub fn ensure_capacity(&mut self, capacity: u32) -> bool {
        if self.capacity() == capacity {
            self.reset();
            return false;
        }
        *self = Self::new(capacity);
        true
    }

    #[inline]
    fn slot(&self, index: RecordIndex) -> Option<&RecordSlot> {
        self.records.get(usize::try_from(index.get()).ok()?)
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
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::thread;

    #[test]
    fn allocates_sequential_indices_until_full() {
        let arena = FragmentArena::new(3);
        assert_eq!(arena.allocate(), Ok(RecordIndex::new(0)));
        assert_eq!(arena.allocate(), Ok(RecordIndex::new(1)));
        assert_eq!(arena.allocate(), Ok(RecordIndex::new(2)));
        assert_eq!(arena.allocate(), Err(Overflow { capacity: 3 }));
        assert_eq!(arena.allocate(), Err(Overflow { capacity: 3 }));
        assert_eq!(arena.allocated(), 3);
        assert_eq!(arena.overflow_count(), 2);
    }

    #[test]
    fn zero_capacity_always_overflows() {
        let arena = FragmentArena::new(0);
        assert!(arena.allocate().is_err());
        assert_eq!(arena.overflow_count(), 1);
        assert_eq!(arena.read(RecordIndex::new(0)), None);
    }

    #[test]
    fn write_then_read_round_trips_payload() {
        let arena = FragmentArena::new(2);
        let index = arena.allocate().unwrap();
        arena.write(index, 2.5, [0.1, 0.2, 0.3, 0.4]);
        let record = arena.read(index).unwrap();
        assert_eq!(record.depth, 2.5);
        assert_eq!(record.color, [0.1, 0.2, 0.3, 0.4]);
        assert_eq!(record.next, RecordIndex::NONE);

        arena.link(index, RecordIndex::new(1));
        assert_eq!(arena.read(index).unwrap().next, RecordIndex::new(1));
        assert_eq!(arena.read(RecordIndex::NONE), None);
    }

    #[test]
    fn concurrent_allocation_hands_out_each_index_once() {
        let arena = FragmentArena::new(1000);
        let seen = Mutex::new(HashSet::new());
        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let mut local = Vec::new();
                    for _ in 0..200 {
                        if let Ok(index) = arena.allocate() {
                            local.push(index);
                        }
                    }
                    let mut seen = seen.lock().unwrap();
                    for index in local {
                        assert!(seen.insert(index), "index {index:?} handed out twice");
                    }
                });
            }
        });
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 1000);
        assert!(seen.iter().all(|index| index.get() < 1000));
        assert_eq!(arena.overflow_count(), 600);
    }

    #[test]
    fn reset_and_resize() {
        let mut arena = FragmentArena::new(1);
        arena.allocate().unwrap();
        assert!(arena.allocate().is_err());

        assert!(!arena.ensure_capacity(1));
        assert_eq!(arena.overflow_count(), 0);
        assert_eq!(arena.allocated(), 0);

        assert!(arena.ensure_capacity(4));
        assert_eq!(arena.capacity(), 4);
        assert_eq!(arena.size_in_bytes(), 4 * RECORD_BYTES);
    }
}
