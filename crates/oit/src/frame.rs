//! Per-frame state shared by the insertion and resolve phases.
//!
//! A [`FrameArena`] bundles the fragment arena, the head table and the
//! per-pixel counters. Both phases borrow it shared; resetting it for the
//! next frame needs `&mut`, so a reset can never overlap either phase.

use crate::arena::{FragmentArena, Overflow};
use crate::fragment::{FragmentRecord, RecordIndex};
use crate::head_table::{HeadTable, PixelCounts};
use log::trace;
use serde::{Deserialize, Serialize};

/// Frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FrameDims {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl FrameDims {
    /// Create frame dimensions.
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total number of pixels.
    #[inline]
    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Linear index of `(x, y)`, `None` when outside the frame.
    #[inline]
    pub const fn index(self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        // Frames past `u32::MAX` pixels have no `u32` index for their tail.
        match y.checked_mul(self.width) {
            Some(row) => row.checked_add(x),
            None => None,
        }
    }
}

/// Explicit per-frame state for the linked-list transparency passes.
#[derive(Debug)]
pub struct FrameArena {
    dims: FrameDims,
    arena: FragmentArena,
    heads: HeadTable,
    counts: PixelCounts,
}

impl FrameArena {
    /// Allocate state for `dims` with room for `capacity` fragments.
    pub fn new(dims: FrameDims, capacity: u32) -> Self {
        Self {
            dims,
            arena: FragmentArena::new(capacity),
            heads: HeadTable::new(dims.pixel_count()),
            counts: PixelCounts::new(dims.pixel_count()),
        }
    }

    /// Clear everything for a new frame.
    ///
    /// Head and count tables are reallocated only when `dims` changed, the
    /// arena only when `capacity` changed.
    pub fn begin_frame(&mut self, dims: FrameDims, capacity: u32) {
        if dims == self.dims {
            self.heads.clear();
            self.counts.clear();
        } else {
            trace!(
                target: "oit",
                "resizing head table {}x{} -> {}x{}",
                self.dims.width,
                self.dims.height,
                dims.width,
                dims.height
            );
            self.dims = dims;
            self.heads = HeadTable::new(dims.pixel_count());
            self.counts = PixelCounts::new(dims.pixel_count());
        }

        if self.arena.ensure_capacity(capacity) {
            trace!(
                target: "oit",
                "reallocated fragment arena: {capacity} records, {} MiB",
                self.arena.size_in_bytes() / (1024 * 1024)
            );
        }
    }

    /// Frame dimensions.
    #[inline]
    pub const fn dims(&self) -> FrameDims {
        self.dims
    }

    /// The fragment arena.
    #[inline]
    pub const fn arena(&self) -> &FragmentArena {
        &self.arena
    }

    /// The head table.
    #[inline]
    pub const fn heads(&self) -> &HeadTable {
        &self.heads
    }

    /// The per-pixel counters.
    #[inline]
    pub const fn counts(&self) -> &PixelCounts {
        &self.counts
    }

    /// Fragments inserted on `pixel` this frame.
    #[inline]
    pub fn fragment_count(&self, pixel: usize) -> u32 {
        self.counts.get(pixel)
    }

    /// Allocate, write and link one fragment into `pixel`'s chain.
    ///
    /// The caller has already validated the fragment and checked that
    /// `pixel` is inside the frame.
    ///
    /// # Errors
    /// Returns [`Overflow`] when the arena is exhausted; nothing is linked.
    pub(crate) fn push(
        &self,
        pixel: usize,
        depth: f32,
        color: [f32; 4],
    ) -> Result<RecordIndex, Overflow> {
        let index = self.arena.allocate()?;
        self.arena.write(index, depth, color);
        let previous = self.heads.exchange(pixel, index).unwrap_or(RecordIndex::NONE);
        self.arena.link(index, previous);
        self.counts.increment(pixel);
        Ok(index)
    }

    /// Walk `pixel`'s chain from its head.
    ///
    /// The walk stops at NONE, at an index outside the arena, or after
    /// `capacity` steps, whichever comes first.
    pub fn chain(&self, pixel: usize) -> ChainIter<'_> {
        ChainIter {
            arena: &self.arena,
            current: self.heads.head(pixel),
            remaining: self.arena.capacity(),
        }
    }
}

/// Iterator over the records of one pixel, most recently inserted first.
#[derive(Debug)]
pub struct ChainIter<'frame> {
    arena: &'frame FragmentArena,
    current: RecordIndex,
    remaining: u32,
}

impl Iterator for ChainIter<'_> {
    type Item = FragmentRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let record = self.arena.read(self.current.some()?)?;
        self.remaining -= 1;
        self.current = record.next;
        Some(record)
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

    const RED: [f32; 4] = [1.0, 0.0, 0.0, 0.5];

    #[test]
    fn dims_index() {
        let dims = FrameDims::new(4, 3);
        assert_eq!(dims.pixel_count(), 12);
        assert_eq!(dims.index(0, 0), Some(0));
        assert_eq!(dims.index(3, 2), Some(11));
        assert_eq!(dims.index(4, 0), None);
        assert_eq!(dims.index(0, 3), None);
    }

    #[test]
    fn dims_index_past_u32_range_is_none() {
        let wide = FrameDims::new(u32::MAX, 3);
        assert_eq!(wide.index(5, 0), Some(5));
        assert_eq!(wide.index(5, 2), None);
        let tall = FrameDims::new(0x1_0000, 0x1_0001);
        assert_eq!(tall.index(0xFFFF, 0xFFFF), Some(u32::MAX));
        assert_eq!(tall.index(0, 0x1_0000), None);
    }

    #[test]
    fn push_prepends_to_chain() {
        let frame = FrameArena::new(FrameDims::new(2, 1), 8);
        frame.push(1, 1.0, RED).unwrap();
        frame.push(1, 2.0, RED).unwrap();
        frame.push(1, 3.0, RED).unwrap();

        let depths: Vec<f32> = frame.chain(1).map(|record| record.depth).collect();
        assert_eq!(depths, vec![3.0, 2.0, 1.0]);
        assert_eq!(frame.fragment_count(1), 3);
        assert_eq!(frame.chain(0).count(), 0);
    }

    #[test]
    fn overflowing_push_links_nothing() {
        let frame = FrameArena::new(FrameDims::new(1, 1), 1);
        assert!(frame.push(0, 1.0, RED).is_ok());
        assert!(frame.push(0, 2.0, RED).is_err());
        assert_eq!(frame.chain(0).count(), 1);
        assert_eq!(frame.fragment_count(0), 1);
        assert_eq!(frame.arena().overflow_count(), 1);
    }

    #[test]
    fn begin_frame_discards_previous_lists() {
        let mut frame = FrameArena::new(FrameDims::new(2, 2), 4);
        frame.push(3, 1.0, RED).unwrap();
        frame.begin_frame(FrameDims::new(2, 2), 4);
        assert_eq!(frame.chain(3).count(), 0);
        assert_eq!(frame.fragment_count(3), 0);
        assert_eq!(frame.arena().allocated(), 0);

        frame.begin_frame(FrameDims::new(8, 8), 16);
        assert_eq!(frame.heads().len(), 64);
        assert_eq!(frame.arena().capacity(), 16);
    }

    #[test]
    fn chain_walk_is_bounded_by_capacity() {
        // Forge a cycle through the public link API to check the walk bound.
        let frame = FrameArena::new(FrameDims::new(1, 1), 2);
        let first = frame.push(0, 1.0, RED).unwrap();
        let second = frame.push(0, 2.0, RED).unwrap();
        frame.arena().link(first, second);
        assert_eq!(frame.chain(0).count(), 2);
    }
}
