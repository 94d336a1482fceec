//! Per-frame diagnostics for tuning the arena size.
//!
//! Nothing here feeds back into rendering; the numbers exist for logs,
//! debug overlays and capacity tuning.

use crate::frame::{FrameArena, FrameDims};
use crate::insert::InsertionReport;
use crate::resolve::ResolveReport;
use anyhow::{Context as _, Result};
use image::{GrayImage, Luma};
use serde::Serialize;

/// Summary of one executed frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    /// Frame size.
    pub dims: FrameDims,
    /// Records available this frame.
    pub arena_capacity: u32,
    /// Backing storage of the arena.
    pub arena_bytes: usize,
    /// Insertion tallies.
    pub insertion: InsertionReport,
    /// Resolve tallies.
    pub resolve: ResolveReport,
}

impl FrameStats {
    /// Fragments lost to arena exhaustion.
    #[inline]
    pub const fn dropped_fragments(&self) -> u32 {
        self.insertion.overflowed
    }

    /// Arena capacity that would have held every accepted fragment.
    pub const fn required_capacity(&self) -> u32 {
        self.insertion
            .inserted
            .saturating_add(self.insertion.overflowed)
    }

    /// Render as pretty JSON for tuning dumps.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serializing frame stats")
    }
}

/// Snapshot of the per-pixel fragment counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentCountTexture {
    dims: FrameDims,
    counts: Vec<u32>,
}

impl FragmentCountTexture {
    /// Copy the counters out of a frame.
    pub fn capture(frame: &FrameArena) -> Self {
        Self {
            dims: frame.dims(),
            counts: frame.counts().snapshot(),
        }
    }

    /// Texture dimensions.
    #[inline]
    pub const fn dims(&self) -> FrameDims {
        self.dims
    }

    /// Count at `(x, y)`.
    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        let pixel = usize::try_from(self.dims.index(x, y)?).ok()?;
        self.counts.get(pixel).copied()
    }

    /// All counts in row-major order.
    #[inline]
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// Largest count in the texture.
    pub fn max(&self) -> u32 {
        self.counts.iter().copied().max().unwrap_or(0)
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&count| u64::from(count)).sum()
    }

    /// Raw `u32` bytes, matching an `R32Uint` texture.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.counts)
    }

    /// Grayscale heatmap, white at the busiest pixel.
    pub fn heatmap(&self) -> GrayImage {
        let max = self.max().max(1) as f32;
        GrayImage::from_fn(self.dims.width, self.dims.height, |x, y| {
            let count = self.get(x, y).unwrap_or(0) as f32;
            Luma([(count / max * 255.0).round() as u8])
        })
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
    fn count_texture_and_heatmap() {
        let frame = FrameArena::new(FrameDims::new(2, 2), 16);
        for _ in 0..4 {
            frame.push(3, 1.0, [1.0; 4]).unwrap();
        }
        frame.push(0, 1.0, [1.0; 4]).unwrap();

        let texture = FragmentCountTexture::capture(&frame);
        assert_eq!(texture.get(1, 1), Some(4));
        assert_eq!(texture.get(0, 0), Some(1));
        assert_eq!(texture.get(2, 0), None);
        assert_eq!(texture.max(), 4);
        assert_eq!(texture.total(), 5);
        assert_eq!(texture.as_bytes().len(), 16);

        let heatmap = texture.heatmap();
        assert_eq!(heatmap.get_pixel(1, 1).0, [255]);
        assert_eq!(heatmap.get_pixel(1, 0).0, [0]);
        assert_eq!(heatmap.get_pixel(0, 0).0, [64]);
    }

    #[test]
    fn stats_json_and_required_capacity() {
        let stats = FrameStats {
            insertion: InsertionReport {
                submitted: 12,
                inserted: 8,
                overflowed: 3,
                occluded: 1,
                ..InsertionReport::default()
            },
            ..FrameStats::default()
        };
        assert_eq!(stats.dropped_fragments(), 3);
        assert_eq!(stats.required_capacity(), 11);
        let json = stats.to_json().unwrap();
        assert!(json.contains("\"overflowed\": 3"));
    }
}
