//! Fragment submissions and the records stored for them in the arena.

use serde::{Deserialize, Serialize};

/// Index of a fragment record inside the arena.
///
/// [`RecordIndex::NONE`] terminates a per-pixel chain and marks an empty
/// head slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordIndex(u32);

impl RecordIndex {
    /// Sentinel for "no record". Head slots are cleared to this value.
    pub const NONE: Self = Self(u32::MAX);

    /// Wrap a raw index.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw index value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Whether this is the [`RecordIndex::NONE`] sentinel.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    /// `Some(self)` unless this is the sentinel.
    #[inline]
    pub const fn some(self) -> Option<Self> {
        if self.is_none() { None } else { Some(self) }
    }
}

/// Identifier of the material a transparent surface was shaded with.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct MaterialId(pub u32);

/// One candidate fragment produced by rasterizing a transparent surface.
///
/// `pixel` is the linear index `y * width + x` of the covered pixel. `depth`
/// grows away from the camera. `color` is straight (non-premultiplied) RGBA.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fragment {
    /// Linear pixel index.
    pub pixel: u32,
    /// View depth, smaller is nearer.
    pub depth: f32,
    /// Straight RGBA color.
    pub color: [f32; 4],
    /// Material that produced the fragment.
    pub material: MaterialId,
}

impl Fragment {
    /// Create a fragment with the default material.
    #[inline]
    pub const fn new(pixel: u32, depth: f32, color: [f32; 4]) -> Self {
        Self {
            pixel,
            depth,
            color,
            material: MaterialId(0),
        }
    }

    /// Tag the fragment with a material.
    #[inline]
    #[must_use]
    pub const fn with_material(mut self, material: MaterialId) -> Self {
        self.material = material;
        self
    }

    /// Whether depth and color are usable.
    ///
    /// Negative, NaN or infinite depths and non-finite color channels are a
    /// contract violation by the rasterizer and the fragment is dropped.
    pub fn is_well_formed(&self) -> bool {
        self.depth.is_finite()
            && self.depth >= 0.0
            && self.color.iter().all(|channel| channel.is_finite())
    }
}

/// Plain copy of a record read back from the arena.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FragmentRecord {
    /// View depth.
    pub depth: f32,
    /// Straight RGBA color.
    pub color: [f32; 4],
    /// Next record in the same pixel's chain.
    pub next: RecordIndex,
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
    fn none_sentinel_is_all_ones() {
        assert_eq!(RecordIndex::NONE.get(), u32::MAX);
        assert!(RecordIndex::NONE.is_none());
        assert_eq!(RecordIndex::NONE.some(), None);
        assert_eq!(RecordIndex::new(3).some(), Some(RecordIndex::new(3)));
    }

    #[test]
    fn malformed_fragments_are_detected() {
        let color = [1.0, 1.0, 1.0, 0.5];
        assert!(Fragment::new(0, 0.0, color).is_well_formed());
        assert!(Fragment::new(0, 12.5, color).is_well_formed());
        assert!(!Fragment::new(0, -0.5, color).is_well_formed());
        assert!(!Fragment::new(0, f32::NAN, color).is_well_formed());
        assert!(!Fragment::new(0, f32::INFINITY, color).is_well_formed());
        assert!(!Fragment::new(0, 1.0, [f32::NAN, 0.0, 0.0, 1.0]).is_well_formed());
    }

    #[test]
    fn material_tagging() {
        let fragment = Fragment::new(7, 1.0, [0.0; 4]).with_material(MaterialId(9));
        assert_eq!(fragment.material, MaterialId(9));
        assert_eq!(fragment.pixel, 7);
    }
}
