//! Opaque-pass inputs and the color target transparent layers blend into.

use crate::frame::FrameDims;

/// Opaque black, the clear color of the transparency pass output.
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Depth of the nearest opaque surface per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthBuffer {
    dims: FrameDims,
    depths: Vec<f32>,
}

impl DepthBuffer {
    /// A buffer with no opaque occluders.
    pub fn cleared(dims: FrameDims) -> Self {
        Self {
            dims,
            depths: vec![f32::INFINITY; dims.pixel_count()],
        }
    }

    /// Wrap existing depths. Returns `None` if the length does not match.
    pub fn from_depths(dims: FrameDims, depths: Vec<f32>) -> Option<Self> {
        (depths.len() == dims.pixel_count()).then_some(Self { dims, depths })
    }

    /// Buffer dimensions.
    #[inline]
    pub const fn dims(&self) -> FrameDims {
        self.dims
    }

    /// Opaque depth at `pixel`; infinitely far when out of range.
    #[inline]
    pub fn depth(&self, pixel: usize) -> f32 {
        self.depths.get(pixel).copied().unwrap_or(f32::INFINITY)
    }

    /// Overwrite the opaque depth at `pixel`.
    pub fn set(&mut self, pixel: usize, depth: f32) {
        if let Some(slot) = self.depths.get_mut(pixel) {
            *slot = depth;
        }
    }
}

/// RGBA color target, one value per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorTarget {
    dims: FrameDims,
    pixels: Vec<[f32; 4]>,
}

impl ColorTarget {
    /// A target cleared to [`CLEAR_COLOR`].
    pub fn cleared(dims: FrameDims) -> Self {
        Self::filled(dims, CLEAR_COLOR)
    }

    /// A target filled with `color`.
    pub fn filled(dims: FrameDims, color: [f32; 4]) -> Self {
        Self {
            dims,
            pixels: vec![color; dims.pixel_count()],
        }
    }

    /// Target dimensions.
    #[inline]
    pub const fn dims(&self) -> FrameDims {
        self.dims
    }

    /// Color at `pixel`.
    #[inline]
    pub fn get(&self, pixel: usize) -> Option<[f32; 4]> {
        self.pixels.get(pixel).copied()
    }

    /// Overwrite the color at `pixel`.
    pub fn set(&mut self, pixel: usize, color: [f32; 4]) {
        if let Some(slot) = self.pixels.get_mut(pixel) {
            *slot = color;
        }
    }

    /// All pixels in row-major order.
    #[inline]
    pub fn pixels(&self) -> &[[f32; 4]] {
        &self.pixels
    }

    /// All pixels, mutable.
    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [[f32; 4]] {
        &mut self.pixels
    }

    /// Raw `f32` RGBA bytes, ready for a texture upload.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
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
    fn cleared_buffers() {
        let dims = FrameDims::new(2, 2);
        let depth = DepthBuffer::cleared(dims);
        assert_eq!(depth.depth(3), f32::INFINITY);
        assert_eq!(depth.depth(40), f32::INFINITY);

        let color = ColorTarget::cleared(dims);
        assert!(color.pixels().iter().all(|pixel| *pixel == CLEAR_COLOR));
        assert_eq!(color.as_bytes().len(), 4 * 16);
    }

    #[test]
    fn from_depths_checks_length() {
        let dims = FrameDims::new(2, 1);
        assert!(DepthBuffer::from_depths(dims, vec![1.0]).is_none());
        let depth = DepthBuffer::from_depths(dims, vec![1.0, 2.0]).unwrap();
        assert_eq!(depth.depth(1), 2.0);
    }
}
