//! Alpha-over compositing of sorted layers onto the opaque color.
//!
//! Each applied layer updates the color as
//! `out = src * src_alpha + out * (1 - src_alpha)`. [`BlendOrder`] fixes the
//! sequence in which a pixel's sorted layers are applied; it is a single
//! engine-wide setting and never varies between pixels of a frame.

use crate::sort::Layer;
use serde::{Deserialize, Serialize};

/// Sequence in which sorted layers are blended over the base color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendOrder {
    /// Farthest layer first, so the nearest layer ends up on top.
    #[default]
    BackToFront,
    /// Nearest layer first, each farther layer blended over the result.
    FrontToBack,
}

/// Blend one straight-alpha `src` color over `dst`.
#[inline]
pub fn blend_over(dst: [f32; 4], src: [f32; 4]) -> [f32; 4] {
    let alpha = src[3];
    let keep = 1.0 - alpha;
    [
        src[0].mul_add(alpha, dst[0] * keep),
        src[1].mul_add(alpha, dst[1] * keep),
        src[2].mul_add(alpha, dst[2] * keep),
        dst[3].mul_add(keep, alpha),
    ]
}

/// Composite `layers` (sorted nearest first) over `base`.
pub fn composite_layers(layers: &[Layer], base: [f32; 4], order: BlendOrder) -> [f32; 4] {
    match order {
        BlendOrder::BackToFront => layers
            .iter()
            .rev()
            .fold(base, |out, layer| blend_over(out, layer.color)),
        BlendOrder::FrontToBack => layers
            .iter()
            .fold(base, |out, layer| blend_over(out, layer.color)),
    }
}

/// A run of layers collapsed into one premultiplied layer.
///
/// Applying a flattened run to a base gives the same result as applying its
/// layers one by one, which lets partial composites be grouped freely as
/// long as their left-to-right order is kept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PremultipliedLayer {
    /// Color multiplied by coverage.
    pub color: [f32; 3],
    /// Combined coverage.
    pub alpha: f32,
}

impl PremultipliedLayer {
    /// A run with no layers.
    pub const TRANSPARENT: Self = Self {
        color: [0.0; 3],
        alpha: 0.0,
    };

    /// Premultiply a single straight-alpha color.
    #[inline]
    pub fn from_straight(color: [f32; 4]) -> Self {
        let alpha = color[3];
        Self {
            color: [color[0] * alpha, color[1] * alpha, color[2] * alpha],
            alpha,
        }
    }

    /// Run `self` first, then `next` on top of it.
    #[inline]
    #[must_use]
    pub fn then(self, next: Self) -> Self {
        let keep = 1.0 - next.alpha;
        Self {
            color: [
                self.color[0].mul_add(keep, next.color[0]),
                self.color[1].mul_add(keep, next.color[1]),
                self.color[2].mul_add(keep, next.color[2]),
            ],
            alpha: self.alpha.mul_add(keep, next.alpha),
        }
    }

    /// Apply the run over a straight-alpha base color.
    #[inline]
    pub fn apply(self, base: [f32; 4]) -> [f32; 4] {
        let keep = 1.0 - self.alpha;
        [
            base[0].mul_add(keep, self.color[0]),
            base[1].mul_add(keep, self.color[1]),
            base[2].mul_add(keep, self.color[2]),
            base[3].mul_add(keep, self.alpha),
        ]
    }

    /// Collapse sorted `layers` in the sequence `order` applies them.
    pub fn flatten(layers: &[Layer], order: BlendOrder) -> Self {
        let step = |run: Self, layer: &Layer| run.then(Self::from_straight(layer.color));
        match order {
            BlendOrder::BackToFront => layers.iter().rev().fold(Self::TRANSPARENT, step),
            BlendOrder::FrontToBack => layers.iter().fold(Self::TRANSPARENT, step),
        }
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

    const EPSILON: f32 = 1e-5;

    fn assert_close(actual: [f32; 4], expected: [f32; 4]) {
        for (channel, (lhs, rhs)) in actual.iter().zip(expected).enumerate() {
            assert!(
                (lhs - rhs).abs() < EPSILON,
                "channel {channel}: {actual:?} != {expected:?}"
            );
        }
    }

    fn layer(depth: f32, color: [f32; 4]) -> Layer {
        Layer { depth, color }
    }

    #[test]
    fn opaque_layer_replaces_destination() {
        assert_close(
            blend_over([0.3, 0.3, 0.3, 1.0], [1.0, 0.5, 0.0, 1.0]),
            [1.0, 0.5, 0.0, 1.0],
        );
    }

    #[test]
    fn clear_layer_keeps_destination() {
        assert_close(
            blend_over([0.3, 0.2, 0.1, 1.0], [1.0, 1.0, 1.0, 0.0]),
            [0.3, 0.2, 0.1, 1.0],
        );
    }

    #[test]
    fn blend_orders_differ_only_in_sequence() {
        let layers = [
            layer(1.0, [1.0, 0.0, 0.0, 0.5]),
            layer(2.0, [0.0, 0.0, 1.0, 0.5]),
        ];
        let base = [0.0, 0.0, 0.0, 1.0];
        assert_close(
            composite_layers(&layers, base, BlendOrder::BackToFront),
            [0.5, 0.0, 0.25, 1.0],
        );
        assert_close(
            composite_layers(&layers, base, BlendOrder::FrontToBack),
            [0.25, 0.0, 0.5, 1.0],
        );
    }

    #[test]
    fn grouping_does_not_change_the_result() {
        let layers = [
            layer(1.0, [0.9, 0.1, 0.2, 0.3]),
            layer(2.0, [0.2, 0.8, 0.4, 0.6]),
            layer(3.0, [0.5, 0.5, 0.9, 0.45]),
        ];
        let base = [0.1, 0.2, 0.3, 1.0];
        for order in [BlendOrder::BackToFront, BlendOrder::FrontToBack] {
            let sequential = composite_layers(&layers, base, order);
            let flattened = PremultipliedLayer::flatten(&layers, order).apply(base);
            assert_close(flattened, sequential);

            let (head, tail) = match order {
                BlendOrder::BackToFront => (&layers[1..], &layers[..1]),
                BlendOrder::FrontToBack => (&layers[..1], &layers[1..]),
            };
            let grouped = PremultipliedLayer::flatten(head, order)
                .then(PremultipliedLayer::flatten(tail, order))
                .apply(base);
            assert_close(grouped, sequential);
        }
    }

    #[test]
    fn no_layers_keeps_base() {
        let base = [0.4, 0.5, 0.6, 1.0];
        assert_eq!(composite_layers(&[], base, BlendOrder::BackToFront), base);
        assert_eq!(PremultipliedLayer::flatten(&[], BlendOrder::FrontToBack).apply(base), base);
    }
}
