//! Depth sorting of a pixel's working set.
//!
//! All sorters share [`layer_order`], a total order on depth and then on the
//! color payload. Two layers compare equal only when they are identical, so
//! the sorted sequence, and with it the composited color, does not depend on
//! the order in which fragments happened to be linked.

use crate::fragment::FragmentRecord;
use core::cmp::Ordering;

/// One transparent layer copied out of the arena.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Layer {
    /// View depth, smaller is nearer.
    pub depth: f32,
    /// Straight RGBA color.
    pub color: [f32; 4],
}

impl From<FragmentRecord> for Layer {
    #[inline]
    fn from(record: FragmentRecord) -> Self {
        Self {
            depth: record.depth,
            color: record.color,
        }
    }
}

/// Nearest first; ties on depth are broken on the color channels.
#[inline]
pub fn layer_order(lhs: &Layer, rhs: &Layer) -> Ordering {
    lhs.depth
        .total_cmp(&rhs.depth)
        .then_with(|| lhs.color[0].total_cmp(&rhs.color[0]))
        .then_with(|| lhs.color[1].total_cmp(&rhs.color[1]))
        .then_with(|| lhs.color[2].total_cmp(&rhs.color[2]))
        .then_with(|| lhs.color[3].total_cmp(&rhs.color[3]))
}

/// Sort layers in place with [`layer_order`].
#[inline]
pub fn sort_layers(layers: &mut [Layer]) {
    layers.sort_by(layer_order);
}

/// Unbounded sorter: copies the whole chain and sorts it.
pub fn sort_general(chain: impl Iterator<Item = FragmentRecord>) -> Vec<Layer> {
    let mut layers: Vec<Layer> = chain.map(Layer::from).collect();
    sort_layers(&mut layers);
    layers
}

/// Fixed-capacity sorter kept on the stack.
///
/// Layers are insertion-sorted as they are read. When a chain holds more
/// than `N` layers only the `N` nearest are kept.
#[derive(Debug, Clone, Copy)]
pub struct FixedWorkingSet<const N: usize> {
    layers: [Layer; N],
    len: usize,
}

impl<const N: usize> Default for FixedWorkingSet<N> {
    fn default() -> Self {
        Self {
            layers: [Layer::default(); N],
            len: 0,
        }
    }
}

impl<const N: usize> FixedWorkingSet<N> {
    /// Read and sort up to `N` layers from a chain.
    pub fn from_chain(chain: impl Iterator<Item = FragmentRecord>) -> Self {
        let mut set = Self::default();
        for record in chain {
            set.insert(Layer::from(record));
        }
        set
    }

    /// Insert a layer at its sorted position.
    pub fn insert(&mut self, layer: Layer) {
        if N == 0 {
            return;
        }
        // Equal layers go after their peers.
        let position = self.layers[..self.len]
            .partition_point(|existing| layer_order(existing, &layer) != Ordering::Greater);
        if self.len == N {
            if position == N {
                return;
            }
            self.layers.copy_within(position..N - 1, position + 1);
        } else {
            self.layers.copy_within(position..self.len, position + 1);
            self.len += 1;
        }
        self.layers[position] = layer;
    }

    /// Sorted layers, nearest first.
    #[inline]
    pub fn as_slice(&self) -> &[Layer] {
        &self.layers[..self.len]
    }

    /// Number of layers held.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether no layer is held.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
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
    use crate::fragment::RecordIndex;

    fn record(depth: f32, red: f32) -> FragmentRecord {
        FragmentRecord {
            depth,
            color: [red, 0.0, 0.0, 0.5],
            next: RecordIndex::NONE,
        }
    }

    fn depths(layers: &[Layer]) -> Vec<f32> {
        layers.iter().map(|layer| layer.depth).collect()
    }

    #[test]
    fn general_sorts_nearest_first() {
        let layers = sort_general([5.0, 1.0, 3.0].into_iter().map(|depth| record(depth, 0.0)));
        assert_eq!(depths(&layers), vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn fixed_matches_general() {
        let chain = [7.0, 2.0, 9.0, 2.0, 4.0, 0.5];
        let general = sort_general(
            chain
                .iter()
                .enumerate()
                .map(|(slot, &depth)| record(depth, slot as f32)),
        );
        let fixed = FixedWorkingSet::<8>::from_chain(
            chain
                .iter()
                .enumerate()
                .map(|(slot, &depth)| record(depth, slot as f32)),
        );
        assert_eq!(fixed.as_slice(), general.as_slice());
    }

    #[test]
    fn fixed_keeps_nearest_when_over_capacity() {
        let fixed = FixedWorkingSet::<4>::from_chain(
            [6.0, 1.0, 5.0, 2.0, 4.0, 3.0]
                .into_iter()
                .map(|depth| record(depth, 0.0)),
        );
        assert_eq!(fixed.len(), 4);
        assert_eq!(depths(fixed.as_slice()), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn ties_resolve_independently_of_chain_order() {
        let forward = sort_general([record(1.0, 0.2), record(1.0, 0.8)].into_iter());
        let backward = sort_general([record(1.0, 0.8), record(1.0, 0.2)].into_iter());
        assert_eq!(forward, backward);
        assert_eq!(forward[0].color[0], 0.2);
    }

    #[test]
    fn sorting_is_idempotent() {
        let mut layers = sort_general(
            [3.0, 3.0, 1.0, 2.0]
                .into_iter()
                .enumerate()
                .map(|(slot, depth)| record(depth, slot as f32)),
        );
        let once = layers.clone();
        sort_layers(&mut layers);
        assert_eq!(layers, once);
    }

    #[test]
    fn empty_chain() {
        let fixed = FixedWorkingSet::<4>::from_chain(core::iter::empty());
        assert!(fixed.is_empty());
        assert!(sort_general(core::iter::empty()).is_empty());
    }
}
