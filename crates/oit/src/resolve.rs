//! Sort-and-composite: the parallel consumer phase.
//!
//! Runs after insertion has completed. Each pixel is classified once from
//! its fragment count and handed to the matching sorter; the sorted layers
//! are then blended over the pixel's opaque color in place.

use crate::bucket::{BucketHistogram, SortBucket, classify};
use crate::composite::{BlendOrder, composite_layers};
use crate::frame::FrameArena;
use crate::sort::{FixedWorkingSet, sort_general};
use crate::target::ColorTarget;
use anyhow::{Result, ensure};
use rayon::prelude::*;
use serde::Serialize;

/// Tally of one resolve phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolveReport {
    /// Pixels handled by each sorter.
    pub buckets: BucketHistogram,
    /// Largest per-pixel fragment count seen.
    pub max_fragments_per_pixel: u32,
}

impl ResolveReport {
    fn merge(self, other: Self) -> Self {
        Self {
            buckets: self.buckets.merge(other.buckets),
            max_fragments_per_pixel: self
                .max_fragments_per_pixel
                .max(other.max_fragments_per_pixel),
        }
    }
}

fn composite_fixed<const N: usize>(
    frame: &FrameArena,
    pixel: usize,
    base: [f32; 4],
    order: BlendOrder,
) -> [f32; 4] {
    let set = FixedWorkingSet::<N>::from_chain(frame.chain(pixel));
    composite_layers(set.as_slice(), base, order)
}

/// Sort and composite one pixel with the sorter for `bucket`.
///
/// Any bucket produces the same color as [`SortBucket::Unbounded`] for a
/// chain that fits its capacity.
pub fn resolve_pixel(
    frame: &FrameArena,
    pixel: usize,
    base: [f32; 4],
    bucket: SortBucket,
    order: BlendOrder,
) -> [f32; 4] {
    match bucket {
        SortBucket::Empty => base,
        SortBucket::Fixed4 => composite_fixed::<4>(frame, pixel, base, order),
        SortBucket::Fixed8 => composite_fixed::<8>(frame, pixel, base, order),
        SortBucket::Fixed16 => composite_fixed::<16>(frame, pixel, base, order),
        SortBucket::Fixed32 => composite_fixed::<32>(frame, pixel, base, order),
        SortBucket::Fixed64 => composite_fixed::<64>(frame, pixel, base, order),
        SortBucket::Fixed128 => composite_fixed::<128>(frame, pixel, base, order),
        SortBucket::Fixed256 => composite_fixed::<256>(frame, pixel, base, order),
        SortBucket::Unbounded => {
            composite_layers(&sort_general(frame.chain(pixel)), base, order)
        }
    }
}

/// Resolve every pixel of `target` in parallel.
///
/// # Errors
/// Returns an error if `target` and `frame` disagree on dimensions.
pub fn run_resolve(
    frame: &FrameArena,
    target: &mut ColorTarget,
    optimize_sort: bool,
    order: BlendOrder,
) -> Result<ResolveReport> {
    ensure!(
        target.dims() == frame.dims(),
        "color target is {:?} but the frame is {:?}",
        target.dims(),
        frame.dims()
    );

    let report = target
        .pixels_mut()
        .par_iter_mut()
        .enumerate()
        .fold(ResolveReport::default, |mut report, (pixel, color)| {
            let count = frame.fragment_count(pixel);
            let bucket = classify(count, optimize_sort);
            report.buckets.add(bucket);
            report.max_fragments_per_pixel = report.max_fragments_per_pixel.max(count);
            if bucket != SortBucket::Empty {
                *color = resolve_pixel(frame, pixel, *color, bucket, order);
            }
            report
        })
        .reduce(ResolveReport::default, ResolveReport::merge);
    Ok(report)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::float_cmp,
    reason = "Tests assert on exact, known values"
)]
mod tests {
    use super::*;
    use crate::frame::FrameDims;

    fn fill(frame: &FrameArena, pixel: usize, count: u32) {
        for layer in 0..count {
            // Scrambled depths so every sorter has work to do.
            let depth = ((layer * 37) % 101) as f32 + 0.5;
            let shade = (layer % 7) as f32 / 7.0;
            frame
                .push(pixel, depth, [shade, 1.0 - shade, 0.5, 0.25])
                .unwrap();
        }
    }

    #[test]
    fn every_bucket_matches_the_general_sorter() {
        let frame = FrameArena::new(FrameDims::new(4, 1), 1024);
        let counts = [0, 4, 5, 260];
        for (pixel, &count) in counts.iter().enumerate() {
            fill(&frame, pixel, count);
        }
        let base = [0.1, 0.2, 0.3, 1.0];
        let expected_buckets = [
            SortBucket::Empty,
            SortBucket::Fixed4,
            SortBucket::Fixed8,
            SortBucket::Unbounded,
        ];
        for (pixel, &expected) in expected_buckets.iter().enumerate() {
            let bucket = classify(frame.fragment_count(pixel), true);
            assert_eq!(bucket, expected);
            for order in [BlendOrder::BackToFront, BlendOrder::FrontToBack] {
                assert_eq!(
                    resolve_pixel(&frame, pixel, base, bucket, order),
                    resolve_pixel(&frame, pixel, base, SortBucket::Unbounded, order),
                );
            }
        }
    }

    #[test]
    fn run_resolve_counts_buckets_and_skips_empty_pixels() {
        let frame = FrameArena::new(FrameDims::new(3, 1), 64);
        fill(&frame, 1, 2);
        fill(&frame, 2, 20);
        let base = [0.7, 0.7, 0.7, 1.0];
        let mut target = ColorTarget::filled(FrameDims::new(3, 1), base);

        let report = run_resolve(&frame, &mut target, true, BlendOrder::BackToFront).unwrap();
        assert_eq!(target.get(0), Some(base));
        assert_ne!(target.get(1), Some(base));
        assert_eq!(report.buckets.get(SortBucket::Empty), 1);
        assert_eq!(report.buckets.get(SortBucket::Fixed4), 1);
        assert_eq!(report.buckets.get(SortBucket::Fixed32), 1);
        assert_eq!(report.max_fragments_per_pixel, 20);
    }

    #[test]
    fn optimized_and_general_paths_agree() {
        let dims = FrameDims::new(8, 1);
        let frame = FrameArena::new(dims, 4096);
        for pixel in 0..8 {
            fill(&frame, pixel, [0, 1, 3, 7, 15, 40, 130, 300][pixel]);
        }
        let mut optimized = ColorTarget::cleared(dims);
        let mut general = ColorTarget::cleared(dims);
        let fast = run_resolve(&frame, &mut optimized, true, BlendOrder::BackToFront).unwrap();
        let slow = run_resolve(&frame, &mut general, false, BlendOrder::BackToFront).unwrap();
        assert_eq!(optimized, general);
        assert_eq!(fast.buckets.get(SortBucket::Unbounded), 1);
        assert_eq!(slow.buckets.get(SortBucket::Unbounded), 7);
    }

    #[test]
    fn mismatched_target_is_an_error() {
        let frame = FrameArena::new(FrameDims::new(2, 2), 4);
        let mut target = ColorTarget::cleared(FrameDims::new(3, 3));
        assert!(run_resolve(&frame, &mut target, true, BlendOrder::BackToFront).is_err());
    }
}
