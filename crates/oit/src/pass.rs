//! Linked-list transparency pass driving both phases for a frame.
//!
//! ```text
//! begin_frame (clear heads, counts, arena cursor)
//!     ↓
//! insertion   (parallel over fragments)
//!     ↓ barrier
//! resolve     (parallel over pixels, bucketed sorters)
//! ```

use crate::fragment::Fragment;
use crate::frame::{FrameArena, FrameDims};
use crate::insert::{InsertContext, InsertionReport, run_insertion};
use crate::resolve::{ResolveReport, run_resolve};
use crate::settings::OitSettings;
use crate::target::{ColorTarget, DepthBuffer};
use crate::telemetry::{FrameStats, FragmentCountTexture};
use anyhow::{Context as _, Result, ensure};
use log::{debug, warn};

/// Inputs of one frame, produced by the rasterizer and the opaque pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameInput<'frame> {
    /// Transparent fragments, in no particular order.
    pub fragments: &'frame [Fragment],
    /// Opaque depth to reject occluded fragments against.
    pub opaque_depth: Option<&'frame DepthBuffer>,
}

/// Order-independent transparency pass.
///
/// Owns the thread pool and the frame arena; the arena is kept between
/// frames and only reallocated when the capacity or frame size changes.
#[derive(Debug)]
pub struct OitPass {
    settings: OitSettings,
    pool: rayon::ThreadPool,
    frame: FrameArena,
    last_stats: FrameStats,
}

impl OitPass {
    /// Create a pass with its own worker pool.
    ///
    /// # Errors
    /// Returns an error if the thread pool cannot be created.
    pub fn new(settings: OitSettings) -> Result<Self> {
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|index| format!("oit-{index}"));
        if let Some(threads) = settings.worker_threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder.build().context("building transparency thread pool")?;
        let frame = FrameArena::new(FrameDims::default(), settings.effective_capacity());
        Ok(Self {
            settings,
            pool,
            frame,
            last_stats: FrameStats::default(),
        })
    }

    /// Current settings.
    #[inline]
    pub const fn settings(&self) -> &OitSettings {
        &self.settings
    }

    /// Replace the settings. A new capacity takes effect on the next frame;
    /// `worker_threads` is only read at construction.
    pub fn set_settings(&mut self, settings: OitSettings) {
        self.settings = settings;
    }

    /// Toggle the bucketed sorters.
    pub fn set_optimize_sort(&mut self, optimize_sort: bool) {
        self.settings.optimize_sort = optimize_sort;
    }

    /// Change the number of fragment records per frame.
    pub fn set_arena_capacity(&mut self, capacity: u32) {
        self.settings.arena_capacity = capacity;
    }

    /// State of the last executed frame.
    #[inline]
    pub const fn frame(&self) -> &FrameArena {
        &self.frame
    }

    /// Statistics of the last executed frame.
    #[inline]
    pub const fn last_stats(&self) -> &FrameStats {
        &self.last_stats
    }

    /// Per-pixel fragment counts of the last executed frame.
    pub fn fragment_counts(&self) -> FragmentCountTexture {
        let frame = &self.frame;
        self.pool.install(|| FragmentCountTexture::capture(frame))
    }

    /// Build the per-pixel lists for `input` and composite them into
    /// `target`, which holds the opaque color on entry.
    ///
    /// # Errors
    /// Returns an error if the depth buffer and the target differ in size.
    /// Overflow is not an error; see [`FrameStats::dropped_fragments`].
    pub fn execute(
        &mut self,
        input: &FrameInput<'_>,
        target: &mut ColorTarget,
    ) -> Result<FrameStats> {
        let dims = target.dims();
        if let Some(depth) = input.opaque_depth {
            ensure!(
                depth.dims() == dims,
                "depth buffer is {:?} but the color target is {:?}",
                depth.dims(),
                dims
            );
        }

        let capacity = self.settings.effective_capacity();
        // The clears are parallel too and must not touch the global pool.
        let frame = &mut self.frame;
        self.pool.install(|| frame.begin_frame(dims, capacity));

        let mut stats = FrameStats {
            dims,
            arena_capacity: capacity,
            arena_bytes: self.frame.arena().size_in_bytes(),
            insertion: InsertionReport::default(),
            resolve: ResolveReport::default(),
        };

        if input.fragments.is_empty() {
            debug!(target: "oit", "no transparent fragments, skipping resolve");
            self.last_stats = stats;
            return Ok(stats);
        }

        let context = InsertContext {
            opaque_depth: input.opaque_depth,
            material_whitelist: self.settings.material_whitelist.as_ref(),
        };
        let frame = &self.frame;
        let settings = &self.settings;

        // `install` returns only after every worker is done, which is the
        // barrier between the two phases.
        stats.insertion = self
            .pool
            .install(|| run_insertion(frame, input.fragments, &context));
        stats.resolve = self.pool.install(|| {
            run_resolve(frame, target, settings.optimize_sort, settings.blend_order)
        })?;

        if stats.insertion.overflowed > 0 {
            warn!(
                target: "oit",
                "fragment arena overflowed: dropped {} of {} fragments, {} records would fit this frame",
                stats.insertion.overflowed,
                stats.insertion.submitted,
                stats.required_capacity()
            );
        }
        debug!(
            target: "oit",
            "frame {}x{}: {} inserted, {} occluded, max {} per pixel",
            dims.width,
            dims.height,
            stats.insertion.inserted,
            stats.insertion.occluded,
            stats.resolve.max_fragments_per_pixel
        );

        self.last_stats = stats;
        Ok(stats)
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
    use crate::target::CLEAR_COLOR;

    #[test]
    fn empty_frame_leaves_target_cleared() {
        let mut pass = OitPass::new(OitSettings::default()).unwrap();
        let dims = FrameDims::new(4, 4);
        let mut target = ColorTarget::cleared(dims);
        let stats = pass.execute(&FrameInput::default(), &mut target).unwrap();
        assert!(target.pixels().iter().all(|pixel| *pixel == CLEAR_COLOR));
        assert_eq!(stats.insertion.submitted, 0);
        assert_eq!(stats.dims, dims);
        assert_eq!(pass.fragment_counts().max(), 0);
    }

    #[test]
    fn mismatched_depth_buffer_is_rejected() {
        let mut pass = OitPass::new(OitSettings::default()).unwrap();
        let depth = DepthBuffer::cleared(FrameDims::new(2, 2));
        let mut target = ColorTarget::cleared(FrameDims::new(4, 4));
        let input = FrameInput {
            fragments: &[],
            opaque_depth: Some(&depth),
        };
        assert!(pass.execute(&input, &mut target).is_err());
    }

    #[test]
    fn lists_do_not_survive_the_frame() {
        let mut pass = OitPass::new(OitSettings {
            worker_threads: Some(2),
            ..OitSettings::default()
        })
        .unwrap();
        let dims = FrameDims::new(2, 1);
        let fragments = [Fragment::new(1, 1.0, [1.0, 0.0, 0.0, 0.5])];
        let input = FrameInput {
            fragments: &fragments,
            opaque_depth: None,
        };

        let mut target = ColorTarget::cleared(dims);
        pass.execute(&input, &mut target).unwrap();
        assert_eq!(pass.frame().fragment_count(1), 1);

        let mut next_target = ColorTarget::cleared(dims);
        pass.execute(&FrameInput::default(), &mut next_target).unwrap();
        assert_eq!(pass.frame().fragment_count(1), 0);
        assert_eq!(next_target.get(1), Some(CLEAR_COLOR));
    }

    #[test]
    fn capacity_change_reallocates_on_next_frame() {
        let mut pass = OitPass::new(OitSettings::default()).unwrap();
        pass.set_arena_capacity(2048);
        let mut target = ColorTarget::cleared(FrameDims::new(1, 1));
        let stats = pass.execute(&FrameInput::default(), &mut target).unwrap();
        assert_eq!(stats.arena_capacity, 2048);
        assert_eq!(pass.frame().arena().capacity(), 2048);
    }
}
