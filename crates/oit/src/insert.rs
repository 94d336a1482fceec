//! Fragment insertion: the parallel producer phase.
//!
//! Every fragment is handled on its own. Malformed, occluded and filtered
//! fragments are rejected before they touch shared state; the rest claim an
//! arena record and are pushed onto their pixel's list with a single atomic
//! exchange on the head slot.

use crate::fragment::{Fragment, MaterialId, RecordIndex};
use crate::frame::FrameArena;
use crate::target::DepthBuffer;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;

/// What happened to a submitted fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Linked into its pixel's chain at this record.
    Inserted(RecordIndex),
    /// Behind the opaque surface at its pixel.
    Occluded,
    /// Out-of-range pixel or unusable depth/color.
    Malformed,
    /// Material not in the whitelist.
    Filtered,
    /// The arena was exhausted.
    Overflowed,
}

/// Read-only inputs consulted for every fragment.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsertContext<'frame> {
    /// Opaque depth to test against; `None` disables the test.
    pub opaque_depth: Option<&'frame DepthBuffer>,
    /// Materials allowed through; `None` allows all.
    pub material_whitelist: Option<&'frame BTreeSet<MaterialId>>,
}

/// Tally of one insertion phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertionReport {
    /// Fragments submitted.
    pub submitted: u32,
    /// Fragments linked into a chain.
    pub inserted: u32,
    /// Fragments rejected by the depth test.
    pub occluded: u32,
    /// Fragments rejected as malformed.
    pub malformed: u32,
    /// Fragments skipped by the material whitelist.
    pub filtered: u32,
    /// Fragments dropped because the arena was full.
    pub overflowed: u32,
}

impl InsertionReport {
    fn record(mut self, outcome: InsertOutcome) -> Self {
        self.submitted += 1;
        match outcome {
            InsertOutcome::Inserted(_) => self.inserted += 1,
            InsertOutcome::Occluded => self.occluded += 1,
            InsertOutcome::Malformed => self.malformed += 1,
            InsertOutcome::Filtered => self.filtered += 1,
            InsertOutcome::Overflowed => self.overflowed += 1,
        }
        self
    }

    fn merge(self, other: Self) -> Self {
        Self {
            submitted: self.submitted + other.submitted,
            inserted: self.inserted + other.inserted,
            occluded: self.occluded + other.occluded,
            malformed: self.malformed + other.malformed,
            filtered: self.filtered + other.filtered,
            overflowed: self.overflowed + other.overflowed,
        }
    }
}

/// Insert a single fragment into the frame.
pub fn insert_fragment(
    frame: &FrameArena,
    fragment: &Fragment,
    context: &InsertContext<'_>,
) -> InsertOutcome {
    let Ok(pixel) = usize::try_from(fragment.pixel) else {
        return InsertOutcome::Malformed;
    };
    if pixel >= frame.dims().pixel_count() || !fragment.is_well_formed() {
        return InsertOutcome::Malformed;
    }

    if context
        .material_whitelist
        .is_some_and(|whitelist| !whitelist.contains(&fragment.material))
    {
        return InsertOutcome::Filtered;
    }

    // Fragments pass only when strictly in front of the opaque surface.
    if context
        .opaque_depth
        .is_some_and(|opaque| fragment.depth >= opaque.depth(pixel))
    {
        return InsertOutcome::Occluded;
    }

    match frame.push(pixel, fragment.depth, fragment.color) {
        Ok(index) => InsertOutcome::Inserted(index),
        Err(_overflow) => InsertOutcome::Overflowed,
    }
}

/// Insert a batch of fragments in parallel.
///
/// Must run inside the thread pool the caller wants the work on. Returns
/// once every fragment has been handled, which is the barrier the resolve
/// phase relies on.
pub fn run_insertion(
    frame: &FrameArena,
    fragments: &[Fragment],
    context: &InsertContext<'_>,
) -> InsertionReport {
    fragments
        .par_iter()
        .fold(InsertionReport::default, |report, fragment| {
            report.record(insert_fragment(frame, fragment, context))
        })
        .reduce(InsertionReport::default, InsertionReport::merge)
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

    const GLASS: [f32; 4] = [0.2, 0.4, 0.6, 0.5];

    fn frame(capacity: u32) -> FrameArena {
        FrameArena::new(FrameDims::new(4, 4), capacity)
    }

    #[test]
    fn rejects_malformed_fragments() {
        let frame = frame(8);
        let context = InsertContext::default();
        for fragment in [
            Fragment::new(16, 1.0, GLASS),
            Fragment::new(u32::MAX, 1.0, GLASS),
            Fragment::new(0, -1.0, GLASS),
            Fragment::new(0, f32::NAN, GLASS),
        ] {
            assert_eq!(
                insert_fragment(&frame, &fragment, &context),
                InsertOutcome::Malformed
            );
        }
        assert_eq!(frame.arena().allocated(), 0);
    }

    #[test]
    fn occluded_fragments_never_allocate() {
        let frame = frame(8);
        let mut depth = DepthBuffer::cleared(FrameDims::new(4, 4));
        depth.set(5, 2.0);
        let context = InsertContext {
            opaque_depth: Some(&depth),
            material_whitelist: None,
        };

        assert_eq!(
            insert_fragment(&frame, &Fragment::new(5, 3.0, GLASS), &context),
            InsertOutcome::Occluded
        );
        assert_eq!(
            insert_fragment(&frame, &Fragment::new(5, 2.0, GLASS), &context),
            InsertOutcome::Occluded
        );
        assert!(matches!(
            insert_fragment(&frame, &Fragment::new(5, 1.5, GLASS), &context),
            InsertOutcome::Inserted(_)
        ));
        assert_eq!(frame.arena().allocated(), 1);
        assert_eq!(frame.fragment_count(5), 1);
    }

    #[test]
    fn whitelist_filters_materials() {
        let frame = frame(8);
        let whitelist = BTreeSet::from([MaterialId(2)]);
        let context = InsertContext {
            opaque_depth: None,
            material_whitelist: Some(&whitelist),
        };
        let fragment = Fragment::new(0, 1.0, GLASS);
        assert_eq!(
            insert_fragment(&frame, &fragment, &context),
            InsertOutcome::Filtered
        );
        assert!(matches!(
            insert_fragment(&frame, &fragment.with_material(MaterialId(2)), &context),
            InsertOutcome::Inserted(_)
        ));
    }

    #[test]
    fn parallel_insertion_tallies_outcomes() {
        let frame = frame(10);
        let fragments: Vec<Fragment> = (0..40_u32)
            .map(|step| Fragment::new(step % 16, 1.0 + step as f32, GLASS))
            .chain([Fragment::new(99, 1.0, GLASS)])
            .collect();
        let report = run_insertion(&frame, &fragments, &InsertContext::default());

        assert_eq!(report.submitted, 41);
        assert_eq!(report.inserted, 10);
        assert_eq!(report.overflowed, 30);
        assert_eq!(report.malformed, 1);
        assert_eq!(frame.arena().overflow_count(), 30);
        let linked: usize = (0..16).map(|pixel| frame.chain(pixel).count()).sum();
        assert_eq!(linked, 10);
    }
}
