#![allow(
    clippy::unwrap_used,
    clippy::float_cmp,
    reason = "Tests assert on exact, known values"
)]

//! Many producers pushing onto the same pixels at once.

use oit::{Fragment, FrameArena, FrameDims, InsertContext, InsertOutcome, insert_fragment};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::thread;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn single_pixel_chain_holds_every_allocated_fragment() {
    init_logging();
    let frame = FrameArena::new(FrameDims::new(1, 1), 8 * 2000);
    let context = InsertContext::default();

    thread::scope(|scope| {
        for worker in 0..8_u32 {
            let frame = &frame;
            let context = &context;
            scope.spawn(move || {
                for step in 0..2000_u32 {
                    let depth = (worker * 2000 + step) as f32;
                    let fragment = Fragment::new(0, depth, [1.0, 1.0, 1.0, 0.1]);
                    assert!(matches!(
                        insert_fragment(frame, &fragment, context),
                        InsertOutcome::Inserted(_)
                    ));
                }
            });
        }
    });

    let depths: Vec<u32> = frame.chain(0).map(|record| record.depth as u32).collect();
    let unique: BTreeSet<u32> = depths.iter().copied().collect();
    assert_eq!(depths.len(), 16_000);
    assert_eq!(unique.len(), 16_000);
    assert_eq!(unique.first(), Some(&0));
    assert_eq!(unique.last(), Some(&15_999));
    assert_eq!(frame.fragment_count(0), 16_000);
}

#[test]
fn contended_pixels_with_overflow_stay_consistent() {
    init_logging();
    let capacity = 5000_u32;
    let frame = FrameArena::new(FrameDims::new(2, 2), capacity);
    let context = InsertContext::default();

    let outcomes: Vec<(u32, InsertOutcome)> = (0..12_000_u32)
        .into_par_iter()
        .map(|step| {
            let fragment = Fragment::new(step % 4, step as f32, [0.0, 0.0, 0.0, 1.0]);
            (step, insert_fragment(&frame, &fragment, &context))
        })
        .collect();

    let inserted: BTreeSet<u32> = outcomes
        .iter()
        .filter(|(_, outcome)| matches!(outcome, InsertOutcome::Inserted(_)))
        .map(|&(step, _)| step)
        .collect();
    assert_eq!(inserted.len(), capacity as usize);
    assert_eq!(frame.arena().overflow_count(), 12_000 - capacity);

    // Every chain holds exactly the inserted fragments of its pixel.
    for pixel in 0..4_u32 {
        let chain: BTreeSet<u32> = frame
            .chain(pixel as usize)
            .map(|record| record.depth as u32)
            .collect();
        let expected: BTreeSet<u32> = inserted
            .iter()
            .copied()
            .filter(|step| step % 4 == pixel)
            .collect();
        assert_eq!(chain, expected);
        assert_eq!(frame.fragment_count(pixel as usize) as usize, expected.len());
    }
}
