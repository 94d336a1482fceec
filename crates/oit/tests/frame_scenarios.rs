#![allow(
    clippy::unwrap_used,
    clippy::float_cmp,
    reason = "Tests assert on exact, known values"
)]

//! End-to-end frames through the transparency pass.

use oit::{
    BlendOrder, ColorTarget, DepthBuffer, Fragment, FrameArena, FrameDims, FrameInput,
    InsertContext, MaterialId, OitPass, OitSettings, RecordIndex, SortBucket, run_insertion,
};
use std::collections::BTreeSet;

const EPSILON: f32 = 1e-5;
const BLACK: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn assert_close(actual: [f32; 4], expected: [f32; 4]) {
    for (lhs, rhs) in actual.iter().zip(expected) {
        assert!(
            (lhs - rhs).abs() < EPSILON,
            "{actual:?} differs from {expected:?}"
        );
    }
}

fn pass_with(blend_order: BlendOrder) -> OitPass {
    OitPass::new(OitSettings {
        blend_order,
        worker_threads: Some(4),
        ..OitSettings::default()
    })
    .unwrap()
}

/// Three layers on one pixel: an opaque red at depth 1 in front of two
/// half-transparent layers, submitted out of order.
fn three_layers() -> [Fragment; 3] {
    [
        Fragment::new(0, 5.0, [0.0, 0.0, 1.0, 0.5]),
        Fragment::new(0, 1.0, [1.0, 0.0, 0.0, 1.0]),
        Fragment::new(0, 3.0, [0.0, 1.0, 0.0, 0.5]),
    ]
}

#[test]
fn front_to_back_blends_nearest_first() {
    init_logging();
    let mut pass = pass_with(BlendOrder::FrontToBack);
    let fragments = three_layers();
    let mut target = ColorTarget::filled(FrameDims::new(1, 1), BLACK);
    let input = FrameInput {
        fragments: &fragments,
        opaque_depth: None,
    };
    let stats = pass.execute(&input, &mut target).unwrap();

    // red over black, then green at half, then blue at half
    assert_close(target.get(0).unwrap(), [0.25, 0.25, 0.5, 1.0]);
    assert_eq!(stats.insertion.inserted, 3);
    assert_eq!(stats.resolve.buckets.get(SortBucket::Fixed4), 1);
}

#[test]
fn back_to_front_lets_opaque_layer_cover_everything_behind() {
    init_logging();
    let mut pass = pass_with(BlendOrder::BackToFront);
    let fragments = three_layers();
    let mut target = ColorTarget::filled(FrameDims::new(1, 1), BLACK);
    let input = FrameInput {
        fragments: &fragments,
        opaque_depth: None,
    };
    pass.execute(&input, &mut target).unwrap();
    assert_close(target.get(0).unwrap(), [1.0, 0.0, 0.0, 1.0]);
}

#[test]
fn submission_order_does_not_change_the_result() {
    init_logging();
    let dims = FrameDims::new(1, 1);
    let mut fragments = three_layers().to_vec();
    // Two layers at the same depth with different colors.
    fragments.push(Fragment::new(0, 3.0, [0.3, 0.3, 0.9, 0.4]));

    let mut reference: Option<[f32; 4]> = None;
    let mut pass = pass_with(BlendOrder::BackToFront);
    for rotation in 0..fragments.len() {
        fragments.rotate_left(1);
        let mut target = ColorTarget::cleared(dims);
        let input = FrameInput {
            fragments: &fragments,
            opaque_depth: None,
        };
        pass.execute(&input, &mut target).unwrap();
        let color = target.get(0).unwrap();
        match reference {
            None => reference = Some(color),
            Some(expected) => assert_eq!(color, expected, "rotation {rotation}"),
        }
    }
}

#[test]
fn overflow_keeps_exactly_capacity_fragments() {
    init_logging();
    let capacity = 1024_u32;
    let extra = 100_u32;
    let dims = FrameDims::new(64, 18);
    let mut pass = OitPass::new(OitSettings {
        arena_capacity: capacity,
        ..OitSettings::default()
    })
    .unwrap();
    let fragments: Vec<Fragment> = (0..capacity + extra)
        .map(|pixel| Fragment::new(pixel, pixel as f32 + 1.0, [0.5, 0.5, 0.5, 0.5]))
        .collect();
    let mut target = ColorTarget::cleared(dims);
    let input = FrameInput {
        fragments: &fragments,
        opaque_depth: None,
    };
    let stats = pass.execute(&input, &mut target).unwrap();

    assert_eq!(stats.insertion.inserted, capacity);
    assert_eq!(stats.dropped_fragments(), extra);
    assert_eq!(pass.frame().arena().overflow_count(), extra);
    assert_eq!(stats.required_capacity(), capacity + extra);

    let mut retained = 0;
    for pixel in 0..dims.pixel_count() {
        let records: Vec<_> = pass.frame().chain(pixel).collect();
        assert!(records.len() <= 1);
        if let Some(record) = records.first() {
            assert_eq!(record.depth, pixel as f32 + 1.0);
            assert_eq!(record.next, RecordIndex::NONE);
            retained += 1;
        }
    }
    assert_eq!(retained, capacity);
    assert_eq!(pass.fragment_counts().total(), u64::from(capacity));
}

#[test]
fn bucketed_dispatch_matches_general_sorter() {
    init_logging();
    let dims = FrameDims::new(4, 1);
    let counts = [0_u32, 4, 5, 260];
    let fragments: Vec<Fragment> = counts
        .iter()
        .enumerate()
        .flat_map(|(pixel, &count)| {
            (0..count).map(move |layer| {
                let depth = ((layer * 53) % 97) as f32 * 0.25 + 0.1;
                let tint = (layer % 5) as f32 * 0.2;
                Fragment::new(pixel as u32, depth, [tint, 0.5, 1.0 - tint, 0.3])
            })
        })
        .collect();
    let input = FrameInput {
        fragments: &fragments,
        opaque_depth: None,
    };

    let base = [0.2, 0.3, 0.4, 1.0];
    let mut pass = pass_with(BlendOrder::BackToFront);
    let mut optimized = ColorTarget::filled(dims, base);
    let fast = pass.execute(&input, &mut optimized).unwrap();

    pass.set_optimize_sort(false);
    let mut general = ColorTarget::filled(dims, base);
    let slow = pass.execute(&input, &mut general).unwrap();

    assert_eq!(optimized, general);
    assert_eq!(optimized.get(0), Some(base));
    for bucket in [
        SortBucket::Empty,
        SortBucket::Fixed4,
        SortBucket::Fixed8,
        SortBucket::Unbounded,
    ] {
        assert_eq!(fast.resolve.buckets.get(bucket), 1, "{bucket:?}");
    }
    assert_eq!(slow.resolve.buckets.get(SortBucket::Unbounded), 3);
    assert_eq!(fast.resolve.max_fragments_per_pixel, 260);
}

#[test]
fn opaque_depth_and_whitelist_filter_before_allocation() {
    init_logging();
    let dims = FrameDims::new(2, 1);
    let mut depth = DepthBuffer::cleared(dims);
    depth.set(0, 2.0);

    let glass = MaterialId(1);
    let smoke = MaterialId(2);
    let mut pass = OitPass::new(OitSettings {
        material_whitelist: Some(BTreeSet::from([glass])),
        ..OitSettings::default()
    })
    .unwrap();
    let fragments = [
        Fragment::new(0, 1.0, [1.0, 1.0, 1.0, 0.5]).with_material(glass),
        Fragment::new(0, 3.0, [1.0, 1.0, 1.0, 0.5]).with_material(glass),
        Fragment::new(1, 1.0, [1.0, 1.0, 1.0, 0.5]).with_material(smoke),
        Fragment::new(5, 1.0, [1.0, 1.0, 1.0, 0.5]).with_material(glass),
    ];
    let mut target = ColorTarget::cleared(dims);
    let input = FrameInput {
        fragments: &fragments,
        opaque_depth: Some(&depth),
    };
    let stats = pass.execute(&input, &mut target).unwrap();

    assert_eq!(stats.insertion.inserted, 1);
    assert_eq!(stats.insertion.occluded, 1);
    assert_eq!(stats.insertion.filtered, 1);
    assert_eq!(stats.insertion.malformed, 1);
    assert_eq!(pass.frame().arena().allocated(), 1);
    assert_close(target.get(0).unwrap(), [0.5, 0.5, 0.5, 1.0]);
    assert_eq!(target.get(1), Some([0.0, 0.0, 0.0, 1.0]));
}

#[test]
fn every_chain_belongs_to_its_pixel_and_terminates() {
    init_logging();
    let dims = FrameDims::new(16, 16);
    let capacity = 600;
    let frame = FrameArena::new(dims, capacity);
    // Depth encodes the owning pixel so chains can be checked afterwards.
    let fragments: Vec<Fragment> = (0..1000_u32)
        .map(|step| {
            let pixel = (step * 7) % 256;
            Fragment::new(pixel, pixel as f32 + 0.5, [0.1, 0.2, 0.3, 0.4])
        })
        .collect();
    let report = run_insertion(&frame, &fragments, &InsertContext::default());
    assert_eq!(report.inserted, capacity);
    assert_eq!(report.overflowed, 400);

    let mut linked = 0;
    for pixel in 0..dims.pixel_count() {
        let chain: Vec<_> = frame.chain(pixel).collect();
        assert!(chain.len() <= capacity as usize);
        assert_eq!(chain.len(), frame.fragment_count(pixel) as usize);
        assert!(chain.iter().all(|record| record.depth == pixel as f32 + 0.5));
        linked += chain.len();
    }
    assert_eq!(linked, capacity as usize);
}

#[test]
fn stats_and_heatmap_are_exported() {
    init_logging();
    let dims = FrameDims::new(3, 1);
    let mut pass = pass_with(BlendOrder::BackToFront);
    let fragments = [
        Fragment::new(2, 1.0, [1.0, 0.0, 0.0, 0.5]),
        Fragment::new(2, 2.0, [0.0, 1.0, 0.0, 0.5]),
    ];
    let mut target = ColorTarget::cleared(dims);
    let input = FrameInput {
        fragments: &fragments,
        opaque_depth: None,
    };
    pass.execute(&input, &mut target).unwrap();

    let json = pass.last_stats().to_json().unwrap();
    assert!(json.contains("\"inserted\": 2"));

    let heatmap = pass.fragment_counts().heatmap();
    assert_eq!(heatmap.dimensions(), (3, 1));
    assert_eq!(heatmap.get_pixel(2, 0).0, [255]);
    assert_eq!(heatmap.get_pixel(0, 0).0, [0]);
}
