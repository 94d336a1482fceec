#![allow(clippy::unwrap_used, reason = "Benchmark setup fails loudly")]

use criterion::{Criterion, criterion_group, criterion_main};
use oit::{ColorTarget, Fragment, FrameDims, FrameInput, OitPass, OitSettings};
use std::hint::black_box;

/// Synthetic frame: most pixels see one or two layers, a small hot region
/// stacks up to a few hundred, like smoke over glass.
fn build_fragments(dims: FrameDims) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    let mut seed = 0x2545_f491_u32;
    let mut next = || {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        seed
    };
    for y in 0..dims.height {
        for x in 0..dims.width {
            let Some(pixel) = dims.index(x, y) else {
                continue;
            };
            let hot = x < dims.width / 8 && y < dims.height / 8;
            let layers = if hot { 64 + next() % 256 } else { next() % 3 };
            for _ in 0..layers {
                let depth = (next() % 10_000) as f32 * 0.01;
                let shade = (next() % 255) as f32 / 255.0;
                fragments.push(Fragment::new(pixel, depth, [shade, 0.5, 1.0 - shade, 0.4]));
            }
        }
    }
    fragments
}

fn bench_resolve(criterion: &mut Criterion) {
    let dims = FrameDims::new(256, 256);
    let fragments = build_fragments(dims);
    let input = FrameInput {
        fragments: &fragments,
        opaque_depth: None,
    };

    for optimize_sort in [true, false] {
        let mut pass = OitPass::new(OitSettings {
            arena_capacity: 4 * 1024 * 1024,
            optimize_sort,
            ..OitSettings::default()
        })
        .unwrap();
        let name = if optimize_sort {
            "oit_frame_bucketed"
        } else {
            "oit_frame_general"
        };
        criterion.bench_function(name, |bencher| {
            bencher.iter(|| {
                let mut target = ColorTarget::cleared(dims);
                let stats = pass.execute(&input, &mut target).unwrap();
                black_box((stats, target));
            });
        });
    }
}

criterion_group!(oit_benches, bench_resolve);
criterion_main!(oit_benches);
