#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Tests fail loudly on unexpected errors"
)]

//! The pass runs every parallel phase on its own workers, so a saturated
//! global rayon pool must not stall a frame.
//!
//! Kept alone in its binary: the global pool can be configured once per
//! process.

use oit::{ColorTarget, Fragment, FrameDims, FrameInput, OitPass, OitSettings};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn frames_complete_while_global_pool_is_occupied() {
    init_logging();
    rayon::ThreadPoolBuilder::new()
        .num_threads(1)
        .build_global()
        .unwrap();

    // Park the only global worker until the frames are done.
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    rayon::spawn(move || {
        started_tx.send(()).unwrap();
        let _ = release_rx.recv();
    });
    started_rx.recv().unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        let dims = FrameDims::new(1024, 1024);
        let mut pass = OitPass::new(OitSettings {
            worker_threads: Some(2),
            ..OitSettings::default()
        })
        .unwrap();
        let fragments: Vec<Fragment> = (0..4096_u32)
            .map(|step| Fragment::new(step * 251 % (1024 * 1024), 1.0, [0.5, 0.5, 0.5, 0.5]))
            .collect();
        let input = FrameInput {
            fragments: &fragments,
            opaque_depth: None,
        };
        // The second frame reuses the tables and clears them in parallel.
        let mut inserted = Vec::new();
        for _ in 0..2 {
            let mut target = ColorTarget::cleared(dims);
            let stats = pass.execute(&input, &mut target).unwrap();
            inserted.push(stats.insertion.inserted);
        }
        let total = pass.fragment_counts().total();
        let _ = done_tx.send((inserted, total));
    });

    let outcome = done_rx.recv_timeout(Duration::from_secs(30));
    release_tx.send(()).unwrap();

    let (inserted, total) = outcome.expect("frame stalled behind the global rayon pool");
    assert_eq!(inserted, vec![4096, 4096]);
    assert_eq!(total, 4096);
}
