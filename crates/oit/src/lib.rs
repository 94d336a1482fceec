//! Order-independent transparency with per-pixel linked lists.
//!
//! Transparent fragments are stored per pixel in the order they arrive and
//! sorted only once every fragment of the frame is known:
//!
//! ```text
//! Insertion: fragment -> arena record -> atomic push onto head[pixel]
//!     ↓ barrier
//! Classification: per-pixel count -> sorter bucket
//!     ↓
//! Resolve: walk chain -> sort by depth -> blend over opaque color
//! ```
//!
//! The arena has a fixed capacity per frame. Fragments arriving after it is
//! full are dropped and counted; they never corrupt the lists.
//!
//! # Example
//!
//! ```
//! use oit::{ColorTarget, Fragment, FrameDims, FrameInput, OitPass, OitSettings};
//!
//! let mut pass = OitPass::new(OitSettings::default()).unwrap();
//! let dims = FrameDims::new(2, 2);
//! let mut target = ColorTarget::cleared(dims);
//! let fragments = [
//!     Fragment::new(0, 2.0, [0.0, 0.0, 1.0, 0.5]),
//!     Fragment::new(0, 1.0, [1.0, 0.0, 0.0, 0.5]),
//! ];
//! let input = FrameInput { fragments: &fragments, opaque_depth: None };
//! let stats = pass.execute(&input, &mut target).unwrap();
//! assert_eq!(stats.insertion.inserted, 2);
//! ```

#![allow(
    clippy::module_name_repetitions,
    reason = "Types like FragmentArena read better than Arena at call sites"
)]
#![allow(clippy::missing_panics_doc, reason = "Internal crate")]

pub mod arena;
pub mod bucket;
pub mod composite;
pub mod fragment;
pub mod frame;
pub mod head_table;
pub mod insert;
pub mod pass;
pub mod resolve;
pub mod settings;
pub mod sort;
pub mod target;
pub mod telemetry;

pub use arena::{FragmentArena, Overflow};
pub use bucket::{BucketHistogram, SortBucket, classify};
pub use composite::{BlendOrder, PremultipliedLayer, blend_over, composite_layers};
pub use fragment::{Fragment, FragmentRecord, MaterialId, RecordIndex};
pub use frame::{ChainIter, FrameArena, FrameDims};
pub use insert::{InsertContext, InsertOutcome, InsertionReport, insert_fragment, run_insertion};
pub use pass::{FrameInput, OitPass};
pub use resolve::{ResolveReport, resolve_pixel, run_resolve};
pub use settings::OitSettings;
pub use sort::{FixedWorkingSet, Layer, layer_order, sort_general};
pub use target::{ColorTarget, DepthBuffer};
pub use telemetry::{FragmentCountTexture, FrameStats};
