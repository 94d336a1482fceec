//! Runtime settings of the transparency pass.

use crate::composite::BlendOrder;
use crate::fragment::MaterialId;
use anyhow::{Context as _, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Smallest arena the pass will allocate.
pub const MIN_ARENA_CAPACITY: u32 = 1024;
/// Largest arena the pass will allocate.
pub const MAX_ARENA_CAPACITY: u32 = 1024 * 1024 * 1024;
/// Arena size used when none is configured.
pub const DEFAULT_ARENA_CAPACITY: u32 = 1 << 20;

/// Settings consumed by [`crate::OitPass`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OitSettings {
    /// Fragment records available per frame.
    pub arena_capacity: u32,
    /// Route pixels to fixed-capacity sorters by fragment count.
    pub optimize_sort: bool,
    /// Sequence in which sorted layers are blended.
    pub blend_order: BlendOrder,
    /// Only these materials are inserted; `None` inserts all.
    pub material_whitelist: Option<BTreeSet<MaterialId>>,
    /// Worker threads; `None` uses one per core.
    pub worker_threads: Option<usize>,
}

impl Default for OitSettings {
    fn default() -> Self {
        Self {
            arena_capacity: DEFAULT_ARENA_CAPACITY,
            optimize_sort: true,
            blend_order: BlendOrder::default(),
            material_whitelist: None,
            worker_threads: None,
        }
    }
}

impl OitSettings {
    /// Parse settings from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("parsing transparency settings")
    }

    /// Arena capacity clamped to the supported range.
    pub fn effective_capacity(&self) -> u32 {
        let clamped = self
            .arena_capacity
            .clamp(MIN_ARENA_CAPACITY, MAX_ARENA_CAPACITY);
        if clamped != self.arena_capacity {
            warn!(
                target: "oit",
                "arena capacity {} out of range, using {clamped}",
                self.arena_capacity
            );
        }
        clamped
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

    #[test]
    fn json_fills_missing_fields() {
        let settings =
            OitSettings::from_json(r#"{ "arena_capacity": 4096, "blend_order": "front_to_back" }"#)
                .unwrap();
        assert_eq!(settings.arena_capacity, 4096);
        assert_eq!(settings.blend_order, BlendOrder::FrontToBack);
        assert!(settings.optimize_sort);
        assert_eq!(settings.material_whitelist, None);
    }

    #[test]
    fn whitelist_parses() {
        let settings = OitSettings::from_json(r#"{ "material_whitelist": [3, 1] }"#).unwrap();
        assert_eq!(
            settings.material_whitelist,
            Some(BTreeSet::from([MaterialId(1), MaterialId(3)]))
        );
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(OitSettings::from_json("{ arena_capacity: }").is_err());
    }

    #[test]
    fn capacity_is_clamped() {
        let mut settings = OitSettings {
            arena_capacity: 10,
            ..OitSettings::default()
        };
        assert_eq!(settings.effective_capacity(), MIN_ARENA_CAPACITY);
        settings.arena_capacity = u32::MAX;
        assert_eq!(settings.effective_capacity(), MAX_ARENA_CAPACITY);
        settings.arena_capacity = 5000;
        assert_eq!(settings.effective_capacity(), 5000);
    }
}
