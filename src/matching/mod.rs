//! ORB feature matching.
//!
//! [`OrbMatcher`] bundles the routines that associate features with each
//! other or with map points:
//!
//! | routine | module | used by |
//! |---|---|---|
//! | [`OrbMatcher::search_local_points`] | `projection` | tracking, local map |
//! | [`OrbMatcher::search_by_projection_last_frame`] | `projection` | tracking, motion model |
//! | [`OrbMatcher::search_by_projection_keyframe`] | `projection` | relocalization |
//! | [`OrbMatcher::search_by_projection_sim3`] | `projection` | loop closing |
//! | [`OrbMatcher::search_by_bow_frame`], [`OrbMatcher::search_by_bow_keyframes`] | `bow` | tracking, loop detection |
//! | [`OrbMatcher::search_for_initialization`] | `initialization` | monocular bootstrap |
//! | [`OrbMatcher::search_for_triangulation`] | `triangulation` | local mapping |
//! | [`OrbMatcher::fuse`], [`OrbMatcher::fuse_sim3`] | `fuse` | local mapping, loop closing |
//! | [`OrbMatcher::search_by_sim3`] | `sim3` | loop closing |
//!
//! Every routine follows the same shape: pick a search window, collect
//! candidates from the spatial grid or a shared vocabulary node, keep the
//! closest descriptor, apply the distance threshold and ratio test, vote
//! the angular residual, and finally drop matches outside the dominant
//! rotation bins. Routines return the number of matches and never fail.

pub mod bow;
pub mod descriptor;
pub mod fuse;
pub mod initialization;
pub mod projection;
pub mod rotation;
pub mod sim3;
pub mod triangulation;

use std::path::Path;

use anyhow::Context;

use crate::config::{MatcherSettings, SettingsLoader};

pub use descriptor::{descriptor_distance, Descriptor};
pub use rotation::{compute_three_maxima, rotation_bin, RotationHistogram};
pub use triangulation::{check_dist_epipolar_line, compute_f12};

/// Loose descriptor-distance threshold.
pub const TH_HIGH: u32 = 100;
/// Strict descriptor-distance threshold.
pub const TH_LOW: u32 = 50;
/// Number of rotation-histogram bins.
pub const HISTO_LENGTH: usize = 30;

/// Feature matcher configuration.
///
/// The matcher itself is stateless between calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbMatcher {
    /// Best / second-best acceptance ratio.
    pub nn_ratio: f64,
    /// Apply the rotation-consistency filter.
    pub check_orientation: bool,
}

impl OrbMatcher {
    pub fn new(nn_ratio: f64, check_orientation: bool) -> Self {
        Self {
            nn_ratio,
            check_orientation,
        }
    }

    pub fn from_settings(settings: &MatcherSettings) -> Self {
        Self::new(settings.nn_ratio, settings.check_orientation)
    }

    /// Load a matcher from a YAML settings file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let settings = SettingsLoader::load(path)
            .with_context(|| format!("loading matcher settings from {}", path.display()))?;
        Ok(Self::from_settings(&settings))
    }

    /// Base search radius (pixels) for a point seen at `view_cos` from its
    /// mean viewing direction.
    pub fn radius_by_viewing_cos(view_cos: f64) -> f64 {
        if view_cos > 0.998 {
            2.5
        } else {
            4.0
        }
    }
}

impl Default for OrbMatcher {
    fn default() -> Self {
        Self::new(0.6, true)
    }
}
