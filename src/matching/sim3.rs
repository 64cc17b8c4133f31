//! Bidirectional matching between the map points of two KeyFrames related
//! by a similarity, as proposed by loop detection.

use std::sync::Arc;

use nalgebra::Vector3;
use tracing::debug;

use crate::atlas::map::{KeyFrame, MapPoint};
use crate::geometry::Sim3;

use super::{descriptor_distance, OrbMatcher, TH_HIGH};

/// For every unmatched point of `from`, the feature of `to` it best
/// matches after moving it with `s_to_from` from `from`'s camera frame into
/// `to`'s.
fn project_points(
    from: &KeyFrame,
    from_points: &[Option<Arc<MapPoint>>],
    already_matched: &[bool],
    to: &KeyFrame,
    s_to_from: &Sim3,
    th: f64,
) -> Vec<Option<usize>> {
    let pose = from.pose_cw();
    let mut best = vec![None; from_points.len()];

    for (i, slot) in from_points.iter().enumerate() {
        let Some(mp) = slot else {
            continue;
        };
        if already_matched[i] || mp.is_bad() {
            continue;
        }

        let p_from: Vector3<f64> = pose.transform_point(&mp.world_pos());
        let p_to = s_to_from.transform_point(&p_from);
        if p_to.z <= 0.0 {
            continue;
        }
        let (u, v) = to.camera.project(&p_to);
        if !to.is_in_image(u, v) {
            continue;
        }

        let dist3d = p_to.norm();
        if dist3d < mp.min_distance_invariance() || dist3d > mp.max_distance_invariance() {
            continue;
        }

        let level = mp.predict_scale(dist3d, &to.pyramid);
        let radius = th * to.pyramid.scale_factors[level];
        let indices = to
            .features
            .features_in_area(u, v, radius, level.checked_sub(1), Some(level));

        let mp_desc = mp.descriptor();
        let mut best_dist = u32::MAX;
        let mut best_idx = None;
        for idx in indices {
            let dist = descriptor_distance(&mp_desc, &to.features.descriptors[idx]);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(idx);
            }
        }

        if best_dist <= TH_HIGH {
            best[i] = best_idx;
        }
    }

    best
}

impl OrbMatcher {
    /// Match the map points of `kf1` and `kf2` through the similarity
    /// `s12`, mapping `kf2` camera coordinates to `kf1` camera coordinates.
    ///
    /// Points of each KeyFrame are projected into the other; a pair is kept
    /// only when both directions agree. `matches12[i1]` is set to the point
    /// of `kf2` matched with feature `i1` of `kf1`. Entries already present
    /// in `matches12` are left alone and their points take no part in the
    /// search.
    ///
    /// Returns the number of new matches.
    pub fn search_by_sim3(
        &self,
        kf1: &KeyFrame,
        kf2: &KeyFrame,
        matches12: &mut [Option<Arc<MapPoint>>],
        s12: &Sim3,
        th: f64,
    ) -> usize {
        let s21 = s12.inverse();

        let points1 = kf1.map_point_matches();
        let points2 = kf2.map_point_matches();

        let mut already1 = vec![false; points1.len()];
        let mut already2 = vec![false; points2.len()];
        for (i1, m) in matches12.iter().enumerate() {
            if let Some(mp) = m {
                already1[i1] = true;
                if let Some(idx2) = mp.index_in_keyframe(kf2.id) {
                    if idx2 < already2.len() {
                        already2[idx2] = true;
                    }
                }
            }
        }

        let match1 = project_points(kf1, &points1, &already1, kf2, &s21, th);
        let match2 = project_points(kf2, &points2, &already2, kf1, s12, th);

        let mut n_found = 0;
        for (i1, m) in match1.iter().enumerate() {
            let Some(idx2) = *m else {
                continue;
            };
            if match2[idx2] == Some(i1) {
                matches12[i1] = points2[idx2].clone();
                n_found += 1;
            }
        }

        debug!("[Matcher] sim3 {} ↔ {}: {} matches (s = {:.3})", kf1.id, kf2.id, n_found, s12.scale);
        n_found
    }
}
