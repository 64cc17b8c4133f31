//! Map point fusion.
//!
//! Projects candidate MapPoints into a KeyFrame and merges them with the
//! points its features already observe. Used after triangulation to clean
//! up duplicates between neighbouring KeyFrames, and after loop closure to
//! weld the two sides of the loop together.

use std::sync::Arc;

use nalgebra::Vector3;
use tracing::debug;

use crate::atlas::map::{KeyFrame, MapPoint};
use crate::geometry::{ScaleFreePose, Sim3};

use super::{descriptor_distance, OrbMatcher, TH_LOW};

/// Chi-square 95% quantile, two degrees of freedom.
const CHI2_2DOF: f64 = 5.99;
/// Chi-square 95% quantile, three degrees of freedom.
const CHI2_3DOF: f64 = 7.8;

/// Where a MapPoint lands in a KeyFrame and which features may match it.
struct Projection {
    u: f64,
    v: f64,
    /// Camera-frame depth.
    z: f64,
    candidates: Vec<usize>,
}

/// Project `mp`, already moved into the camera frame as `p_c`, and collect
/// feature candidates around its pixel. `center` is the camera center.
///
/// `None` when the point is behind the camera, outside the image, outside
/// its depth band or seen at more than 60° from its mean viewing direction.
fn project_into(
    kf: &KeyFrame,
    mp: &MapPoint,
    p_c: Vector3<f64>,
    center: &Vector3<f64>,
    th: f64,
) -> Option<Projection> {
    if p_c.z <= 0.0 {
        return None;
    }
    let (u, v) = kf.camera.project(&p_c);
    if !kf.is_in_image(u, v) {
        return None;
    }

    let po = mp.world_pos() - center;
    let dist = po.norm();
    if dist < mp.min_distance_invariance() || dist > mp.max_distance_invariance() {
        return None;
    }
    if po.dot(&mp.normal()) < 0.5 * dist {
        return None;
    }

    let level = mp.predict_scale(dist, &kf.pyramid);
    let radius = th * kf.pyramid.scale_factors[level];
    let candidates = kf
        .features
        .features_in_area(u, v, radius, level.checked_sub(1), Some(level));
    if candidates.is_empty() {
        return None;
    }

    Some(Projection {
        u,
        v,
        z: p_c.z,
        candidates,
    })
}

impl OrbMatcher {
    /// Fuse `points` into `kf` using its current pose.
    ///
    /// Each point is matched against the features around its projection
    /// whose reprojection error passes a chi-square test (95%, 2 dof for
    /// monocular features, 3 dof for stereo). On a match the feature's
    /// existing point and the candidate are merged, the one with fewer
    /// observations being replaced; an empty slot simply gains the
    /// candidate as a new observation.
    ///
    /// Returns the number of points fused.
    pub fn fuse(&self, kf: &Arc<KeyFrame>, points: &[Arc<MapPoint>], th: f64) -> usize {
        let pose = kf.pose_cw();
        let center = kf.camera_center();
        let bf = kf.camera.bf();
        let features = &kf.features;

        let mut n_fused = 0;

        for mp in points {
            if mp.is_bad() || mp.is_in_keyframe(kf.id) {
                continue;
            }

            let p_c = pose.transform_point(&mp.world_pos());
            let Some(proj) = project_into(kf, mp, p_c, &center, th) else {
                continue;
            };
            let ur = proj.u - bf / proj.z;

            let mp_desc = mp.descriptor();
            let mut best_dist = 256u32;
            let mut best_idx = None;

            for idx in proj.candidates {
                let kp = &features.keys_un[idx];
                let ex = proj.u - kp.pt.x;
                let ey = proj.v - kp.pt.y;
                let inv_sigma2 = kf.pyramid.inv_level_sigma2[kp.octave];

                if features.is_stereo(idx) {
                    let er = ur - features.right_coords[idx];
                    if (ex * ex + ey * ey + er * er) * inv_sigma2 > CHI2_3DOF {
                        continue;
                    }
                } else if (ex * ex + ey * ey) * inv_sigma2 > CHI2_2DOF {
                    continue;
                }

                let dist = descriptor_distance(&mp_desc, &features.descriptors[idx]);
                if dist < best_dist {
                    best_dist = dist;
                    best_idx = Some(idx);
                }
            }

            let Some(best_idx) = best_idx else {
                continue;
            };
            if best_dist > TH_LOW {
                continue;
            }

            match kf.map_point(best_idx) {
                Some(existing) => {
                    if !existing.is_bad() {
                        if existing.observation_count() > mp.observation_count() {
                            mp.replace(&existing);
                        } else {
                            existing.replace(mp);
                        }
                    }
                }
                None => {
                    mp.add_observation(kf, best_idx);
                    kf.add_map_point(Arc::clone(mp), best_idx);
                }
            }
            n_fused += 1;
        }

        debug!("[Matcher] fused {} of {} points into {}", n_fused, points.len(), kf.id);
        n_fused
    }

    /// Fuse loop-side `points` into `kf` seen through the corrected
    /// similarity `scw`.
    ///
    /// Points already observed by `kf` are skipped. Where the matched
    /// feature already holds a live point nothing is merged here: that
    /// point is reported in the returned replacement list, index-aligned
    /// with `points`, and the caller decides how to merge. Empty slots gain
    /// the candidate as a new observation.
    pub fn fuse_sim3(
        &self,
        kf: &Arc<KeyFrame>,
        scw: &Sim3,
        points: &[Arc<MapPoint>],
        th: f64,
    ) -> (usize, Vec<Option<Arc<MapPoint>>>) {
        let pose = ScaleFreePose::from_sim3(scw);
        let already_found = kf.map_point_ids();

        let mut replacements: Vec<Option<Arc<MapPoint>>> = vec![None; points.len()];
        let mut n_fused = 0;

        for (i, mp) in points.iter().enumerate() {
            if mp.is_bad() || already_found.contains(&mp.id) {
                continue;
            }

            let p_c = pose.transform_point(&mp.world_pos());
            let Some(proj) = project_into(kf, mp, p_c, &pose.center, th) else {
                continue;
            };

            let mp_desc = mp.descriptor();
            let mut best_dist = 256u32;
            let mut best_idx = None;
            for idx in proj.candidates {
                let dist = descriptor_distance(&mp_desc, &kf.features.descriptors[idx]);
                if dist < best_dist {
                    best_dist = dist;
                    best_idx = Some(idx);
                }
            }

            let Some(best_idx) = best_idx else {
                continue;
            };
            if best_dist > TH_LOW {
                continue;
            }

            match kf.map_point(best_idx) {
                Some(existing) => {
                    if !existing.is_bad() {
                        replacements[i] = Some(existing);
                    }
                }
                None => {
                    mp.add_observation(kf, best_idx);
                    kf.add_map_point(Arc::clone(mp), best_idx);
                }
            }
            n_fused += 1;
        }

        debug!("[Matcher] sim3 fused {} of {} points into {}", n_fused, points.len(), kf.id);
        (n_fused, replacements)
    }
}
