//! Candidate pairs for new map points between two KeyFrames.
//!
//! Only features without a MapPoint on either side are considered. Pairs
//! must share a vocabulary node, be close in descriptor space and satisfy
//! the epipolar constraint given by the fundamental matrix `F12`.

use nalgebra::{Matrix3, Vector3};
use tracing::debug;

use crate::atlas::map::KeyFrame;
use crate::tracking::frame::{KeyPoint, ScalePyramid};

use super::bow::for_each_shared_node;
use super::{descriptor_distance, OrbMatcher, RotationHistogram, TH_LOW};

/// Chi-square 95% quantile, one degree of freedom.
const CHI2_1DOF: f64 = 3.84;

/// Whether `kp2` lies close enough to the epipolar line of `kp1`.
///
/// The line in image 2 is `kp1ᵀ · F12`; the squared point-line distance
/// must stay below `3.84 · σ²` of the octave `kp2` was detected at. A
/// degenerate line (both direction coefficients zero) never matches.
pub fn check_dist_epipolar_line(
    kp1: &KeyPoint,
    kp2: &KeyPoint,
    f12: &Matrix3<f64>,
    pyramid2: &ScalePyramid,
) -> bool {
    let (x1, y1) = (kp1.pt.x, kp1.pt.y);
    let a = x1 * f12[(0, 0)] + y1 * f12[(1, 0)] + f12[(2, 0)];
    let b = x1 * f12[(0, 1)] + y1 * f12[(1, 1)] + f12[(2, 1)];
    let c = x1 * f12[(0, 2)] + y1 * f12[(1, 2)] + f12[(2, 2)];

    let num = a * kp2.pt.x + b * kp2.pt.y + c;
    let den = a * a + b * b;
    if den == 0.0 {
        return false;
    }

    num * num / den < CHI2_1DOF * pyramid2.level_sigma2[kp2.octave]
}

/// Fundamental matrix with `x1ᵀ · F12 · x2 = 0` for pixels of `kf1` and `kf2`.
pub fn compute_f12(kf1: &KeyFrame, kf2: &KeyFrame) -> Matrix3<f64> {
    let r1w = kf1.rotation_cw();
    let t1w = kf1.translation_cw();
    let r2w = kf2.rotation_cw();
    let t2w = kf2.translation_cw();

    let r12 = r1w * r2w.transpose();
    let t12 = -r12 * t2w + t1w;
    let e12 = t12.cross_matrix() * r12;

    let k1_inv = kf1
        .camera
        .calibration_matrix()
        .try_inverse()
        .unwrap_or_else(Matrix3::zeros);
    let k2_inv = kf2
        .camera
        .calibration_matrix()
        .try_inverse()
        .unwrap_or_else(Matrix3::zeros);

    k1_inv.transpose() * e12 * k2_inv
}

impl OrbMatcher {
    /// Pair unmatched features of `kf1` and `kf2` for triangulation.
    ///
    /// With `only_stereo`, both features need a right-image measurement.
    /// When neither does, candidates near the epipole of `kf1` in `kf2`
    /// are dropped: their rays are close to parallel. Returns the accepted
    /// `(idx1, idx2)` pairs.
    pub fn search_for_triangulation(
        &self,
        kf1: &KeyFrame,
        kf2: &KeyFrame,
        f12: &Matrix3<f64>,
        only_stereo: bool,
    ) -> Vec<(usize, usize)> {
        // Epipole: center of KF1 seen from KF2
        let c2: Vector3<f64> = kf2.pose_cw().transform_point(&kf1.camera_center());
        let (ex, ey) = kf2.camera.project(&c2);

        let points1 = kf1.map_point_matches();
        let points2 = kf2.map_point_matches();
        let features1 = &kf1.features;
        let features2 = &kf2.features;

        let mut matched2 = vec![false; features2.len()];
        let mut matches12: Vec<Option<usize>> = vec![None; features1.len()];
        let mut n_matches = 0usize;
        let mut rot_hist = RotationHistogram::new();

        for_each_shared_node(&features1.feature_vector, &features2.feature_vector, |indices1, indices2| {
            for &idx1 in indices1 {
                if points1[idx1].is_some() {
                    continue;
                }
                let stereo1 = features1.is_stereo(idx1);
                if only_stereo && !stereo1 {
                    continue;
                }

                let kp1 = &features1.keys_un[idx1];
                let d1 = &features1.descriptors[idx1];

                let mut best_dist = TH_LOW;
                let mut best_idx2 = None;

                for &idx2 in indices2 {
                    if matched2[idx2] || points2[idx2].is_some() {
                        continue;
                    }
                    let stereo2 = features2.is_stereo(idx2);
                    if only_stereo && !stereo2 {
                        continue;
                    }

                    let dist = descriptor_distance(d1, &features2.descriptors[idx2]);
                    if dist > TH_LOW || dist > best_dist {
                        continue;
                    }

                    let kp2 = &features2.keys_un[idx2];
                    if !stereo1 && !stereo2 {
                        let dx = ex - kp2.pt.x;
                        let dy = ey - kp2.pt.y;
                        let sf = kf2.pyramid.scale_factors[kp2.octave];
                        if dx * dx + dy * dy < 100.0 * sf * sf {
                            continue;
                        }
                    }

                    if check_dist_epipolar_line(kp1, kp2, f12, &kf2.pyramid) {
                        best_idx2 = Some(idx2);
                        best_dist = dist;
                    }
                }

                if let Some(idx2) = best_idx2 {
                    matches12[idx1] = Some(idx2);
                    matched2[idx2] = true;
                    n_matches += 1;
                    if self.check_orientation {
                        rot_hist.add(kp1.angle, features2.keys_un[idx2].angle, idx1);
                    }
                }
            }
        });

        if self.check_orientation {
            for idx1 in rot_hist.outliers() {
                if let Some(idx2) = matches12[idx1].take() {
                    matched2[idx2] = false;
                    n_matches -= 1;
                }
            }
        }

        debug!("[Matcher] triangulation {} ↔ {}: {} pairs", kf1.id, kf2.id, n_matches);

        matches12
            .into_iter()
            .enumerate()
            .filter_map(|(idx1, m)| m.map(|idx2| (idx1, idx2)))
            .collect()
    }
}
