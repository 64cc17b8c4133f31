//! Monocular map initialization: match the finest-level features of a
//! reference frame into the current frame around their previous matches.

use nalgebra::Point2;
use tracing::debug;

use crate::tracking::frame::Frame;

use super::{descriptor_distance, OrbMatcher, RotationHistogram, TH_LOW};

impl OrbMatcher {
    /// Match level-0 features of `f1` into `f2`.
    ///
    /// Feature `i` of `f1` is searched in a square window of half-side
    /// `window_size` around `prev_matched[i]`. A feature of `f2` keeps the
    /// closest `f1` feature claiming it; the loser is unmatched. On return
    /// `prev_matched[i]` holds the position of the new match.
    ///
    /// Returns the number of matches and, per `f1` feature, the matched
    /// `f2` index.
    pub fn search_for_initialization(
        &self,
        f1: &Frame,
        f2: &Frame,
        prev_matched: &mut [Point2<f64>],
        window_size: f64,
    ) -> (usize, Vec<Option<usize>>) {
        let mut matches12: Vec<Option<usize>> = vec![None; f1.len()];
        let mut matches21: Vec<Option<usize>> = vec![None; f2.len()];
        let mut matched_distance = vec![u32::MAX; f2.len()];
        let mut n_matches = 0;
        let mut rot_hist = RotationHistogram::new();

        for (i1, kp1) in f1.features.keys_un.iter().enumerate() {
            if kp1.octave > 0 {
                continue;
            }

            let prev = prev_matched[i1];
            let indices2 = f2.features.features_in_area(prev.x, prev.y, window_size, Some(0), Some(0));
            if indices2.is_empty() {
                continue;
            }

            let d1 = &f1.features.descriptors[i1];
            let mut best_dist = u32::MAX;
            let mut best_dist2 = u32::MAX;
            let mut best_idx2 = None;

            for i2 in indices2 {
                let dist = descriptor_distance(d1, &f2.features.descriptors[i2]);
                if matched_distance[i2] <= dist {
                    continue;
                }
                if dist < best_dist {
                    best_dist2 = best_dist;
                    best_dist = dist;
                    best_idx2 = Some(i2);
                } else if dist < best_dist2 {
                    best_dist2 = dist;
                }
            }

            let Some(i2) = best_idx2 else {
                continue;
            };
            if best_dist > TH_LOW || (best_dist as f64) >= best_dist2 as f64 * self.nn_ratio {
                continue;
            }

            if let Some(previous) = matches21[i2] {
                matches12[previous] = None;
                n_matches -= 1;
            }

            matches12[i1] = Some(i2);
            matches21[i2] = Some(i1);
            matched_distance[i2] = best_dist;
            n_matches += 1;

            if self.check_orientation {
                rot_hist.add(kp1.angle, f2.features.keys_un[i2].angle, i1);
            }
        }

        if self.check_orientation {
            for i1 in rot_hist.outliers() {
                if matches12[i1].take().is_some() {
                    n_matches -= 1;
                }
            }
        }

        for (prev, m) in prev_matched.iter_mut().zip(&matches12) {
            if let Some(i2) = m {
                *prev = f2.features.keys_un[*i2].pt;
            }
        }

        debug!("[Matcher] initialization {} → {}: {} matches", f1.id, f2.id, n_matches);
        (n_matches, matches12)
    }
}
