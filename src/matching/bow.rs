//! Bag-of-Words accelerated matching.
//!
//! Two feature sets are compared node by node: only features quantized to
//! the same vocabulary node are candidates for each other. The node level
//! is fixed when the feature vectors are computed.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::atlas::map::{KeyFrame, MapPoint};
use crate::tracking::frame::Frame;
use crate::vocabulary::FeatureVector;

use super::{descriptor_distance, OrbMatcher, RotationHistogram, TH_LOW};

/// Walk two feature vectors in node order and call `f` with the feature
/// indices of every node present in both.
///
/// When the nodes differ, the side that is behind jumps straight to the
/// first node not below the other side's current node.
pub(crate) fn for_each_shared_node<F>(a: &FeatureVector, b: &FeatureVector, mut f: F)
where
    F: FnMut(&[usize], &[usize]),
{
    let mut a_it = a.range(..).peekable();
    let mut b_it = b.range(..).peekable();

    while let (Some((&a_node, a_idx)), Some((&b_node, b_idx))) = (a_it.peek().copied(), b_it.peek().copied()) {
        match a_node.cmp(&b_node) {
            Ordering::Equal => {
                f(a_idx.as_slice(), b_idx.as_slice());
                a_it.next();
                b_it.next();
            }
            Ordering::Less => a_it = a.range(b_node..).peekable(),
            Ordering::Greater => b_it = b.range(a_node..).peekable(),
        }
    }
}

/// Best and second-best descriptor distances of one search.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BestTwo {
    pub best: u32,
    pub second: u32,
    pub idx: Option<usize>,
}

impl BestTwo {
    pub fn new() -> Self {
        Self {
            best: 256,
            second: 256,
            idx: None,
        }
    }

    pub fn offer(&mut self, dist: u32, idx: usize) {
        if dist < self.best {
            self.second = self.best;
            self.best = dist;
            self.idx = Some(idx);
        } else if dist < self.second {
            self.second = dist;
        }
    }

    /// Whether the best is clearly better than the runner-up.
    pub fn passes_ratio(&self, nn_ratio: f64) -> bool {
        (self.best as f64) < nn_ratio * self.second as f64
    }
}

impl OrbMatcher {
    /// Match the MapPoints of a KeyFrame to the features of a Frame.
    ///
    /// Both need a feature vector. Returns the number of matches and the
    /// frame-aligned list of matched points.
    pub fn search_by_bow_frame(&self, keyframe: &KeyFrame, frame: &Frame) -> (usize, Vec<Option<Arc<MapPoint>>>) {
        let kf_points = keyframe.map_point_matches();
        let mut matches: Vec<Option<Arc<MapPoint>>> = vec![None; frame.len()];
        let mut n_matches = 0;
        let mut rot_hist = RotationHistogram::new();

        for_each_shared_node(
            &keyframe.features.feature_vector,
            &frame.features.feature_vector,
            |kf_indices, frame_indices| {
                for &idx_kf in kf_indices {
                    let Some(mp) = &kf_points[idx_kf] else {
                        continue;
                    };
                    if mp.is_bad() {
                        continue;
                    }

                    let kf_desc = &keyframe.features.descriptors[idx_kf];
                    let mut search = BestTwo::new();
                    for &idx_f in frame_indices {
                        if matches[idx_f].is_some() {
                            continue;
                        }
                        search.offer(descriptor_distance(kf_desc, &frame.features.descriptors[idx_f]), idx_f);
                    }

                    let Some(idx_f) = search.idx else {
                        continue;
                    };
                    if search.best > TH_LOW || !search.passes_ratio(self.nn_ratio) {
                        continue;
                    }

                    matches[idx_f] = Some(Arc::clone(mp));
                    n_matches += 1;
                    if self.check_orientation {
                        rot_hist.add(
                            keyframe.features.keys_un[idx_kf].angle,
                            frame.features.keys[idx_f].angle,
                            idx_f,
                        );
                    }
                }
            },
        );

        if self.check_orientation {
            for idx in rot_hist.outliers() {
                if matches[idx].take().is_some() {
                    n_matches -= 1;
                }
            }
        }

        debug!("[Matcher] BoW {} → {}: {} matches", keyframe.id, frame.id, n_matches);
        (n_matches, matches)
    }

    /// Match the MapPoints of two KeyFrames through their feature vectors.
    ///
    /// Returns the number of matches and a list aligned with the features
    /// of `kf1` holding the matched MapPoint of `kf2`.
    pub fn search_by_bow_keyframes(&self, kf1: &KeyFrame, kf2: &KeyFrame) -> (usize, Vec<Option<Arc<MapPoint>>>) {
        let points1 = kf1.map_point_matches();
        let points2 = kf2.map_point_matches();

        let mut matches12: Vec<Option<Arc<MapPoint>>> = vec![None; points1.len()];
        let mut matched2 = vec![false; points2.len()];
        let mut n_matches = 0;
        let mut rot_hist = RotationHistogram::new();

        for_each_shared_node(
            &kf1.features.feature_vector,
            &kf2.features.feature_vector,
            |indices1, indices2| {
                for &idx1 in indices1 {
                    match &points1[idx1] {
                        Some(mp1) if !mp1.is_bad() => {}
                        _ => continue,
                    }

                    let desc1 = &kf1.features.descriptors[idx1];
                    let mut search = BestTwo::new();
                    for &idx2 in indices2 {
                        if matched2[idx2] {
                            continue;
                        }
                        match &points2[idx2] {
                            Some(mp2) if !mp2.is_bad() => {}
                            _ => continue,
                        }
                        search.offer(descriptor_distance(desc1, &kf2.features.descriptors[idx2]), idx2);
                    }

                    let Some(idx2) = search.idx else {
                        continue;
                    };
                    if search.best >= TH_LOW || !search.passes_ratio(self.nn_ratio) {
                        continue;
                    }

                    matches12[idx1] = points2[idx2].clone();
                    matched2[idx2] = true;
                    n_matches += 1;
                    if self.check_orientation {
                        rot_hist.add(kf1.features.keys_un[idx1].angle, kf2.features.keys_un[idx2].angle, idx1);
                    }
                }
            },
        );

        if self.check_orientation {
            for idx1 in rot_hist.outliers() {
                if matches12[idx1].take().is_some() {
                    n_matches -= 1;
                }
            }
        }

        debug!("[Matcher] BoW {} → {}: {} matches", kf1.id, kf2.id, n_matches);
        (n_matches, matches12)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    use crate::atlas::map::{FrameId, Map};
    use crate::geometry::SE3;
    use crate::matching::test_support::*;
    use crate::tracking::frame::{KeyPoint, ScalePyramid};

    fn fv(entries: Vec<(u32, Vec<usize>)>) -> FeatureVector {
        entries.into_iter().collect()
    }

    fn keys(n: usize, angle: f64) -> Vec<KeyPoint> {
        (0..n).map(|i| KeyPoint::new(50.0 + 40.0 * i as f64, 100.0, angle, 0)).collect()
    }

    /// KeyFrame whose every feature holds a MapPoint.
    fn populated_keyframe(
        map: &Arc<Map>,
        id: u64,
        keys: Vec<KeyPoint>,
        descriptors: Vec<[u8; 32]>,
        feature_vector: FeatureVector,
    ) -> Arc<KeyFrame> {
        let n = keys.len();
        let kf = keyframe(id, mono_features(keys, descriptors).with_feature_vector(feature_vector), SE3::identity());
        for i in 0..n {
            observed_point(map, Vector3::new(i as f64, 0.0, 10.0), &kf, i);
        }
        kf
    }

    #[test]
    fn test_shared_node_walk() {
        let a = fv(vec![(1, vec![0]), (3, vec![1]), (5, vec![2]), (9, vec![3])]);
        let b = fv(vec![(2, vec![10]), (3, vec![11]), (7, vec![12]), (9, vec![13, 14])]);
        let mut visited = Vec::new();
        for_each_shared_node(&a, &b, |x, y| visited.push((x.to_vec(), y.to_vec())));
        assert_eq!(visited, vec![(vec![1], vec![11]), (vec![3], vec![13, 14])]);

        let empty = FeatureVector::new();
        let mut count = 0;
        for_each_shared_node(&a, &empty, |_, _| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_keyframe_frame_only_compares_shared_node() {
        let map = Map::new();
        // a, b, c all zero descriptors
        let kf = populated_keyframe(&map, 1, keys(3, 0.0), vec![[0u8; 32]; 3], fv(vec![(1, vec![0]), (3, vec![1]), (5, vec![2])]));

        // x and z would be perfect matches but live in other nodes
        let features = mono_features(keys(3, 0.0), vec![[0u8; 32], descriptor_with_bits(30), [0u8; 32]])
            .with_feature_vector(fv(vec![(2, vec![0]), (3, vec![1]), (7, vec![2])]));
        let frame = Frame::new(FrameId(2), features, camera(), ScalePyramid::default());

        let (n, matches) = OrbMatcher::default().search_by_bow_frame(&kf, &frame);

        assert_eq!(n, 1);
        assert!(matches[0].is_none());
        assert_eq!(matches[1].as_ref().map(|p| p.id), kf.map_point(1).map(|p| p.id));
        assert!(matches[2].is_none());
    }

    #[test]
    fn test_keyframe_frame_threshold_and_ratio() {
        let map = Map::new();
        let kf = populated_keyframe(&map, 1, keys(1, 0.0), vec![[0u8; 32]], fv(vec![(4, vec![0])]));
        let matcher = OrbMatcher::default();

        let frame_with = |descs: Vec<[u8; 32]>| {
            let n = descs.len();
            let idx: Vec<usize> = (0..n).collect();
            let features = mono_features(keys(n, 0.0), descs).with_feature_vector(fv(vec![(4, idx.clone())]));
            Frame::new(FrameId(2), features, camera(), ScalePyramid::default())
        };

        // Distance exactly TH_LOW is accepted for a frame
        assert_eq!(matcher.search_by_bow_frame(&kf, &frame_with(vec![descriptor_with_bits(50)])).0, 1);
        assert_eq!(matcher.search_by_bow_frame(&kf, &frame_with(vec![descriptor_with_bits(51)])).0, 0);
        // 20 vs 30: 20 is not below 0.6 · 30
        let ambiguous = frame_with(vec![descriptor_with_bits(20), descriptor_bits_at(100, 30)]);
        assert_eq!(matcher.search_by_bow_frame(&kf, &ambiguous).0, 0);
        assert_eq!(OrbMatcher::new(0.9, true).search_by_bow_frame(&kf, &ambiguous).0, 1);
    }

    #[test]
    fn test_keyframe_frame_skips_bad_points_and_taken_features() {
        let map = Map::new();
        let kf = populated_keyframe(&map, 1, keys(3, 0.0), vec![[0u8; 32]; 3], fv(vec![(4, vec![0, 1, 2])]));
        if let Some(mp) = kf.map_point(2) {
            mp.set_bad_flag();
        }

        let features = mono_features(keys(2, 0.0), vec![descriptor_with_bits(1), descriptor_with_bits(2)])
            .with_feature_vector(fv(vec![(4, vec![0, 1])]));
        let frame = Frame::new(FrameId(2), features, camera(), ScalePyramid::default());

        let (n, matches) = OrbMatcher::new(1.0, false).search_by_bow_frame(&kf, &frame);
        // KF feature 0 takes frame feature 0, KF feature 1 falls back to 1
        assert_eq!(n, 2);
        assert_eq!(matches[0].as_ref().map(|p| p.id), kf.map_point(0).map(|p| p.id));
        assert_eq!(matches[1].as_ref().map(|p| p.id), kf.map_point(1).map(|p| p.id));
    }

    #[test]
    fn test_keyframes_match_and_rotation_filter() {
        let map = Map::new();
        let n = 12;
        let idx: Vec<usize> = (0..n).collect();
        let descs: Vec<[u8; 32]> = (0..n).map(|i| descriptor_bits_at(i * 20, 20)).collect();
        let kf1 = populated_keyframe(&map, 1, keys(n, 40.0), descs.clone(), fv(vec![(6, idx.clone())]));

        let mut keys2 = keys(n, 40.0);
        keys2[5].angle = 200.0;
        let kf2 = populated_keyframe(&map, 2, keys2, descs, fv(vec![(6, idx.clone())]));

        let (count, matches12) = OrbMatcher::default().search_by_bow_keyframes(&kf1, &kf2);

        assert_eq!(count, n - 1);
        for i in 0..n {
            let expected = if i == 5 { None } else { kf2.map_point(i).map(|p| p.id) };
            assert_eq!(matches12[i].as_ref().map(|p| p.id), expected);
        }
    }

    #[test]
    fn test_keyframes_require_points_on_both_sides() {
        let map = Map::new();
        let kf1 = populated_keyframe(&map, 1, keys(2, 0.0), vec![[0u8; 32]; 2], fv(vec![(3, vec![0, 1])]));
        let kf2 = keyframe(
            2,
            mono_features(keys(2, 0.0), vec![[0u8; 32], descriptor_with_bits(10)]).with_feature_vector(fv(vec![(3, vec![0, 1])])),
            SE3::identity(),
        );
        // Only feature 1 of KF2 carries a point
        let mp = observed_point(&map, Vector3::new(0.0, 0.0, 10.0), &kf2, 1);

        let (count, matches12) = OrbMatcher::new(1.0, true).search_by_bow_keyframes(&kf1, &kf2);
        assert_eq!(count, 1);
        assert_eq!(matches12[0].as_ref().map(|p| p.id), Some(mp.id));
        assert!(matches12[1].is_none());
    }

    #[test]
    fn test_keyframes_threshold_is_strict() {
        let map = Map::new();
        let kf1 = populated_keyframe(&map, 1, keys(1, 0.0), vec![[0u8; 32]], fv(vec![(3, vec![0])]));
        let kf2 = populated_keyframe(&map, 2, keys(1, 0.0), vec![descriptor_with_bits(50)], fv(vec![(3, vec![0])]));
        assert_eq!(OrbMatcher::default().search_by_bow_keyframes(&kf1, &kf2).0, 0);

        let kf3 = populated_keyframe(&map, 3, keys(1, 0.0), vec![descriptor_with_bits(49)], fv(vec![(3, vec![0])]));
        assert_eq!(OrbMatcher::default().search_by_bow_keyframes(&kf1, &kf3).0, 1);
    }
}
