//! Projection-based search: project map points into an image and look for
//! the closest descriptor in a window around the projection.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::atlas::map::{KeyFrame, MapPoint, MapPointId};
use crate::geometry::{ScaleFreePose, Sim3};
use crate::tracking::frame::Frame;

use super::{descriptor_distance, OrbMatcher, RotationHistogram, TH_HIGH, TH_LOW};

impl OrbMatcher {
    /// Match local map points already projected by [`Frame::is_in_frustum`].
    ///
    /// Each point carries its predicted pixel, level and viewing cosine in
    /// its [`TrackProjection`](crate::atlas::map::TrackProjection). `th`
    /// widens the window (1.0 leaves it as is). Matched features get their
    /// slot in `frame.map_points` set. Returns the number of matches.
    pub fn search_local_points(&self, frame: &mut Frame, map_points: &[Arc<MapPoint>], th: f64) -> usize {
        let mut n_matches = 0;

        for mp in map_points {
            let track = mp.track_projection();
            if !track.in_view || mp.is_bad() {
                continue;
            }

            let level = track.scale_level;
            let mut r = Self::radius_by_viewing_cos(track.view_cos);
            if th != 1.0 {
                r *= th;
            }
            let radius = r * frame.pyramid.scale_factors[level];

            let indices = frame.features.features_in_area(
                track.proj_x,
                track.proj_y,
                radius,
                level.checked_sub(1),
                Some(level),
            );
            if indices.is_empty() {
                continue;
            }

            let mp_desc = mp.descriptor();
            let mut best_dist = 256u32;
            let mut best_level: Option<usize> = None;
            let mut best_dist2 = 256u32;
            let mut best_level2: Option<usize> = None;
            let mut best_idx = None;

            for idx in indices {
                if frame.map_points[idx]
                    .as_ref()
                    .is_some_and(|existing| existing.observation_count() > 0)
                {
                    continue;
                }

                let right = frame.features.right_coords[idx];
                if right > 0.0 && (track.proj_xr - right).abs() > radius {
                    continue;
                }

                let dist = descriptor_distance(&mp_desc, &frame.features.descriptors[idx]);
                let octave = frame.features.keys_un[idx].octave;
                if dist < best_dist {
                    best_dist2 = best_dist;
                    best_level2 = best_level;
                    best_dist = dist;
                    best_level = Some(octave);
                    best_idx = Some(idx);
                } else if dist < best_dist2 {
                    best_dist2 = dist;
                    best_level2 = Some(octave);
                }
            }

            let Some(best_idx) = best_idx else {
                continue;
            };
            if best_dist > TH_HIGH {
                continue;
            }
            // Ratio test only between candidates of the same octave
            if best_level == best_level2 && best_dist as f64 > self.nn_ratio * best_dist2 as f64 {
                continue;
            }

            frame.map_points[best_idx] = Some(Arc::clone(mp));
            n_matches += 1;
        }

        debug!("[Matcher] local points: {} matches", n_matches);
        n_matches
    }

    /// Track the points of the previous frame into the current one.
    ///
    /// Both frames need a pose (the current one predicted, e.g. by a motion
    /// model). For stereo and RGB-D input the camera's motion along its
    /// axis narrows the octave window: moving forward, points appear at the
    /// same or a finer level; moving backward, at the same or a coarser one.
    pub fn search_by_projection_last_frame(
        &self,
        current: &mut Frame,
        last: &Frame,
        th: f64,
        monocular: bool,
    ) -> usize {
        let (Some(tcw), Some(tlw)) = (current.pose().copied(), last.pose().copied()) else {
            return 0;
        };

        let twc = current.camera_center();
        let tlc = tlw.transform_point(&twc);
        let baseline = current.camera.baseline;
        let forward = tlc.z > baseline && !monocular;
        let backward = -tlc.z > baseline && !monocular;

        let mut n_matches = 0;
        let mut rot_hist = RotationHistogram::new();

        for (i, slot) in last.map_points.iter().enumerate() {
            let Some(mp) = slot else {
                continue;
            };
            if last.outliers[i] || mp.is_bad() {
                continue;
            }

            let p_c = tcw.transform_point(&mp.world_pos());
            if p_c.z <= 0.0 {
                continue;
            }
            let (u, v) = current.camera.project(&p_c);
            if !current.features.bounds.contains(u, v) {
                continue;
            }
            let ur = current.camera.project_right(u, p_c.z);

            let last_octave = last.features.keys[i].octave;
            let radius = th * current.pyramid.scale_factors[last_octave];

            let indices = if forward {
                current.features.features_in_area(u, v, radius, Some(last_octave), None)
            } else if backward {
                current.features.features_in_area(u, v, radius, Some(0), Some(last_octave))
            } else {
                current.features.features_in_area(
                    u,
                    v,
                    radius,
                    last_octave.checked_sub(1),
                    Some(last_octave + 1),
                )
            };

            let mp_desc = mp.descriptor();
            let mut best_dist = 256u32;
            let mut best_idx = None;

            for idx in indices {
                if current.map_points[idx]
                    .as_ref()
                    .is_some_and(|existing| existing.observation_count() > 0)
                {
                    continue;
                }

                let right = current.features.right_coords[idx];
                if right > 0.0 && (ur - right).abs() > radius {
                    continue;
                }

                let dist = descriptor_distance(&mp_desc, &current.features.descriptors[idx]);
                if dist < best_dist {
                    best_dist = dist;
                    best_idx = Some(idx);
                }
            }

            let Some(best_idx) = best_idx else {
                continue;
            };
            if best_dist > TH_HIGH {
                continue;
            }

            current.map_points[best_idx] = Some(Arc::clone(mp));
            n_matches += 1;

            if self.check_orientation {
                rot_hist.add(
                    last.features.keys_un[i].angle,
                    current.features.keys_un[best_idx].angle,
                    best_idx,
                );
            }
        }

        if self.check_orientation {
            for idx in rot_hist.outliers() {
                if current.map_points[idx].take().is_some() {
                    n_matches -= 1;
                }
            }
        }

        debug!("[Matcher] last frame: {} matches", n_matches);
        n_matches
    }

    /// Relocalization search: project the points of a candidate KeyFrame
    /// into the current frame.
    ///
    /// Points in `already_found` are skipped, as are features that already
    /// hold a point. A match needs a descriptor distance of at most
    /// `orb_dist`.
    pub fn search_by_projection_keyframe(
        &self,
        current: &mut Frame,
        keyframe: &KeyFrame,
        already_found: &HashSet<MapPointId>,
        th: f64,
        orb_dist: u32,
    ) -> usize {
        let Some(tcw) = current.pose().copied() else {
            return 0;
        };
        let center = current.camera_center();

        let mut n_matches = 0;
        let mut rot_hist = RotationHistogram::new();

        for (i, slot) in keyframe.map_point_matches().into_iter().enumerate() {
            let Some(mp) = slot else {
                continue;
            };
            if mp.is_bad() || already_found.contains(&mp.id) {
                continue;
            }

            let p_w = mp.world_pos();
            let p_c = tcw.transform_point(&p_w);
            if p_c.z <= 0.0 {
                continue;
            }
            let (u, v) = current.camera.project(&p_c);
            if !current.features.bounds.contains(u, v) {
                continue;
            }

            let dist3d = (p_w - center).norm();
            if dist3d < mp.min_distance_invariance() || dist3d > mp.max_distance_invariance() {
                continue;
            }

            let level = mp.predict_scale(dist3d, &current.pyramid);
            let radius = th * current.pyramid.scale_factors[level];
            let indices =
                current
                    .features
                    .features_in_area(u, v, radius, level.checked_sub(1), Some(level + 1));

            let mp_desc = mp.descriptor();
            let mut best_dist = 256u32;
            let mut best_idx = None;
            for idx in indices {
                if current.map_points[idx].is_some() {
                    continue;
                }
                let dist = descriptor_distance(&mp_desc, &current.features.descriptors[idx]);
                if dist < best_dist {
                    best_dist = dist;
                    best_idx = Some(idx);
                }
            }

            let Some(best_idx) = best_idx else {
                continue;
            };
            if best_dist > orb_dist {
                continue;
            }

            current.map_points[best_idx] = Some(mp);
            n_matches += 1;

            if self.check_orientation {
                rot_hist.add(
                    keyframe.features.keys_un[i].angle,
                    current.features.keys_un[best_idx].angle,
                    best_idx,
                );
            }
        }

        if self.check_orientation {
            for idx in rot_hist.outliers() {
                if current.map_points[idx].take().is_some() {
                    n_matches -= 1;
                }
            }
        }

        debug!("[Matcher] relocalization {}: {} matches", keyframe.id, n_matches);
        n_matches
    }

    /// Loop-closure search under a world-to-camera similarity.
    ///
    /// Projects `points` into `keyframe` through `scw` with the scale
    /// stripped (see [`ScaleFreePose`]); the points are taken to be in the
    /// correct scale already. `matched` is index-aligned with the KeyFrame
    /// features: filled entries are kept and their points skipped, and new
    /// matches are written into empty ones.
    pub fn search_by_projection_sim3(
        &self,
        keyframe: &KeyFrame,
        scw: &Sim3,
        points: &[Arc<MapPoint>],
        matched: &mut [Option<Arc<MapPoint>>],
        th: f64,
    ) -> usize {
        let pose = ScaleFreePose::from_sim3(scw);
        let already_found: HashSet<MapPointId> = matched.iter().flatten().map(|mp| mp.id).collect();

        let mut n_matches = 0;

        for mp in points {
            if mp.is_bad() || already_found.contains(&mp.id) {
                continue;
            }

            let p_w = mp.world_pos();
            let p_c = pose.transform_point(&p_w);
            if p_c.z <= 0.0 {
                continue;
            }
            let (u, v) = keyframe.camera.project(&p_c);
            if !keyframe.is_in_image(u, v) {
                continue;
            }

            let po = p_w - pose.center;
            let dist = po.norm();
            if dist < mp.min_distance_invariance() || dist > mp.max_distance_invariance() {
                continue;
            }
            if po.dot(&mp.normal()) < 0.5 * dist {
                continue;
            }

            let level = mp.predict_scale(dist, &keyframe.pyramid);
            let radius = th * keyframe.pyramid.scale_factors[level];
            let indices = keyframe
                .features
                .features_in_area(u, v, radius, level.checked_sub(1), Some(level));

            let mp_desc = mp.descriptor();
            let mut best_dist = 256u32;
            let mut best_idx = None;
            for idx in indices {
                if matched[idx].is_some() {
                    continue;
                }
                let d = descriptor_distance(&mp_desc, &keyframe.features.descriptors[idx]);
                if d < best_dist {
                    best_dist = d;
                    best_idx = Some(idx);
                }
            }

            if let Some(best_idx) = best_idx {
                if best_dist <= TH_LOW {
                    matched[best_idx] = Some(Arc::clone(mp));
                    n_matches += 1;
                }
            }
        }

        debug!("[Matcher] sim3 projection into {}: {} matches", keyframe.id, n_matches);
        n_matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{UnitQuaternion, Vector3};

    use crate::atlas::map::{FrameId, Map, TrackProjection};
    use crate::geometry::SE3;
    use crate::matching::test_support::*;
    use crate::tracking::frame::{Features, KeyPoint, ScalePyramid};

    fn make_frame(keys: Vec<KeyPoint>, descriptors: Vec<[u8; 32]>, pose: SE3) -> Frame {
        let mut frame = Frame::new(FrameId(100), mono_features(keys, descriptors), camera(), ScalePyramid::default());
        frame.set_pose(pose);
        frame
    }

    /// Point at `pos` observed from the origin KeyFrame with descriptor zero.
    fn point(map: &Arc<Map>, pos: Vector3<f64>) -> Arc<MapPoint> {
        let (u, v) = project(&SE3::identity(), &pos);
        let kf = keyframe(
            0,
            mono_features(vec![KeyPoint::new(u, v, 0.0, 0)], vec![[0u8; 32]]),
            SE3::identity(),
        );
        observed_point(map, pos, &kf, 0)
    }

    fn in_view_at(mp: &MapPoint, x: f64, y: f64, level: usize, view_cos: f64) {
        mp.set_track_projection(TrackProjection {
            in_view: true,
            proj_x: x,
            proj_y: y,
            proj_xr: -1.0,
            scale_level: level,
            view_cos,
        });
    }

    #[test]
    fn test_local_points_accepts_closest() {
        let map = Map::new();
        let mp = point(&map, Vector3::new(0.0, 0.0, 10.0));
        let mut frame = make_frame(
            vec![KeyPoint::new(321.0, 240.0, 0.0, 0), KeyPoint::new(330.0, 240.0, 0.0, 0)],
            vec![descriptor_with_bits(10), [0u8; 32]],
            SE3::identity(),
        );
        in_view_at(&mp, 320.0, 240.0, 0, 1.0);

        let n = OrbMatcher::default().search_local_points(&mut frame, &[Arc::clone(&mp)], 1.0);

        assert_eq!(n, 1);
        assert_eq!(frame.map_points[0].as_ref().map(|p| p.id), Some(mp.id));
        assert!(frame.map_points[1].is_none());
    }

    #[test]
    fn test_local_points_no_candidate_in_window() {
        let map = Map::new();
        let mp = point(&map, Vector3::new(0.0, 0.0, 10.0));
        let mut frame = make_frame(
            vec![KeyPoint::new(320.0, 240.0, 0.0, 0)],
            vec![[0u8; 32]],
            SE3::identity(),
        );
        // 2.5 px window at level 0, the only feature sits 3 px away
        in_view_at(&mp, 323.0, 240.0, 0, 0.999);

        let n = OrbMatcher::default().search_local_points(&mut frame, &[mp], 1.0);
        assert_eq!(n, 0);
        assert!(frame.map_points[0].is_none());
    }

    #[test]
    fn test_local_points_ratio_only_within_octave() {
        let map = Map::new();
        let mp = point(&map, Vector3::new(0.0, 0.0, 10.0));
        let matcher = OrbMatcher::default();

        // Same octave, 40 vs 45: ambiguous
        let mut frame = make_frame(
            vec![KeyPoint::new(320.0, 240.0, 0.0, 1), KeyPoint::new(321.0, 240.0, 0.0, 1)],
            vec![descriptor_with_bits(40), descriptor_with_bits(45)],
            SE3::identity(),
        );
        in_view_at(&mp, 320.0, 240.0, 1, 1.0);
        assert_eq!(matcher.search_local_points(&mut frame, &[Arc::clone(&mp)], 1.0), 0);

        // Different octaves: the ratio test does not apply
        let mut frame = make_frame(
            vec![KeyPoint::new(320.0, 240.0, 0.0, 1), KeyPoint::new(321.0, 240.0, 0.0, 0)],
            vec![descriptor_with_bits(40), descriptor_with_bits(45)],
            SE3::identity(),
        );
        assert_eq!(matcher.search_local_points(&mut frame, &[mp], 1.0), 1);
        assert!(frame.map_points[0].is_some());
    }

    #[test]
    fn test_local_points_skips_taken_and_unseen() {
        let map = Map::new();
        let mp = point(&map, Vector3::new(0.0, 0.0, 10.0));
        let taken = point(&map, Vector3::new(1.0, 0.0, 10.0));
        let anchor = keyframe(9, mono_features(Vec::new(), Vec::new()), SE3::identity());
        let fresh = MapPoint::new(Vector3::new(2.0, 0.0, 10.0), &anchor, &map);

        let mut frame = make_frame(
            vec![KeyPoint::new(320.0, 240.0, 0.0, 0), KeyPoint::new(321.0, 240.0, 0.0, 0)],
            vec![[0u8; 32], descriptor_with_bits(5)],
            SE3::identity(),
        );
        // Slot 0 holds an observed point, slot 1 one without observations
        frame.map_points[0] = Some(Arc::clone(&taken));
        frame.map_points[1] = Some(Arc::clone(&fresh));
        in_view_at(&mp, 320.0, 240.0, 0, 1.0);

        let matcher = OrbMatcher::default();
        assert_eq!(matcher.search_local_points(&mut frame, &[Arc::clone(&mp)], 1.0), 1);
        assert_eq!(frame.map_points[1].as_ref().map(|p| p.id), Some(mp.id));

        let mut frame = make_frame(vec![KeyPoint::new(320.0, 240.0, 0.0, 0)], vec![[0u8; 32]], SE3::identity());
        mp.set_track_projection(TrackProjection::default());
        assert_eq!(matcher.search_local_points(&mut frame, &[Arc::clone(&mp)], 1.0), 0);

        in_view_at(&mp, 320.0, 240.0, 0, 1.0);
        mp.set_bad_flag();
        assert_eq!(matcher.search_local_points(&mut frame, &[mp], 1.0), 0);
    }

    #[test]
    fn test_local_points_stereo_gate() {
        let map = Map::new();
        let mp = point(&map, Vector3::new(0.0, 0.0, 10.0));
        let keys = vec![KeyPoint::new(320.0, 240.0, 0.0, 0)];
        let features = Features::new(keys.clone(), keys, vec![300.0], vec![[0u8; 32]], bounds());
        let mut frame = Frame::new(FrameId(1), features, camera(), ScalePyramid::default());
        frame.set_pose(SE3::identity());

        let mut track = TrackProjection {
            in_view: true,
            proj_x: 320.0,
            proj_y: 240.0,
            proj_xr: 315.0,
            scale_level: 0,
            view_cos: 1.0,
        };
        mp.set_track_projection(track);
        let matcher = OrbMatcher::default();
        assert_eq!(matcher.search_local_points(&mut frame, &[Arc::clone(&mp)], 1.0), 0);

        track.proj_xr = 301.0;
        mp.set_track_projection(track);
        assert_eq!(matcher.search_local_points(&mut frame, &[mp], 1.0), 1);
    }

    /// Points spread along x at depth 10, seen by `last` at the origin.
    fn last_frame_scene(map: &Arc<Map>, n: usize, octave: usize) -> (Frame, Vec<Arc<MapPoint>>) {
        let points: Vec<Arc<MapPoint>> = (0..n)
            .map(|k| point(map, Vector3::new(-2.0 + 0.4 * k as f64, 0.0, 10.0)))
            .collect();
        let keys = points
            .iter()
            .map(|mp| {
                let (u, v) = project(&SE3::identity(), &mp.world_pos());
                KeyPoint::new(u, v, 30.0, octave)
            })
            .collect();
        let mut last = make_frame(keys, vec![[0u8; 32]; n], SE3::identity());
        for (slot, mp) in last.map_points.iter_mut().zip(&points) {
            *slot = Some(Arc::clone(mp));
        }
        (last, points)
    }

    #[test]
    fn test_last_frame_tracks_and_filters_rotation() {
        let map = Map::new();
        let (last, points) = last_frame_scene(&map, 12, 0);

        let pose = pose_at(Vector3::new(0.1, 0.0, 0.0));
        let mut keys = Vec::new();
        for (k, mp) in points.iter().enumerate() {
            let (u, v) = project(&pose, &mp.world_pos());
            // The last point rotated by 90 degrees
            let angle = if k == 11 { 120.0 } else { 30.0 };
            keys.push(KeyPoint::new(u + 0.5, v, angle, 0));
        }
        let mut current = make_frame(keys, vec![descriptor_with_bits(3); 12], pose);

        let n = OrbMatcher::default().search_by_projection_last_frame(&mut current, &last, 7.0, true);

        assert_eq!(n, 11);
        for k in 0..11 {
            assert_eq!(current.map_points[k].as_ref().map(|p| p.id), Some(points[k].id));
        }
        assert!(current.map_points[11].is_none());

        let unchecked = OrbMatcher::new(0.6, false);
        let mut current2 = current.clone();
        current2.map_points = vec![None; 12];
        assert_eq!(unchecked.search_by_projection_last_frame(&mut current2, &last, 7.0, true), 12);
    }

    #[test]
    fn test_last_frame_skips_outliers() {
        let map = Map::new();
        let (mut last, points) = last_frame_scene(&map, 1, 0);
        last.outliers[0] = true;
        let (u, v) = project(&SE3::identity(), &points[0].world_pos());
        let mut current = make_frame(vec![KeyPoint::new(u, v, 30.0, 0)], vec![[0u8; 32]], SE3::identity());

        let matcher = OrbMatcher::default();
        assert_eq!(matcher.search_by_projection_last_frame(&mut current, &last, 7.0, true), 0);

        last.outliers[0] = false;
        assert_eq!(matcher.search_by_projection_last_frame(&mut current, &last, 7.0, true), 1);
    }

    #[test]
    fn test_last_frame_forward_motion_narrows_levels() {
        let map = Map::new();
        let (last, points) = last_frame_scene(&map, 1, 2);
        let pose = pose_at(Vector3::new(0.0, 0.0, 0.5));
        let (u, v) = project(&pose, &points[0].world_pos());
        let keys = vec![KeyPoint::new(u, v, 30.0, 1), KeyPoint::new(u + 0.5, v, 30.0, 3)];
        let descriptors = vec![[0u8; 32], descriptor_with_bits(20)];
        let matcher = OrbMatcher::default();

        // Stereo: moving forward by more than the baseline, octave 1 is excluded
        let mut current = make_frame(keys.clone(), descriptors.clone(), pose);
        assert_eq!(matcher.search_by_projection_last_frame(&mut current, &last, 7.0, false), 1);
        assert!(current.map_points[1].is_some());

        // Monocular: octaves 1..=3 are searched
        let mut current = make_frame(keys, descriptors, pose);
        assert_eq!(matcher.search_by_projection_last_frame(&mut current, &last, 7.0, true), 1);
        assert!(current.map_points[0].is_some());
    }

    #[test]
    fn test_last_frame_without_pose() {
        let map = Map::new();
        let (last, _) = last_frame_scene(&map, 3, 0);
        let mut current = Frame::new(
            FrameId(2),
            mono_features(vec![KeyPoint::new(300.0, 240.0, 0.0, 0)], vec![[0u8; 32]]),
            camera(),
            ScalePyramid::default(),
        );
        assert_eq!(OrbMatcher::default().search_by_projection_last_frame(&mut current, &last, 7.0, true), 0);
    }

    #[test]
    fn test_relocalization_search() {
        let map = Map::new();
        let kf_pose = SE3::identity();
        let positions = [Vector3::new(0.0, 0.0, 10.0), Vector3::new(1.0, 0.0, 10.0), Vector3::new(-1.0, 0.0, 10.0)];
        let keys = positions
            .iter()
            .map(|p| {
                let (u, v) = project(&kf_pose, p);
                KeyPoint::new(u, v, 0.0, 0)
            })
            .collect();
        let descriptors = vec![[0u8; 32], descriptor_bits_at(0, 8), descriptor_bits_at(100, 8)];
        let kf = keyframe(1, mono_features(keys, descriptors.clone()), kf_pose);
        let points: Vec<_> = positions
            .iter()
            .enumerate()
            .map(|(i, p)| observed_point(&map, *p, &kf, i))
            .collect();

        let pose = pose_at(Vector3::new(0.05, 0.0, 0.0));
        let cur_keys: Vec<KeyPoint> = positions
            .iter()
            .map(|p| {
                let (u, v) = project(&pose, p);
                KeyPoint::new(u + 1.0, v, 0.0, 0)
            })
            .collect();
        let mut cur_desc = descriptors.clone();
        // Point 2 is 40 bits away in the current frame
        cur_desc[2] = descriptor_bits_at(100, 48);

        let mut already = HashSet::new();
        already.insert(points[1].id);

        let mut current = make_frame(cur_keys, cur_desc, pose);
        let n = OrbMatcher::default().search_by_projection_keyframe(&mut current, &kf, &already, 10.0, 32);

        assert_eq!(n, 1);
        assert_eq!(current.map_points[0].as_ref().map(|p| p.id), Some(points[0].id));
        assert!(current.map_points[1].is_none());
        assert!(current.map_points[2].is_none());
    }

    fn sim3_scene(map: &Arc<Map>) -> (Arc<KeyFrame>, Arc<MapPoint>) {
        let pos = Vector3::new(10.0, 0.0, 20.0);
        let mp = point(map, pos);
        // (fx·10/20 + cx, cy) = (570, 240)
        let loop_kf = keyframe(
            5,
            mono_features(
                vec![KeyPoint::new(570.5, 240.0, 0.0, 0), KeyPoint::new(100.0, 240.0, 0.0, 0)],
                vec![descriptor_with_bits(12), [0u8; 32]],
            ),
            SE3::identity(),
        );
        (loop_kf, mp)
    }

    #[test]
    fn test_sim3_projection_is_scale_free() {
        let map = Map::new();
        let (loop_kf, mp) = sim3_scene(&map);
        let matcher = OrbMatcher::default();

        for scale in [1.0, 2.0] {
            let scw = Sim3 {
                scale,
                ..Sim3::identity()
            };
            let mut matched = vec![None; loop_kf.len()];
            let n = matcher.search_by_projection_sim3(&loop_kf, &scw, &[Arc::clone(&mp)], &mut matched, 10.0);
            assert_eq!(n, 1);
            assert_eq!(matched[0].as_ref().map(|p| p.id), Some(mp.id));
        }
    }

    #[test]
    fn test_sim3_projection_respects_existing_matches() {
        let map = Map::new();
        let (loop_kf, mp) = sim3_scene(&map);
        let matcher = OrbMatcher::default();

        // Already matched somewhere: skipped
        let mut matched = vec![None, Some(Arc::clone(&mp))];
        assert_eq!(matcher.search_by_projection_sim3(&loop_kf, &Sim3::identity(), &[Arc::clone(&mp)], &mut matched, 10.0), 0);
        assert!(matched[0].is_none());

        // Target slot taken by another point
        let other = point(&map, Vector3::new(0.0, 1.0, 10.0));
        let mut matched = vec![Some(other), None];
        assert_eq!(matcher.search_by_projection_sim3(&loop_kf, &Sim3::identity(), &[mp], &mut matched, 10.0), 0);
    }

    #[test]
    fn test_sim3_projection_rejects_behind_camera() {
        let map = Map::new();
        let (loop_kf, mp) = sim3_scene(&map);
        let flip = Sim3::from_rts(
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), std::f64::consts::PI)
                .to_rotation_matrix()
                .into_inner(),
            Vector3::zeros(),
            2.0,
        );
        let mut matched = vec![None; loop_kf.len()];
        let n = OrbMatcher::default().search_by_projection_sim3(&loop_kf, &flip, &[mp], &mut matched, 10.0);
        assert_eq!(n, 0);
    }
}
