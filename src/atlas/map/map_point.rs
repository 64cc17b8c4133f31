//! MapPoint - A 3D landmark observed by KeyFrames.
//!
//! MapPoints are the fundamental 3D structure elements in the map. Each
//! MapPoint tracks which KeyFrames observe it, keeps a representative
//! descriptor for matching, and stores the viewing geometry (mean normal,
//! scale-invariance distance band) the matcher uses to gate projections.
//!
//! # Concurrency
//!
//! A MapPoint is shared between tracking, local mapping and loop closing
//! through `Arc<MapPoint>` and mutated through `&self`:
//!
//! - the **features lock** guards observations, descriptor, reference
//!   KeyFrame, counters and the `bad` / `replaced_by` lifecycle fields;
//! - the **position lock** guards world position, normal and depth bounds;
//! - writes to the world position additionally hold the owning Map's
//!   position lock for reading, so [`Map::freeze_positions`] can stop all
//!   individual writers during a bulk correction.
//!
//! Lock order is features before position. No MapPoint lock is held while
//! calling into a [`KeyFrame`] or the [`Map`].
//!
//! # Lifecycle
//!
//! `live → bad` through [`MapPoint::set_bad_flag`], through
//! [`MapPoint::erase_observation`] dropping the observation count to two or
//! less, or through [`MapPoint::replace`]. A replaced point keeps a handle
//! to its successor; [`MapPoint::resolve_replaced`] follows that chain.
//!
//! [`Map::freeze_positions`]: super::Map::freeze_positions

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use nalgebra::Vector3;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::matching::{descriptor_distance, Descriptor};
use crate::tracking::frame::{Frame, ScalePyramid};

use super::keyframe::KeyFrame;
use super::map::Map;
use super::types::{FrameId, KeyFrameId, MapPointId};

/// One sighting of a MapPoint: feature `index` of a KeyFrame.
#[derive(Debug, Clone)]
struct Observation {
    keyframe: Weak<KeyFrame>,
    index: usize,
}

/// Projection of a MapPoint into the frame currently being tracked.
///
/// Written by [`Frame::is_in_frustum`] and read by the local-map search.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrackProjection {
    pub in_view: bool,
    pub proj_x: f64,
    pub proj_y: f64,
    /// Predicted right-image coordinate (stereo).
    pub proj_xr: f64,
    pub scale_level: usize,
    /// Cosine between the viewing ray and the mean normal.
    pub view_cos: f64,
}

struct FeatureState {
    observations: BTreeMap<KeyFrameId, Observation>,
    /// Monocular observations count 1, stereo observations count 2.
    n_obs: usize,
    descriptor: Descriptor,
    reference: Option<(KeyFrameId, Weak<KeyFrame>)>,
    visible: u32,
    found: u32,
    bad: bool,
    replaced_by: Option<Arc<MapPoint>>,
}

struct PositionState {
    world_pos: Vector3<f64>,
    normal: Vector3<f64>,
    min_distance: f64,
    max_distance: f64,
}

/// A 3D map point (landmark) observed by one or more KeyFrames.
pub struct MapPoint {
    /// Unique identifier within the owning Map.
    pub id: MapPointId,

    /// KeyFrame that created this point, `None` for frame-created points.
    pub first_kf_id: Option<KeyFrameId>,

    /// Frame that created this point.
    pub first_frame_id: FrameId,

    map: Weak<Map>,
    features: Mutex<FeatureState>,
    position: RwLock<PositionState>,
    track: Mutex<TrackProjection>,
}

impl MapPoint {
    /// Create a MapPoint with an explicit reference KeyFrame.
    ///
    /// The point starts without observations; callers add the creating
    /// observation, then compute descriptor, normal and depth.
    pub fn new(world_pos: Vector3<f64>, reference: &Arc<KeyFrame>, map: &Arc<Map>) -> Arc<Self> {
        let id = map.allocate_map_point_id();
        Arc::new(Self {
            id,
            first_kf_id: Some(reference.id),
            first_frame_id: reference.frame_id,
            map: Arc::downgrade(map),
            features: Mutex::new(FeatureState {
                observations: BTreeMap::new(),
                n_obs: 0,
                descriptor: [0u8; 32],
                reference: Some((reference.id, Arc::downgrade(reference))),
                visible: 1,
                found: 1,
                bad: false,
                replaced_by: None,
            }),
            position: RwLock::new(PositionState {
                world_pos,
                normal: Vector3::zeros(),
                min_distance: 0.0,
                max_distance: 0.0,
            }),
            track: Mutex::new(TrackProjection::default()),
        })
    }

    /// Create a MapPoint from feature `idx` of a (non-key) Frame.
    ///
    /// Normal, depth band and descriptor come straight from that single
    /// sighting. There is no reference KeyFrame.
    pub fn from_frame(world_pos: Vector3<f64>, frame: &Frame, idx: usize, map: &Arc<Map>) -> Arc<Self> {
        let id = map.allocate_map_point_id();

        let ray = world_pos - frame.camera_center();
        let dist = ray.norm();
        let normal = if dist > 0.0 { ray / dist } else { Vector3::zeros() };

        let level = frame.features.keys_un[idx].octave;
        let max_distance = dist * frame.pyramid.scale_factors[level];
        let min_distance = max_distance / frame.pyramid.max_scale_factor();

        Arc::new(Self {
            id,
            first_kf_id: None,
            first_frame_id: frame.id,
            map: Arc::downgrade(map),
            features: Mutex::new(FeatureState {
                observations: BTreeMap::new(),
                n_obs: 0,
                descriptor: frame.features.descriptors[idx],
                reference: None,
                visible: 1,
                found: 1,
                bad: false,
                replaced_by: None,
            }),
            position: RwLock::new(PositionState {
                world_pos,
                normal,
                min_distance,
                max_distance,
            }),
            track: Mutex::new(TrackProjection::default()),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Position
    // ─────────────────────────────────────────────────────────────────────────

    pub fn world_pos(&self) -> Vector3<f64> {
        self.position.read().world_pos
    }

    /// Move the point. Blocks while the owning Map's positions are frozen.
    pub fn set_world_pos(&self, pos: Vector3<f64>) {
        let map = self.map.upgrade();
        let _global = map.as_deref().map(Map::position_update_guard);
        self.write_world_pos(pos);
    }

    /// Write the position without taking the Map-level lock.
    ///
    /// Only for holders of a [`PositionFreeze`](super::map::PositionFreeze).
    pub(crate) fn write_world_pos(&self, pos: Vector3<f64>) {
        self.position.write().world_pos = pos;
    }

    /// Mean viewing direction from the observers to the point.
    pub fn normal(&self) -> Vector3<f64> {
        self.position.read().normal
    }

    pub fn min_distance(&self) -> f64 {
        self.position.read().min_distance
    }

    pub fn max_distance(&self) -> f64 {
        self.position.read().max_distance
    }

    /// Lower end of the tolerant depth band, `0.8 · min_distance`.
    pub fn min_distance_invariance(&self) -> f64 {
        0.8 * self.position.read().min_distance
    }

    /// Upper end of the tolerant depth band, `1.2 · max_distance`.
    pub fn max_distance_invariance(&self) -> f64 {
        1.2 * self.position.read().max_distance
    }

    /// Pyramid level at which the point is expected to be detected from
    /// distance `dist`, clamped to the pyramid.
    pub fn predict_scale(&self, dist: f64, pyramid: &ScalePyramid) -> usize {
        let ratio = self.position.read().max_distance / dist;
        let scale = (ratio.ln() / pyramid.log_scale_factor).ceil();
        if scale.is_nan() || scale < 0.0 {
            0
        } else if scale >= pyramid.n_levels as f64 {
            pyramid.n_levels - 1
        } else {
            scale as usize
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Observations
    // ─────────────────────────────────────────────────────────────────────────

    /// Record that feature `idx` of `keyframe` sees this point.
    ///
    /// A KeyFrame already observing the point is left untouched.
    pub fn add_observation(&self, keyframe: &Arc<KeyFrame>, idx: usize) {
        let mut state = self.features.lock();
        if state.observations.contains_key(&keyframe.id) {
            return;
        }
        state.observations.insert(
            keyframe.id,
            Observation {
                keyframe: Arc::downgrade(keyframe),
                index: idx,
            },
        );
        state.n_obs += if keyframe.features.is_stereo(idx) { 2 } else { 1 };
    }

    /// Forget the observation from `keyframe`.
    ///
    /// When the reference KeyFrame is erased the lowest-id surviving
    /// observer takes over. Dropping to two or fewer observations turns
    /// the point bad.
    pub fn erase_observation(&self, keyframe: &KeyFrame) {
        let became_bad = {
            let mut state = self.features.lock();
            match state.observations.remove(&keyframe.id) {
                Some(obs) => {
                    let weight = if keyframe.features.is_stereo(obs.index) { 2 } else { 1 };
                    state.n_obs = state.n_obs.saturating_sub(weight);

                    let was_reference = state
                        .reference
                        .as_ref()
                        .is_some_and(|(id, _)| *id == keyframe.id);
                    if was_reference {
                        state.reference = state
                            .observations
                            .iter()
                            .next()
                            .map(|(id, o)| (*id, o.keyframe.clone()));
                    }

                    state.n_obs <= 2
                }
                None => false,
            }
        };

        if became_bad {
            self.set_bad_flag();
        }
    }

    /// Observing KeyFrames with the feature index that sees this point.
    ///
    /// KeyFrames that have been dropped by their owner are skipped.
    pub fn observations(&self) -> Vec<(Arc<KeyFrame>, usize)> {
        self.features
            .lock()
            .observations
            .values()
            .filter_map(|o| o.keyframe.upgrade().map(|kf| (kf, o.index)))
            .collect()
    }

    /// KeyFrame id → feature index, ordered by id.
    pub fn observation_indices(&self) -> BTreeMap<KeyFrameId, usize> {
        self.features
            .lock()
            .observations
            .iter()
            .map(|(id, o)| (*id, o.index))
            .collect()
    }

    /// Weighted observation count (stereo observations count twice).
    pub fn observation_count(&self) -> usize {
        self.features.lock().n_obs
    }

    pub fn is_in_keyframe(&self, kf_id: KeyFrameId) -> bool {
        self.features.lock().observations.contains_key(&kf_id)
    }

    pub fn index_in_keyframe(&self, kf_id: KeyFrameId) -> Option<usize> {
        self.features.lock().observations.get(&kf_id).map(|o| o.index)
    }

    pub fn reference_keyframe(&self) -> Option<Arc<KeyFrame>> {
        self.features
            .lock()
            .reference
            .as_ref()
            .and_then(|(_, kf)| kf.upgrade())
    }

    pub fn reference_keyframe_id(&self) -> Option<KeyFrameId> {
        self.features.lock().reference.as_ref().map(|(id, _)| *id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_bad(&self) -> bool {
        self.features.lock().bad
    }

    /// Cull the point: detach it from every observer and from the Map.
    pub fn set_bad_flag(&self) {
        let observations = {
            let mut state = self.features.lock();
            let _pos = self.position.write();
            state.bad = true;
            std::mem::take(&mut state.observations)
        };

        for obs in observations.into_values() {
            if let Some(kf) = obs.keyframe.upgrade() {
                kf.erase_map_point_match(obs.index);
            }
        }

        if let Some(map) = self.map.upgrade() {
            map.erase_map_point(self.id);
        }

        debug!("[MapPoint] {} set bad", self.id);
    }

    /// Direct successor of a replaced point.
    pub fn replaced_by(&self) -> Option<Arc<MapPoint>> {
        self.features.lock().replaced_by.clone()
    }

    /// Follow the replacement chain to the surviving point.
    ///
    /// Returns `self` when the point is still live and `None` when the
    /// chain ends in a point that was culled without a successor.
    pub fn resolve_replaced(self: &Arc<Self>) -> Option<Arc<MapPoint>> {
        let mut current = Arc::clone(self);
        loop {
            let next = {
                let state = current.features.lock();
                if !state.bad {
                    break;
                }
                state.replaced_by.clone()
            };
            current = next?;
        }
        Some(current)
    }

    /// Merge this point into `other`.
    ///
    /// Every observer is redirected to `other`, except observers that
    /// already see `other`: those just drop their slot for this point.
    /// Counters are folded into `other`, whose descriptor is recomputed,
    /// and this point ends bad with `replaced_by = other`.
    pub fn replace(&self, other: &Arc<MapPoint>) {
        if other.id == self.id {
            return;
        }
        if other.is_bad() {
            debug!("[MapPoint] refusing to replace {} by bad {}", self.id, other.id);
            return;
        }

        let (observations, visible, found) = {
            let mut state = self.features.lock();
            if state.bad {
                return;
            }
            let _pos = self.position.write();
            state.bad = true;
            state.replaced_by = Some(Arc::clone(other));
            (std::mem::take(&mut state.observations), state.visible, state.found)
        };

        for (kf_id, obs) in observations {
            let Some(kf) = obs.keyframe.upgrade() else {
                continue;
            };
            if other.is_in_keyframe(kf_id) {
                kf.erase_map_point_match(obs.index);
            } else {
                kf.replace_map_point_match(obs.index, Arc::clone(other));
                other.add_observation(&kf, obs.index);
            }
        }

        other.increase_found(found);
        other.increase_visible(visible);
        other.compute_distinctive_descriptors();

        if let Some(map) = self.map.upgrade() {
            map.erase_map_point(self.id);
        }

        debug!("[MapPoint] {} replaced by {}", self.id, other.id);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tracking statistics
    // ─────────────────────────────────────────────────────────────────────────

    /// The point was inside the frustum of a tracked frame `n` more times.
    pub fn increase_visible(&self, n: u32) {
        self.features.lock().visible += n;
    }

    /// The point was matched in a tracked frame `n` more times.
    pub fn increase_found(&self, n: u32) {
        self.features.lock().found += n;
    }

    pub fn visible(&self) -> u32 {
        self.features.lock().visible
    }

    pub fn found(&self) -> u32 {
        self.features.lock().found
    }

    /// found / visible.
    pub fn found_ratio(&self) -> f64 {
        let state = self.features.lock();
        state.found as f64 / state.visible as f64
    }

    pub fn track_projection(&self) -> TrackProjection {
        *self.track.lock()
    }

    pub fn set_track_projection(&self, projection: TrackProjection) {
        *self.track.lock() = projection;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Descriptor and viewing geometry
    // ─────────────────────────────────────────────────────────────────────────

    pub fn descriptor(&self) -> Descriptor {
        self.features.lock().descriptor
    }

    /// Pick the observed descriptor with the smallest median distance to
    /// all other observed descriptors.
    pub fn compute_distinctive_descriptors(&self) {
        let observations: Vec<Observation> = {
            let state = self.features.lock();
            if state.bad {
                return;
            }
            state.observations.values().cloned().collect()
        };

        let descriptors: Vec<Descriptor> = observations
            .iter()
            .filter_map(|o| o.keyframe.upgrade().map(|kf| (kf, o.index)))
            .filter(|(kf, _)| !kf.is_bad())
            .map(|(kf, idx)| kf.features.descriptors[idx])
            .collect();

        if let Some(best) = distinctive_descriptor_index(&descriptors) {
            self.features.lock().descriptor = descriptors[best];
        }
    }

    /// Recompute the mean viewing direction and the scale-invariance
    /// distance band from the reference observation.
    pub fn update_normal_and_depth(&self) {
        let (observations, reference, pos) = {
            let state = self.features.lock();
            let position = self.position.read();
            if state.bad {
                return;
            }
            (
                state.observations.clone(),
                state.reference.clone(),
                position.world_pos,
            )
        };

        if observations.is_empty() {
            return;
        }
        let Some((ref_id, ref_kf)) = reference else {
            return;
        };
        let Some(ref_kf) = ref_kf.upgrade() else {
            return;
        };
        let Some(ref_idx) = observations.get(&ref_id).map(|o| o.index) else {
            return;
        };

        let mut normal = Vector3::zeros();
        let mut n = 0usize;
        for kf in observations.values().filter_map(|o| o.keyframe.upgrade()) {
            let ray = pos - kf.camera_center();
            normal += ray / ray.norm();
            n += 1;
        }

        let dist = (pos - ref_kf.camera_center()).norm();
        let level = ref_kf.features.keys_un[ref_idx].octave;
        let max_distance = dist * ref_kf.pyramid.scale_factors[level];
        let min_distance = max_distance / ref_kf.pyramid.max_scale_factor();

        let mut position = self.position.write();
        position.max_distance = max_distance;
        position.min_distance = min_distance;
        position.normal = normal / n as f64;
    }
}

/// Index of the descriptor whose median distance to the whole set is
/// smallest. The median is the lower one, `(N − 1) / 2` of the sorted
/// row including the zero self-distance. Ties keep the first descriptor.
pub fn distinctive_descriptor_index(descriptors: &[Descriptor]) -> Option<usize> {
    let n = descriptors.len();
    if n == 0 {
        return None;
    }

    let mut distances = vec![vec![0u32; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = descriptor_distance(&descriptors[i], &descriptors[j]);
            distances[i][j] = d;
            distances[j][i] = d;
        }
    }

    let mut best_median = u32::MAX;
    let mut best_idx = 0;
    for (i, row) in distances.iter_mut().enumerate() {
        row.sort_unstable();
        let median = row[(n - 1) / 2];
        if median < best_median {
            best_median = median;
            best_idx = i;
        }
    }

    Some(best_idx)
}

impl std::fmt::Debug for MapPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.features.lock();
        f.debug_struct("MapPoint")
            .field("id", &self.id)
            .field("position", &self.position.read().world_pos)
            .field("observations", &state.observations.len())
            .field("n_obs", &state.n_obs)
            .field("visible", &state.visible)
            .field("found", &state.found)
            .field("bad", &state.bad)
            .finish()
    }
}
