//! KeyFrame - A selected frame whose pose and features persist in the map.
//!
//! The matcher reads a KeyFrame's features, intrinsics, pyramid and pose,
//! and reads or rewrites its per-feature MapPoint slots. Features are
//! immutable once the KeyFrame exists; pose and slots sit behind locks
//! because local mapping and loop closing update them concurrently.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nalgebra::{Matrix3, Vector3};
use parking_lot::{Mutex, RwLock};

use crate::geometry::SE3;
use crate::tracking::frame::{CameraModel, Features, Frame, ScalePyramid};

use super::map_point::MapPoint;
use super::types::{FrameId, KeyFrameId, MapPointId};

#[derive(Debug, Clone, Copy)]
struct KeyFramePose {
    /// World-to-camera transform.
    tcw: SE3,
    /// Camera center in world frame.
    center: Vector3<f64>,
}

/// A KeyFrame in the map.
pub struct KeyFrame {
    /// Unique identifier for this KeyFrame.
    pub id: KeyFrameId,

    /// Frame this KeyFrame was promoted from.
    pub frame_id: FrameId,

    // ─────────────────────────────────────────────────────────────────────────
    // Visual Features
    // ─────────────────────────────────────────────────────────────────────────
    pub features: Features,
    pub camera: CameraModel,
    pub pyramid: ScalePyramid,

    // ─────────────────────────────────────────────────────────────────────────
    // Mutable state
    // ─────────────────────────────────────────────────────────────────────────
    pose: RwLock<KeyFramePose>,

    /// Feature index → MapPoint association.
    map_points: Mutex<Vec<Option<Arc<MapPoint>>>>,

    bad: AtomicBool,
}

impl KeyFrame {
    /// Create a new KeyFrame.
    ///
    /// # Arguments
    /// * `id` - Unique identifier
    /// * `frame_id` - Source frame
    /// * `features` - Keypoints, descriptors and spatial index
    /// * `camera` - Intrinsics
    /// * `pyramid` - Scale pyramid of the extractor
    /// * `pose_cw` - World-to-camera transform (T_cw)
    pub fn new(
        id: KeyFrameId,
        frame_id: FrameId,
        features: Features,
        camera: CameraModel,
        pyramid: ScalePyramid,
        pose_cw: SE3,
    ) -> Self {
        let n = features.len();
        Self {
            id,
            frame_id,
            features,
            camera,
            pyramid,
            pose: RwLock::new(KeyFramePose {
                tcw: pose_cw,
                center: pose_cw.inverse_translation(),
            }),
            map_points: Mutex::new(vec![None; n]),
            bad: AtomicBool::new(false),
        }
    }

    /// Promote a tracked frame, keeping its MapPoint associations.
    ///
    /// A frame without a pose gets the identity.
    pub fn from_frame(id: KeyFrameId, frame: &Frame) -> Self {
        let kf = Self::new(
            id,
            frame.id,
            frame.features.clone(),
            frame.camera,
            frame.pyramid.clone(),
            frame.pose().copied().unwrap_or_default(),
        );
        *kf.map_points.lock() = frame.map_points.clone();
        kf
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pose
    // ─────────────────────────────────────────────────────────────────────────

    pub fn pose_cw(&self) -> SE3 {
        self.pose.read().tcw
    }

    pub fn set_pose_cw(&self, tcw: SE3) {
        *self.pose.write() = KeyFramePose {
            tcw,
            center: tcw.inverse_translation(),
        };
    }

    /// Camera center in world frame.
    pub fn camera_center(&self) -> Vector3<f64> {
        self.pose.read().center
    }

    pub fn rotation_cw(&self) -> Matrix3<f64> {
        self.pose.read().tcw.rotation_matrix()
    }

    pub fn translation_cw(&self) -> Vector3<f64> {
        self.pose.read().tcw.translation
    }

    pub fn is_in_image(&self, u: f64, v: f64) -> bool {
        self.features.bounds.contains(u, v)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Status
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_bad(&self) -> bool {
        self.bad.load(Ordering::Acquire)
    }

    pub fn set_bad(&self) {
        self.bad.store(true, Ordering::Release);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Map Point Associations
    // ─────────────────────────────────────────────────────────────────────────

    /// Associate feature `idx` with a MapPoint.
    pub fn add_map_point(&self, map_point: Arc<MapPoint>, idx: usize) {
        if let Some(slot) = self.map_points.lock().get_mut(idx) {
            *slot = Some(map_point);
        }
    }

    /// MapPoint associated with feature `idx`, if any.
    pub fn map_point(&self, idx: usize) -> Option<Arc<MapPoint>> {
        self.map_points.lock().get(idx).cloned().flatten()
    }

    /// Point feature `idx` at a different MapPoint.
    pub fn replace_map_point_match(&self, idx: usize, map_point: Arc<MapPoint>) {
        self.add_map_point(map_point, idx);
    }

    /// Clear the association of feature `idx`.
    pub fn erase_map_point_match(&self, idx: usize) {
        if let Some(slot) = self.map_points.lock().get_mut(idx) {
            *slot = None;
        }
    }

    /// Clear the slot in which `map_point` is observed, if it is.
    pub fn erase_map_point_match_for(&self, map_point: &MapPoint) {
        if let Some(idx) = map_point.index_in_keyframe(self.id) {
            self.erase_map_point_match(idx);
        }
    }

    /// Snapshot of all slots, index-aligned with the features.
    pub fn map_point_matches(&self) -> Vec<Option<Arc<MapPoint>>> {
        self.map_points.lock().clone()
    }

    /// Ids of the live MapPoints associated with this KeyFrame.
    pub fn map_point_ids(&self) -> HashSet<MapPointId> {
        self.map_point_matches()
            .into_iter()
            .flatten()
            .filter(|mp| !mp.is_bad())
            .map(|mp| mp.id)
            .collect()
    }

    /// Count the number of associated MapPoints.
    pub fn num_map_points(&self) -> usize {
        self.map_points.lock().iter().filter(|mp| mp.is_some()).count()
    }
}

impl std::fmt::Debug for KeyFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyFrame")
            .field("id", &self.id)
            .field("features", &self.features.len())
            .field("map_points", &self.num_map_points())
            .field("bad", &self.is_bad())
            .finish()
    }
}
