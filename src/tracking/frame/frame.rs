//! Frame - The image currently being tracked.
//!
//! A Frame is owned by the tracking thread alone, so unlike a KeyFrame its
//! MapPoint slots and outlier flags are plain vectors.

use std::sync::Arc;

use nalgebra::Vector3;

use crate::atlas::map::{FrameId, MapPoint, TrackProjection};
use crate::geometry::SE3;

use super::{CameraModel, Features, ScalePyramid};

/// A tracked (non-key) frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: FrameId,
    pub features: Features,
    pub camera: CameraModel,
    pub pyramid: ScalePyramid,

    /// World-to-camera transform, unset until tracking estimates it.
    pose: Option<SE3>,
    center: Vector3<f64>,

    /// Feature index → matched MapPoint.
    pub map_points: Vec<Option<Arc<MapPoint>>>,
    /// Feature index → rejected as outlier by pose optimization.
    pub outliers: Vec<bool>,
}

impl Frame {
    pub fn new(id: FrameId, features: Features, camera: CameraModel, pyramid: ScalePyramid) -> Self {
        let n = features.len();
        Self {
            id,
            features,
            camera,
            pyramid,
            pose: None,
            center: Vector3::zeros(),
            map_points: vec![None; n],
            outliers: vec![false; n],
        }
    }

    pub fn set_pose(&mut self, tcw: SE3) {
        self.center = tcw.inverse_translation();
        self.pose = Some(tcw);
    }

    pub fn pose(&self) -> Option<&SE3> {
        self.pose.as_ref()
    }

    /// Camera center in world frame (origin while the pose is unset).
    pub fn camera_center(&self) -> Vector3<f64> {
        self.center
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Number of features with a MapPoint assigned.
    pub fn num_matches(&self) -> usize {
        self.map_points.iter().filter(|mp| mp.is_some()).count()
    }

    /// Decide whether `map_point` should be searched for in this frame and
    /// record the predicted projection on the point.
    ///
    /// The point must lie in front of the camera, project inside the image,
    /// sit inside its tolerant depth band and be seen at an angle whose
    /// cosine to its mean normal is at least `viewing_cos_limit`.
    pub fn is_in_frustum(&self, map_point: &MapPoint, viewing_cos_limit: f64) -> bool {
        let mut projection = TrackProjection::default();
        let visible = self.project_for_tracking(map_point, viewing_cos_limit, &mut projection);
        map_point.set_track_projection(projection);
        visible
    }

    fn project_for_tracking(
        &self,
        map_point: &MapPoint,
        viewing_cos_limit: f64,
        projection: &mut TrackProjection,
    ) -> bool {
        let Some(pose) = self.pose.as_ref() else {
            return false;
        };

        let p_w = map_point.world_pos();
        let p_c = pose.transform_point(&p_w);
        if p_c.z < 0.0 {
            return false;
        }

        let (u, v) = self.camera.project(&p_c);
        if !self.features.bounds.contains(u, v) {
            return false;
        }

        let po = p_w - self.center;
        let dist = po.norm();
        if dist < map_point.min_distance_invariance() || dist > map_point.max_distance_invariance() {
            return false;
        }

        let view_cos = po.dot(&map_point.normal()) / dist;
        if view_cos < viewing_cos_limit {
            return false;
        }

        *projection = TrackProjection {
            in_view: true,
            proj_x: u,
            proj_y: v,
            proj_xr: self.camera.project_right(u, p_c.z),
            scale_level: map_point.predict_scale(dist, &self.pyramid),
            view_cos,
        };
        true
    }
}
