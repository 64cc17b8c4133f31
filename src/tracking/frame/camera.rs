//! Pinhole camera intrinsics shared by frames and keyframes.

use nalgebra::{Matrix3, Vector3};

/// Rectified pinhole camera.
///
/// `baseline` is zero for a monocular camera. For stereo and RGB-D input
/// the right-image coordinate of a point at depth `z` is `u - bf / z`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// Stereo baseline in meters.
    pub baseline: f64,
}

impl CameraModel {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, baseline: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            baseline,
        }
    }

    pub fn monocular(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self::new(fx, fy, cx, cy, 0.0)
    }

    /// Build from a 3x3 calibration matrix and a stereo baseline.
    pub fn from_calibration_matrix(k: &Matrix3<f64>, baseline: f64) -> Self {
        Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)], baseline)
    }

    /// Baseline times horizontal focal length.
    pub fn bf(&self) -> f64 {
        self.baseline * self.fx
    }

    pub fn calibration_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Project a camera-frame point to pixel coordinates.
    ///
    /// The caller is responsible for rejecting points with `z <= 0`.
    pub fn project(&self, p_cam: &Vector3<f64>) -> (f64, f64) {
        let inv_z = 1.0 / p_cam.z;
        (
            self.fx * p_cam.x * inv_z + self.cx,
            self.fy * p_cam.y * inv_z + self.cy,
        )
    }

    /// Right-image horizontal coordinate for a left-image `u` at depth `z`.
    pub fn project_right(&self, u: f64, z: f64) -> f64 {
        u - self.bf() / z
    }
}
