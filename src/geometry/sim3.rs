//! Sim3: 7-DOF similarity transformation (rotation + translation + scale).
//!
//! Loop correction hands the matcher world-to-camera similarities `S_cw`
//! whose scale absorbs the drift accumulated along the trajectory. Matching
//! against such a pose goes through [`ScaleFreePose`], which strips the
//! scale so that projection and depth gating happen in a rigid frame.

use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};

/// 7-DOF Similarity transformation: rotation + translation + scale.
///
/// Transforms points as: p' = s * R * p + t
#[derive(Debug, Clone, PartialEq)]
pub struct Sim3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
    pub scale: f64,
}

impl Sim3 {
    /// Identity transformation (no rotation, no translation, scale = 1).
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
            scale: 1.0,
        }
    }

    /// Construct from rotation matrix, translation, and scale.
    pub fn from_rts(rotation: Matrix3<f64>, translation: Vector3<f64>, scale: f64) -> Self {
        let rot3 = Rotation3::from_matrix_unchecked(rotation);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot3),
            translation,
            scale,
        }
    }

    /// Construct from homogeneous 4x4 matrix of form [s*R | t; 0 | 1].
    ///
    /// The scale is the norm of the first row of the rotation block.
    pub fn from_matrix(mat: Matrix4<f64>) -> Self {
        let sr_block = mat.fixed_view::<3, 3>(0, 0).into_owned();
        let translation = Vector3::new(mat[(0, 3)], mat[(1, 3)], mat[(2, 3)]);
        let scale = sr_block.row(0).norm();

        let rotation_mat = if scale > 1e-10 {
            sr_block / scale
        } else {
            Matrix3::identity()
        };

        Self::from_rts(rotation_mat, translation, scale)
    }

    /// Convert to homogeneous 4x4 matrix of form [s*R | t; 0 0 0 1].
    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut mat = Matrix4::identity();
        mat.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.scaled_rotation_matrix());
        mat.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        mat
    }

    /// Inverse transformation.
    ///
    /// For Sim3: S = [sR | t; 0 | 1]
    /// Inverse: S^{-1} = [(1/s)R^T | -(1/s)R^T*t; 0 | 1]
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        let scale_inv = 1.0 / self.scale;
        let t_inv = -(rot_inv * self.translation) * scale_inv;
        Self {
            rotation: rot_inv,
            translation: t_inv,
            scale: scale_inv,
        }
    }

    /// Compose two Sim3 transforms: self ∘ other.
    ///
    /// For S1 = [s1*R1 | t1] and S2 = [s2*R2 | t2]:
    /// S1 ∘ S2 = [s1*s2*R1*R2 | s1*R1*t2 + t1]
    pub fn compose(&self, other: &Sim3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.scale * (self.rotation * other.translation) + self.translation,
            scale: self.scale * other.scale,
        }
    }

    /// Transform a single point: p' = s * R * p + t.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.scale * (self.rotation * p) + self.translation
    }

    /// Get the rotation matrix (without scale).
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    /// Get the scaled rotation matrix (s * R).
    pub fn scaled_rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation_matrix() * self.scale
    }
}

impl Default for Sim3 {
    fn default() -> Self {
        Self::identity()
    }
}

/// A world-to-camera similarity with its scale divided out.
///
/// Given `S_cw = [sR | t]`, this holds `R`, `t / s`, `s` and the camera
/// center `O_w = -Rᵀ (t / s)`. Projecting with `(R, t/s)` lands on the same
/// pixel as the full similarity (the camera-frame point is only rescaled
/// by `1/s`), while distances measured from `O_w` stay in the units of the
/// world points. Map points fed through this pose are therefore assumed to
/// already carry correct scale.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleFreePose {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub scale: f64,
    pub center: Vector3<f64>,
}

impl ScaleFreePose {
    /// Strip the scale of a world-to-camera similarity.
    pub fn from_sim3(scw: &Sim3) -> Self {
        let mat = scw.to_matrix();
        let s_rot = mat.fixed_view::<3, 3>(0, 0).into_owned();
        let scale = s_rot.row(0).norm();
        let rotation = s_rot / scale;
        let translation = Vector3::new(mat[(0, 3)], mat[(1, 3)], mat[(2, 3)]) / scale;
        let center = -rotation.transpose() * translation;
        Self {
            rotation,
            translation,
            scale,
            center,
        }
    }

    /// World point into the (scale-free) camera frame.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity() {
        let sim3 = Sim3::identity();
        assert_eq!(sim3.scale, 1.0);
        assert_eq!(sim3.translation, Vector3::zeros());

        let p = Vector3::new(1.0, 2.0, 3.0);
        assert_relative_eq!(sim3.transform_point(&p), p, epsilon = 1e-10);
    }

    #[test]
    fn test_inverse() {
        let sim3 = Sim3 {
            rotation: UnitQuaternion::from_axis_angle(
                &nalgebra::Unit::new_normalize(Vector3::new(0.0, 0.0, 1.0)),
                std::f64::consts::FRAC_PI_2,
            ),
            translation: Vector3::new(1.0, 2.0, 3.0),
            scale: 2.0,
        };

        let sim3_inv = sim3.inverse();
        let composed = sim3.compose(&sim3_inv);

        assert_relative_eq!(composed.scale, 1.0, epsilon = 1e-10);
        assert_relative_eq!(composed.translation.norm(), 0.0, epsilon = 1e-10);

        let p = Vector3::new(1.0, 2.0, 3.0);
        let p_back = sim3_inv.transform_point(&sim3.transform_point(&p));
        assert_relative_eq!(p_back, p, epsilon = 1e-10);
    }

    #[test]
    fn test_to_from_matrix() {
        let sim3 = Sim3 {
            rotation: UnitQuaternion::from_axis_angle(
                &nalgebra::Unit::new_normalize(Vector3::new(1.0, 0.0, 0.0)),
                std::f64::consts::FRAC_PI_4,
            ),
            translation: Vector3::new(1.0, 2.0, 3.0),
            scale: 2.5,
        };

        let rebuilt = Sim3::from_matrix(sim3.to_matrix());

        assert_relative_eq!(sim3.scale, rebuilt.scale, epsilon = 1e-10);
        assert_relative_eq!(sim3.translation, rebuilt.translation, epsilon = 1e-10);
        assert_relative_eq!(
            sim3.rotation_matrix(),
            rebuilt.rotation_matrix(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_scale_free_pose_pure_scale() {
        let scw = Sim3 {
            scale: 2.0,
            ..Sim3::identity()
        };
        let pose = ScaleFreePose::from_sim3(&scw);

        assert_relative_eq!(pose.scale, 2.0, epsilon = 1e-12);
        assert_relative_eq!(pose.rotation, Matrix3::identity(), epsilon = 1e-12);
        assert_relative_eq!(pose.center, Vector3::zeros(), epsilon = 1e-12);

        let p = Vector3::new(10.0, 0.0, 20.0);
        assert_relative_eq!((p - pose.center).norm(), 500f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_scale_free_pose_projects_like_full_similarity() {
        let scw = Sim3 {
            rotation: UnitQuaternion::from_axis_angle(
                &nalgebra::Unit::new_normalize(Vector3::new(0.2, 1.0, 0.1)),
                0.4,
            ),
            translation: Vector3::new(0.3, -0.2, 1.5),
            scale: 3.0,
        };
        let pose = ScaleFreePose::from_sim3(&scw);
        let p = Vector3::new(0.5, 0.4, 6.0);

        let full = scw.transform_point(&p);
        let free = pose.transform_point(&p);

        // Same ray, scaled by 1/s
        assert_relative_eq!(full / scw.scale, free, epsilon = 1e-10);
        assert_relative_eq!(full.x / full.z, free.x / free.z, epsilon = 1e-10);
        // Center maps to the camera origin
        assert_relative_eq!(pose.transform_point(&pose.center), Vector3::zeros(), epsilon = 1e-10);
    }
}
