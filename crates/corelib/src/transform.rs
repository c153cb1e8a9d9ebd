use crate::{EulerRot, Mat4, Quat, Vec3};

/// Local transform (Euler XYZ) relative to a parent space.
///
/// `parent` maps parent space into world space; it is the identity for
/// objects attached directly to the scene root.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    /// Euler angles in radians (XYZ order).
    pub rotation_euler: Vec3,
    pub scale: Vec3,
    pub parent: Mat4,
}

impl Transform {
    #[inline]
    pub const fn identity() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation_euler: Vec3::ZERO,
            scale: Vec3::ONE,
            parent: Mat4::IDENTITY,
        }
    }

    #[inline]
    pub fn from_trs(translation: Vec3, rotation_euler: Vec3, scale: Vec3) -> Self {
        Self {
            translation,
            rotation_euler,
            scale,
            parent: Mat4::IDENTITY,
        }
    }

    #[inline]
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::identity()
        }
    }

    #[inline]
    pub fn with_parent(mut self, parent: Mat4) -> Self {
        self.parent = parent;
        self
    }

    /// Local matrix = T * R * S (column-major Mat4 per glam).
    #[inline]
    pub fn matrix(&self) -> Mat4 {
        let q = Quat::from_euler(
            EulerRot::XYZ,
            self.rotation_euler.x,
            self.rotation_euler.y,
            self.rotation_euler.z,
        );
        Mat4::from_scale_rotation_translation(self.scale, q, self.translation)
    }

    /// Local-to-world matrix.
    #[inline]
    pub fn world_matrix(&self) -> Mat4 {
        self.parent * self.matrix()
    }

    /// Convert a point expressed in parent space into world space.
    #[inline]
    pub fn parent_to_world(&self, point: Vec3) -> Vec3 {
        self.parent.transform_point3(point)
    }

    /// Origin of this transform in world space.
    #[inline]
    pub fn world_position(&self) -> Vec3 {
        self.parent_to_world(self.translation)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec3;

    #[test]
    fn world_position_without_parent_is_translation() {
        let t = Transform::from_translation(vec3(1.0, -2.0, 3.0));
        assert_eq!(t.world_position(), vec3(1.0, -2.0, 3.0));
    }

    #[test]
    fn world_position_goes_through_parent() {
        let parent = Mat4::from_translation(vec3(10.0, 0.0, 0.0))
            * Mat4::from_scale(vec3(2.0, 2.0, 2.0));
        let t = Transform::from_translation(vec3(1.0, 1.0, 0.0)).with_parent(parent);
        let p = t.world_position();
        assert!((p - vec3(12.0, 2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn world_matrix_moves_origin_to_world_position() {
        let parent = Mat4::from_rotation_y(std::f32::consts::FRAC_PI_2);
        let t = Transform::from_translation(vec3(0.0, 0.0, 5.0)).with_parent(parent);
        let origin = t.world_matrix().transform_point3(Vec3::ZERO);
        assert!((origin - t.world_position()).length() < 1e-5);
    }
}
