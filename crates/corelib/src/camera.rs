use crate::{Mat4, Vec3, vec3};

/// Perspective camera (right-handed, depth in [0, 1]).
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_rad: f32,
    pub z_near: f32,
    pub z_far: f32,
    pub aspect: f32,
}

impl Camera {
    /// Camera looking at `target` from a point on a horizontal circle.
    pub fn orbiting(target: Vec3, radius: f32, height: f32, angle: f32, aspect: f32) -> Self {
        let eye = target + vec3(radius * angle.cos(), height, radius * angle.sin());
        Self {
            eye,
            target,
            up: Vec3::Y,
            fov_y_rad: 60f32.to_radians(),
            z_near: 0.1,
            z_far: 200.0,
            aspect,
        }
    }

    /// World-space eye position; this is what draw lists are sorted against.
    #[inline]
    pub fn position(&self) -> Vec3 {
        self.eye
    }

    #[inline]
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    #[inline]
    pub fn proj(&self) -> Mat4 {
        Mat4::perspective_rh(
            self.fov_y_rad,
            self.aspect.max(1e-6),
            self.z_near,
            self.z_far,
        )
    }

    #[inline]
    pub fn proj_view(&self) -> Mat4 {
        self.proj() * self.view()
    }

    /// Move the eye along the orbit around `target`, keeping radius and height.
    pub fn set_orbit_angle(&mut self, angle: f32) {
        let offset = self.eye - self.target;
        let radius = vec3(offset.x, 0.0, offset.z).length();
        self.eye = self.target + vec3(radius * angle.cos(), offset.y, radius * angle.sin());
    }

    #[inline]
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.aspect = width.max(1) as f32 / height.max(1) as f32;
    }
}
