//! Pinhole camera and primary ray generation.

use serde::{Deserialize, Serialize};

use crate::util::{Frustum, Ray, Vec2, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    /// Vertical field of view in degrees
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            fov_y: 60.0,
            near: 0.05,
            far: 10000.0,
        }
    }
}

impl Camera {
    pub fn look_at(position: Vec3, target: Vec3, up: Vec3) -> Self {
        Self {
            position,
            forward: (target - position).normalize_or(Vec3::NEG_Z),
            up,
            ..Default::default()
        }
    }

    pub fn with_fov(mut self, fov_y: f32) -> Self {
        self.fov_y = fov_y;
        self
    }

    fn basis(&self) -> (Vec3, Vec3, Vec3) {
        let f = self.forward.normalize_or(Vec3::NEG_Z);
        let r = f.cross(self.up).normalize_or(Vec3::X);
        let u = r.cross(f);
        (f, r, u)
    }

    /// Ray through pixel `(x, y)` (top-left origin) offset by `jitter` in
    /// `[0, 1)²`; `(0.5, 0.5)` is the pixel center.
    pub fn generate_ray(&self, x: u32, y: u32, width: u32, height: u32, jitter: Vec2) -> Ray {
        let (f, r, u) = self.basis();
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        let half_v = (self.fov_y.to_radians() * 0.5).tan();
        let half_h = half_v * w / h;

        let sx = ((x as f32 + jitter.x) / w) * 2.0 - 1.0;
        let sy = 1.0 - ((y as f32 + jitter.y) / h) * 2.0;
        let dir = (f + r * (sx * half_h) + u * (sy * half_v)).normalize();
        Ray::new(self.position, dir).with_range(self.near, self.far)
    }

    pub fn frustum(&self, aspect: f32) -> Frustum {
        Frustum::from_view(
            self.position,
            self.forward,
            self.up,
            self.fov_y.to_radians(),
            aspect,
            self.near,
            self.far,
        )
    }
}
