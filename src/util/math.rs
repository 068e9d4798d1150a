//! Math type re-exports and ray tracing primitives.
//!
//! This module re-exports types from `glam` and provides the small geometric
//! types shared by every stage of the tracer (bounding boxes, planes, frusta,
//! rays).

// Re-export glam types
pub use glam::{Mat3, Mat4, UVec2, Vec2, Vec3, Vec4};

use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Generic epsilon for degenerate vector / denominator checks.
pub const EPSILON: f32 = 1e-6;

/// Offset applied along the surface normal when spawning secondary rays.
pub const RAY_OFFSET: f32 = 1e-3;

/// Axis-aligned bounding box with single precision.
#[derive(Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Empty box (inverted, will expand on first point).
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box enclosing a sphere.
    #[inline]
    pub fn from_sphere(center: Vec3, radius: f32) -> Self {
        Self {
            min: center - Vec3::splat(radius),
            max: center + Vec3::splat(radius),
        }
    }

    /// Box enclosing a set of points. Empty for an empty iterator.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut b = Self::EMPTY;
        for p in points {
            b.expand_by_point(p);
        }
        b
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    #[inline]
    pub fn expand_by_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[inline]
    pub fn expand_by_box(&mut self, other: &Self) {
        if !other.is_empty() {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Surface area (for SAH cost).
    #[inline]
    pub fn area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let d = self.size();
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    #[inline]
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Overlap test against a sphere (closest point distance).
    #[inline]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        if self.is_empty() {
            return false;
        }
        let closest = center.clamp(self.min, self.max);
        closest.distance_squared(center) <= radius * radius
    }

    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min.cmple(other.max).all()
            && other.min.cmple(self.max).all()
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for Aabb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aabb({:?} - {:?})", self.min, self.max)
    }
}

/// Plane in Hessian normal form: `dot(normal, p) == dist` on the plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub dist: f32,
}

impl Plane {
    #[inline]
    pub fn new(normal: Vec3, dist: f32) -> Self {
        Self { normal, dist }
    }

    /// Plane through `point` with the given (normalized) normal.
    #[inline]
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        Self { normal, dist: normal.dot(point) }
    }

    /// Signed distance of `p` (positive on the front side).
    #[inline]
    pub fn distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) - self.dist
    }
}

/// View frustum as six inward-facing planes.
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Build from a pinhole camera description.
    ///
    /// `fov_y` in radians, `aspect` = width / height.
    pub fn from_view(
        position: Vec3,
        forward: Vec3,
        up: Vec3,
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let forward = forward.normalize_or(Vec3::NEG_Z);
        let right = forward.cross(up).normalize_or(Vec3::X);
        let up = right.cross(forward);

        let half_v = (fov_y * 0.5).tan();
        let half_h = half_v * aspect;

        // Side plane normals point into the frustum
        let left_n = (forward - right * half_h).cross(up).normalize();
        let right_n = up.cross(forward + right * half_h).normalize();
        let top_n = (forward + up * half_v).cross(right).normalize();
        let bottom_n = right.cross(forward - up * half_v).normalize();

        Self {
            planes: [
                Plane::from_point_normal(position + forward * near, forward),
                Plane::from_point_normal(position + forward * far, -forward),
                Plane::from_point_normal(position, left_n),
                Plane::from_point_normal(position, right_n),
                Plane::from_point_normal(position, top_n),
                Plane::from_point_normal(position, bottom_n),
            ],
        }
    }

    /// Reject if the sphere lies fully behind any plane.
    #[inline]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes.iter().all(|p| p.distance(center) >= -radius)
    }

    /// Reject if the box lies fully behind any plane (positive-vertex test).
    pub fn intersects_aabb(&self, b: &Aabb) -> bool {
        if b.is_empty() {
            return false;
        }
        self.planes.iter().all(|p| {
            let v = Vec3::select(p.normal.cmpge(Vec3::ZERO), b.max, b.min);
            p.distance(v) >= 0.0
        })
    }
}

/// Ray with a parametric interval and recursion depth.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    pub t_min: f32,
    pub t_max: f32,
    pub depth: u32,
}

impl Ray {
    #[inline]
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction,
            t_min: 0.0,
            t_max: f32::INFINITY,
            depth: 0,
        }
    }

    #[inline]
    pub fn with_range(mut self, t_min: f32, t_max: f32) -> Self {
        self.t_min = t_min;
        self.t_max = t_max;
        self
    }

    #[inline]
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// Rec. 709 luminance.
#[inline]
pub fn luminance(c: Vec3) -> f32 {
    c.dot(Vec3::new(0.2126, 0.7152, 0.0722))
}

/// Replace NaN / Inf components with zero.
#[inline]
pub fn sanitize(c: Vec3) -> Vec3 {
    if c.is_finite() {
        c
    } else {
        Vec3::ZERO
    }
}

/// Orthonormal basis `(tangent, bitangent)` around a unit normal
/// (Duff et al. 2017, branchless).
#[inline]
pub fn orthonormal_basis(n: Vec3) -> (Vec3, Vec3) {
    let sign = 1.0f32.copysign(n.z);
    let a = -1.0 / (sign + n.z);
    let b = n.x * n.y * a;
    (
        Vec3::new(1.0 + sign * n.x * n.x * a, sign * b, -sign * n.x),
        Vec3::new(b, sign + n.y * n.y * a, -n.y),
    )
}
