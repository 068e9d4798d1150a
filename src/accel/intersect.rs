//! Ray / primitive intersection routines shared by every traversal path.

use crate::util::{Aabb, Ray, Vec3, EPSILON};

/// Triangle hit: distance and barycentrics of `v1`/`v2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    pub t: f32,
    pub u: f32,
    pub v: f32,
}

/// Slab-method ray/box test.
///
/// Returns the overlap `[t_near, t_far]` clipped to `[t_min, t_max]`, with
/// `t_near <= t_far`. Rays parallel to an axis are rejected when the origin
/// lies outside the slab on that axis.
#[inline]
pub fn ray_box_intersect(ray: &Ray, aabb: &Aabb, t_min: f32, t_max: f32) -> Option<(f32, f32)> {
    if aabb.is_empty() {
        return None;
    }
    let mut t0 = t_min;
    let mut t1 = t_max;
    for axis in 0..3 {
        let o = ray.origin[axis];
        let d = ray.direction[axis];
        let (lo, hi) = (aabb.min[axis], aabb.max[axis]);
        if d.abs() < EPSILON {
            if o < lo || o > hi {
                return None;
            }
            continue;
        }
        let inv = 1.0 / d;
        let mut near = (lo - o) * inv;
        let mut far = (hi - o) * inv;
        if near > far {
            std::mem::swap(&mut near, &mut far);
        }
        t0 = t0.max(near);
        t1 = t1.min(far);
        if t0 > t1 {
            return None;
        }
    }
    Some((t0, t1))
}

/// Möller–Trumbore ray/triangle test, two-sided.
///
/// Hits outside `[ray.t_min, ray.t_max]` and near-parallel configurations
/// report no hit.
#[inline]
pub fn ray_triangle_intersect(ray: &Ray, v0: Vec3, v1: Vec3, v2: Vec3) -> Option<TriangleHit> {
    let e1 = v1 - v0;
    let e2 = v2 - v0;
    let p = ray.direction.cross(e2);
    let det = e1.dot(p);
    if det.abs() < EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;

    let s = ray.origin - v0;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(e1);
    let v = ray.direction.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = e2.dot(q) * inv_det;
    if t < ray.t_min || t > ray.t_max {
        return None;
    }
    Some(TriangleHit { t, u, v })
}
