//! Software ray traversal over the world's BSP.
//!
//! This is the fallback used whenever the hardware backend is unavailable or
//! disabled. It walks the same partition the world loader hands to the
//! rasterizer, tests leaf boxes with the slab method and every referenced
//! triangle with Möller–Trumbore, and keeps the nearest hit in
//! `[t_min, t_max]`, matching the hardware closest-hit contract.

use super::intersect::{ray_box_intersect, ray_triangle_intersect};
use super::{Hit, RayQuery};
use crate::util::{Ray, Vec2, Vec3, EPSILON};
use crate::world::{BspChild, BspLeaf, BspNode, MaterialId, World};

/// Triangle data of one surface, flattened for traversal.
#[derive(Debug, Clone, Default)]
struct PreparedSurface {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    uvs: Vec<Vec2>,
    triangles: Vec<[u32; 3]>,
    material: MaterialId,
}

/// Self-contained copy of the world's traceable geometry and partition.
#[derive(Debug, Clone, Default)]
pub struct SoftwareTracer {
    nodes: Vec<BspNode>,
    leaves: Vec<BspLeaf>,
    surfaces: Vec<PreparedSurface>,
}

impl SoftwareTracer {
    /// Prepare traversal data. Sky, no-draw and untraceable kinds are left empty
    /// so surface indices stay aligned with the world.
    #[tracing::instrument(skip_all, fields(surfaces = world.surfaces.len(), leaves = world.leaves.len()))]
    pub fn new(world: &World) -> Self {
        let surfaces = world
            .surfaces
            .iter()
            .map(|s| {
                if !s.is_traceable() {
                    return PreparedSurface::default();
                }
                let Some(indices) = s.geometry.triangle_indices() else {
                    return PreparedSurface::default();
                };
                let verts = s.geometry.vertices();
                let triangles = indices
                    .chunks_exact(3)
                    .map(|c| [c[0], c[1], c[2]])
                    .filter(|t| t.iter().all(|&i| (i as usize) < verts.len()))
                    .collect();
                PreparedSurface {
                    positions: verts.iter().map(|v| v.position).collect(),
                    normals: verts.iter().map(|v| v.normal).collect(),
                    uvs: verts.iter().map(|v| v.uv).collect(),
                    triangles,
                    material: s.material,
                }
            })
            .collect();

        Self {
            nodes: world.nodes.clone(),
            leaves: world.leaves.clone(),
            surfaces,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.surfaces.iter().map(|s| s.triangles.len()).sum()
    }

    fn root(&self) -> Option<BspChild> {
        if !self.nodes.is_empty() {
            Some(BspChild::Node(0))
        } else if !self.leaves.is_empty() {
            Some(BspChild::Leaf(0))
        } else {
            None
        }
    }

    /// Exhaustive closest hit over every surface, ignoring the partition.
    pub fn closest_hit_brute_force(&self, ray: &Ray) -> Option<Hit> {
        let mut best = None;
        for idx in 0..self.surfaces.len() {
            self.intersect_surface(idx as u32, ray, &mut best);
        }
        best
    }

    fn traverse(&self, child: BspChild, ray: &Ray, best: &mut Option<Hit>) {
        let t_max = best.as_ref().map_or(ray.t_max, |h| h.t);
        match child {
            BspChild::Leaf(l) => {
                let Some(leaf) = self.leaves.get(l as usize) else { return };
                if ray_box_intersect(ray, &leaf.bounds, ray.t_min, t_max).is_none() {
                    return;
                }
                for &s in &leaf.surfaces {
                    self.intersect_surface(s, ray, best);
                }
            }
            BspChild::Node(n) => {
                let Some(node) = self.nodes.get(n as usize) else { return };
                if ray_box_intersect(ray, &node.bounds, ray.t_min, t_max).is_none() {
                    return;
                }

                let d = node.plane.distance(ray.origin);
                let dn = node.plane.normal.dot(ray.direction);
                // Origin side decides the near child; on the plane the direction does
                let near = if d > EPSILON {
                    0
                } else if d < -EPSILON {
                    1
                } else if dn >= 0.0 {
                    0
                } else {
                    1
                };

                self.traverse(node.children[near], ray, best);

                // Parallel to the split: the far side is never entered
                if dn.abs() < EPSILON {
                    return;
                }
                let t_split = -d / dn;
                if t_split < 0.0 {
                    return;
                }
                let t_max = best.as_ref().map_or(ray.t_max, |h| h.t);
                if t_split > t_max {
                    return;
                }
                self.traverse(node.children[1 - near], ray, best);
            }
        }
    }

    fn intersect_surface(&self, idx: u32, ray: &Ray, best: &mut Option<Hit>) {
        let Some(s) = self.surfaces.get(idx as usize) else { return };
        for tri in &s.triangles {
            let [i0, i1, i2] = tri.map(|i| i as usize);
            let (p0, p1, p2) = (s.positions[i0], s.positions[i1], s.positions[i2]);

            let mut clipped = *ray;
            if let Some(h) = best.as_ref() {
                clipped.t_max = h.t;
            }
            let Some(th) = ray_triangle_intersect(&clipped, p0, p1, p2) else { continue };

            let w = 1.0 - th.u - th.v;
            // Two-sided: both normals face the incoming ray
            let mut geometric = (p1 - p0).cross(p2 - p0).normalize_or_zero();
            if geometric.dot(ray.direction) > 0.0 {
                geometric = -geometric;
            }
            let mut shading =
                (s.normals[i0] * w + s.normals[i1] * th.u + s.normals[i2] * th.v).normalize_or_zero();
            if shading == Vec3::ZERO {
                shading = geometric;
            } else if shading.dot(geometric) < 0.0 {
                shading = -shading;
            }

            *best = Some(Hit {
                t: th.t,
                position: ray.at(th.t),
                normal: shading,
                geometric_normal: geometric,
                uv: s.uvs[i0] * w + s.uvs[i1] * th.u + s.uvs[i2] * th.v,
                material: s.material,
                surface: idx,
            });
        }
    }
}

impl RayQuery for SoftwareTracer {
    fn closest_hit(&self, ray: &Ray) -> Option<Hit> {
        let mut best = None;
        if let Some(root) = self.root() {
            self.traverse(root, ray, &mut best);
        }
        best
    }

    fn backend_name(&self) -> &str {
        "software-bsp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Material, SurfaceFlags, WorldBuilder};

    fn room() -> World {
        let mut b = WorldBuilder::new("room").max_leaf_surfaces(2);
        let m = b.add_material(Material::default());
        b.add_room(Vec3::ZERO, Vec3::splat(10.0), m);
        // A free-standing occluder inside the room
        b.add_quad(
            [
                Vec3::new(4.0, 4.0, 3.0),
                Vec3::new(6.0, 4.0, 3.0),
                Vec3::new(6.0, 6.0, 3.0),
                Vec3::new(4.0, 6.0, 3.0),
            ],
            m,
        );
        b.build()
    }

    #[test]
    fn test_hits_floor_from_inside() {
        let world = room();
        let tracer = SoftwareTracer::new(&world);
        let ray = Ray::new(Vec3::new(1.0, 1.0, 5.0), Vec3::NEG_Z);
        let hit = tracer.closest_hit(&ray).unwrap();
        assert!((hit.t - 5.0).abs() < 1e-4);
        assert!(hit.normal.dot(Vec3::Z) > 0.99);
        assert_eq!(hit.surface, 0);
    }

    #[test]
    fn test_nearest_hit_wins() {
        let world = room();
        let tracer = SoftwareTracer::new(&world);
        let ray = Ray::new(Vec3::new(5.0, 5.0, 8.0), Vec3::NEG_Z);
        let hit = tracer.closest_hit(&ray).unwrap();
        assert!((hit.t - 5.0).abs() < 1e-4, "occluder at z=3 expected, t={}", hit.t);
        assert_eq!(hit.surface, 6);
    }

    #[test]
    fn test_range_limits_respected() {
        let world = room();
        let tracer = SoftwareTracer::new(&world);
        let ray = Ray::new(Vec3::new(1.0, 1.0, 5.0), Vec3::NEG_Z).with_range(0.0, 4.0);
        assert!(tracer.closest_hit(&ray).is_none());
        assert!(!tracer.occluded(&ray));
    }

    #[test]
    fn test_bsp_matches_brute_force() {
        let world = room();
        let tracer = SoftwareTracer::new(&world);
        let origin = Vec3::new(2.5, 3.5, 6.5);
        for i in 0..200 {
            let fi = i as f32;
            let dir = Vec3::new((fi * 0.7).sin(), (fi * 1.3).cos(), (fi * 0.37).sin() - 0.2).normalize();
            let ray = Ray::new(origin, dir).with_range(1e-3, f32::INFINITY);
            let a = tracer.closest_hit(&ray);
            let b = tracer.closest_hit_brute_force(&ray);
            match (a, b) {
                (Some(a), Some(b)) => assert!((a.t - b.t).abs() < 1e-4, "ray {i}: {} vs {}", a.t, b.t),
                (None, None) => {}
                (a, b) => panic!("ray {i}: bsp {:?} brute {:?}", a.map(|h| h.t), b.map(|h| h.t)),
            }
        }
    }

    #[test]
    fn test_sky_surfaces_not_traced() {
        let mut b = WorldBuilder::new("sky");
        let m = b.add_material(Material::default());
        let idx = b.add_quad(
            [Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 0.0), Vec3::new(-1.0, 1.0, 0.0)],
            m,
        );
        let mut world = b.build();
        world.surfaces[idx as usize].flags = SurfaceFlags::SKY;
        let tracer = SoftwareTracer::new(&world);
        assert!(tracer.closest_hit(&Ray::new(Vec3::Z, Vec3::NEG_Z)).is_none());
    }

    #[test]
    fn test_empty_world_misses() {
        let tracer = SoftwareTracer::new(&World::default());
        assert!(tracer.closest_hit(&Ray::new(Vec3::ZERO, Vec3::X)).is_none());
    }
}
