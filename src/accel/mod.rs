//! Acceleration structures and ray queries.
//!
//! ## Architecture
//! ```text
//! World surfaces → AccelBuilder (batches) → HardwareBackend (BLAS per batch, TLAS)
//!               ↘ SoftwareTracer (BSP walk, slab + Möller–Trumbore)
//! ```
//!
//! Both paths answer the same [`RayQuery`] contract so the integrator never
//! knows which one is serving it.

pub mod batch;
pub mod bvh;
pub mod intersect;
pub mod traverse;

pub use batch::{AccelBuilder, AddOutcome, BatchLimits, BuildOutput, BuildSummary, MeshBatch};
pub use bvh::{Bvh, BvhNode, BvhTriangle};
pub use intersect::{ray_box_intersect, ray_triangle_intersect, TriangleHit};
pub use traverse::SoftwareTracer;

use crate::util::{Ray, Vec2, Vec3};
use crate::world::MaterialId;

/// Closest-hit record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub t: f32,
    pub position: Vec3,
    /// Interpolated shading normal, facing the incoming ray
    pub normal: Vec3,
    /// Face normal, facing the incoming ray
    pub geometric_normal: Vec3,
    pub uv: Vec2,
    pub material: MaterialId,
    /// World surface index (software) or batch-local triangle id (hardware)
    pub surface: u32,
}

/// Ray query contract shared by the software and hardware paths.
///
/// Closest hit: nearest intersection within `[t_min, t_max]` or `None`.
pub trait RayQuery {
    fn closest_hit(&self, ray: &Ray) -> Option<Hit>;

    /// Any hit within the ray interval.
    fn occluded(&self, ray: &Ray) -> bool {
        self.closest_hit(ray).is_some()
    }

    /// Resolve a set of shadow rays at once. `out[i]` is set for `rays[i]`.
    fn occluded_batch(&self, rays: &[Ray], out: &mut [bool]) {
        for (ray, o) in rays.iter().zip(out.iter_mut()) {
            *o = self.occluded(ray);
        }
    }

    /// Short name for diagnostics.
    fn backend_name(&self) -> &str;
}
