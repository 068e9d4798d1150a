//! Hardware ray tracing seam.
//!
//! [`HardwareBackend`] is what a native ray tracing device offers: a
//! capability probe, bottom-level structures built from mesh batches, a
//! top-level structure over instances, a light buffer and ray queries.
//! [`EmulatedHardware`] implements it in-process on SAH BVHs with the exact
//! device data layout ([`BvhNode`], [`BvhTriangle`], [`SceneLight`]), which
//! makes it usable for parity validation and fallback testing.

use crate::accel::{Bvh, BvhTriangle, Hit, MeshBatch, RayQuery};
use crate::scene_lights::SceneLight;
use crate::util::{Aabb, Error, Mat4, Ray, Result, Vec2, Vec3};
use crate::world::MaterialId;

/// Bottom-level structure handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlasId(pub u32);

/// Top-level instance of a bottom-level structure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instance {
    pub blas: BlasId,
    pub transform: Mat4,
}

impl Instance {
    pub fn identity(blas: BlasId) -> Self {
        Self {
            blas,
            transform: Mat4::IDENTITY,
        }
    }
}

pub trait HardwareBackend: RayQuery {
    /// Device name for diagnostics.
    fn name(&self) -> &str;

    /// Capability check. An error means ray tracing cannot be used.
    fn probe(&mut self) -> Result<()>;

    /// Drop all structures and the light buffer.
    fn clear(&mut self);

    fn build_blas(&mut self, batch: &MeshBatch) -> Result<BlasId>;

    fn build_tlas(&mut self, instances: &[Instance]) -> Result<()>;

    fn upload_lights(&mut self, lights: &[SceneLight]) -> Result<()>;

    /// Top-level structure built and queryable.
    fn is_ready(&self) -> bool;

    /// Fault raised while serving queries since the last call.
    fn take_fault(&mut self) -> Option<Error>;

    fn as_ray_query(&self) -> &dyn RayQuery;
}

/// Per-triangle attributes next to the device triangles.
#[derive(Debug, Clone, Copy)]
struct TriangleAttributes {
    normals: [Vec3; 3],
    uvs: [Vec2; 3],
    surface: u32,
}

#[derive(Debug, Clone, Default)]
struct Blas {
    bvh: Bvh,
    triangles: Vec<BvhTriangle>,
    attributes: Vec<TriangleAttributes>,
    bounds: Aabb,
}

#[derive(Debug, Clone)]
struct TlasEntry {
    blas: usize,
    world_to_object: Mat4,
    normal_matrix: Mat4,
}

#[derive(Debug, Clone, Default)]
struct Tlas {
    bvh: Bvh,
    entries: Vec<TlasEntry>,
}

/// In-process hardware backend with injectable failures.
#[derive(Debug, Default)]
pub struct EmulatedHardware {
    blas: Vec<Blas>,
    tlas: Option<Tlas>,
    lights: Vec<SceneLight>,
    light_uploads: u64,
    probe_failure: Option<String>,
    build_failure: Option<String>,
    fault: Option<String>,
    /// Light upload count at which a fault is raised
    fault_after_uploads: Option<(u64, String)>,
}

impl EmulatedHardware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following probe fail with `reason`.
    pub fn with_probe_failure(mut self, reason: impl Into<String>) -> Self {
        self.probe_failure = Some(reason.into());
        self
    }

    /// Make every following structure build fail with `reason`.
    pub fn with_build_failure(mut self, reason: impl Into<String>) -> Self {
        self.build_failure = Some(reason.into());
        self
    }

    /// Raise a runtime fault once `uploads` light uploads have happened,
    /// like a device lost mid-session.
    pub fn with_fault_after_uploads(mut self, uploads: u64, reason: impl Into<String>) -> Self {
        self.fault_after_uploads = Some((uploads, reason.into()));
        self
    }

    /// Raise a runtime fault, reported by the next `take_fault`.
    pub fn inject_fault(&mut self, reason: impl Into<String>) {
        self.fault = Some(reason.into());
    }

    pub fn blas_count(&self) -> usize {
        self.blas.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.blas.iter().map(|b| b.triangles.len()).sum()
    }

    /// Contents of the device light buffer.
    pub fn lights(&self) -> &[SceneLight] {
        &self.lights
    }

    pub fn light_uploads(&self) -> u64 {
        self.light_uploads
    }

    fn intersect_instance(&self, entry: &TlasEntry, ray: &Ray, t_max: f32) -> Option<Hit> {
        let blas = &self.blas[entry.blas];
        let local = Ray {
            origin: entry.world_to_object.transform_point3(ray.origin),
            direction: entry.world_to_object.transform_vector3(ray.direction),
            t_min: ray.t_min,
            t_max,
            depth: ray.depth,
        };
        let (prim, th) = blas.bvh.closest_triangle(&blas.triangles, &local)?;
        let tri = &blas.triangles[prim];
        let attr = &blas.attributes[prim];
        let (p0, p1, p2) = tri.positions();
        let w = 1.0 - th.u - th.v;

        let to_world = |n: Vec3| entry.normal_matrix.transform_vector3(n).normalize_or_zero();
        let mut geometric = to_world((p1 - p0).cross(p2 - p0));
        if geometric.dot(ray.direction) > 0.0 {
            geometric = -geometric;
        }
        let mut shading = to_world(attr.normals[0] * w + attr.normals[1] * th.u + attr.normals[2] * th.v);
        if shading == Vec3::ZERO {
            shading = geometric;
        } else if shading.dot(geometric) < 0.0 {
            shading = -shading;
        }

        Some(Hit {
            t: th.t,
            position: ray.at(th.t),
            normal: shading,
            geometric_normal: geometric,
            uv: attr.uvs[0] * w + attr.uvs[1] * th.u + attr.uvs[2] * th.v,
            material: MaterialId(tri.material_id),
            surface: attr.surface,
        })
    }
}

impl RayQuery for EmulatedHardware {
    fn closest_hit(&self, ray: &Ray) -> Option<Hit> {
        let tlas = self.tlas.as_ref()?;
        let mut best: Option<Hit> = None;
        tlas.bvh.traverse(ray, false, |i, t_max| {
            let hit = self.intersect_instance(&tlas.entries[i], ray, t_max)?;
            let t = hit.t;
            best = Some(hit);
            Some(t)
        });
        best
    }

    fn occluded(&self, ray: &Ray) -> bool {
        let Some(tlas) = self.tlas.as_ref() else { return false };
        let mut found = false;
        tlas.bvh.traverse(ray, true, |i, _| {
            let entry = &tlas.entries[i];
            let blas = &self.blas[entry.blas];
            let local = Ray {
                origin: entry.world_to_object.transform_point3(ray.origin),
                direction: entry.world_to_object.transform_vector3(ray.direction),
                ..*ray
            };
            if blas.bvh.any_triangle(&blas.triangles, &local) {
                found = true;
                return Some(ray.t_min);
            }
            None
        });
        found
    }

    fn backend_name(&self) -> &str {
        "emulated-hardware"
    }
}

impl HardwareBackend for EmulatedHardware {
    fn name(&self) -> &str {
        "emulated"
    }

    fn probe(&mut self) -> Result<()> {
        match &self.probe_failure {
            Some(reason) => Err(Error::HardwareUnavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn clear(&mut self) {
        self.blas.clear();
        self.tlas = None;
        self.lights.clear();
    }

    #[tracing::instrument(skip_all, fields(triangles = batch.triangle_count()))]
    fn build_blas(&mut self, batch: &MeshBatch) -> Result<BlasId> {
        if let Some(reason) = &self.build_failure {
            return Err(Error::AccelBuildFailed(reason.clone()));
        }
        let tri_count = batch.triangle_count();
        if batch.materials.len() != tri_count || batch.surfaces.len() != tri_count {
            return Err(Error::AccelBuildFailed(format!(
                "batch attribute count mismatch ({tri_count} triangles)"
            )));
        }

        let mut triangles = Vec::with_capacity(tri_count);
        let mut attributes = Vec::with_capacity(tri_count);
        for (t, idx) in batch.indices.chunks_exact(3).enumerate() {
            let [a, b, c] = [idx[0], idx[1], idx[2]].map(|i| i as usize);
            if [a, b, c].iter().any(|&i| i >= batch.positions.len()) {
                return Err(Error::AccelBuildFailed(format!("index out of range in triangle {t}")));
            }
            let normal = |i: usize| batch.normals.get(i).copied().unwrap_or(Vec3::ZERO);
            let uv = |i: usize| batch.uvs.get(i).copied().unwrap_or(Vec2::ZERO);
            triangles.push(BvhTriangle::new(
                batch.positions[a],
                batch.positions[b],
                batch.positions[c],
                batch.materials[t].0,
                t as u32,
            ));
            attributes.push(TriangleAttributes {
                normals: [normal(a), normal(b), normal(c)],
                uvs: [uv(a), uv(b), uv(c)],
                surface: batch.surfaces[t],
            });
        }

        let bvh = Bvh::build(&triangles);
        let bounds = bvh.bounds();
        self.blas.push(Blas {
            bvh,
            triangles,
            attributes,
            bounds,
        });
        Ok(BlasId(self.blas.len() as u32 - 1))
    }

    #[tracing::instrument(skip_all, fields(instances = instances.len()))]
    fn build_tlas(&mut self, instances: &[Instance]) -> Result<()> {
        if let Some(reason) = &self.build_failure {
            return Err(Error::AccelBuildFailed(reason.clone()));
        }
        let mut entries = Vec::with_capacity(instances.len());
        let mut bounds = Vec::with_capacity(instances.len());
        for inst in instances {
            let blas = inst.blas.0 as usize;
            let Some(b) = self.blas.get(blas) else {
                return Err(Error::AccelBuildFailed(format!("unknown BLAS {}", inst.blas.0)));
            };
            if inst.transform.determinant().abs() < 1e-12 {
                return Err(Error::AccelBuildFailed("singular instance transform".into()));
            }
            let world_to_object = inst.transform.inverse();
            bounds.push(transform_aabb(&inst.transform, &b.bounds));
            entries.push(TlasEntry {
                blas,
                world_to_object,
                normal_matrix: world_to_object.transpose(),
            });
        }
        self.tlas = Some(Tlas {
            bvh: Bvh::build_from_bounds(&bounds),
            entries,
        });
        Ok(())
    }

    fn upload_lights(&mut self, lights: &[SceneLight]) -> Result<()> {
        self.lights.clear();
        self.lights.extend_from_slice(lights);
        self.light_uploads += 1;
        if let Some((at, _)) = &self.fault_after_uploads {
            if self.light_uploads >= *at {
                self.fault = self.fault_after_uploads.take().map(|(_, reason)| reason);
            }
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.tlas.is_some()
    }

    fn take_fault(&mut self) -> Option<Error> {
        self.fault.take().map(Error::TraceFailed)
    }

    fn as_ray_query(&self) -> &dyn RayQuery {
        self
    }
}

fn transform_aabb(m: &Mat4, b: &Aabb) -> Aabb {
    if b.is_empty() {
        return Aabb::EMPTY;
    }
    let corners = (0..8).map(|i| {
        Vec3::new(
            if i & 1 == 0 { b.min.x } else { b.max.x },
            if i & 2 == 0 { b.min.y } else { b.max.y },
            if i & 4 == 0 { b.min.z } else { b.max.z },
        )
    });
    Aabb::from_points(corners.map(|c| m.transform_point3(c)))
}
