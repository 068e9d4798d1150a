//! Batching of world surfaces into bottom-level structure inputs.
//!
//! Surfaces are streamed into a fixed-capacity accumulator. Whenever the next
//! surface would overflow the vertex, index or triangle budget the current
//! batch is closed first, so a surface is never split across batches and never
//! dropped unless it cannot fit into an empty batch on its own.

use crate::util::{Error, Vec2, Vec3};
use crate::world::{MaterialId, Surface, SurfaceKind, World};

/// Per-batch capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_vertices: usize,
    pub max_indices: usize,
    pub max_triangles: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_vertices: 1 << 16,
            max_indices: 3 << 16,
            max_triangles: 1 << 16,
        }
    }
}

/// One bottom-level structure's worth of geometry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshBatch {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub indices: Vec<u32>,
    /// One entry per triangle
    pub materials: Vec<MaterialId>,
    /// Source surface ordinal, one entry per triangle
    pub surfaces: Vec<u32>,
}

impl MeshBatch {
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    fn clear(&mut self) {
        self.positions.clear();
        self.normals.clear();
        self.uvs.clear();
        self.indices.clear();
        self.materials.clear();
        self.surfaces.clear();
    }
}

/// Result of offering one surface to the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added { triangles: usize },
    /// Sky / no-draw
    SkippedByFlags,
    /// Poly / flare or other kinds without triangles
    Unsupported(SurfaceKind),
    /// Larger than an empty batch
    TooLarge,
    /// Traceable kind with no valid triangles
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildSummary {
    pub triangles_built: usize,
    pub batches_built: usize,
    pub surfaces_skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub summary: BuildSummary,
    pub batches: Vec<MeshBatch>,
}

/// Streaming batch accumulator.
#[derive(Debug)]
pub struct AccelBuilder {
    limits: BatchLimits,
    current: MeshBatch,
    finished: Vec<MeshBatch>,
    summary: BuildSummary,
    /// Bitmask of unsupported surface kinds already reported this build
    seen_unsupported: u32,
    oversize_reported: bool,
    /// Ordinal of the next surface offered this build
    next_surface: u32,
}

impl AccelBuilder {
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            limits,
            current: MeshBatch::default(),
            finished: Vec::new(),
            summary: BuildSummary::default(),
            seen_unsupported: 0,
            oversize_reported: false,
            next_surface: 0,
        }
    }

    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    /// Reset all state for a new build cycle (diagnostic masks included).
    pub fn begin_build(&mut self) {
        self.current.clear();
        self.finished.clear();
        self.summary = BuildSummary::default();
        self.seen_unsupported = 0;
        self.oversize_reported = false;
        self.next_surface = 0;
    }

    /// Append a surface, flushing the current batch first if it would overflow.
    /// Triangles remember the surface's ordinal among all surfaces offered
    /// since `begin_build`, which is its world index under `build_world`.
    pub fn add_surface(&mut self, surface: &Surface, material: MaterialId) -> AddOutcome {
        let ordinal = self.next_surface;
        self.next_surface += 1;
        if !surface.is_traceable() {
            self.summary.surfaces_skipped += 1;
            return AddOutcome::SkippedByFlags;
        }

        let kind = surface.geometry.kind();
        let Some(indices) = surface.geometry.triangle_indices() else {
            if self.seen_unsupported & kind.bit() == 0 {
                self.seen_unsupported |= kind.bit();
                tracing::warn!(?kind, "unsupported surface kind skipped for acceleration build");
            }
            self.summary.surfaces_skipped += 1;
            return AddOutcome::Unsupported(kind);
        };

        let vertices = surface.geometry.vertices();
        // Drop out-of-range triangles instead of failing the whole surface
        let triangles: Vec<[u32; 3]> = indices
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .filter(|t| t.iter().all(|&i| (i as usize) < vertices.len()))
            .collect();
        if triangles.is_empty() {
            self.summary.surfaces_skipped += 1;
            return AddOutcome::Empty;
        }

        let nv = vertices.len();
        let ni = triangles.len() * 3;
        let nt = triangles.len();

        if !self.fits(nv, ni, nt) {
            self.flush();
            if !self.fits(nv, ni, nt) {
                if !self.oversize_reported {
                    self.oversize_reported = true;
                    let err = Error::SurfaceTooLarge { vertices: nv, indices: ni };
                    tracing::warn!("{err}");
                }
                self.summary.surfaces_skipped += 1;
                return AddOutcome::TooLarge;
            }
        }

        let base = self.current.positions.len() as u32;
        self.current.positions.extend(vertices.iter().map(|v| v.position));
        self.current.normals.extend(vertices.iter().map(|v| v.normal));
        self.current.uvs.extend(vertices.iter().map(|v| v.uv));
        for t in &triangles {
            self.current.indices.extend(t.iter().map(|&i| base + i));
            self.current.materials.push(material);
            self.current.surfaces.push(ordinal);
        }
        self.summary.triangles_built += nt;

        AddOutcome::Added { triangles: nt }
    }

    /// Close the build, flushing the partially filled batch.
    pub fn end_build(&mut self) -> BuildOutput {
        self.flush();
        tracing::debug!(
            triangles = self.summary.triangles_built,
            batches = self.summary.batches_built,
            skipped = self.summary.surfaces_skipped,
            "acceleration batches built"
        );
        BuildOutput {
            summary: self.summary,
            batches: std::mem::take(&mut self.finished),
        }
    }

    /// Full build over a world's surfaces.
    #[tracing::instrument(skip_all, fields(surfaces = world.surfaces.len()))]
    pub fn build_world(&mut self, world: &World) -> BuildOutput {
        self.begin_build();
        for surface in &world.surfaces {
            self.add_surface(surface, surface.material);
        }
        self.end_build()
    }

    fn fits(&self, nv: usize, ni: usize, nt: usize) -> bool {
        self.current.vertex_count() + nv <= self.limits.max_vertices
            && self.current.indices.len() + ni <= self.limits.max_indices
            && self.current.triangle_count() + nt <= self.limits.max_triangles
    }

    fn flush(&mut self) {
        if self.current.is_empty() {
            return;
        }
        self.finished.push(std::mem::take(&mut self.current));
        self.summary.batches_built += 1;
    }
}

impl Default for AccelBuilder {
    fn default() -> Self {
        Self::new(BatchLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{SurfaceFlags, SurfaceGeometry, Vertex};

    fn fan(n_verts: usize) -> Surface {
        let vertices: Vec<Vertex> = (0..n_verts)
            .map(|i| {
                let a = i as f32 / n_verts as f32 * std::f32::consts::TAU;
                Vertex::new(Vec3::new(a.cos(), a.sin(), 0.0), Vec3::Z, Vec2::ZERO)
            })
            .collect();
        let indices = (1..n_verts as u32 - 1).flat_map(|i| [0, i, i + 1]).collect();
        Surface::new(SurfaceGeometry::Face { vertices, indices }, MaterialId(0))
    }

    fn small_limits() -> BatchLimits {
        BatchLimits {
            max_vertices: 8,
            max_indices: 64,
            max_triangles: 64,
        }
    }

    #[test]
    fn test_overflow_flushes_into_second_batch() {
        let mut b = AccelBuilder::new(small_limits());
        b.begin_build();
        assert_eq!(b.add_surface(&fan(5), MaterialId(1)), AddOutcome::Added { triangles: 3 });
        // 5 + 4 > 8: must close the first batch before appending
        assert_eq!(b.add_surface(&fan(4), MaterialId(2)), AddOutcome::Added { triangles: 2 });
        let out = b.end_build();

        assert_eq!(out.summary.batches_built, 2);
        assert_eq!(out.batches.len(), 2);
        assert_eq!(out.batches[0].vertex_count(), 5);
        assert_eq!(out.batches[1].vertex_count(), 4);
        // Indices of the second batch are rebased to zero
        assert!(out.batches[1].indices.iter().all(|&i| i < 4));
        assert_eq!(out.batches[1].materials, vec![MaterialId(2); 2]);
        assert_eq!(out.batches[1].surfaces, vec![1, 1]);
        assert_eq!(out.summary.triangles_built, 5);
    }

    #[test]
    fn test_exact_fill_stays_in_one_batch() {
        let mut b = AccelBuilder::new(small_limits());
        b.begin_build();
        b.add_surface(&fan(4), MaterialId(0));
        b.add_surface(&fan(4), MaterialId(0));
        let out = b.end_build();
        assert_eq!(out.summary.batches_built, 1);
        assert_eq!(out.batches[0].vertex_count(), 8);
        assert_eq!(out.batches[0].indices[6..], [4, 5, 6, 4, 6, 7]);
    }

    #[test]
    fn test_grid_expands_to_two_triangles_per_quad() {
        let vertices = (0..9)
            .map(|i| Vertex::new(Vec3::new((i % 3) as f32, (i / 3) as f32, 0.0), Vec3::Z, Vec2::ZERO))
            .collect();
        let grid = Surface::new(SurfaceGeometry::Grid { width: 3, height: 3, vertices }, MaterialId(0));
        let mut b = AccelBuilder::default();
        b.begin_build();
        assert_eq!(b.add_surface(&grid, MaterialId(0)), AddOutcome::Added { triangles: 8 });
    }

    #[test]
    fn test_skips_sky_and_unsupported() {
        let mut b = AccelBuilder::default();
        b.begin_build();
        let sky = fan(4).with_flags(SurfaceFlags::SKY);
        assert_eq!(b.add_surface(&sky, MaterialId(0)), AddOutcome::SkippedByFlags);
        let poly = Surface::new(SurfaceGeometry::Poly { vertices: vec![] }, MaterialId(0));
        assert_eq!(b.add_surface(&poly, MaterialId(0)), AddOutcome::Unsupported(SurfaceKind::Poly));
        assert_eq!(b.add_surface(&poly, MaterialId(0)), AddOutcome::Unsupported(SurfaceKind::Poly));
        let out = b.end_build();
        assert_eq!(out.summary.surfaces_skipped, 3);
        assert_eq!(out.summary.batches_built, 0);
    }

    #[test]
    fn test_oversize_surface_is_skipped() {
        let mut b = AccelBuilder::new(small_limits());
        b.begin_build();
        b.add_surface(&fan(4), MaterialId(0));
        assert_eq!(b.add_surface(&fan(12), MaterialId(0)), AddOutcome::TooLarge);
        let out = b.end_build();
        assert_eq!(out.summary.batches_built, 1);
        assert_eq!(out.summary.surfaces_skipped, 1);
    }

    #[test]
    fn test_out_of_range_indices_dropped() {
        let mut s = fan(4);
        if let SurfaceGeometry::Face { indices, .. } = &mut s.geometry {
            indices.extend_from_slice(&[0, 1, 99]);
        }
        let mut b = AccelBuilder::default();
        b.begin_build();
        assert_eq!(b.add_surface(&s, MaterialId(0)), AddOutcome::Added { triangles: 2 });
    }
}
