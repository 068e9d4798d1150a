//! Read-only world geometry consumed by the tracer.
//!
//! The world loader is an external collaborator; this module only defines the
//! shape of what it hands over: typed surfaces, materials, a BSP partition
//! tree with per-leaf surface references, optional PVS rows, and the raw
//! entity description text used for static light extraction.

mod builder;

pub use builder::WorldBuilder;

use bitflags::bitflags;
use std::borrow::Cow;

use crate::util::{Aabb, Plane, Vec2, Vec3};

bitflags! {
    /// Per-surface content flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SurfaceFlags: u32 {
        /// Sky portal, never intersected
        const SKY = 1 << 0;
        /// Invisible clip/trigger geometry
        const NODRAW = 1 << 1;
    }
}

/// Index into [`World::materials`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MaterialId(pub u32);

/// Surface material as seen by the BRDF.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub base_color: Vec3,
    pub metallic: f32,
    pub roughness: f32,
    pub emission: Vec3,
}

impl Default for Material {
    /// Grey dielectric.
    fn default() -> Self {
        Self {
            base_color: Vec3::splat(0.8),
            metallic: 0.0,
            roughness: 0.5,
            emission: Vec3::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self { position, normal, uv }
    }
}

/// Discriminant of [`SurfaceGeometry`], used for once-per-kind diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SurfaceKind {
    Face = 0,
    Grid = 1,
    TriangleSoup = 2,
    Poly = 3,
    Flare = 4,
}

impl SurfaceKind {
    /// Bit for a seen-kinds mask.
    #[inline]
    pub fn bit(self) -> u32 {
        1 << self as u32
    }
}

/// Surface payload, one variant per world representation.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceGeometry {
    /// Planar face with explicit triangle indices
    Face { vertices: Vec<Vertex>, indices: Vec<u32> },
    /// Bilinear patch mesh, `width * height` vertices in row-major order
    Grid { width: u32, height: u32, vertices: Vec<Vertex> },
    /// Raw indexed triangles (models, tessellated curves)
    TriangleSoup { vertices: Vec<Vertex>, indices: Vec<u32> },
    /// Convex polygon fan without indices (decals); not traced
    Poly { vertices: Vec<Vertex> },
    /// Lens flare marker; not traced
    Flare { origin: Vec3, color: Vec3 },
}

impl SurfaceGeometry {
    pub fn kind(&self) -> SurfaceKind {
        match self {
            Self::Face { .. } => SurfaceKind::Face,
            Self::Grid { .. } => SurfaceKind::Grid,
            Self::TriangleSoup { .. } => SurfaceKind::TriangleSoup,
            Self::Poly { .. } => SurfaceKind::Poly,
            Self::Flare { .. } => SurfaceKind::Flare,
        }
    }

    /// Vertex array (empty for flares).
    pub fn vertices(&self) -> &[Vertex] {
        match self {
            Self::Face { vertices, .. }
            | Self::Grid { vertices, .. }
            | Self::TriangleSoup { vertices, .. }
            | Self::Poly { vertices } => vertices,
            Self::Flare { .. } => &[],
        }
    }

    /// Triangle index list for traceable kinds, `None` for unsupported ones.
    ///
    /// Grids are expanded into two triangles per quad with a fixed winding:
    /// `(i, i+w, i+1)` and `(i+1, i+w, i+w+1)`.
    pub fn triangle_indices(&self) -> Option<Cow<'_, [u32]>> {
        match self {
            Self::Face { indices, .. } | Self::TriangleSoup { indices, .. } => {
                Some(Cow::Borrowed(indices.as_slice()))
            }
            Self::Grid { width, height, vertices } => {
                Some(Cow::Owned(grid_indices(*width, *height, vertices.len())))
            }
            Self::Poly { .. } | Self::Flare { .. } => None,
        }
    }

    /// Triangle count for traceable kinds (0 otherwise).
    pub fn triangle_count(&self) -> usize {
        match self {
            Self::Face { indices, .. } | Self::TriangleSoup { indices, .. } => indices.len() / 3,
            Self::Grid { width, height, vertices } => {
                grid_indices(*width, *height, vertices.len()).len() / 3
            }
            Self::Poly { .. } | Self::Flare { .. } => 0,
        }
    }
}

/// Expand a `width x height` vertex grid into triangle indices.
///
/// Returns nothing if the grid is degenerate or the vertex array is short.
fn grid_indices(width: u32, height: u32, vertex_count: usize) -> Vec<u32> {
    if width < 2 || height < 2 || (width as usize) * (height as usize) > vertex_count {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(((width - 1) * (height - 1) * 6) as usize);
    for row in 0..height - 1 {
        for col in 0..width - 1 {
            let i = row * width + col;
            out.extend_from_slice(&[i, i + width, i + 1]);
            out.extend_from_slice(&[i + 1, i + width, i + width + 1]);
        }
    }
    out
}

/// World surface: geometry plus shading reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    pub geometry: SurfaceGeometry,
    pub material: MaterialId,
    pub flags: SurfaceFlags,
    pub bounds: Aabb,
}

impl Surface {
    /// Surface with bounds computed from its vertices.
    pub fn new(geometry: SurfaceGeometry, material: MaterialId) -> Self {
        let bounds = match &geometry {
            SurfaceGeometry::Flare { origin, .. } => Aabb::from_points([*origin]),
            g => Aabb::from_points(g.vertices().iter().map(|v| v.position)),
        };
        Self {
            geometry,
            material,
            flags: SurfaceFlags::empty(),
            bounds,
        }
    }

    pub fn with_flags(mut self, flags: SurfaceFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sky and no-draw surfaces never take part in tracing.
    #[inline]
    pub fn is_traceable(&self) -> bool {
        !self.flags.intersects(SurfaceFlags::SKY | SurfaceFlags::NODRAW)
    }
}

/// Child reference of a BSP node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BspChild {
    Node(u32),
    Leaf(u32),
}

/// Interior node: `children[0]` is in front of the plane, `children[1]` behind.
#[derive(Debug, Clone, PartialEq)]
pub struct BspNode {
    pub plane: Plane,
    pub bounds: Aabb,
    pub children: [BspChild; 2],
}

#[derive(Debug, Clone, PartialEq)]
pub struct BspLeaf {
    pub bounds: Aabb,
    /// PVS cluster, `None` for solid / outside leaves
    pub cluster: Option<u32>,
    /// Indices into [`World::surfaces`]
    pub surfaces: Vec<u32>,
}

/// Precomputed cluster-to-cluster visibility bit rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Pvs {
    pub clusters: u32,
    pub row_bytes: usize,
    pub bits: Vec<u8>,
}

impl Pvs {
    /// Every cluster sees every other cluster.
    pub fn all_visible(clusters: u32) -> Self {
        let row_bytes = (clusters as usize).div_ceil(8);
        Self {
            clusters,
            row_bytes,
            bits: vec![0xff; row_bytes * clusters as usize],
        }
    }

    /// No cluster sees any other (only itself).
    pub fn isolated(clusters: u32) -> Self {
        let row_bytes = (clusters as usize).div_ceil(8);
        let mut pvs = Self {
            clusters,
            row_bytes,
            bits: vec![0; row_bytes * clusters as usize],
        };
        for c in 0..clusters {
            pvs.set_visible(c, c, true);
        }
        pvs
    }

    pub fn set_visible(&mut self, from: u32, to: u32, visible: bool) {
        if from >= self.clusters || to >= self.clusters {
            return;
        }
        let byte = from as usize * self.row_bytes + (to as usize >> 3);
        let mask = 1u8 << (to & 7);
        if visible {
            self.bits[byte] |= mask;
        } else {
            self.bits[byte] &= !mask;
        }
    }

    /// Visibility row for a viewer cluster.
    pub fn row(&self, from: u32) -> Option<VisibilitySet<'_>> {
        if from >= self.clusters {
            return None;
        }
        let start = from as usize * self.row_bytes;
        self.bits
            .get(start..start + self.row_bytes)
            .map(|bits| VisibilitySet { bits })
    }
}

/// One PVS row anchored at the viewer's cluster.
#[derive(Debug, Clone, Copy)]
pub struct VisibilitySet<'a> {
    bits: &'a [u8],
}

impl VisibilitySet<'_> {
    /// Whether `cluster` is potentially visible. Out-of-range clusters are.
    #[inline]
    pub fn contains(&self, cluster: u32) -> bool {
        self.bits
            .get(cluster as usize >> 3)
            .map_or(true, |b| b & (1 << (cluster & 7)) != 0)
    }
}

/// Loaded level as handed over by the world loader.
#[derive(Debug, Clone, Default)]
pub struct World {
    pub name: String,
    pub surfaces: Vec<Surface>,
    pub materials: Vec<Material>,
    pub nodes: Vec<BspNode>,
    pub leaves: Vec<BspLeaf>,
    pub pvs: Option<Pvs>,
    /// Entity description blob (key/value blocks)
    pub entities: String,
}

impl World {
    /// Material for an id, default material when out of range.
    pub fn material(&self, id: MaterialId) -> Material {
        self.materials.get(id.0 as usize).copied().unwrap_or_default()
    }

    /// Root of the partition tree, `None` for an empty world.
    pub fn root(&self) -> Option<BspChild> {
        if !self.nodes.is_empty() {
            Some(BspChild::Node(0))
        } else if !self.leaves.is_empty() {
            Some(BspChild::Leaf(0))
        } else {
            None
        }
    }

    /// Leaf containing a point (front side wins on the plane).
    pub fn point_leaf(&self, p: Vec3) -> Option<u32> {
        let mut child = self.root()?;
        loop {
            match child {
                BspChild::Leaf(l) => return Some(l),
                BspChild::Node(n) => {
                    let node = self.nodes.get(n as usize)?;
                    child = if node.plane.distance(p) >= 0.0 {
                        node.children[0]
                    } else {
                        node.children[1]
                    };
                }
            }
        }
    }

    /// PVS cluster containing a point.
    pub fn point_cluster(&self, p: Vec3) -> Option<u32> {
        let leaf = self.point_leaf(p)?;
        self.leaves.get(leaf as usize)?.cluster
    }

    /// Visibility row for a viewer position, `None` without PVS data.
    pub fn visibility_at(&self, p: Vec3) -> Option<VisibilitySet<'_>> {
        let cluster = self.point_cluster(p)?;
        self.pvs.as_ref()?.row(cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: f32, y: f32, z: f32) -> Vertex {
        Vertex::new(Vec3::new(x, y, z), Vec3::Z, Vec2::ZERO)
    }

    #[test]
    fn test_grid_winding() {
        let verts = (0..6).map(|i| v((i % 3) as f32, (i / 3) as f32, 0.0)).collect();
        let g = SurfaceGeometry::Grid { width: 3, height: 2, vertices: verts };
        let idx = g.triangle_indices().unwrap();
        assert_eq!(idx.len(), 2 * 2 * 3);
        assert_eq!(&idx[..6], &[0, 3, 1, 1, 3, 4]);
        assert_eq!(&idx[6..], &[1, 4, 2, 2, 4, 5]);
        assert_eq!(g.triangle_count(), 4);
    }

    #[test]
    fn test_grid_short_vertex_array() {
        let g = SurfaceGeometry::Grid { width: 3, height: 3, vertices: vec![v(0.0, 0.0, 0.0); 4] };
        assert_eq!(g.triangle_count(), 0);
    }

    #[test]
    fn test_unsupported_kinds_have_no_triangles() {
        let p = SurfaceGeometry::Poly { vertices: vec![v(0.0, 0.0, 0.0); 4] };
        assert!(p.triangle_indices().is_none());
        let f = SurfaceGeometry::Flare { origin: Vec3::ZERO, color: Vec3::ONE };
        assert!(f.triangle_indices().is_none());
        assert_eq!(f.vertices().len(), 0);
    }

    #[test]
    fn test_surface_flags() {
        let s = Surface::new(SurfaceGeometry::Poly { vertices: vec![] }, MaterialId(0));
        assert!(s.is_traceable());
        assert!(!s.clone().with_flags(SurfaceFlags::SKY).is_traceable());
        assert!(!s.with_flags(SurfaceFlags::NODRAW).is_traceable());
    }

    #[test]
    fn test_pvs_rows() {
        let mut pvs = Pvs::isolated(10);
        let row = pvs.row(3).unwrap();
        assert!(row.contains(3));
        assert!(!row.contains(4));

        pvs.set_visible(3, 9, true);
        assert!(pvs.row(3).unwrap().contains(9));
        assert!(pvs.row(10).is_none());

        let all = Pvs::all_visible(10);
        assert!(all.row(0).unwrap().contains(9));
    }
}
