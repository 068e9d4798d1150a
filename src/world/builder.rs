//! Minimal BSP world builder.
//!
//! Produces an axis-aligned partition tree from a list of surfaces. Surfaces
//! straddling a split plane are referenced by both children, the same way a
//! compiled map references faces from every leaf they touch. Used by tests and
//! the demo binary; real levels come from the world loader.

use super::{BspChild, BspLeaf, BspNode, Material, MaterialId, Pvs, Surface, SurfaceGeometry, Vertex, World};
use crate::util::{Aabb, Plane, Vec2, Vec3};

/// Default surfaces per leaf before forcing a split.
const MAX_LEAF_SURFACES: usize = 4;

/// Default partition depth limit.
const MAX_DEPTH: u32 = 24;

/// Where a finished subtree gets linked.
#[derive(Clone, Copy)]
enum Slot {
    Root,
    Child { node: usize, side: usize },
}

struct Task {
    slot: Slot,
    surfaces: Vec<u32>,
    depth: u32,
}

/// Incremental world description.
#[derive(Debug, Clone)]
pub struct WorldBuilder {
    name: String,
    surfaces: Vec<Surface>,
    materials: Vec<Material>,
    entities: String,
    max_leaf_surfaces: usize,
    max_depth: u32,
    with_pvs: bool,
}

impl WorldBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            surfaces: Vec::new(),
            materials: Vec::new(),
            entities: String::new(),
            max_leaf_surfaces: MAX_LEAF_SURFACES,
            max_depth: MAX_DEPTH,
            with_pvs: true,
        }
    }

    pub fn max_leaf_surfaces(mut self, n: usize) -> Self {
        self.max_leaf_surfaces = n.max(1);
        self
    }

    /// Emit an all-visible PVS (default) or none at all.
    pub fn with_pvs(mut self, enabled: bool) -> Self {
        self.with_pvs = enabled;
        self
    }

    pub fn entities(mut self, text: impl Into<String>) -> Self {
        self.entities = text.into();
        self
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() as u32 - 1)
    }

    pub fn add_surface(&mut self, surface: Surface) -> u32 {
        self.surfaces.push(surface);
        self.surfaces.len() as u32 - 1
    }

    /// Planar quad `a b c d` (counter-clockwise seen from the front).
    pub fn add_quad(&mut self, corners: [Vec3; 4], material: MaterialId) -> u32 {
        let [a, b, c, _] = corners;
        let normal = (b - a).cross(c - a).normalize_or_zero();
        let uvs = [Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y];
        let vertices = corners
            .iter()
            .zip(uvs)
            .map(|(&p, uv)| Vertex::new(p, normal, uv))
            .collect();
        self.add_surface(Surface::new(
            SurfaceGeometry::Face {
                vertices,
                indices: vec![0, 1, 2, 0, 2, 3],
            },
            material,
        ))
    }

    /// Six inward-facing walls of a box.
    pub fn add_room(&mut self, min: Vec3, max: Vec3, material: MaterialId) {
        let (x0, y0, z0) = (min.x, min.y, min.z);
        let (x1, y1, z1) = (max.x, max.y, max.z);
        let p = Vec3::new;
        // floor (+z)
        self.add_quad([p(x0, y0, z0), p(x1, y0, z0), p(x1, y1, z0), p(x0, y1, z0)], material);
        // ceiling (-z)
        self.add_quad([p(x0, y0, z1), p(x0, y1, z1), p(x1, y1, z1), p(x1, y0, z1)], material);
        // x walls
        self.add_quad([p(x0, y0, z0), p(x0, y1, z0), p(x0, y1, z1), p(x0, y0, z1)], material);
        self.add_quad([p(x1, y0, z0), p(x1, y0, z1), p(x1, y1, z1), p(x1, y1, z0)], material);
        // y walls
        self.add_quad([p(x0, y0, z0), p(x0, y0, z1), p(x1, y0, z1), p(x1, y0, z0)], material);
        self.add_quad([p(x0, y1, z0), p(x1, y1, z0), p(x1, y1, z1), p(x0, y1, z1)], material);
    }

    /// Partition surfaces and produce the world.
    #[tracing::instrument(skip_all, fields(name = %self.name, surfaces = self.surfaces.len()))]
    pub fn build(self) -> World {
        let mut nodes: Vec<BspNode> = Vec::new();
        let mut leaves: Vec<BspLeaf> = Vec::new();

        let all: Vec<u32> = (0..self.surfaces.len() as u32).collect();
        let mut stack = vec![Task { slot: Slot::Root, surfaces: all, depth: 0 }];

        while let Some(task) = stack.pop() {
            let bounds = self.bounds_of(&task.surfaces);
            let split = if task.surfaces.len() > self.max_leaf_surfaces && task.depth < self.max_depth {
                self.choose_split(&task.surfaces)
            } else {
                None
            };

            let partition = split.and_then(|(axis, pos)| {
                let (front, back) = self.partition(&task.surfaces, axis, pos);
                let n = task.surfaces.len();
                // No progress on either side: stop here
                if front.len() == n && back.len() == n {
                    None
                } else {
                    Some((axis, pos, front, back))
                }
            });

            let child = match partition {
                None => {
                    leaves.push(BspLeaf {
                        bounds,
                        cluster: Some(leaves.len() as u32),
                        surfaces: task.surfaces,
                    });
                    BspChild::Leaf(leaves.len() as u32 - 1)
                }
                Some((axis, pos, front, back)) => {
                    let mut normal = Vec3::ZERO;
                    normal[axis] = 1.0;
                    let node_idx = nodes.len();
                    nodes.push(BspNode {
                        plane: Plane::new(normal, pos),
                        bounds,
                        // patched when the children are emitted
                        children: [BspChild::Leaf(0), BspChild::Leaf(0)],
                    });
                    stack.push(Task {
                        slot: Slot::Child { node: node_idx, side: 1 },
                        surfaces: back,
                        depth: task.depth + 1,
                    });
                    stack.push(Task {
                        slot: Slot::Child { node: node_idx, side: 0 },
                        surfaces: front,
                        depth: task.depth + 1,
                    });
                    BspChild::Node(node_idx as u32)
                }
            };

            if let Slot::Child { node, side } = task.slot {
                nodes[node].children[side] = child;
            }
        }

        tracing::debug!(nodes = nodes.len(), leaves = leaves.len(), "bsp built");

        let pvs = self.with_pvs.then(|| Pvs::all_visible(leaves.len() as u32));
        World {
            name: self.name,
            surfaces: self.surfaces,
            materials: self.materials,
            nodes,
            leaves,
            pvs,
            entities: self.entities,
        }
    }

    fn bounds_of(&self, surfaces: &[u32]) -> Aabb {
        let mut b = Aabb::EMPTY;
        for &s in surfaces {
            b.expand_by_box(&self.surfaces[s as usize].bounds);
        }
        b
    }

    /// Median split on the longest centroid axis. `None` if degenerate.
    fn choose_split(&self, surfaces: &[u32]) -> Option<(usize, f32)> {
        let centers: Vec<Vec3> = surfaces
            .iter()
            .map(|&s| self.surfaces[s as usize].bounds.center())
            .collect();
        let extent = Aabb::from_points(centers.iter().copied()).size();
        let axis = if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        };
        if !(extent[axis] > 1e-4) {
            return None;
        }

        let mut keys: Vec<f32> = centers.iter().map(|c| c[axis]).collect();
        keys.sort_by(|a, b| a.total_cmp(b));
        let mid = keys.len() / 2;
        let pos = 0.5 * (keys[mid - 1] + keys[mid]);
        Some((axis, pos))
    }

    fn partition(&self, surfaces: &[u32], axis: usize, pos: f32) -> (Vec<u32>, Vec<u32>) {
        let mut front = Vec::new();
        let mut back = Vec::new();
        for &s in surfaces {
            let b = &self.surfaces[s as usize].bounds;
            if b.max[axis] >= pos {
                front.push(s);
            }
            if b.min[axis] <= pos {
                back.push(s);
            }
        }
        (front, back)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_world() {
        let world = WorldBuilder::new("empty").build();
        assert_eq!(world.leaves.len(), 1);
        assert!(world.nodes.is_empty());
        assert_eq!(world.root(), Some(BspChild::Leaf(0)));
    }

    #[test]
    fn test_room_partitions_and_keeps_every_surface() {
        let mut b = WorldBuilder::new("room").max_leaf_surfaces(2);
        let m = b.add_material(Material::default());
        b.add_room(Vec3::ZERO, Vec3::splat(10.0), m);
        let world = b.build();

        assert!(!world.nodes.is_empty());
        let mut seen: Vec<u32> = world.leaves.iter().flat_map(|l| l.surfaces.iter().copied()).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen, (0..6).collect::<Vec<_>>());

        // Every node child must be patched to a real index
        for node in &world.nodes {
            for child in node.children {
                match child {
                    BspChild::Node(n) => assert!((n as usize) < world.nodes.len()),
                    BspChild::Leaf(l) => assert!((l as usize) < world.leaves.len()),
                }
            }
        }
    }

    #[test]
    fn test_point_leaf_and_cluster() {
        let mut b = WorldBuilder::new("room");
        let m = b.add_material(Material::default());
        b.add_room(Vec3::ZERO, Vec3::splat(10.0), m);
        let world = b.build();
        let leaf = world.point_leaf(Vec3::splat(5.0)).unwrap();
        assert!((leaf as usize) < world.leaves.len());
        assert!(world.point_cluster(Vec3::splat(5.0)).is_some());
        assert!(world.visibility_at(Vec3::splat(5.0)).is_some());
    }

    #[test]
    fn test_quad_normal_faces_front() {
        let mut b = WorldBuilder::new("quad");
        let m = b.add_material(Material::default());
        b.add_quad(
            [Vec3::ZERO, Vec3::X, Vec3::new(1.0, 1.0, 0.0), Vec3::Y],
            m,
        );
        let world = b.build();
        let verts = world.surfaces[0].geometry.vertices();
        assert_eq!(verts[0].normal, Vec3::Z);
    }
}
