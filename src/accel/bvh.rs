//! SAH bounding volume hierarchy.
//!
//! Flat node array layout as uploaded to the ray tracing device:
//! - 32-byte nodes
//! - Internal node: `left_or_first` = left child, `count` = 0 (right = left + 1)
//! - Leaf node: `left_or_first` = first entry in `tri_indices`, `count` > 0
//!
//! Used as the bottom-level structure of the emulated hardware backend and
//! as its top level over instance bounds.

use bytemuck::{Pod, Zeroable};
use smallvec::{smallvec, SmallVec};

use super::intersect::{ray_box_intersect, ray_triangle_intersect, TriangleHit};
use crate::util::{Aabb, Ray, Vec3};

/// Number of SAH bins for split evaluation.
const NUM_BINS: usize = 12;

/// Cost ratio: traversal vs intersection.
const TRAVERSAL_COST: f32 = 1.0;
const INTERSECT_COST: f32 = 1.0;

/// Maximum primitives per leaf before forcing a split.
const MAX_LEAF_SIZE: usize = 4;

/// Inline traversal stack depth; deeper trees spill to the heap.
const STACK_SIZE: usize = 64;

/// Device-layout BVH node (32 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb_min: [f32; 3],
    pub left_or_first: u32,
    pub aabb_max: [f32; 3],
    pub count: u32,
}

impl BvhNode {
    fn leaf(bounds: &Aabb, first: usize, count: usize) -> Self {
        Self {
            aabb_min: bounds.min.to_array(),
            left_or_first: first as u32,
            aabb_max: bounds.max.to_array(),
            count: count as u32,
        }
    }

    fn internal(bounds: &Aabb, left: usize) -> Self {
        Self {
            aabb_min: bounds.min.to_array(),
            left_or_first: left as u32,
            aabb_max: bounds.max.to_array(),
            count: 0,
        }
    }

    #[inline]
    pub fn bounds(&self) -> Aabb {
        Aabb::new(Vec3::from_array(self.aabb_min), Vec3::from_array(self.aabb_max))
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

/// Device-layout triangle (48 bytes): positions plus material id.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BvhTriangle {
    pub v0: [f32; 3],
    pub material_id: u32,
    pub v1: [f32; 3],
    pub prim_id: u32,
    pub v2: [f32; 3],
    pub _pad: u32,
}

impl BvhTriangle {
    pub fn new(v0: Vec3, v1: Vec3, v2: Vec3, material_id: u32, prim_id: u32) -> Self {
        Self {
            v0: v0.to_array(),
            material_id,
            v1: v1.to_array(),
            prim_id,
            v2: v2.to_array(),
            _pad: 0,
        }
    }

    #[inline]
    pub fn positions(&self) -> (Vec3, Vec3, Vec3) {
        (Vec3::from_array(self.v0), Vec3::from_array(self.v1), Vec3::from_array(self.v2))
    }

    pub fn aabb(&self) -> Aabb {
        let (a, b, c) = self.positions();
        Aabb::from_points([a, b, c])
    }
}

/// Built hierarchy over an external primitive array.
#[derive(Debug, Clone, Default)]
pub struct Bvh {
    /// Flat node array (index 0 = root)
    pub nodes: Vec<BvhNode>,
    /// Reordered primitive indices referenced by leaves
    pub tri_indices: Vec<usize>,
}

struct Bin {
    bounds: Aabb,
    count: usize,
}

impl Bvh {
    /// Build over triangles.
    #[tracing::instrument(skip_all, fields(tri_count = triangles.len()))]
    pub fn build(triangles: &[BvhTriangle]) -> Self {
        let aabbs: Vec<Aabb> = triangles.iter().map(|t| t.aabb()).collect();
        Self::build_from_bounds(&aabbs)
    }

    /// Build over arbitrary primitive bounds (instances for the top level).
    pub fn build_from_bounds(aabbs: &[Aabb]) -> Self {
        let n = aabbs.len();
        if n == 0 {
            return Self {
                nodes: vec![BvhNode::leaf(&Aabb::new(Vec3::ZERO, Vec3::ZERO), 0, 0)],
                tri_indices: vec![],
            };
        }

        let centroids: Vec<Vec3> = aabbs.iter().map(|b| b.center()).collect();
        let mut indices: Vec<usize> = (0..n).collect();
        let mut nodes: Vec<BvhNode> = Vec::with_capacity(2 * n);
        nodes.push(BvhNode::zeroed());

        struct Task {
            node_idx: usize,
            start: usize,
            end: usize,
        }
        let mut stack = vec![Task { node_idx: 0, start: 0, end: n }];

        while let Some(Task { node_idx, start, end }) = stack.pop() {
            let count = end - start;
            let mut node_aabb = Aabb::EMPTY;
            let mut centroid_bounds = Aabb::EMPTY;
            for &idx in &indices[start..end] {
                node_aabb.expand_by_box(&aabbs[idx]);
                centroid_bounds.expand_by_point(centroids[idx]);
            }

            if count <= MAX_LEAF_SIZE {
                nodes[node_idx] = BvhNode::leaf(&node_aabb, start, count);
                continue;
            }

            let split = find_best_split(&indices[start..end], aabbs, &centroids, &centroid_bounds);
            let leaf_cost = count as f32 * INTERSECT_COST * node_aabb.area();
            let Some((axis, pos)) = split.filter(|&(_, _, cost)| cost < leaf_cost).map(|(a, p, _)| (a, p))
            else {
                nodes[node_idx] = BvhNode::leaf(&node_aabb, start, count);
                continue;
            };

            let mid = partition(&mut indices[start..end], |&idx| centroids[idx][axis] < pos) + start;
            // Degenerate partition: split in the middle
            let mid = if mid == start || mid == end { (start + end) / 2 } else { mid };

            let left = nodes.len();
            nodes.push(BvhNode::zeroed());
            nodes.push(BvhNode::zeroed());
            nodes[node_idx] = BvhNode::internal(&node_aabb, left);

            stack.push(Task { node_idx: left + 1, start: mid, end });
            stack.push(Task { node_idx: left, start, end: mid });
        }

        Self { nodes, tri_indices: indices }
    }

    /// Root bounds.
    pub fn bounds(&self) -> Aabb {
        match self.nodes.first() {
            Some(root) if !self.tri_indices.is_empty() => root.bounds(),
            _ => Aabb::EMPTY,
        }
    }

    /// Walk the hierarchy front to back, calling `visit(primitive, t_max)` for
    /// every primitive whose leaf box overlaps the ray. `visit` returns the new
    /// `t_max` when it accepted a closer hit; `stop_on_first` ends the walk at
    /// the first accepted hit.
    pub fn traverse(
        &self,
        ray: &Ray,
        stop_on_first: bool,
        mut visit: impl FnMut(usize, f32) -> Option<f32>,
    ) {
        if self.tri_indices.is_empty() {
            return;
        }
        let mut t_max = ray.t_max;
        let mut stack: SmallVec<[u32; STACK_SIZE]> = smallvec![0];

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if ray_box_intersect(ray, &node.bounds(), ray.t_min, t_max).is_none() {
                continue;
            }
            if node.is_leaf() {
                let first = node.left_or_first as usize;
                for &prim in &self.tri_indices[first..first + node.count as usize] {
                    if let Some(t) = visit(prim, t_max) {
                        t_max = t;
                        if stop_on_first {
                            return;
                        }
                    }
                }
                continue;
            }

            let left = node.left_or_first;
            let (near, far) = {
                let l = ray_box_intersect(ray, &self.nodes[left as usize].bounds(), ray.t_min, t_max);
                let r = ray_box_intersect(ray, &self.nodes[left as usize + 1].bounds(), ray.t_min, t_max);
                match (l, r) {
                    (Some((tl, _)), Some((tr, _))) if tr < tl => (left + 1, left),
                    _ => (left, left + 1),
                }
            };
            stack.push(far);
            stack.push(near);
        }
    }

    /// Closest triangle hit: `(primitive index, hit)`.
    pub fn closest_triangle(&self, triangles: &[BvhTriangle], ray: &Ray) -> Option<(usize, TriangleHit)> {
        let mut best: Option<(usize, TriangleHit)> = None;
        self.traverse(ray, false, |prim, t_max| {
            let (a, b, c) = triangles[prim].positions();
            let clipped = ray.with_range(ray.t_min, t_max);
            let hit = ray_triangle_intersect(&clipped, a, b, c)?;
            best = Some((prim, hit));
            Some(hit.t)
        });
        best
    }

    /// Any triangle hit within the ray interval.
    pub fn any_triangle(&self, triangles: &[BvhTriangle], ray: &Ray) -> bool {
        let mut found = false;
        self.traverse(ray, true, |prim, _| {
            let (a, b, c) = triangles[prim].positions();
            let hit = ray_triangle_intersect(ray, a, b, c)?;
            found = true;
            Some(hit.t)
        });
        found
    }
}

/// SAH binned split search across all 3 axes.
/// Returns `(axis, split_position, cost)`, `None` if every axis is degenerate.
fn find_best_split(
    indices: &[usize],
    aabbs: &[Aabb],
    centroids: &[Vec3],
    centroid_bounds: &Aabb,
) -> Option<(usize, f32, f32)> {
    let mut best: Option<(usize, f32, f32)> = None;

    for axis in 0..3 {
        let extent = centroid_bounds.max[axis] - centroid_bounds.min[axis];
        if extent < 1e-8 {
            continue;
        }

        let mut bins: Vec<Bin> = (0..NUM_BINS).map(|_| Bin { bounds: Aabb::EMPTY, count: 0 }).collect();
        let inv_extent = NUM_BINS as f32 / extent;
        for &idx in indices {
            let bin = (((centroids[idx][axis] - centroid_bounds.min[axis]) * inv_extent) as usize).min(NUM_BINS - 1);
            bins[bin].bounds.expand_by_box(&aabbs[idx]);
            bins[bin].count += 1;
        }

        let mut left_area = [0.0f32; NUM_BINS - 1];
        let mut left_count = [0usize; NUM_BINS - 1];
        let mut sweep = Aabb::EMPTY;
        let mut sweep_count = 0;
        for i in 0..NUM_BINS - 1 {
            sweep.expand_by_box(&bins[i].bounds);
            sweep_count += bins[i].count;
            left_area[i] = sweep.area();
            left_count[i] = sweep_count;
        }

        sweep = Aabb::EMPTY;
        sweep_count = 0;
        for i in (1..NUM_BINS).rev() {
            sweep.expand_by_box(&bins[i].bounds);
            sweep_count += bins[i].count;
            let cost = TRAVERSAL_COST
                + INTERSECT_COST
                    * (left_count[i - 1] as f32 * left_area[i - 1] + sweep_count as f32 * sweep.area());
            if best.map_or(true, |(_, _, c)| cost < c) {
                let pos = centroid_bounds.min[axis] + (i as f32 / NUM_BINS as f32) * extent;
                best = Some((axis, pos, cost));
            }
        }
    }

    best
}

/// Partition in place. Returns the count of elements where `pred` holds.
fn partition<T>(slice: &mut [T], pred: impl Fn(&T) -> bool) -> usize {
    let mut left = 0;
    let mut right = slice.len();
    while left < right {
        if pred(&slice[left]) {
            left += 1;
        } else {
            right -= 1;
            slice.swap(left, right);
        }
    }
    left
}
