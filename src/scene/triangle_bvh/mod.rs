mod building;
mod printing;
mod ray_bvh_intersection;
mod refit;
mod wide_binning;

use std::ops::Range;

use crate::geometry::{WorldBox, WorldPoint};

use bytemuck::{Pod, Zeroable};
use index_vec::IndexVec;
use wide::f32x8;

pub use building::BuildStrategy;
pub use printing::BvhStatistics;

/// Number of bins along each axis when evaluating split candidates.
pub const BIN_COUNT: usize = 8;

/// Maximum depth of the tree, nodes deeper than this are never split.
/// Also the capacity of the traversal stack, which therefore can't overflow.
pub const MAX_DEPTH: usize = 64;

const ROOT: NodeIdx = NodeIdx::from_raw_unchecked(0);
/// Never referenced by any node, kept so that sibling pairs start at even indices.
const RESERVED: NodeIdx = NodeIdx::from_raw_unchecked(1);
const FIRST_FREE: usize = 2;

/// Binary BVH over a triangle soup.
///
/// The tree doesn't own the vertices, they are passed to every operation that needs them
/// and must describe the same number of triangles every time.
#[derive(Clone, Debug, Default)]
pub struct TriangleBvh {
    nodes: IndexVec<NodeIdx, BvhNode>,
    nodes_used: usize,

    /// Permutation of triangle indices, leaves reference contiguous ranges of it.
    indices: Vec<u32>,

    /// Per triangle bounds, only used while building.
    fragments: Vec<Fragment>,
    /// Fragment bounds in the wide split finder's encoding, kept between builds.
    encoded_bounds: Vec<f32x8>,

    primitive_count: usize,
    refittable: bool,
}

/// Node of the tree as laid out in memory, 32 bytes.
///
/// `tri_count == 0` marks an inner node, its children are at `left_first` and `left_first + 1`.
/// Otherwise this is a leaf referencing `indices[left_first..left_first + tri_count]`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb_min: WorldPoint,
    pub left_first: u32,
    pub aabb_max: WorldPoint,
    pub tri_count: u32,
}

impl BvhNode {
    fn leaf(bounds: &WorldBox, first: u32, count: u32) -> Self {
        BvhNode {
            aabb_min: bounds.min,
            left_first: first,
            aabb_max: bounds.max,
            tri_count: count,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.tri_count > 0
    }

    pub fn bounds(&self) -> WorldBox {
        WorldBox::new(self.aabb_min, self.aabb_max)
    }

    fn set_bounds(&mut self, bounds: &WorldBox) {
        self.aabb_min = bounds.min;
        self.aabb_max = bounds.max;
    }

    /// Index of the left child, right child is the next one.
    /// Only meaningful for inner nodes.
    fn left_child(&self) -> NodeIdx {
        NodeIdx::from_raw(self.left_first)
    }

    /// Range of the index array covered by this leaf.
    fn primitives(&self) -> Range<usize> {
        let first = self.left_first as usize;
        first..first + self.tri_count as usize
    }
}

#[derive(Copy, Clone, Debug)]
struct Fragment {
    bounds: WorldBox,
    centroid: WorldPoint,
}

index_vec::define_index_type! {
    pub struct NodeIdx = u32;
    IMPL_RAW_CONVERSIONS = true;
}

impl TriangleBvh {
    /// Builds a new tree over the triangles with the default strategy.
    pub fn new(vertices: &[WorldPoint]) -> TriangleBvh {
        let mut bvh = TriangleBvh::default();
        bvh.build(vertices);
        bvh
    }

    /// Number of triangles the tree was built over.
    pub fn primitive_count(&self) -> usize {
        self.primitive_count
    }

    /// True if the tree contains no triangles (including when it was never built).
    pub fn is_empty(&self) -> bool {
        self.primitive_count == 0
    }

    /// Allocated part of the node pool. Node 1 is unused.
    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes.as_raw_slice()[..self.nodes_used]
    }

    /// Allocated part of the node pool, as raw bytes for upload.
    pub fn node_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.nodes())
    }

    /// Triangle indices referenced by the leaves.
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn bounding_box(&self) -> WorldBox {
        if self.is_empty() {
            WorldBox::empty()
        } else {
            self.nodes[ROOT].bounds()
        }
    }

    /// Root node, unless the tree is empty.
    fn root(&self) -> Option<&BvhNode> {
        if self.is_empty() {
            None
        } else {
            Some(&self.nodes[ROOT])
        }
    }

    fn children(&self, node: &BvhNode) -> (&BvhNode, &BvhNode) {
        let left = node.left_child();
        (&self.nodes[left], &self.nodes[left + 1])
    }
}
