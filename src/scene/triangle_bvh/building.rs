use arrayvec::ArrayVec;
use assert2::assert;
use index_vec::IndexVec;

use crate::geometry::{FloatType, Triangle, WorldBox, WorldPoint, WorldVector};

use super::{
    BIN_COUNT, BvhNode, FIRST_FREE, Fragment, MAX_DEPTH, NodeIdx, RESERVED, ROOT, TriangleBvh,
    wide_binning::WideBinning,
};

use bytemuck::Zeroable as _;

/// Axes whose centroid extent is not larger than this fraction of the root extent
/// are not binned.
const MINIMUM_EXTENT_FACTOR: FloatType = 1e-20;

/// Selects how split candidates are evaluated, both produce the same trees.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BuildStrategy {
    /// One axis at a time, plain floats.
    Scalar,
    /// All three axes in a single pass, bin bounds as 8 wide vectors.
    #[default]
    Wide,
}

impl TriangleBvh {
    /// (Re)builds the tree over the given triangles using the default strategy.
    ///
    /// Panics if the vertex count is not a multiple of three or if the tree was already
    /// built over a different number of triangles.
    pub fn build(&mut self, vertices: &[WorldPoint]) {
        self.build_with(vertices, BuildStrategy::default())
    }

    /// (Re)builds the tree over the given triangles.
    ///
    /// Rebuilding over the same number of triangles reuses all allocations.
    pub fn build_with(&mut self, vertices: &[WorldPoint], strategy: BuildStrategy) {
        self.build_limited(vertices, strategy, MAX_DEPTH)
    }

    /// Build that stops splitting nodes at the given depth, the root has depth 1.
    fn build_limited(&mut self, vertices: &[WorldPoint], strategy: BuildStrategy, max_depth: usize) {
        assert!((1..=MAX_DEPTH).contains(&max_depth));
        assert!(
            vertices.len() % 3 == 0,
            "vertex buffer must contain three vertices per triangle"
        );
        let primitive_count = vertices.len() / 3;
        assert!(
            primitive_count <= u32::MAX as usize / 2,
            "too many triangles for 32bit node indices"
        );

        if self.nodes.is_empty() {
            self.allocate(primitive_count);
        } else {
            assert!(
                primitive_count == self.primitive_count,
                "rebuilding with a different number of triangles"
            );
        }

        self.nodes_used = FIRST_FREE;
        self.nodes[RESERVED] = BvhNode::zeroed();

        let mut root_bounds = WorldBox::empty();
        for (i, (fragment, index)) in self
            .fragments
            .iter_mut()
            .zip(self.indices.iter_mut())
            .enumerate()
        {
            let triangle = Triangle::from_flat(vertices, i);
            *fragment = Fragment {
                bounds: triangle.bounds(),
                centroid: triangle.centroid(),
            };
            *index = i as u32;
            root_bounds = root_bounds.union(&fragment.bounds);
        }
        self.nodes[ROOT] = BvhNode::leaf(&root_bounds, 0, primitive_count as u32);

        match strategy {
            BuildStrategy::Scalar => self.subdivide(&mut ScalarBinning, max_depth),
            BuildStrategy::Wide => {
                let boxes = std::mem::take(&mut self.encoded_bounds);
                let mut finder = WideBinning::new(boxes, &self.fragments);
                self.subdivide(&mut finder, max_depth);
                self.encoded_bounds = finder.into_boxes();
            }
        }
        self.refittable = true;

        log::debug!(
            "Built BVH over {} triangles ({:?}); {} nodes",
            primitive_count,
            strategy,
            self.nodes_used - 1
        );
    }

    fn allocate(&mut self, primitive_count: usize) {
        // A binary tree with n leaves has 2n - 1 nodes, plus the reserved one
        let node_count = (2 * primitive_count).max(FIRST_FREE);
        self.nodes = IndexVec::from_vec(vec![BvhNode::zeroed(); node_count]);
        self.indices = vec![0; primitive_count];
        self.fragments = vec![
            Fragment {
                bounds: WorldBox::empty(),
                centroid: WorldPoint::origin(),
            };
            primitive_count
        ];
        self.encoded_bounds = Vec::with_capacity(primitive_count);
        self.primitive_count = primitive_count;
    }

    /// Splits nodes depth first, starting from the root.
    fn subdivide(&mut self, finder: &mut impl SplitFinder, max_depth: usize) {
        let minimum_extent = self.nodes[ROOT].bounds().size() * MINIMUM_EXTENT_FACTOR;

        let mut tasks = ArrayVec::<(NodeIdx, usize), MAX_DEPTH>::new();
        let mut current = (ROOT, 1);
        loop {
            let (node_index, depth) = current;
            let split = if depth < max_depth {
                self.split_node(node_index, &minimum_extent, finder)
            } else {
                None
            };
            if let Some(left) = split {
                tasks.push((left + 1, depth + 1));
                current = (left, depth + 1);
            } else if let Some(task) = tasks.pop() {
                current = task;
            } else {
                break;
            }
        }
    }

    /// Tries to split a leaf node in two.
    /// Returns index of the new left child if successful.
    fn split_node(
        &mut self,
        node_index: NodeIdx,
        minimum_extent: &WorldVector,
        finder: &mut impl SplitFinder,
    ) -> Option<NodeIdx> {
        let node = self.nodes[node_index];
        let indices = &mut self.indices[node.primitives()];

        let centroid_bounds =
            WorldBox::from_points(indices.iter().map(|&i| self.fragments[i as usize].centroid));
        let binning = Binning::new(&centroid_bounds, minimum_extent)?;
        let node_cost = node.bounds().half_area() * node.tri_count as FloatType;

        let split = finder.find_split(&self.fragments, indices, &binning, node_cost)?;

        let left_count = partition(indices, &self.fragments, &binning, &split);
        let right_count = indices.len() - left_count;
        if left_count == 0 || right_count == 0 {
            return None;
        }

        let left = NodeIdx::new(self.nodes_used);
        self.nodes_used += 2;
        self.nodes[left] = BvhNode::leaf(&split.left, node.left_first, left_count as u32);
        self.nodes[left + 1] = BvhNode::leaf(
            &split.right,
            node.left_first + left_count as u32,
            right_count as u32,
        );
        self.nodes[node_index].left_first = left.raw();
        self.nodes[node_index].tri_count = 0;

        Some(left)
    }
}

/// Maps triangle centroids to bins along each axis.
#[derive(Clone, Debug)]
pub(super) struct Binning {
    min: WorldPoint,
    scale: WorldVector,
    pub axis_enabled: [bool; 3],
}

impl Binning {
    /// Returns None if the centroids are too close together along every axis.
    pub fn new(centroid_bounds: &WorldBox, minimum_extent: &WorldVector) -> Option<Binning> {
        let extent = centroid_bounds.size();
        let axis_enabled = [0, 1, 2].map(|axis| extent[axis] > minimum_extent[axis]);
        if !axis_enabled.iter().any(|&enabled| enabled) {
            return None;
        }

        let scale = WorldVector::from_fn(|axis, _| {
            if axis_enabled[axis] {
                BIN_COUNT as FloatType / extent[axis]
            } else {
                0.0
            }
        });

        Some(Binning {
            min: centroid_bounds.min,
            scale,
            axis_enabled,
        })
    }

    /// Bin of the centroid along the axis, used both when evaluating and when partitioning.
    pub fn bin(&self, centroid: &WorldPoint, axis: usize) -> usize {
        // Float to int casts saturate, negative values end up as 0
        (((centroid[axis] - self.min[axis]) * self.scale[axis]) as usize).min(BIN_COUNT - 1)
    }
}

/// Best way to split a node found by a SplitFinder.
/// Triangles with bin <= position go to the left child.
#[derive(Clone, Debug, PartialEq)]
pub(super) struct Split {
    pub axis: usize,
    pub position: usize,
    pub cost: FloatType,
    pub left: WorldBox,
    pub right: WorldBox,
}

pub(super) trait SplitFinder {
    /// Finds the cheapest split between bins of the node's triangles, if it is cheaper than
    /// `node_cost`. Ties go to the first candidate, ordered by axis and then position.
    fn find_split(
        &mut self,
        fragments: &[Fragment],
        indices: &[u32],
        binning: &Binning,
        node_cost: FloatType,
    ) -> Option<Split>;
}

/// Reference split finder, evaluates one axis at a time.
pub(super) struct ScalarBinning;

#[derive(Copy, Clone, Debug)]
struct Bin {
    bounds: WorldBox,
    count: usize,
}

impl Default for Bin {
    fn default() -> Self {
        Bin {
            bounds: WorldBox::empty(),
            count: 0,
        }
    }
}

impl SplitFinder for ScalarBinning {
    fn find_split(
        &mut self,
        fragments: &[Fragment],
        indices: &[u32],
        binning: &Binning,
        node_cost: FloatType,
    ) -> Option<Split> {
        let mut best: Option<Split> = None;
        let mut best_cost = node_cost;

        for axis in (0..3).filter(|&axis| binning.axis_enabled[axis]) {
            let mut bins = [Bin::default(); BIN_COUNT];
            for &i in indices {
                let fragment = &fragments[i as usize];
                let bin = &mut bins[binning.bin(&fragment.centroid, axis)];
                bin.bounds = bin.bounds.union(&fragment.bounds);
                bin.count += 1;
            }

            // left[i] and right[i] are the two sides of a split after bin i
            let mut left = [Bin::default(); BIN_COUNT - 1];
            let mut right = [Bin::default(); BIN_COUNT - 1];
            let mut left_sum = Bin::default();
            let mut right_sum = Bin::default();
            for i in 0..BIN_COUNT - 1 {
                left_sum.bounds = left_sum.bounds.union(&bins[i].bounds);
                left_sum.count += bins[i].count;
                left[i] = left_sum;

                let j = BIN_COUNT - 1 - i;
                right_sum.bounds = right_sum.bounds.union(&bins[j].bounds);
                right_sum.count += bins[j].count;
                right[j - 1] = right_sum;
            }

            for (position, (l, r)) in left.iter().zip(right.iter()).enumerate() {
                if l.count == 0 || r.count == 0 {
                    continue;
                }
                let cost = split_cost(&l.bounds, l.count, &r.bounds, r.count);
                if cost < best_cost {
                    best_cost = cost;
                    best = Some(Split {
                        axis,
                        position,
                        cost,
                        left: l.bounds,
                        right: r.bounds,
                    });
                }
            }
        }

        best
    }
}

/// Surface area heuristic cost of a split, scaled by the (constant) traversal cost.
pub(super) fn split_cost(
    left: &WorldBox,
    left_count: usize,
    right: &WorldBox,
    right_count: usize,
) -> FloatType {
    left_count as FloatType * left.half_area() + right_count as FloatType * right.half_area()
}

/// Reorders indices so that the left side of the split comes first.
/// Returns number of triangles on the left side.
fn partition(indices: &mut [u32], fragments: &[Fragment], binning: &Binning, split: &Split) -> usize {
    let mut left = 0;
    let mut right = indices.len();
    while left < right {
        let centroid = &fragments[indices[left] as usize].centroid;
        if binning.bin(centroid, split.axis) <= split.position {
            left += 1;
        } else {
            right -= 1;
            indices.swap(left, right);
        }
    }
    left
}
