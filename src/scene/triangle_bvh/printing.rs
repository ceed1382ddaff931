use std::fmt::{self, Display, Write};

use crate::{geometry::FloatType, util::Stats};

use super::{NodeIdx, ROOT, TriangleBvh};

/// Summary of the tree shape, for diagnostics.
#[derive(Clone, Debug, PartialEq)]
pub struct BvhStatistics {
    pub node_count: usize,
    pub leaf_count: usize,
    /// Depth of leaves, root has depth 1.
    pub depth: Stats,
    /// Triangles per leaf.
    pub leaf_size: Stats,
    pub sah_cost: FloatType,
}

impl Display for BvhStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Nodes: {} ({} leaves)", self.node_count, self.leaf_count)?;
        writeln!(f, "Leaf depth: {}", self.depth)?;
        writeln!(f, "Leaf size: {}", self.leaf_size)?;
        write!(f, "SAH cost: {:.2}", self.sah_cost)
    }
}

/// Cost of visiting an inner node.
const TRAVERSAL_COST: FloatType = 3.0;
/// Cost of a single triangle test.
const INTERSECTION_COST: FloatType = 2.0;

impl TriangleBvh {
    /// Number of nodes reachable from the root.
    pub fn node_count(&self) -> usize {
        self.reachable().count()
    }

    /// Surface area heuristic cost of the whole tree, relative to the area of the root.
    /// Zero for empty or flat trees.
    pub fn sah_cost(&self) -> FloatType {
        let root_area = self.bounding_box().half_area();
        if self.is_empty() || root_area <= 0.0 {
            return 0.0;
        }

        let cost: FloatType = self
            .reachable()
            .map(|(index, _)| {
                let node = &self.nodes[index];
                let area = node.bounds().half_area();
                if node.is_leaf() {
                    INTERSECTION_COST * area * node.tri_count as FloatType
                } else {
                    TRAVERSAL_COST * area
                }
            })
            .sum();

        cost / root_area
    }

    pub fn statistics(&self) -> BvhStatistics {
        let mut node_count = 0;
        let mut depth = Stats::default();
        let mut leaf_size = Stats::default();

        for (index, node_depth) in self.reachable() {
            node_count += 1;
            let node = &self.nodes[index];
            if node.is_leaf() {
                depth.add_sample(node_depth);
                leaf_size.add_sample(node.tri_count as usize);
            }
        }

        BvhStatistics {
            node_count,
            leaf_count: leaf_size.count,
            depth,
            leaf_size,
            sah_cost: self.sah_cost(),
        }
    }

    /// Writes an indented dump of the tree, one node per line.
    pub fn write_tree(&self, out: &mut impl Write) -> fmt::Result {
        if self.is_empty() {
            return writeln!(out, "<EMPTY>");
        }

        for (index, depth) in self.reachable() {
            let node = &self.nodes[index];
            let indent = "  ".repeat(depth - 1);
            let bounds = node.bounds();
            if node.is_leaf() {
                writeln!(
                    out,
                    "{indent}- L{}: {:?}-{:?} {:?}",
                    index.index(),
                    bounds.min,
                    bounds.max,
                    &self.indices[node.primitives()],
                )?;
            } else {
                writeln!(
                    out,
                    "{indent}- I{}: {:?}-{:?}",
                    index.index(),
                    bounds.min,
                    bounds.max,
                )?;
            }
        }

        Ok(())
    }

    /// Nodes reachable from the root with their depth, in pre-order with the left child first.
    fn reachable(&self) -> impl Iterator<Item = (NodeIdx, usize)> + '_ {
        let mut stack = if self.is_empty() {
            Vec::new()
        } else {
            vec![(ROOT, 1)]
        };

        std::iter::from_fn(move || {
            let (index, depth) = stack.pop()?;
            let node = &self.nodes[index];
            if !node.is_leaf() {
                let left = node.left_child();
                stack.push((left + 1, depth + 1));
                stack.push((left, depth + 1));
            }
            Some((index, depth))
        })
    }
}
