use assert2::assert;

use crate::geometry::{Triangle, WorldBox, WorldPoint};

use super::{NodeIdx, RESERVED, TriangleBvh};

impl TriangleBvh {
    /// Updates bounding boxes of all nodes to moved vertices, keeping the tree structure.
    ///
    /// The vertices must describe the same triangles in the same order as in the last build.
    /// Panics if the tree was not built, if it can't be refit, or if the triangle count changed.
    pub fn refit(&mut self, vertices: &[WorldPoint]) {
        assert!(!self.nodes.is_empty(), "refitting a BVH that was not built yet");
        assert!(
            self.refittable,
            "can't refit a BVH built with spatial splits, rebuild it instead"
        );
        assert!(
            vertices.len() == self.primitive_count * 3,
            "refitting with a different number of triangles than the BVH was built over"
        );
        if self.is_empty() {
            return;
        }

        // Children are always allocated after their parents
        for index in (0..self.nodes_used).rev().map(NodeIdx::new) {
            if index == RESERVED {
                continue;
            }

            let node = &self.nodes[index];
            let bounds = if node.is_leaf() {
                WorldBox::from_points(self.indices[node.primitives()].iter().flat_map(|&i| {
                    let triangle = Triangle::from_flat(vertices, i as usize);
                    [triangle[0], triangle[1], triangle[2]]
                }))
            } else {
                let (left, right) = self.children(node);
                left.bounds().union(&right.bounds())
            };
            self.nodes[index].set_bounds(&bounds);
        }
    }

    #[cfg(test)]
    pub(crate) fn forbid_refit(&mut self) {
        self.refittable = false;
    }
}
