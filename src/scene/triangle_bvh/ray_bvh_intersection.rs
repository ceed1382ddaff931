use arrayvec::ArrayVec;
use assert2::debug_assert;

use super::{BvhNode, MAX_DEPTH, NodeIdx, TriangleBvh};
use crate::geometry::{FloatType, Ray, RayIntersectionExt as _, Triangle, WorldPoint};

impl TriangleBvh {
    /// Finds the nearest triangle hit along the ray, updating `ray.hit` if it is closer
    /// than the hit already stored there.
    /// Returns number of visited nodes.
    pub fn intersect(&self, vertices: &[WorldPoint], ray: &mut Ray) -> u32 {
        debug_assert!(vertices.len() == self.primitive_count * 3);
        self.traverse(ray, |ray, primitive| {
            let triangle = Triangle::from_flat(vertices, primitive as usize);
            if let Some((t, uv)) = triangle.intersect(ray) {
                ray.hit.t = t;
                ray.hit.uv = uv;
                ray.hit.primitive = primitive;
            }
        })
    }

    /// Walks all leaves whose bounding box the ray enters before its current hit,
    /// nearest first, calling `visit` for each primitive index in them.
    /// `visit` is expected to shorten the ray when it finds a hit.
    /// Returns number of visited nodes.
    pub(crate) fn traverse(&self, ray: &mut Ray, mut visit: impl FnMut(&mut Ray, u32)) -> u32 {
        let Some(mut node) = self.root() else {
            return 0;
        };

        // Depth of the tree is limited when building, so this can't overflow
        let mut stack = ArrayVec::<(NodeIdx, FloatType), MAX_DEPTH>::new();
        let mut steps = 0;

        loop {
            steps += 1;

            let next = if node.is_leaf() {
                for &primitive in &self.indices[node.primitives()] {
                    visit(ray, primitive);
                }
                None
            } else {
                self.nearer_child(node, ray, &mut stack)
            };

            node = match next {
                Some(next) => next,
                None => match self.pop(&mut stack, ray) {
                    Some(next) => next,
                    None => return steps,
                },
            };
        }
    }

    /// Returns the nearer of the two children that the ray hits.
    /// Farther child is pushed to the stack if it was hit too.
    fn nearer_child(
        &self,
        node: &BvhNode,
        ray: &Ray,
        stack: &mut ArrayVec<(NodeIdx, FloatType), MAX_DEPTH>,
    ) -> Option<&BvhNode> {
        let left_index = node.left_child();
        let right_index = left_index + 1;
        let (left, right) = self.children(node);

        match (left.bounds().intersect(ray), right.bounds().intersect(ray)) {
            (Some(left_t), Some(right_t)) => {
                if left_t <= right_t {
                    stack.push((right_index, right_t));
                    Some(left)
                } else {
                    stack.push((left_index, left_t));
                    Some(right)
                }
            }
            (Some(_), None) => Some(left),
            (None, Some(_)) => Some(right),
            (None, None) => None,
        }
    }

    /// Pops nodes from the stack until one that may still contain a closer hit.
    fn pop(
        &self,
        stack: &mut ArrayVec<(NodeIdx, FloatType), MAX_DEPTH>,
        ray: &Ray,
    ) -> Option<&BvhNode> {
        while let Some((index, t)) = stack.pop() {
            if t < ray.hit.t {
                return Some(&self.nodes[index]);
            }
        }
        None
    }
}
