mod instance;
mod top_level_bvh;
pub mod triangle_bvh;

use crate::geometry::{Ray, WorldBox, WorldPoint};

pub use instance::{Instance, InstanceError};
pub use top_level_bvh::TopLevelBvh;
pub use triangle_bvh::TriangleBvh;

/// Anything that can be placed in the scene as an instance.
pub trait Object {
    /// Intersects the ray with the object in its local coordinates,
    /// updating `ray.hit` if a closer hit is found.
    /// Returns number of visited BVH nodes.
    fn intersect(&self, ray: &mut Ray) -> u32;

    /// Bounds in the object's local coordinates.
    fn get_bounding_box(&self) -> WorldBox;
}

/// Triangle soup together with its bottom level BVH.
#[derive(Copy, Clone, Debug)]
pub struct Mesh<'a> {
    pub bvh: &'a TriangleBvh,
    pub vertices: &'a [WorldPoint],
}

impl<'a> Mesh<'a> {
    pub fn new(bvh: &'a TriangleBvh, vertices: &'a [WorldPoint]) -> Self {
        assert2::assert!(bvh.primitive_count() * 3 == vertices.len());
        Mesh { bvh, vertices }
    }
}

impl Object for Mesh<'_> {
    fn intersect(&self, ray: &mut Ray) -> u32 {
        self.bvh.intersect(self.vertices, ray)
    }

    fn get_bounding_box(&self) -> WorldBox {
        self.bvh.bounding_box()
    }
}
