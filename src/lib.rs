pub mod geometry;
pub mod scene;
mod util;

pub use geometry::{Hit, Ray, WorldBox, WorldPoint, WorldTransform, WorldVector};
pub use scene::{
    Instance, InstanceError, Mesh, Object, TopLevelBvh, TriangleBvh,
    triangle_bvh::{BuildStrategy, BvhNode, BvhStatistics},
};
pub use util::Stats;
