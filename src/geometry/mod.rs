mod aabb;
mod ray_box_intersection;
mod ray_triangle_intersection;
mod triangle;

pub use aabb::AABB;
pub use ray_box_intersection::RayIntersectionExt;
pub use triangle::{BarycentricCoordinates, Triangle};

pub type FloatType = f32;

pub type WorldPoint = nalgebra::Point3<FloatType>;
pub type WorldVector = nalgebra::Vector3<FloatType>;
pub type WorldBox = AABB<WorldPoint>;
pub type WorldTransform = nalgebra::Affine3<FloatType>;

/// Distance of a ray that has not hit anything yet.
/// Also used as the reciprocal of direction components too close to zero.
pub const NO_HIT: FloatType = 1e30;

/// Direction components with magnitude at most this are treated as zero when inverting.
const INV_DIRECTION_EPSILON: FloatType = 1e-12;

#[derive(Copy, Clone, Debug)]
pub struct Ray {
    pub origin: WorldPoint,
    /// Direction of the ray, not normalized.
    /// Distances along the ray are measured in multiples of its length, which keeps them
    /// unchanged when the ray is moved to a different coordinate frame.
    pub direction: WorldVector,

    /// Componentwise inverse of the ray direction
    /// Components that are (almost) zero get turned into NO_HIT regardless of their sign.
    pub inv_direction: WorldVector,

    pub hit: Hit,
}

impl Ray {
    pub fn new(origin: WorldPoint, direction: WorldVector) -> Ray {
        Self::with_max_distance(origin, direction, NO_HIT)
    }

    /// Creates a ray that only reports hits closer than `max_distance`.
    pub fn with_max_distance(
        origin: WorldPoint,
        direction: WorldVector,
        max_distance: FloatType,
    ) -> Ray {
        Ray {
            origin,
            direction,
            inv_direction: safe_inverse(&direction),
            hit: Hit::new(max_distance),
        }
    }

    pub fn point_at(&self, distance: FloatType) -> WorldPoint {
        self.origin + self.direction * distance
    }

    /// Returns the same ray expressed in a different coordinate frame.
    /// The hit record is carried over unchanged.
    pub fn transformed(&self, transform: &WorldTransform) -> Ray {
        let direction = transform.transform_vector(&self.direction);
        Ray {
            origin: transform.transform_point(&self.origin),
            direction,
            inv_direction: safe_inverse(&direction),
            hit: self.hit,
        }
    }
}

fn safe_inverse(v: &WorldVector) -> WorldVector {
    v.map(|x| {
        if x.abs() > INV_DIRECTION_EPSILON {
            1.0 / x
        } else {
            NO_HIT
        }
    })
}

/// Nearest hit found along a ray so far.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Hit {
    /// Distance along the ray, only ever decreases.
    pub t: FloatType,
    pub uv: BarycentricCoordinates<FloatType>,
    /// Index of the hit triangle in its vertex buffer.
    pub primitive: u32,
    /// Index of the hit instance, when tracing through a top level BVH.
    pub instance: u32,
}

impl Hit {
    pub const INVALID: u32 = u32::MAX;

    pub fn new(max_distance: FloatType) -> Hit {
        Hit {
            t: max_distance,
            uv: BarycentricCoordinates::default(),
            primitive: Self::INVALID,
            instance: Self::INVALID,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.primitive != Self::INVALID
    }

    /// True if the hit came from a top level trace.
    pub fn has_instance(&self) -> bool {
        self.instance != Self::INVALID
    }
}

impl Default for Hit {
    fn default() -> Self {
        Self::new(NO_HIT)
    }
}
