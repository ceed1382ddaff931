use super::{FloatType, Ray, WorldBox};

pub trait RayIntersectionExt {
    /// Calculate first and last ray intersection with the box
    fn distances(&self, ray: &Ray) -> (FloatType, FloatType);

    /// Distance along the ray where it enters the box, if it does so before the ray's
    /// current hit and the box is not completely behind the ray origin.
    fn intersect(&self, ray: &Ray) -> Option<FloatType>;
}

impl RayIntersectionExt for WorldBox {
    /// Slab test, returns minimum and maximum distance along the ray,
    /// ray intersects the box if min <= max.
    fn distances(&self, ray: &Ray) -> (FloatType, FloatType) {
        // Zero direction components have large finite inverse, so these are never NaN
        let to_box_min = (self.min - ray.origin).component_mul(&ray.inv_direction);
        let to_box_max = (self.max - ray.origin).component_mul(&ray.inv_direction);

        let componentwise_min_t = to_box_min.inf(&to_box_max);
        let componentwise_max_t = to_box_min.sup(&to_box_max);

        (componentwise_min_t.max(), componentwise_max_t.min())
    }

    fn intersect(&self, ray: &Ray) -> Option<FloatType> {
        let (t_min, t_max) = self.distances(ray);
        if t_max >= t_min && t_min < ray.hit.t && t_max >= 0.0 {
            Some(t_min)
        } else {
            None
        }
    }
}
