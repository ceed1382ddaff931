use bon::bon;
use thiserror::Error;

use crate::geometry::{Ray, WorldBox, WorldTransform};

use super::Object;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InstanceError {
    #[error("Instance transform is not invertible")]
    SingularTransform,
}

/// Object placed in the world by an affine transform.
#[derive(Clone, Debug)]
pub struct Instance<O> {
    object: O,
    /// Object to world.
    transform: WorldTransform,
    /// World to object.
    inverse: WorldTransform,
    world_bounds: WorldBox,
}

#[bon]
impl<O: Object> Instance<O> {
    #[builder]
    pub fn new(
        object: O,
        #[builder(default = WorldTransform::identity())] transform: WorldTransform,
    ) -> Result<Self, InstanceError> {
        let inverse = transform
            .try_inverse()
            .ok_or(InstanceError::SingularTransform)?;
        let mut instance = Instance {
            object,
            transform,
            inverse,
            world_bounds: WorldBox::empty(),
        };
        instance.update_world_bounds();
        Ok(instance)
    }

    pub fn object(&self) -> &O {
        &self.object
    }

    /// Mutable access to the object, call `update_world_bounds` after changing its geometry.
    pub fn object_mut(&mut self) -> &mut O {
        &mut self.object
    }

    pub fn transform(&self) -> &WorldTransform {
        &self.transform
    }

    pub fn inverse(&self) -> &WorldTransform {
        &self.inverse
    }

    /// Moves the instance. On error the instance is left unchanged.
    pub fn set_transform(&mut self, transform: WorldTransform) -> Result<(), InstanceError> {
        self.inverse = transform
            .try_inverse()
            .ok_or(InstanceError::SingularTransform)?;
        self.transform = transform;
        self.update_world_bounds();
        Ok(())
    }

    pub fn world_bounds(&self) -> WorldBox {
        self.world_bounds
    }

    /// Recalculates the world space bounds from the object's current bounds.
    pub fn update_world_bounds(&mut self) {
        let local = self.object.get_bounding_box();
        self.world_bounds = if local.is_empty() {
            WorldBox::empty()
        } else {
            WorldBox::from_points(
                local
                    .corners()
                    .iter()
                    .map(|corner| self.transform.transform_point(corner)),
            )
        };
    }

    /// Intersects the object with a world space ray, updating its hit if a closer one is found.
    /// Returns number of visited BVH nodes.
    pub fn intersect(&self, ray: &mut Ray) -> u32 {
        let mut local = ray.transformed(&self.inverse);
        let steps = self.object.intersect(&mut local);
        if local.hit.t < ray.hit.t {
            ray.hit = local.hit;
        }
        steps
    }
}
