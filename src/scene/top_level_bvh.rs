use assert2::debug_assert;

use crate::geometry::{Ray, WorldBox, WorldPoint};

use super::{Instance, Object, triangle_bvh::TriangleBvh};

/// BVH over instances, rebuilt whenever the instances move.
///
/// Each instance is represented by a degenerate triangle `(min, max, max)` spanning its
/// world bounds, so the regular triangle BVH builder can be reused as is.
#[derive(Clone, Debug, Default)]
pub struct TopLevelBvh {
    bvh: TriangleBvh,
    bounds_vertices: Vec<WorldPoint>,
}

impl TopLevelBvh {
    pub fn new<O: Object>(instances: &[Instance<O>]) -> Self {
        let mut tlas = TopLevelBvh::default();
        tlas.build(instances);
        tlas
    }

    /// Rebuilds the tree from current world bounds of the instances.
    pub fn build<O: Object>(&mut self, instances: &[Instance<O>]) {
        self.build_from_bounds(instances.iter().map(Instance::world_bounds));
    }

    /// Rebuilds the tree over arbitrary world space boxes, leaf primitives are indices
    /// into the sequence.
    pub fn build_from_bounds(&mut self, bounds: impl IntoIterator<Item = WorldBox>) {
        self.bounds_vertices.clear();
        let mut anchor = None;
        for b in bounds {
            if anchor.is_none() && !b.is_empty() {
                anchor = Some(b.min);
            }
            self.bounds_vertices.extend([b.min, b.max, b.max]);
        }

        // Empty boxes would put infinities into the build, they become a point inside
        // the first non-empty box instead
        let anchor = anchor.unwrap_or_else(WorldPoint::origin);
        for triangle in self.bounds_vertices.chunks_exact_mut(3) {
            if WorldBox::new(triangle[0], triangle[1]).is_empty() {
                triangle.fill(anchor);
            }
        }

        let count = self.bounds_vertices.len() / 3;
        if count != self.bvh.primitive_count() {
            log::trace!(
                "Instance count changed {} -> {}, reallocating top level BVH",
                self.bvh.primitive_count(),
                count
            );
            self.bvh = TriangleBvh::default();
        }
        self.bvh.build(&self.bounds_vertices);
    }

    pub fn bvh(&self) -> &TriangleBvh {
        &self.bvh
    }

    pub fn instance_count(&self) -> usize {
        self.bvh.primitive_count()
    }

    pub fn bounding_box(&self) -> WorldBox {
        self.bvh.bounding_box()
    }

    /// Finds the nearest hit among all instances, updating `ray.hit` if it is closer than
    /// the hit already stored there. `hit.instance` is set to the index of the hit instance.
    ///
    /// `instances` must be the same slice (in the same order) that the tree was last built from.
    /// Returns number of visited nodes in both levels.
    pub fn intersect<O: Object>(&self, instances: &[Instance<O>], ray: &mut Ray) -> u32 {
        debug_assert!(instances.len() == self.instance_count());

        let mut bottom_steps = 0;
        let top_steps = self.bvh.traverse(ray, |ray, index| {
            let previous = ray.hit.t;
            bottom_steps += instances[index as usize].intersect(ray);
            if ray.hit.t < previous {
                ray.hit.instance = index;
            }
        });

        top_steps + bottom_steps
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::{Hit, Triangle, WorldTransform, WorldVector};
    use crate::scene::{
        Mesh,
        triangle_bvh::test::{brute_force, random_rays, random_triangles},
    };

    use assert2::{assert, let_assert};
    use nalgebra::{Matrix4, Rotation3, Translation3};
    use rand::{Rng as _, SeedableRng as _, rngs::SmallRng};

    fn unit_triangle() -> Vec<WorldPoint> {
        vec![
            WorldPoint::new(0.0, 0.0, 0.0),
            WorldPoint::new(1.0, 0.0, 0.0),
            WorldPoint::new(0.0, 1.0, 0.0),
        ]
    }

    fn translation(x: f32, y: f32, z: f32) -> WorldTransform {
        WorldTransform::from_matrix_unchecked(Translation3::new(x, y, z).to_homogeneous())
    }

    fn instance<'a>(mesh: Mesh<'a>, transform: WorldTransform) -> Instance<Mesh<'a>> {
        let_assert!(
            Ok(instance) = Instance::builder()
                .object(mesh)
                .transform(transform)
                .build()
        );
        instance
    }

    fn down_ray(x: f32, y: f32) -> Ray {
        Ray::new(WorldPoint::new(x, y, 10.0), WorldVector::new(0.0, 0.0, -1.0))
    }

    #[test]
    fn two_instances_do_not_interfere() {
        let vertices = unit_triangle();
        let bvh = TriangleBvh::new(&vertices);
        let mesh = Mesh::new(&bvh, &vertices);
        let instances = [
            instance(mesh, translation(-10.0, 0.0, 0.0)),
            instance(mesh, translation(10.0, 0.0, 1.0)),
        ];
        let tlas = TopLevelBvh::new(&instances);
        assert!(tlas.instance_count() == 2);

        let mut ray = down_ray(-9.8, 0.2);
        assert!(tlas.intersect(&instances, &mut ray) > 0);
        assert!(ray.hit.instance == 0);
        assert!(ray.hit.primitive == 0);
        assert!((ray.hit.t - 10.0).abs() < 1e-5);

        let mut ray = down_ray(10.2, 0.2);
        tlas.intersect(&instances, &mut ray);
        assert!(ray.hit.instance == 1);
        assert!((ray.hit.t - 9.0).abs() < 1e-5);

        // Between the two instances, and on the missing half of the unit square
        for (x, y) in [(0.0, 0.2), (-9.1, 0.9), (10.9, 0.9)] {
            let mut ray = down_ray(x, y);
            tlas.intersect(&instances, &mut ray);
            assert!(!ray.hit.is_hit());
            assert!(!ray.hit.has_instance());
        }
    }

    #[test]
    fn nearest_of_overlapping_instances() {
        let vertices = unit_triangle();
        let bvh = TriangleBvh::new(&vertices);
        let mesh = Mesh::new(&bvh, &vertices);
        let far = WorldTransform::from_matrix_unchecked(Matrix4::new_scaling(3.0));
        let instances = [instance(mesh, far), instance(mesh, translation(0.0, 0.0, 2.0))];
        let tlas = TopLevelBvh::new(&instances);

        let mut ray = down_ray(0.2, 0.2);
        tlas.intersect(&instances, &mut ray);
        assert!(ray.hit.instance == 1);
        assert!((ray.hit.t - 8.0).abs() < 1e-5);

        // Only the scaled instance reaches this far
        let mut ray = down_ray(2.0, 0.5);
        tlas.intersect(&instances, &mut ray);
        assert!(ray.hit.instance == 0);
        assert!((ray.hit.t - 10.0).abs() < 1e-5);
    }

    #[test]
    fn no_instances() {
        let instances: [Instance<Mesh>; 0] = [];
        let tlas = TopLevelBvh::new(&instances);
        let mut ray = down_ray(0.0, 0.0);
        assert!(tlas.intersect(&instances, &mut ray) == 0);
        assert!(!ray.hit.is_hit());
        assert!(tlas.bounding_box().is_empty());
    }

    #[test]
    fn empty_instance() {
        let vertices = unit_triangle();
        let bvh = TriangleBvh::new(&vertices);
        let empty_bvh = TriangleBvh::new(&[]);
        let instances = [
            instance(Mesh::new(&empty_bvh, &[]), translation(5.0, 5.0, 5.0)),
            instance(Mesh::new(&bvh, &vertices), translation(0.0, 0.0, 0.0)),
        ];
        let tlas = TopLevelBvh::new(&instances);

        // Empty instance must neither break the build nor grow the bounds
        assert!(tlas.bounding_box() == bvh.bounding_box());

        let mut ray = Ray::new(WorldPoint::new(0.2, 0.2, 1.0), WorldVector::new(0.0, 0.0, -1.0));
        tlas.intersect(&instances, &mut ray);
        assert!(ray.hit.instance == 1);
    }

    #[test]
    fn empty_instance_away_from_origin() {
        let vertices = unit_triangle();
        let bvh = TriangleBvh::new(&vertices);
        let empty_bvh = TriangleBvh::new(&[]);
        let instances = [
            instance(Mesh::new(&empty_bvh, &[]), WorldTransform::identity()),
            instance(Mesh::new(&bvh, &vertices), translation(50.0, 50.0, 50.0)),
            instance(Mesh::new(&empty_bvh, &[]), translation(-5.0, 0.0, 0.0)),
            instance(Mesh::new(&bvh, &vertices), translation(60.0, 50.0, 50.0)),
        ];
        let tlas = TopLevelBvh::new(&instances);

        let expected = instances[1]
            .world_bounds()
            .union(&instances[3].world_bounds());
        assert!(tlas.bounding_box() == expected);

        for (x, hit_instance) in [(50.2, 1), (60.2, 3)] {
            let mut ray = Ray::new(WorldPoint::new(x, 50.2, 60.0), WorldVector::new(0.0, 0.0, -1.0));
            tlas.intersect(&instances, &mut ray);
            assert!(ray.hit.instance == hit_instance);
        }

        let mut miss = down_ray(0.2, 0.2);
        tlas.intersect(&instances, &mut miss);
        assert!(!miss.hit.is_hit());
    }

    #[test]
    fn changing_instance_count() {
        let vertices = unit_triangle();
        let bvh = TriangleBvh::new(&vertices);
        let mesh = Mesh::new(&bvh, &vertices);
        let instances: Vec<_> = (0..5)
            .map(|i| instance(mesh, translation(3.0 * i as f32, 0.0, 0.0)))
            .collect();

        let mut tlas = TopLevelBvh::default();
        for count in [2, 5, 5, 1, 0, 3] {
            tlas.build(&instances[..count]);
            assert!(tlas.instance_count() == count);

            for i in 0..5 {
                let mut ray = down_ray(3.0 * i as f32 + 0.2, 0.2);
                tlas.intersect(&instances[..count], &mut ray);
                if i < count {
                    assert!(ray.hit.instance == i as u32);
                } else {
                    assert!(!ray.hit.is_hit());
                }
            }
        }
    }

    #[test]
    fn moved_instance() {
        let vertices = unit_triangle();
        let bvh = TriangleBvh::new(&vertices);
        let mesh = Mesh::new(&bvh, &vertices);
        let mut instances = [
            instance(mesh, translation(0.0, 0.0, 0.0)),
            instance(mesh, translation(5.0, 0.0, 0.0)),
        ];
        let mut tlas = TopLevelBvh::new(&instances);

        let_assert!(Ok(()) = instances[1].set_transform(translation(20.0, 0.0, 0.0)));
        tlas.build(&instances);

        let mut ray = down_ray(5.2, 0.2);
        tlas.intersect(&instances, &mut ray);
        assert!(!ray.hit.is_hit());

        let mut ray = down_ray(20.2, 0.2);
        tlas.intersect(&instances, &mut ray);
        assert!(ray.hit.instance == 1);
    }

    /// Object owning its geometry, so that it can be refit in place.
    #[derive(Debug)]
    struct OwnedMesh {
        bvh: TriangleBvh,
        vertices: Vec<WorldPoint>,
    }

    impl Object for OwnedMesh {
        fn intersect(&self, ray: &mut Ray) -> u32 {
            self.bvh.intersect(&self.vertices, ray)
        }

        fn get_bounding_box(&self) -> WorldBox {
            self.bvh.bounding_box()
        }
    }

    #[test]
    fn refit_object_in_place() {
        let vertices = unit_triangle();
        let object = OwnedMesh {
            bvh: TriangleBvh::new(&vertices),
            vertices,
        };
        let mut instance = Instance::builder().object(object).build().unwrap();

        // Stretch the triangle along x, refit the object and then the top level
        let object = instance.object_mut();
        object.vertices[1].x = 10.0;
        object.bvh.refit(&object.vertices);
        instance.update_world_bounds();
        assert!(instance.world_bounds().max.x == 10.0);

        let instances = [instance];
        let tlas = TopLevelBvh::new(&instances);

        let mut ray = down_ray(8.0, 0.1);
        tlas.intersect(&instances, &mut ray);
        assert!(ray.hit.instance == 0);
        assert!(ray.hit.primitive == 0);
    }

    /// Random instances of a random mesh against testing every triangle of every instance.
    #[test]
    fn matches_brute_force() {
        let vertices = random_triangles(41, 300, 5.0);
        let bvh = TriangleBvh::new(&vertices);
        let mesh = Mesh::new(&bvh, &vertices);

        let mut rng = SmallRng::seed_from_u64(42);
        let instances: Vec<_> = (0..20)
            .map(|_| {
                let offset = WorldVector::from_fn(|_, _| rng.random_range(-30.0..30.0));
                let axis = WorldVector::from_fn(|_, _| rng.random_range(-1.0..1.0));
                let angle = rng.random_range(0.0f32..6.0);
                let scale = rng.random_range(0.5f32..2.0);
                let transform = WorldTransform::from_matrix_unchecked(
                    Translation3::from(offset).to_homogeneous()
                        * Rotation3::new(axis * angle).to_homogeneous()
                        * Matrix4::new_scaling(scale),
                );
                instance(mesh, transform)
            })
            .collect();
        let tlas = TopLevelBvh::new(&instances);

        let mut hits = 0;
        for mut ray in random_rays(43, 1000, 40.0) {
            let mut expected = ray;
            for (i, instance) in instances.iter().enumerate() {
                let mut local = expected.transformed(instance.inverse());
                brute_force(&vertices, &mut local);
                if local.hit.t < expected.hit.t {
                    expected.hit = local.hit;
                    expected.hit.instance = i as u32;
                }
            }

            tlas.intersect(&instances, &mut ray);

            assert!(ray.hit.is_hit() == expected.hit.is_hit());
            if expected.hit.is_hit() {
                hits += 1;
                assert!(
                    ray.hit.instance == expected.hit.instance
                        || (ray.hit.t - expected.hit.t).abs() <= 1e-4 * expected.hit.t.max(1.0),
                    "{ray:?} vs {expected:?}"
                );

                let instance = &instances[ray.hit.instance as usize];
                let triangle = Triangle::from_flat(&vertices, ray.hit.primitive as usize);
                let local_point = ray.hit.uv.interpolate_triangle(&triangle);
                let world_point = instance.transform().transform_point(&local_point);
                assert!((world_point - ray.point_at(ray.hit.t)).norm() < 1e-2);
            }
        }
        assert!(hits > 20);
    }

    /// Traversal only borrows the trees, any number of threads can trace at once.
    #[test]
    fn concurrent_tracing() {
        let vertices = random_triangles(44, 500, 10.0);
        let bvh = TriangleBvh::new(&vertices);
        let mesh = Mesh::new(&bvh, &vertices);
        let instances: Vec<_> = (0..4)
            .map(|i| instance(mesh, translation(25.0 * i as f32, 0.0, 0.0)))
            .collect();
        let tlas = TopLevelBvh::new(&instances);
        let rays = random_rays(45, 400, 50.0);

        let trace = |rays: &[Ray]| -> Vec<Hit> {
            rays.iter()
                .map(|ray| {
                    let mut ray = *ray;
                    tlas.intersect(&instances, &mut ray);
                    ray.hit
                })
                .collect()
        };
        let expected = trace(&rays);

        let actual: Vec<Hit> = std::thread::scope(|scope| {
            let handles: Vec<_> = rays
                .chunks(100)
                .map(|chunk| scope.spawn(move || trace(chunk)))
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect()
        });

        assert!(actual == expected);
    }
}
