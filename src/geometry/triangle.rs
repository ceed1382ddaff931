use std::ops::Index;

use super::{FloatType, WorldBox, WorldPoint, WorldVector};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Triangle<Point>([Point; 3]);

impl<Point> Triangle<Point> {
    pub fn new(a: Point, b: Point, c: Point) -> Triangle<Point> {
        Triangle([a, b, c])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.0.iter()
    }
}

impl<Point> Index<usize> for Triangle<Point> {
    type Output = Point;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl Triangle<WorldPoint> {
    /// Reads triangle with the given index from a flat, non-indexed vertex buffer
    /// (three consecutive vertices per triangle).
    pub fn from_flat(vertices: &[WorldPoint], index: usize) -> Self {
        let [a, b, c] = [0, 1, 2].map(|i| vertices[3 * index + i]);
        Triangle([a, b, c])
    }

    pub fn bounds(&self) -> WorldBox {
        WorldBox::from_points(self.0)
    }

    pub fn centroid(&self) -> WorldPoint {
        WorldPoint::from((self[0].coords + self[1].coords + self[2].coords) / 3.0)
    }

    /// Returns edge vectors, coming from self[0]
    pub fn edges(&self) -> [WorldVector; 2] {
        [self[1] - self[0], self[2] - self[0]]
    }
}

/// Position inside a triangle, weight of the second and third vertex.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BarycentricCoordinates<T> {
    pub u: T,
    pub v: T,
}

impl BarycentricCoordinates<FloatType> {
    pub fn interpolate_triangle(&self, triangle: &Triangle<WorldPoint>) -> WorldPoint {
        let w = 1.0 - self.u - self.v;
        WorldPoint::from(
            triangle[0].coords * w + triangle[1].coords * self.u + triangle[2].coords * self.v,
        )
    }
}
