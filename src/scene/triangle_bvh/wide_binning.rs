//! Split finder that bins all three axes in a single pass over the triangles.
//!
//! Boxes are kept in 8 wide vectors as `[-min.x, -min.y, -min.z, 0, max.x, max.y, max.z, 0]`,
//! so union of two boxes is a single lane-wise max.

use wide::f32x8;

use crate::geometry::{FloatType, WorldBox, WorldPoint};

use super::{
    BIN_COUNT, Fragment,
    building::{Binning, Split, SplitFinder},
};

// The sweep below is unrolled for exactly this many bins
const _: () = assert!(BIN_COUNT == 8);

pub(super) struct WideBinning {
    /// Encoded fragment bounds, indexed by triangle index.
    boxes: Vec<f32x8>,
}

impl WideBinning {
    /// Encodes the fragment bounds into `boxes`, reusing its allocation.
    pub fn new(mut boxes: Vec<f32x8>, fragments: &[Fragment]) -> Self {
        boxes.clear();
        boxes.extend(fragments.iter().map(|f| encode(&f.bounds)));
        WideBinning { boxes }
    }

    pub fn into_boxes(self) -> Vec<f32x8> {
        self.boxes
    }
}

impl SplitFinder for WideBinning {
    fn find_split(
        &mut self,
        fragments: &[Fragment],
        indices: &[u32],
        binning: &Binning,
        node_cost: FloatType,
    ) -> Option<Split> {
        let empty = f32x8::splat(FloatType::NEG_INFINITY);
        let mut bins = [[empty; BIN_COUNT]; 3];
        let mut counts = [[0usize; BIN_COUNT]; 3];

        for &i in indices {
            let encoded = self.boxes[i as usize];
            let centroid = &fragments[i as usize].centroid;
            for axis in 0..3 {
                let bin = binning.bin(centroid, axis);
                bins[axis][bin] = bins[axis][bin].max(encoded);
                counts[axis][bin] += 1;
            }
        }

        let mut best: Option<Split> = None;
        let mut best_cost = node_cost;

        for axis in (0..3).filter(|&axis| binning.axis_enabled[axis]) {
            let (left_boxes, right_boxes) = sweep(&bins[axis], f32x8::max);
            let (left_counts, right_counts) = sweep(&counts[axis], |a, b| a + b);

            for position in 0..BIN_COUNT - 1 {
                let (left_count, right_count) = (left_counts[position], right_counts[position]);
                if left_count == 0 || right_count == 0 {
                    continue;
                }
                let cost = left_count as FloatType * half_area(left_boxes[position])
                    + right_count as FloatType * half_area(right_boxes[position]);
                if cost < best_cost {
                    best_cost = cost;
                    best = Some(Split {
                        axis,
                        position,
                        cost,
                        left: decode(left_boxes[position]),
                        right: decode(right_boxes[position]),
                    });
                }
            }
        }

        best
    }
}

/// Running reductions over the bins from the left and from the right.
/// Element i of both results describes the two sides of a split after bin i.
#[inline(always)]
fn sweep<T: Copy>(
    bins: &[T; BIN_COUNT],
    op: impl Fn(T, T) -> T,
) -> ([T; BIN_COUNT - 1], [T; BIN_COUNT - 1]) {
    let l0 = bins[0];
    let l1 = op(l0, bins[1]);
    let l2 = op(l1, bins[2]);
    let l3 = op(l2, bins[3]);
    let l4 = op(l3, bins[4]);
    let l5 = op(l4, bins[5]);
    let l6 = op(l5, bins[6]);

    let r6 = bins[7];
    let r5 = op(r6, bins[6]);
    let r4 = op(r5, bins[5]);
    let r3 = op(r4, bins[4]);
    let r2 = op(r3, bins[3]);
    let r1 = op(r2, bins[2]);
    let r0 = op(r1, bins[1]);

    ([l0, l1, l2, l3, l4, l5, l6], [r0, r1, r2, r3, r4, r5, r6])
}

fn encode(b: &WorldBox) -> f32x8 {
    f32x8::new([
        -b.min.x, -b.min.y, -b.min.z, 0.0, b.max.x, b.max.y, b.max.z, 0.0,
    ])
}

fn decode(v: f32x8) -> WorldBox {
    let a = v.to_array();
    WorldBox::new(
        WorldPoint::new(-a[0], -a[1], -a[2]),
        WorldPoint::new(a[4], a[5], a[6]),
    )
}

/// Same as WorldBox::half_area, max + (-min) is exactly max - min.
fn half_area(v: f32x8) -> FloatType {
    let a = v.to_array();
    let (x, y, z) = (a[4] + a[0], a[5] + a[1], a[6] + a[2]);
    x * y + y * z + z * x
}
