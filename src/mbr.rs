//! N-dimensional minimum bounding rectangles.
//!
//! An [`Mbr`] is the axis-aligned bounding region used by the R*-tree for
//! both leaf points and directory entries. All geometric cost measures used
//! by insertion and splitting (area, margin, overlap, enlargement) live
//! here, as does the query-side lower bound `mindist`.

use serde::{Deserialize, Serialize};

/// An axis-aligned box given by minimum and maximum corners.
///
/// Invariant: `min.len() == max.len()` and `min[d] <= max[d]` for every
/// dimension, except for the special empty box produced by [`Mbr::empty`]
/// which is inverted and absorbs any box it is expanded with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mbr {
    min: Vec<f64>,
    max: Vec<f64>,
}

impl Mbr {
    /// Create a box from explicit corners.
    pub fn new(min: Vec<f64>, max: Vec<f64>) -> Self {
        debug_assert_eq!(min.len(), max.len());
        Mbr { min, max }
    }

    /// Degenerate box covering a single point.
    pub fn from_point(point: &[f64]) -> Self {
        Mbr {
            min: point.to_vec(),
            max: point.to_vec(),
        }
    }

    /// Inverted box that is the identity for [`Mbr::expand`].
    pub fn empty(dims: usize) -> Self {
        Mbr {
            min: vec![f64::INFINITY; dims],
            max: vec![f64::NEG_INFINITY; dims],
        }
    }

    pub fn dims(&self) -> usize {
        self.min.len()
    }

    pub fn min(&self, d: usize) -> f64 {
        self.min[d]
    }

    pub fn max(&self, d: usize) -> f64 {
        self.max[d]
    }

    pub fn is_empty(&self) -> bool {
        self.min.iter().zip(&self.max).any(|(lo, hi)| lo > hi)
    }

    /// Volume of the box (product of side lengths).
    pub fn area(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.min
            .iter()
            .zip(&self.max)
            .map(|(lo, hi)| hi - lo)
            .product()
    }

    /// Sum of side lengths, the "margin" minimized by the R* split.
    pub fn margin(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.min
            .iter()
            .zip(&self.max)
            .map(|(lo, hi)| hi - lo)
            .sum()
    }

    /// Grow this box to cover `other`.
    pub fn expand(&mut self, other: &Mbr) {
        for d in 0..self.min.len() {
            self.min[d] = self.min[d].min(other.min[d]);
            self.max[d] = self.max[d].max(other.max[d]);
        }
    }

    /// Smallest box covering both inputs.
    pub fn union(&self, other: &Mbr) -> Mbr {
        let mut out = self.clone();
        out.expand(other);
        out
    }

    /// Area growth needed to cover `other`.
    pub fn enlargement(&self, other: &Mbr) -> f64 {
        self.union(other).area() - self.area()
    }

    /// Volume of the intersection, 0.0 when disjoint.
    pub fn overlap(&self, other: &Mbr) -> f64 {
        let mut v = 1.0;
        for d in 0..self.min.len() {
            let lo = self.min[d].max(other.min[d]);
            let hi = self.max[d].min(other.max[d]);
            if lo >= hi {
                return 0.0;
            }
            v *= hi - lo;
        }
        v
    }

    pub fn contains_point(&self, point: &[f64]) -> bool {
        point
            .iter()
            .enumerate()
            .all(|(d, x)| self.min[d] <= *x && *x <= self.max[d])
    }

    pub fn center(&self) -> Vec<f64> {
        self.min
            .iter()
            .zip(&self.max)
            .map(|(lo, hi)| (lo + hi) / 2.0)
            .collect()
    }

    /// Squared Euclidean lower bound from `point` to any point inside the
    /// box: clamp the query into the box and measure the remainder. Zero
    /// when the point lies inside.
    pub fn min_dist_sq(&self, point: &[f64]) -> f64 {
        let mut acc = 0.0;
        for d in 0..self.min.len() {
            let x = point[d];
            let c = x.clamp(self.min[d], self.max[d]);
            let diff = x - c;
            acc += diff * diff;
        }
        acc
    }
}
