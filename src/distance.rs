//! Pluggable distance functions.
//!
//! Two abstractions cover the two tree families:
//!
//! * [`SpatialDistance`]: for coordinate vectors, with a `min_dist` lower
//!   bound against an [`Mbr`]. The R*-tree is generic over this trait.
//! * [`Metric`]: a plain dissimilarity over arbitrary objects, used by the
//!   M-tree and the distance-only variants (VP-tree, GNAT, MVP-tree).
//!
//! Distances may operate in a transformed domain as long as the transform
//! is monotone: [`SquaredEuclidean`] compares squared values internally and
//! restores the true distance only on final results via
//! [`SpatialDistance::restore`].

use crate::mbr::Mbr;

/// Dissimilarity between coordinate vectors, with an MBR lower bound.
///
/// Implementations must guarantee `min_dist(r, q) <= distance(p, q)` for
/// every point `p` contained in `r`. This is the pruning invariant the
/// whole query engine rests on.
pub trait SpatialDistance: Send + Sync {
    fn distance(&self, a: &[f64], b: &[f64]) -> f64;

    fn min_dist(&self, mbr: &Mbr, point: &[f64]) -> f64;

    /// Map an internal value back to the user-facing distance. Identity
    /// unless the implementation works in a transformed domain.
    fn restore(&self, d: f64) -> f64 {
        d
    }

    /// Inverse of [`restore`](SpatialDistance::restore): map a user-facing
    /// threshold into the internal domain, so radii can be compared against
    /// raw `distance` values.
    fn internalize(&self, d: f64) -> f64 {
        d
    }

    fn is_metric(&self) -> bool {
        true
    }

    fn is_symmetric(&self) -> bool {
        true
    }
}

/// Standard Euclidean (L2) distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Euclidean;

impl SpatialDistance for Euclidean {
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        debug_assert_eq!(a.len(), b.len());
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt()
    }

    fn min_dist(&self, mbr: &Mbr, point: &[f64]) -> f64 {
        mbr.min_dist_sq(point).sqrt()
    }
}

/// Squared Euclidean distance. Skips the square root in the hot loop;
/// comparisons stay correct because squaring is monotone on non-negative
/// values, and `restore` applies the root to final results only.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquaredEuclidean;

impl SpatialDistance for SquaredEuclidean {
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        debug_assert_eq!(a.len(), b.len());
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    fn min_dist(&self, mbr: &Mbr, point: &[f64]) -> f64 {
        mbr.min_dist_sq(point)
    }

    fn restore(&self, d: f64) -> f64 {
        d.sqrt()
    }

    fn internalize(&self, d: f64) -> f64 {
        d * d
    }

    // Squared Euclidean violates the triangle inequality.
    fn is_metric(&self) -> bool {
        false
    }
}

/// Manhattan (L1) distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Manhattan;

impl SpatialDistance for Manhattan {
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        debug_assert_eq!(a.len(), b.len());
        a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
    }

    fn min_dist(&self, mbr: &Mbr, point: &[f64]) -> f64 {
        let mut acc = 0.0;
        for d in 0..mbr.dims() {
            let x = point[d];
            acc += (x - x.clamp(mbr.min(d), mbr.max(d))).abs();
        }
        acc
    }
}

/// Dissimilarity over arbitrary objects, for distance-only indexes.
pub trait Metric<O: ?Sized>: Send + Sync {
    fn distance(&self, a: &O, b: &O) -> f64;

    fn is_symmetric(&self) -> bool {
        true
    }
}

/// Euclidean distance over coordinate slices, as a [`Metric`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanVec;

impl Metric<[f64]> for EuclideanVec {
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        Euclidean.distance(a, b)
    }
}

impl Metric<Vec<f64>> for EuclideanVec {
    fn distance(&self, a: &Vec<f64>, b: &Vec<f64>) -> f64 {
        Euclidean.distance(a, b)
    }
}

/// Adapter turning a closure into a [`Metric`].
pub struct FnMetric<F>(pub F);

impl<O, F> Metric<O> for FnMetric<F>
where
    F: Fn(&O, &O) -> f64 + Send + Sync,
{
    fn distance(&self, a: &O, b: &O) -> f64 {
        (self.0)(a, b)
    }
}
