//! Shared query plumbing: the bounded kNN heap and the candidate ordering
//! used by priority queues.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::relation::ObjectId;

/// One result candidate held by the kNN heap.
///
/// Max-ordered by (distance, id) so the heap root is always the worst of
/// the current k best, and ties on distance resolve to the smaller id.
#[derive(Debug, Clone, Copy, PartialEq)]
struct KnnEntry {
    dist: f64,
    id: ObjectId,
}

impl Eq for KnnEntry {}

impl PartialOrd for KnnEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KnnEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .partial_cmp(&other.dist)
            .unwrap_or(Ordering::Equal)
            .then(self.id.cmp(&other.id))
    }
}

/// Bounded max-heap holding the k best candidates seen so far.
///
/// [`KnnHeap::bound`] is the pruning threshold for branch-and-bound: the
/// k-th best distance once the heap is full, infinity before that.
pub struct KnnHeap {
    k: usize,
    heap: BinaryHeap<KnnEntry>,
}

impl KnnHeap {
    pub fn new(k: usize) -> Self {
        debug_assert!(k >= 1);
        KnnHeap {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    /// Offer a candidate; returns the updated bound.
    pub fn insert(&mut self, dist: f64, id: ObjectId) -> f64 {
        let entry = KnnEntry { dist, id };
        if self.heap.len() < self.k {
            self.heap.push(entry);
        } else if let Some(worst) = self.heap.peek() {
            if entry < *worst {
                self.heap.pop();
                self.heap.push(entry);
            }
        }
        self.bound()
    }

    /// Current k-th best distance, or infinity while not yet full.
    pub fn bound(&self) -> f64 {
        if self.heap.len() < self.k {
            f64::INFINITY
        } else {
            self.heap.peek().map_or(f64::INFINITY, |e| e.dist)
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drain into an ascending (distance, id) list.
    pub fn into_sorted(self) -> Vec<(ObjectId, f64)> {
        let mut out: Vec<KnnEntry> = self.heap.into_vec();
        out.sort();
        out.into_iter().map(|e| (e.id, e.dist)).collect()
    }
}

/// Priority-queue element keyed by a distance lower bound.
///
/// Min-ordered: a `BinaryHeap<Candidate<P>>` pops the smallest key first.
/// Ties resolve through the payload ordering so traversal is deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<P> {
    pub key: f64,
    pub payload: P,
}

impl<P: Eq> Eq for Candidate<P> {}

impl<P: Ord> PartialOrd for Candidate<P>
where
    P: PartialEq,
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P: Ord> Ord for Candidate<P>
where
    P: PartialEq,
{
    fn cmp(&self, other: &Self) -> Ordering {
        // Inverted on the key for min-first popping.
        other
            .key
            .partial_cmp(&self.key)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.payload.cmp(&self.payload))
    }
}
