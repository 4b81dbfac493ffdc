//! In-memory vantage-point tree.
//!
//! Each node holds one vantage point; the remaining objects split at the
//! median distance into a near and a far half, and the node keeps the
//! exact distance interval of each half. A query visits a half only when
//! its distance to the vantage point can fall inside the widened interval.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::marker::PhantomData;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::distance::Metric;
use crate::error::{Result, TreeError};
use crate::knn::{Candidate, KnnHeap};
use crate::relation::{ObjectId, Relation};

/// Build parameters of a [`VpTree`].
#[derive(Debug, Clone)]
pub struct VpTreeConfig {
    /// Candidates and reference sample size for vantage point selection.
    pub sample_size: usize,
    /// Seed for the sampling RNG; builds are deterministic per seed.
    pub seed: u64,
}

impl Default for VpTreeConfig {
    fn default() -> Self {
        VpTreeConfig {
            sample_size: 10,
            seed: 0,
        }
    }
}

struct VpNode {
    vantage: ObjectId,
    left: Option<usize>,
    right: Option<usize>,
    left_low: f64,
    left_high: f64,
    right_low: f64,
    right_high: f64,
}

struct Scratch {
    id: ObjectId,
    dist: f64,
}

/// A vantage-point tree over arbitrary objects under a metric.
pub struct VpTree<O, M, R> {
    metric: M,
    relation: R,
    nodes: Vec<VpNode>,
    root: Option<usize>,
    _object: PhantomData<fn() -> O>,
}

impl<O, M: Metric<O>, R: Relation<O>> VpTree<O, M, R> {
    /// Index every object of the relation.
    pub fn build(metric: M, relation: R, config: VpTreeConfig) -> Result<Self> {
        let ids = relation.ids();
        let mut tree = VpTree {
            metric,
            relation,
            nodes: Vec::with_capacity(ids.len()),
            root: None,
            _object: PhantomData,
        };
        let mut scratch: Vec<Scratch> = ids
            .into_iter()
            .map(|id| Scratch { id, dist: 0.0 })
            .collect();
        if !scratch.is_empty() {
            let mut rng = StdRng::seed_from_u64(config.seed);
            let root = tree.build_node(&mut scratch, &mut rng, config.sample_size)?;
            tree.root = Some(root);
        }
        log::debug!("built vp-tree over {} objects", tree.nodes.len());
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn build_node(
        &mut self,
        items: &mut [Scratch],
        rng: &mut StdRng,
        sample_size: usize,
    ) -> Result<usize> {
        // Singleton: a vantage point with empty partitions.
        if items.len() == 1 {
            self.nodes.push(VpNode {
                vantage: items[0].id,
                left: None,
                right: None,
                left_low: f64::INFINITY,
                left_high: f64::NEG_INFINITY,
                right_low: f64::INFINITY,
                right_high: f64::NEG_INFINITY,
            });
            return Ok(self.nodes.len() - 1);
        }

        let vantage_at = self.find_vantage(items, rng, sample_size)?;
        items.swap(0, vantage_at);
        let vantage = items[0].id;
        for i in 1..items.len() {
            let d = {
                let vobj = self.relation.get(vantage)?;
                self.metric.distance(vobj, self.relation.get(items[i].id)?)
            };
            items[i].dist = d;
        }

        let rest = &mut items[1..];
        let m = (rest.len() - 1) / 2;
        rest.select_nth_unstable_by(m, |a, b| {
            a.dist.partial_cmp(&b.dist).unwrap_or(Ordering::Equal)
        });
        // Entries equal to the median go to the near half.
        let median = rest[m].dist;
        let mut split = m + 1;
        for i in split..rest.len() {
            if rest[i].dist == median {
                rest.swap(i, split);
                split += 1;
            }
        }

        let (left_low, left_high) = bounds(&rest[..split]);
        let (right_low, right_high) = bounds(&rest[split..]);

        let node_at = self.nodes.len();
        self.nodes.push(VpNode {
            vantage,
            left: None,
            right: None,
            left_low,
            left_high,
            right_low,
            right_high,
        });
        if split > 0 {
            let child = self.build_node(&mut items[1..1 + split], rng, sample_size)?;
            self.nodes[node_at].left = Some(child);
        }
        if 1 + split < items.len() {
            let child = self.build_node(&mut items[1 + split..], rng, sample_size)?;
            self.nodes[node_at].right = Some(child);
        }
        Ok(node_at)
    }

    /// Pick the sample candidate whose distances to the sample spread
    /// widest (largest second moment about the mean).
    fn find_vantage(
        &self,
        items: &[Scratch],
        rng: &mut StdRng,
        sample_size: usize,
    ) -> Result<usize> {
        let s = sample_size.min(items.len());
        if s <= 1 {
            return Ok(0);
        }
        let sample = rand::seq::index::sample(rng, items.len(), s).into_vec();
        let mut best = sample[0];
        let mut best_score = f64::NEG_INFINITY;
        for &c in &sample {
            let cobj = self.relation.get(items[c].id)?;
            let mut dists = Vec::with_capacity(s - 1);
            for &o in &sample {
                if o != c {
                    dists.push(self.metric.distance(cobj, self.relation.get(items[o].id)?));
                }
            }
            let mean = dists.iter().sum::<f64>() / dists.len() as f64;
            let score: f64 = dists.iter().map(|d| (d - mean) * (d - mean)).sum();
            if score > best_score {
                best_score = score;
                best = c;
            }
        }
        Ok(best)
    }

    /// All objects within `radius` of `query`, ascending by distance and
    /// ties by id.
    pub fn range(&self, query: &O, radius: f64) -> Result<Vec<(ObjectId, f64)>> {
        if radius < 0.0 {
            return Err(TreeError::InvalidArgument(
                "radius must be non-negative".into(),
            ));
        }
        let mut results = Vec::new();
        if let Some(root) = self.root {
            self.range_rec(root, query, radius, &mut results)?;
        }
        results.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        Ok(results)
    }

    fn range_rec(
        &self,
        idx: usize,
        query: &O,
        radius: f64,
        results: &mut Vec<(ObjectId, f64)>,
    ) -> Result<()> {
        let node = &self.nodes[idx];
        let x = self
            .metric
            .distance(query, self.relation.get(node.vantage)?);
        if x <= radius {
            results.push((node.vantage, x));
        }
        if let Some(left) = node.left {
            if x >= node.left_low - radius && x <= node.left_high + radius {
                self.range_rec(left, query, radius, results)?;
            }
        }
        if let Some(right) = node.right {
            if x >= node.right_low - radius && x <= node.right_high + radius {
                self.range_rec(right, query, radius, results)?;
            }
        }
        Ok(())
    }

    /// The `k` nearest objects to `query`, ascending by distance and ties
    /// by id.
    pub fn knn(&self, query: &O, k: usize) -> Result<Vec<(ObjectId, f64)>> {
        if k < 1 {
            return Err(TreeError::InvalidArgument("k must be at least 1".into()));
        }
        let mut heap = KnnHeap::new(k);
        if let Some(root) = self.root {
            self.knn_rec(root, query, &mut heap)?;
        }
        Ok(heap.into_sorted())
    }

    fn knn_rec(&self, idx: usize, query: &O, heap: &mut KnnHeap) -> Result<()> {
        let node = &self.nodes[idx];
        let x = self
            .metric
            .distance(query, self.relation.get(node.vantage)?);
        heap.insert(x, node.vantage);

        // Nearer half first tightens the bound before the other half.
        let mut kids: Vec<(f64, usize)> = Vec::with_capacity(2);
        if let Some(left) = node.left {
            kids.push((interval_lb(x, node.left_low, node.left_high), left));
        }
        if let Some(right) = node.right {
            kids.push((interval_lb(x, node.right_low, node.right_high), right));
        }
        kids.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        for (lb, child) in kids {
            if lb <= heap.bound() {
                self.knn_rec(child, query, heap)?;
            }
        }
        Ok(())
    }

    /// Lazy distance-ordered traversal over all objects.
    pub fn priority_search<'a>(&'a self, query: &'a O) -> PrioritySearch<'a, O, M, R> {
        let mut queue = BinaryHeap::new();
        if let Some(root) = self.root {
            queue.push(Candidate {
                key: 0.0,
                payload: PriorityItem::Node(root),
            });
        }
        PrioritySearch {
            tree: self,
            query,
            queue,
        }
    }
}

fn bounds(items: &[Scratch]) -> (f64, f64) {
    let mut low = f64::INFINITY;
    let mut high = f64::NEG_INFINITY;
    for s in items {
        low = low.min(s.dist);
        high = high.max(s.dist);
    }
    (low, high)
}

/// Distance from a value to a closed interval, zero inside it.
fn interval_lb(x: f64, low: f64, high: f64) -> f64 {
    (low - x).max(x - high).max(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PriorityItem {
    Object(ObjectId),
    Node(usize),
}

/// Incremental nearest-neighbor iterator over a [`VpTree`].
pub struct PrioritySearch<'a, O, M, R> {
    tree: &'a VpTree<O, M, R>,
    query: &'a O,
    queue: BinaryHeap<Candidate<PriorityItem>>,
}

impl<O, M: Metric<O>, R: Relation<O>> Iterator for PrioritySearch<'_, O, M, R> {
    type Item = Result<(ObjectId, f64)>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(candidate) = self.queue.pop() {
            match candidate.payload {
                PriorityItem::Object(id) => return Some(Ok((id, candidate.key))),
                PriorityItem::Node(idx) => {
                    let node = &self.tree.nodes[idx];
                    let x = match self.tree.relation.get(node.vantage) {
                        Ok(obj) => self.tree.metric.distance(self.query, obj),
                        Err(e) => return Some(Err(e)),
                    };
                    self.queue.push(Candidate {
                        key: x,
                        payload: PriorityItem::Object(node.vantage),
                    });
                    if let Some(left) = node.left {
                        self.queue.push(Candidate {
                            key: interval_lb(x, node.left_low, node.left_high),
                            payload: PriorityItem::Node(left),
                        });
                    }
                    if let Some(right) = node.right {
                        self.queue.push(Candidate {
                            key: interval_lb(x, node.right_low, node.right_high),
                            payload: PriorityItem::Node(right),
                        });
                    }
                }
            }
        }
        None
    }
}
