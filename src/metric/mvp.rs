//! In-memory multi-vantage-point trees: GNAT and a fixed-fanout variant.
//!
//! An inner node holds several vantage points chosen by farthest-point
//! sampling; every object goes to the partition of its nearest vantage
//! point, and the node records the distance interval from each vantage
//! point to each partition. A query computes its distance to every
//! vantage point once and prunes a partition as soon as one interval
//! rules it out. [`Gnat`] scales the fanout with partition size,
//! [`MvpTree`] keeps it fixed.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::marker::PhantomData;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::distance::Metric;
use crate::error::{Result, TreeError};
use crate::knn::{Candidate, KnnHeap};
use crate::relation::{ObjectId, Relation};

/// Largest fanout a partition may be assigned when scaling.
const MAX_FANOUT: usize = 200;

/// Build parameters of a [`Gnat`].
#[derive(Debug, Clone)]
pub struct GnatConfig {
    /// Vantage points per node at the root; partitions scale it by their
    /// share of the objects.
    pub fan_out: usize,
    /// Partitions at most this large become leaves.
    pub leaf_size: usize,
    /// Candidate sample size for vantage point selection.
    pub sample_size: usize,
    pub seed: u64,
}

impl Default for GnatConfig {
    fn default() -> Self {
        GnatConfig {
            fan_out: 8,
            leaf_size: 10,
            sample_size: 10,
            seed: 0,
        }
    }
}

/// Build parameters of a [`MvpTree`].
#[derive(Debug, Clone)]
pub struct MvpTreeConfig {
    /// Vantage points per inner node, the same at every level.
    pub fan_out: usize,
    pub leaf_size: usize,
    pub sample_size: usize,
    pub seed: u64,
}

impl Default for MvpTreeConfig {
    fn default() -> Self {
        MvpTreeConfig {
            fan_out: 4,
            leaf_size: 10,
            sample_size: 10,
            seed: 0,
        }
    }
}

struct MultiChild {
    node: usize,
    /// Per vantage point, the tightest interval covering the distances
    /// from that vantage point to every object of this partition.
    lower: Vec<f64>,
    upper: Vec<f64>,
}

enum MultiNode {
    Leaf {
        ids: Vec<ObjectId>,
    },
    Inner {
        vantage: Vec<ObjectId>,
        children: Vec<MultiChild>,
    },
}

struct MultiVpCore<O, M, R> {
    metric: M,
    relation: R,
    nodes: Vec<MultiNode>,
    root: Option<usize>,
    size: usize,
    leaf_size: usize,
    sample_size: usize,
    /// When set, a partition's fanout is proportional to its share of
    /// the parent's objects; otherwise the parent fanout carries over.
    scale_fanout: bool,
    _object: PhantomData<fn() -> O>,
}

impl<O, M: Metric<O>, R: Relation<O>> MultiVpCore<O, M, R> {
    fn build(
        metric: M,
        relation: R,
        fan_out: usize,
        leaf_size: usize,
        sample_size: usize,
        seed: u64,
        scale_fanout: bool,
    ) -> Result<Self> {
        if fan_out < 2 {
            return Err(TreeError::InvalidArgument(
                "fan_out must be at least 2".into(),
            ));
        }
        let ids = relation.ids();
        let size = ids.len();
        let mut core = MultiVpCore {
            metric,
            relation,
            nodes: Vec::new(),
            root: None,
            size,
            leaf_size: leaf_size.max(1),
            sample_size: sample_size.max(2),
            scale_fanout,
            _object: PhantomData,
        };
        if !ids.is_empty() {
            let mut rng = StdRng::seed_from_u64(seed);
            let root = core.build_node(ids, fan_out, &mut rng)?;
            core.root = Some(root);
        }
        log::debug!("built multi-vantage-point tree over {} objects", size);
        Ok(core)
    }

    fn build_node(&mut self, items: Vec<ObjectId>, k: usize, rng: &mut StdRng) -> Result<usize> {
        if items.len() <= self.leaf_size || items.len() <= k {
            self.nodes.push(MultiNode::Leaf { ids: items });
            return Ok(self.nodes.len() - 1);
        }

        let vp_ids = self.pick_vantage_points(&items, k, rng)?;
        // Fewer than two distinct objects: no split possible.
        if vp_ids.len() < 2 {
            self.nodes.push(MultiNode::Leaf { ids: items });
            return Ok(self.nodes.len() - 1);
        }
        let k = vp_ids.len();

        let mut buckets: Vec<Vec<ObjectId>> = vec![Vec::new(); k];
        let mut lower = vec![vec![f64::INFINITY; k]; k];
        let mut upper = vec![vec![f64::NEG_INFINITY; k]; k];
        for &id in &items {
            let mut dists = Vec::with_capacity(k);
            {
                let obj = self.relation.get(id)?;
                for &vid in &vp_ids {
                    dists.push(self.metric.distance(obj, self.relation.get(vid)?));
                }
            }
            let mut best = 0;
            for j in 1..k {
                if dists[j] < dists[best] {
                    best = j;
                }
            }
            for j in 0..k {
                lower[best][j] = lower[best][j].min(dists[j]);
                upper[best][j] = upper[best][j].max(dists[j]);
            }
            buckets[best].push(id);
        }

        // Every vantage point lands in its own partition, so all buckets
        // are proper subsets unless the data is fully degenerate.
        if buckets.iter().any(|b| b.len() == items.len()) {
            self.nodes.push(MultiNode::Leaf { ids: items });
            return Ok(self.nodes.len() - 1);
        }

        let total = items.len();
        let mut children = Vec::with_capacity(k);
        for (j, bucket) in buckets.into_iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            let next_k = if self.scale_fanout {
                let scaled = (k * k) as f64 * bucket.len() as f64 / total as f64;
                (scaled.round() as usize).clamp(2, MAX_FANOUT)
            } else {
                k
            };
            let node = self.build_node(bucket, next_k, rng)?;
            children.push(MultiChild {
                node,
                lower: std::mem::take(&mut lower[j]),
                upper: std::mem::take(&mut upper[j]),
            });
        }
        self.nodes.push(MultiNode::Inner {
            vantage: vp_ids,
            children,
        });
        Ok(self.nodes.len() - 1)
    }

    /// Farthest-point sampling over a random candidate set: the first
    /// candidate seeds the set, then each round adds the candidate with
    /// the largest distance to its nearest chosen vantage point.
    fn pick_vantage_points(
        &self,
        items: &[ObjectId],
        k: usize,
        rng: &mut StdRng,
    ) -> Result<Vec<ObjectId>> {
        let s = self.sample_size.max(k).min(items.len());
        let candidates = rand::seq::index::sample(rng, items.len(), s).into_vec();
        let mut chosen = vec![candidates[0]];
        while chosen.len() < k {
            let mut best = None;
            let mut best_d = 0.0;
            for &c in &candidates {
                if chosen.contains(&c) {
                    continue;
                }
                let cobj = self.relation.get(items[c])?;
                let mut nearest = f64::INFINITY;
                for &v in &chosen {
                    nearest = nearest.min(self.metric.distance(cobj, self.relation.get(items[v])?));
                }
                if nearest > best_d {
                    best_d = nearest;
                    best = Some(c);
                }
            }
            // Only duplicates left: adding them gains nothing.
            match best {
                Some(c) => chosen.push(c),
                None => break,
            }
        }
        Ok(chosen.into_iter().map(|i| items[i]).collect())
    }

    fn range(&self, query: &O, radius: f64) -> Result<Vec<(ObjectId, f64)>> {
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
        match &self.nodes[idx] {
            MultiNode::Leaf { ids } => {
                for &id in ids {
                    let d = self.metric.distance(query, self.relation.get(id)?);
                    if d <= radius {
                        results.push((id, d));
                    }
                }
            }
            MultiNode::Inner { vantage, children } => {
                let x = self.vantage_distances(query, vantage)?;
                for child in children {
                    let pruned = (0..x.len())
                        .any(|j| x[j] < child.lower[j] - radius || x[j] > child.upper[j] + radius);
                    if !pruned {
                        self.range_rec(child.node, query, radius, results)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn knn(&self, query: &O, k: usize) -> Result<Vec<(ObjectId, f64)>> {
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
        match &self.nodes[idx] {
            MultiNode::Leaf { ids } => {
                for &id in ids {
                    let d = self.metric.distance(query, self.relation.get(id)?);
                    heap.insert(d, id);
                }
            }
            MultiNode::Inner { vantage, children } => {
                let x = self.vantage_distances(query, vantage)?;
                let mut order: Vec<(f64, usize)> = children
                    .iter()
                    .map(|c| (child_lb(&x, c), c.node))
                    .collect();
                order.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
                for (lb, node) in order {
                    if lb <= heap.bound() {
                        self.knn_rec(node, query, heap)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn vantage_distances(&self, query: &O, vantage: &[ObjectId]) -> Result<Vec<f64>> {
        let mut x = Vec::with_capacity(vantage.len());
        for &vid in vantage {
            x.push(self.metric.distance(query, self.relation.get(vid)?));
        }
        Ok(x)
    }
}

/// Largest lower bound any vantage point gives on the distance from the
/// query to an object of the partition.
fn child_lb(x: &[f64], child: &MultiChild) -> f64 {
    let mut lb: f64 = 0.0;
    for j in 0..x.len() {
        lb = lb.max(child.lower[j] - x[j]).max(x[j] - child.upper[j]);
    }
    lb
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PriorityItem {
    Object(ObjectId),
    Node(usize),
}

/// Incremental nearest-neighbor iterator shared by [`Gnat`] and
/// [`MvpTree`].
pub struct PrioritySearch<'a, O, M, R> {
    core: &'a MultiVpCore<O, M, R>,
    query: &'a O,
    queue: BinaryHeap<Candidate<PriorityItem>>,
}

impl<'a, O, M: Metric<O>, R: Relation<O>> PrioritySearch<'a, O, M, R> {
    fn new(core: &'a MultiVpCore<O, M, R>, query: &'a O) -> Self {
        let mut queue = BinaryHeap::new();
        if let Some(root) = core.root {
            queue.push(Candidate {
                key: 0.0,
                payload: PriorityItem::Node(root),
            });
        }
        PrioritySearch { core, query, queue }
    }

    fn expand(&mut self, idx: usize) -> Result<()> {
        match &self.core.nodes[idx] {
            MultiNode::Leaf { ids } => {
                for &id in ids {
                    let d = self
                        .core
                        .metric
                        .distance(self.query, self.core.relation.get(id)?);
                    self.queue.push(Candidate {
                        key: d,
                        payload: PriorityItem::Object(id),
                    });
                }
            }
            MultiNode::Inner { vantage, children } => {
                let x = self.core.vantage_distances(self.query, vantage)?;
                for child in children {
                    self.queue.push(Candidate {
                        key: child_lb(&x, child),
                        payload: PriorityItem::Node(child.node),
                    });
                }
            }
        }
        Ok(())
    }
}

impl<O, M: Metric<O>, R: Relation<O>> Iterator for PrioritySearch<'_, O, M, R> {
    type Item = Result<(ObjectId, f64)>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(candidate) = self.queue.pop() {
            match candidate.payload {
                PriorityItem::Object(id) => return Some(Ok((id, candidate.key))),
                PriorityItem::Node(idx) => {
                    if let Err(e) = self.expand(idx) {
                        return Some(Err(e));
                    }
                }
            }
        }
        None
    }
}

/// Geometric near-neighbor access tree: multi-vantage-point index whose
/// fanout grows with partition size.
pub struct Gnat<O, M, R> {
    core: MultiVpCore<O, M, R>,
}

impl<O, M: Metric<O>, R: Relation<O>> Gnat<O, M, R> {
    pub fn build(metric: M, relation: R, config: GnatConfig) -> Result<Self> {
        let core = MultiVpCore::build(
            metric,
            relation,
            config.fan_out,
            config.leaf_size,
            config.sample_size,
            config.seed,
            true,
        )?;
        Ok(Gnat { core })
    }

    pub fn len(&self) -> usize {
        self.core.size
    }

    pub fn is_empty(&self) -> bool {
        self.core.size == 0
    }

    pub fn range(&self, query: &O, radius: f64) -> Result<Vec<(ObjectId, f64)>> {
        self.core.range(query, radius)
    }

    pub fn knn(&self, query: &O, k: usize) -> Result<Vec<(ObjectId, f64)>> {
        self.core.knn(query, k)
    }

    pub fn priority_search<'a>(&'a self, query: &'a O) -> PrioritySearch<'a, O, M, R> {
        PrioritySearch::new(&self.core, query)
    }
}

/// Multi-vantage-point tree with the same fanout at every level.
pub struct MvpTree<O, M, R> {
    core: MultiVpCore<O, M, R>,
}

impl<O, M: Metric<O>, R: Relation<O>> MvpTree<O, M, R> {
    pub fn build(metric: M, relation: R, config: MvpTreeConfig) -> Result<Self> {
        let core = MultiVpCore::build(
            metric,
            relation,
            config.fan_out,
            config.leaf_size,
            config.sample_size,
            config.seed,
            false,
        )?;
        Ok(MvpTree { core })
    }

    pub fn len(&self) -> usize {
        self.core.size
    }

    pub fn is_empty(&self) -> bool {
        self.core.size == 0
    }

    pub fn range(&self, query: &O, radius: f64) -> Result<Vec<(ObjectId, f64)>> {
        self.core.range(query, radius)
    }

    pub fn knn(&self, query: &O, k: usize) -> Result<Vec<(ObjectId, f64)>> {
        self.core.knn(query, k)
    }

    pub fn priority_search<'a>(&'a self, query: &'a O) -> PrioritySearch<'a, O, M, R> {
        PrioritySearch::new(&self.core, query)
    }
}
