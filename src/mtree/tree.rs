//! Disk-backed M-tree implementation.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::marker::PhantomData;
use std::path::Path;

use parking_lot::RwLock;

use crate::distance::Metric;
use crate::error::{Result, TreeError};
use crate::knn::{Candidate, KnnHeap};
use crate::page::{CachedFile, PageId, PageStorage, TreeMeta};
use crate::relation::{ObjectId, Relation};

use super::types::{MDirEntry, MLeafEntry, MNode, MTreeConfig, MTREE_MAGIC};

/// One half of a node split: the seed it gathered around, the covering
/// radius, and the member entries.
struct SplitHalf<T> {
    routing: ObjectId,
    radius: f64,
    items: Vec<T>,
}

enum DescentStep {
    InsertedIntoLeaf(usize),
    Descend(PageId, usize, f64),
}

/// A disk-backed M-tree over arbitrary objects under a metric.
///
/// The tree stores object ids only; objects resolve through the supplied
/// [`Relation`]. Every subtree is summarized by a routing object and a
/// covering radius, and queries prune with the triangle-inequality lower
/// bound `max(0, d(q, routing) - radius)`.
pub struct MTree<O, M, R> {
    file: CachedFile<MNode>,
    meta: RwLock<TreeMeta>,
    config: MTreeConfig,
    metric: M,
    relation: R,
    closed: RwLock<bool>,
    _object: PhantomData<fn() -> O>,
}

impl<O, M: Metric<O>, R: Relation<O>> MTree<O, M, R> {
    /// Create an empty tree at the given path.
    pub fn create(
        path: impl AsRef<Path>,
        config: MTreeConfig,
        metric: M,
        relation: R,
    ) -> Result<Self> {
        config.validate()?;
        let meta = TreeMeta::new(0, config.capacity as u32);
        let storage = PageStorage::create(path.as_ref(), MTREE_MAGIC, config.page_size, &meta)?;
        log::debug!("created m-tree at {:?}", path.as_ref());
        Ok(MTree {
            file: CachedFile::new(storage, config.cache_pages),
            meta: RwLock::new(meta),
            config,
            metric,
            relation,
            closed: RwLock::new(false),
            _object: PhantomData,
        })
    }

    /// Open an existing tree; magic and version are validated and the
    /// persisted fan-out takes precedence over the config.
    pub fn open(
        path: impl AsRef<Path>,
        mut config: MTreeConfig,
        metric: M,
        relation: R,
    ) -> Result<Self> {
        let (storage, meta) = PageStorage::open(path.as_ref(), MTREE_MAGIC)?;
        config.capacity = meta.capacity as usize;
        config.min_fill = config.min_fill.min(config.capacity / 2).max(1);
        config.validate()?;
        log::debug!(
            "opened m-tree at {:?}, entries={}",
            path.as_ref(),
            meta.entry_count
        );
        Ok(MTree {
            file: CachedFile::new(storage, config.cache_pages),
            meta: RwLock::new(meta),
            config,
            metric,
            relation,
            closed: RwLock::new(false),
            _object: PhantomData,
        })
    }

    pub fn len(&self) -> u64 {
        self.meta.read().entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn height(&self) -> u32 {
        self.meta.read().height
    }

    pub fn relation(&self) -> &R {
        &self.relation
    }

    fn check_closed(&self) -> Result<()> {
        if *self.closed.read() {
            Err(TreeError::Closed)
        } else {
            Ok(())
        }
    }

    fn allocate_page(&self) -> PageId {
        let mut meta = self.meta.write();
        let page = meta.next_page_id;
        meta.next_page_id += 1;
        page
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// Index the object with the given id; it must resolve through the
    /// relation.
    pub fn insert(&self, id: ObjectId) -> Result<()> {
        self.check_closed()?;
        let object = self.relation.get(id)?;

        let root = self.meta.read().root_page;
        if root == 0 {
            let page = self.allocate_page();
            self.file.write(
                page,
                MNode::Leaf {
                    entries: vec![MLeafEntry {
                        id,
                        parent_dist: 0.0,
                    }],
                },
            )?;
            let mut meta = self.meta.write();
            meta.root_page = page;
            meta.height = 1;
            meta.entry_count = 1;
            self.file.storage().write_meta(&meta)?;
            return Ok(());
        }

        // Descend to the leaf whose routing object is nearest, enlarging
        // covering radii on the way down.
        let mut path: Vec<(PageId, usize)> = Vec::new();
        let mut page = root;
        let mut parent_dist = 0.0;
        loop {
            let mut node = self.file.read(page)?;
            let step = match &mut node {
                MNode::Leaf { entries } => {
                    entries.push(MLeafEntry { id, parent_dist });
                    DescentStep::InsertedIntoLeaf(entries.len())
                }
                MNode::Directory { children, .. } => {
                    let mut best = 0;
                    let mut best_dist = f64::INFINITY;
                    for (i, c) in children.iter().enumerate() {
                        let d = self.metric.distance(object, self.relation.get(c.routing)?);
                        if d < best_dist {
                            best_dist = d;
                            best = i;
                        }
                    }
                    if children[best].radius < best_dist {
                        children[best].radius = best_dist;
                    }
                    DescentStep::Descend(children[best].page, best, best_dist)
                }
            };
            self.file.write(page, node)?;
            match step {
                DescentStep::InsertedIntoLeaf(len) => {
                    if len > self.config.capacity {
                        self.split_and_propagate(page, &path)?;
                    }
                    break;
                }
                DescentStep::Descend(next, idx, d) => {
                    path.push((page, idx));
                    parent_dist = d;
                    page = next;
                }
            }
        }

        let mut meta = self.meta.write();
        meta.entry_count += 1;
        self.file.storage().write_meta(&meta)?;
        Ok(())
    }

    /// Split an overfull entry list around the two most separated members.
    fn split_entries<T>(
        &self,
        mut items: Vec<T>,
        routing_id: impl Fn(&T) -> ObjectId,
        extra_radius: impl Fn(&T) -> f64,
        set_parent_dist: impl Fn(&mut T, f64),
    ) -> Result<(SplitHalf<T>, SplitHalf<T>)> {
        let n = items.len();
        let mut dist = vec![vec![0.0f64; n]; n];
        for i in 0..n {
            let oi = self.relation.get(routing_id(&items[i]))?;
            for j in i + 1..n {
                let oj = self.relation.get(routing_id(&items[j]))?;
                let d = self.metric.distance(oi, oj);
                dist[i][j] = d;
                dist[j][i] = d;
            }
        }

        // Seeds: the pair at maximum separation.
        let (mut seed_a, mut seed_b, mut best) = (0, 1, f64::NEG_INFINITY);
        for i in 0..n {
            for j in i + 1..n {
                if dist[i][j] > best {
                    best = dist[i][j];
                    seed_a = i;
                    seed_b = j;
                }
            }
        }

        // Assign by proximity; the margin ordering keeps both halves at
        // min_fill without breaking affinity more than needed.
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&x, &y| {
            (dist[x][seed_a] - dist[x][seed_b])
                .partial_cmp(&(dist[y][seed_a] - dist[y][seed_b]))
                .unwrap_or(Ordering::Equal)
        });
        let nearer_a = (0..n).filter(|&i| dist[i][seed_a] <= dist[i][seed_b]).count();
        let k = nearer_a.clamp(self.config.min_fill, n - self.config.min_fill);
        let to_a: HashSet<usize> = order[..k].iter().copied().collect();

        let mut half_a = SplitHalf {
            routing: routing_id(&items[seed_a]),
            radius: 0.0,
            items: Vec::with_capacity(k),
        };
        let mut half_b = SplitHalf {
            routing: routing_id(&items[seed_b]),
            radius: 0.0,
            items: Vec::with_capacity(n - k),
        };
        for (i, mut item) in items.drain(..).enumerate() {
            let (half, d) = if to_a.contains(&i) {
                (&mut half_a, dist[i][seed_a])
            } else {
                (&mut half_b, dist[i][seed_b])
            };
            set_parent_dist(&mut item, d);
            half.radius = half.radius.max(d + extra_radius(&item));
            half.items.push(item);
        }
        Ok((half_a, half_b))
    }

    fn split_and_propagate(&self, page: PageId, path: &[(PageId, usize)]) -> Result<()> {
        let node = self.file.read(page)?;
        let level = node.level();
        let (part_a, part_b) = match node {
            MNode::Leaf { entries } => {
                let (a, b) =
                    self.split_entries(entries, |e| e.id, |_| 0.0, |e, d| e.parent_dist = d)?;
                (
                    (a.routing, a.radius, MNode::Leaf { entries: a.items }),
                    (b.routing, b.radius, MNode::Leaf { entries: b.items }),
                )
            }
            MNode::Directory { children, level } => {
                let (a, b) = self.split_entries(
                    children,
                    |c| c.routing,
                    |c| c.radius,
                    |c, d| c.parent_dist = d,
                )?;
                (
                    (
                        a.routing,
                        a.radius,
                        MNode::Directory {
                            children: a.items,
                            level,
                        },
                    ),
                    (
                        b.routing,
                        b.radius,
                        MNode::Directory {
                            children: b.items,
                            level,
                        },
                    ),
                )
            }
        };
        let (routing_a, radius_a, node_a) = part_a;
        let (routing_b, radius_b, node_b) = part_b;

        let new_page = self.allocate_page();
        self.file.write(page, node_a)?;
        self.file.write(new_page, node_b)?;

        match path.split_last() {
            Some((&(parent_id, child_idx), rest)) => {
                // Distances of the new routing objects to the parent's own
                // routing object, for the parent-distance fields.
                let parent_routing = match rest.split_last() {
                    Some((&(gp_id, gp_idx), _)) => match self.file.read(gp_id)? {
                        MNode::Directory { children, .. } => Some(children[gp_idx].routing),
                        MNode::Leaf { .. } => {
                            return Err(TreeError::Format("leaf node on directory path".into()))
                        }
                    },
                    None => None,
                };
                let (pd_a, pd_b) = match parent_routing {
                    Some(rid) => {
                        let anchor = self.relation.get(rid)?;
                        (
                            self.metric.distance(anchor, self.relation.get(routing_a)?),
                            self.metric.distance(anchor, self.relation.get(routing_b)?),
                        )
                    }
                    None => (0.0, 0.0),
                };

                let mut parent = self.file.read(parent_id)?;
                let len = match &mut parent {
                    MNode::Directory { children, .. } => {
                        children[child_idx] = MDirEntry {
                            routing: routing_a,
                            page,
                            radius: radius_a,
                            parent_dist: pd_a,
                        };
                        children.push(MDirEntry {
                            routing: routing_b,
                            page: new_page,
                            radius: radius_b,
                            parent_dist: pd_b,
                        });
                        children.len()
                    }
                    MNode::Leaf { .. } => {
                        return Err(TreeError::Format("leaf node on directory path".into()))
                    }
                };
                self.file.write(parent_id, parent)?;
                if len > self.config.capacity {
                    self.split_and_propagate(parent_id, rest)
                } else {
                    Ok(())
                }
            }
            None => {
                // Root split: the tree grows by one level.
                let new_root = self.allocate_page();
                self.file.write(
                    new_root,
                    MNode::Directory {
                        children: vec![
                            MDirEntry {
                                routing: routing_a,
                                page,
                                radius: radius_a,
                                parent_dist: 0.0,
                            },
                            MDirEntry {
                                routing: routing_b,
                                page: new_page,
                                radius: radius_b,
                                parent_dist: 0.0,
                            },
                        ],
                        level: level + 1,
                    },
                )?;
                let mut meta = self.meta.write();
                meta.root_page = new_root;
                meta.height += 1;
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// All indexed objects within `radius` of `query`, ascending by
    /// distance and ties by id.
    pub fn range(&self, query: &O, radius: f64) -> Result<Vec<(ObjectId, f64)>> {
        self.check_closed()?;
        if radius < 0.0 {
            return Err(TreeError::InvalidArgument(
                "radius must be non-negative".into(),
            ));
        }
        let root = self.meta.read().root_page;
        if root == 0 {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        self.range_recursive(root, query, radius, None, &mut results)?;
        results.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        Ok(results)
    }

    fn range_recursive(
        &self,
        page: PageId,
        query: &O,
        radius: f64,
        parent_query_dist: Option<f64>,
        results: &mut Vec<(ObjectId, f64)>,
    ) -> Result<()> {
        match self.file.read(page)? {
            MNode::Leaf { entries } => {
                for e in entries {
                    // Triangle inequality on the stored parent distance
                    // saves a distance computation for far entries.
                    if let Some(dp) = parent_query_dist {
                        if (dp - e.parent_dist).abs() > radius {
                            continue;
                        }
                    }
                    let d = self.metric.distance(query, self.relation.get(e.id)?);
                    if d <= radius {
                        results.push((e.id, d));
                    }
                }
            }
            MNode::Directory { children, .. } => {
                for c in children {
                    if let Some(dp) = parent_query_dist {
                        if (dp - c.parent_dist).abs() > radius + c.radius {
                            continue;
                        }
                    }
                    let d = self.metric.distance(query, self.relation.get(c.routing)?);
                    if (d - c.radius).max(0.0) <= radius {
                        self.range_recursive(c.page, query, radius, Some(d), results)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// The `k` nearest indexed objects to `query`, ascending by distance
    /// and ties by id.
    pub fn knn(&self, query: &O, k: usize) -> Result<Vec<(ObjectId, f64)>> {
        self.check_closed()?;
        if k < 1 {
            return Err(TreeError::InvalidArgument("k must be at least 1".into()));
        }
        let root = self.meta.read().root_page;
        if root == 0 {
            return Ok(Vec::new());
        }

        let mut heap = KnnHeap::new(k);
        let mut queue = BinaryHeap::new();
        queue.push(Candidate {
            key: 0.0,
            payload: root,
        });
        while let Some(candidate) = queue.pop() {
            if candidate.key > heap.bound() {
                break;
            }
            match self.file.read(candidate.payload)? {
                MNode::Leaf { entries } => {
                    for e in entries {
                        let d = self.metric.distance(query, self.relation.get(e.id)?);
                        heap.insert(d, e.id);
                    }
                }
                MNode::Directory { children, .. } => {
                    for c in children {
                        let d = self.metric.distance(query, self.relation.get(c.routing)?);
                        let bound = (d - c.radius).max(0.0);
                        if bound <= heap.bound() {
                            queue.push(Candidate {
                                key: bound,
                                payload: c.page,
                            });
                        }
                    }
                }
            }
        }
        Ok(heap.into_sorted())
    }

    /// Lazy distance-ordered traversal over all indexed objects.
    pub fn priority_search<'a>(&'a self, query: &'a O) -> Result<PrioritySearch<'a, O, M, R>> {
        self.check_closed()?;
        let mut queue = BinaryHeap::new();
        let root = self.meta.read().root_page;
        if root != 0 {
            queue.push(Candidate {
                key: 0.0,
                payload: PriorityItem::Node(root),
            });
        }
        Ok(PrioritySearch { tree: self, query, queue })
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    pub fn flush(&self) -> Result<()> {
        self.file.storage().write_meta(&self.meta.read())?;
        self.file.flush()
    }

    pub fn close(&self) -> Result<()> {
        {
            let closed = self.closed.read();
            if *closed {
                return Ok(());
            }
        }
        self.flush()?;
        *self.closed.write() = true;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PriorityItem {
    Object(ObjectId),
    Node(PageId),
}

/// Incremental nearest-neighbor iterator over an M-tree.
pub struct PrioritySearch<'a, O, M, R> {
    tree: &'a MTree<O, M, R>,
    query: &'a O,
    queue: BinaryHeap<Candidate<PriorityItem>>,
}

impl<O, M: Metric<O>, R: Relation<O>> Iterator for PrioritySearch<'_, O, M, R> {
    type Item = Result<(ObjectId, f64)>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(candidate) = self.queue.pop() {
            match candidate.payload {
                PriorityItem::Object(id) => return Some(Ok((id, candidate.key))),
                PriorityItem::Node(page) => {
                    if let Err(e) = self.expand(page) {
                        return Some(Err(e));
                    }
                }
            }
        }
        None
    }
}

impl<O, M: Metric<O>, R: Relation<O>> PrioritySearch<'_, O, M, R> {
    fn expand(&mut self, page: PageId) -> Result<()> {
        match self.tree.file.read(page)? {
            MNode::Leaf { entries } => {
                for e in entries {
                    let d = self
                        .tree
                        .metric
                        .distance(self.query, self.tree.relation.get(e.id)?);
                    self.queue.push(Candidate {
                        key: d,
                        payload: PriorityItem::Object(e.id),
                    });
                }
            }
            MNode::Directory { children, .. } => {
                for c in children {
                    let d = self
                        .tree
                        .metric
                        .distance(self.query, self.tree.relation.get(c.routing)?);
                    self.queue.push(Candidate {
                        key: (d - c.radius).max(0.0),
                        payload: PriorityItem::Node(c.page),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
impl<O, M: Metric<O>, R: Relation<O>> MTree<O, M, R> {
    /// Walk the tree asserting levels, parent distances, and covering
    /// radii; returns the number of entries found.
    fn check_invariants(&self) -> u64 {
        let meta = self.meta.read().clone();
        if meta.root_page == 0 {
            assert_eq!(meta.entry_count, 0);
            return 0;
        }
        let count = self.verify_node(meta.root_page, meta.height - 1, None);
        assert_eq!(count, meta.entry_count, "entry count mismatch");
        count
    }

    fn verify_node(&self, page: PageId, expected_level: u32, routing: Option<ObjectId>) -> u64 {
        let node = self.file.read(page).unwrap();
        assert_eq!(node.level(), expected_level, "level mismatch at page {}", page);
        assert!(node.len() <= self.config.capacity);
        match node {
            MNode::Leaf { entries } => {
                if let Some(rid) = routing {
                    let anchor = self.relation.get(rid).unwrap();
                    for e in &entries {
                        let d = self.metric.distance(anchor, self.relation.get(e.id).unwrap());
                        assert!((d - e.parent_dist).abs() < 1e-9, "stale parent distance");
                    }
                }
                entries.len() as u64
            }
            MNode::Directory { children, .. } => {
                assert!(!children.is_empty());
                let mut count = 0;
                for c in &children {
                    if let Some(rid) = routing {
                        let anchor = self.relation.get(rid).unwrap();
                        let d = self
                            .metric
                            .distance(anchor, self.relation.get(c.routing).unwrap());
                        assert!((d - c.parent_dist).abs() < 1e-9, "stale parent distance");
                    }
                    // Covering radius spans every object in the subtree.
                    let anchor = self.relation.get(c.routing).unwrap();
                    for id in self.collect_ids(c.page) {
                        let d = self.metric.distance(anchor, self.relation.get(id).unwrap());
                        assert!(
                            d <= c.radius + 1e-9,
                            "object {} outside covering radius",
                            id
                        );
                    }
                    count += self.verify_node(c.page, expected_level - 1, Some(c.routing));
                }
                count
            }
        }
    }

    fn collect_ids(&self, page: PageId) -> Vec<ObjectId> {
        match self.file.read(page).unwrap() {
            MNode::Leaf { entries } => entries.iter().map(|e| e.id).collect(),
            MNode::Directory { children, .. } => children
                .iter()
                .flat_map(|c| self.collect_ids(c.page))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::EuclideanVec;
    use crate::relation::VecRelation;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    type TestTree = MTree<Vec<f64>, EuclideanVec, VecRelation<Vec<f64>>>;

    fn small_config() -> MTreeConfig {
        let mut config = MTreeConfig::with_capacity(4);
        config.page_size = 1024;
        config
    }

    fn random_relation(n: usize, seed: u64) -> VecRelation<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        VecRelation::new(
            (0..n)
                .map(|i| {
                    (
                        i as ObjectId,
                        (0..2).map(|_| rng.gen_range(-100.0..100.0)).collect(),
                    )
                })
                .collect(),
        )
    }

    fn build(dir: &tempfile::TempDir, name: &str, relation: VecRelation<Vec<f64>>) -> TestTree {
        let tree = MTree::create(
            dir.path().join(name),
            small_config(),
            EuclideanVec,
            relation,
        )
        .unwrap();
        for id in tree.relation().ids() {
            tree.insert(id).unwrap();
        }
        tree
    }

    fn linear_knn(tree: &TestTree, query: &[f64], k: usize) -> Vec<(ObjectId, f64)> {
        let mut all: Vec<(ObjectId, f64)> = tree
            .relation()
            .ids()
            .into_iter()
            .map(|id| {
                let obj = tree.relation().get(id).unwrap();
                (id, EuclideanVec.distance(&query.to_vec(), obj))
            })
            .collect();
        all.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        all.truncate(k);
        all
    }

    #[test]
    fn test_knn_matches_linear_scan() {
        let dir = tempdir().unwrap();
        let tree = build(&dir, "knn.idx", random_relation(150, 7));

        let mut rng = StdRng::seed_from_u64(8);
        for _ in 0..15 {
            let query: Vec<f64> = (0..2).map(|_| rng.gen_range(-120.0..120.0)).collect();
            let k = rng.gen_range(1..=30);
            let got = tree.knn(&query, k).unwrap();
            let want = linear_knn(&tree, &query, k);
            assert_eq!(got.len(), want.len());
            for (g, w) in got.iter().zip(&want) {
                assert_eq!(g.0, w.0, "query {:?} k {}", query, k);
                assert!((g.1 - w.1).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_range_matches_linear_scan() {
        let dir = tempdir().unwrap();
        let tree = build(&dir, "range.idx", random_relation(120, 17));

        let mut rng = StdRng::seed_from_u64(18);
        for _ in 0..15 {
            let query: Vec<f64> = (0..2).map(|_| rng.gen_range(-100.0..100.0)).collect();
            let radius = rng.gen_range(0.0..80.0);
            let got = tree.range(&query, radius).unwrap();
            let want: Vec<ObjectId> = linear_knn(&tree, &query, 120)
                .into_iter()
                .filter(|(_, d)| *d <= radius)
                .map(|(id, _)| id)
                .collect();
            assert_eq!(got.iter().map(|r| r.0).collect::<Vec<_>>(), want);
        }
    }

    #[test]
    fn test_invariants_after_inserts() {
        let dir = tempdir().unwrap();
        let tree = build(&dir, "inv.idx", random_relation(200, 27));
        assert_eq!(tree.check_invariants(), 200);
        assert!(tree.height() > 1);
    }

    #[test]
    fn test_priority_search_ordering() {
        let dir = tempdir().unwrap();
        let tree = build(&dir, "prio.idx", random_relation(80, 37));

        let query = vec![0.0, 0.0];
        let all: Vec<(ObjectId, f64)> = tree
            .priority_search(&query)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(all.len(), 80);
        for pair in all.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }

        let prefix: Vec<ObjectId> = tree
            .priority_search(&query)
            .unwrap()
            .take(4)
            .map(|r| r.unwrap().0)
            .collect();
        let knn: Vec<ObjectId> = tree.knn(&query, 4).unwrap().iter().map(|r| r.0).collect();
        assert_eq!(prefix, knn);
    }

    #[test]
    fn test_missing_object_is_not_found() {
        let dir = tempdir().unwrap();
        let tree: TestTree = MTree::create(
            dir.path().join("nf.idx"),
            small_config(),
            EuclideanVec,
            random_relation(10, 47),
        )
        .unwrap();
        assert!(matches!(tree.insert(999), Err(TreeError::NotFound(999))));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persist.idx");
        {
            let tree = build(&dir, "persist.idx", random_relation(60, 57));
            tree.close().unwrap();
        }
        let tree: TestTree = MTree::open(
            &path,
            small_config(),
            EuclideanVec,
            random_relation(60, 57),
        )
        .unwrap();
        assert_eq!(tree.len(), 60);
        let probe = tree.relation().get(3).unwrap().clone();
        let got = tree.knn(&probe, 1).unwrap();
        assert_eq!(got[0].0, 3);
        assert!(got[0].1 < 1e-12);
        tree.check_invariants();
    }

    #[test]
    fn test_invalid_arguments_rejected() {
        let dir = tempdir().unwrap();
        let tree = build(&dir, "bad.idx", random_relation(10, 67));
        assert!(matches!(
            tree.knn(&vec![0.0, 0.0], 0),
            Err(TreeError::InvalidArgument(_))
        ));
        assert!(matches!(
            tree.range(&vec![0.0, 0.0], -0.5),
            Err(TreeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_empty_tree_queries() {
        let dir = tempdir().unwrap();
        let tree: TestTree = MTree::create(
            dir.path().join("empty.idx"),
            small_config(),
            EuclideanVec,
            VecRelation::new(vec![]),
        )
        .unwrap();
        assert!(tree.knn(&vec![0.0, 0.0], 2).unwrap().is_empty());
        assert!(tree.range(&vec![0.0, 0.0], 5.0).unwrap().is_empty());
    }
}
