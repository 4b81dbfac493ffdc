//! Disk-backed R*-tree implementation.

use std::collections::{BinaryHeap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::distance::{Euclidean, SpatialDistance};
use crate::error::{Result, TreeError};
use crate::knn::{Candidate, KnnHeap};
use crate::mbr::Mbr;
use crate::page::{CacheStats, CachedFile, PageId, PageStorage, TreeMeta};
use crate::relation::ObjectId;

use super::bulk::str_groups;
use super::split::topological_split;
use super::types::{DirEntry, LeafEntry, Node, OverflowStrategy, RStarConfig, RSTAR_MAGIC};

/// Counters and shape of a tree, for diagnostics.
#[derive(Debug, Clone)]
pub struct TreeStats {
    pub entries: u64,
    pub height: u32,
    /// Overflow treatments since open: reinsertion passes and node splits.
    pub reinsertions: u64,
    pub splits: u64,
    pub cache: CacheStats,
}

/// Per-top-level-insert overflow bookkeeping: levels that already spent
/// their one reinsertion.
#[derive(Default)]
struct OpState {
    reinserted: HashSet<u32>,
}

/// An entry travelling through insertion, either a fresh point or a
/// subtree reference displaced by reinsertion.
enum InsertItem {
    Leaf(LeafEntry),
    Dir(DirEntry),
}

/// A disk-backed R*-tree over fixed-dimensional points.
///
/// Nodes live in a page file behind an LRU cache; a query loads only the
/// pages its pruning bound cannot exclude. The distance function is fixed
/// at construction and may work in a transformed domain (see
/// [`SpatialDistance::restore`]).
pub struct RStarTree<D: SpatialDistance = Euclidean> {
    file: CachedFile<Node>,
    meta: RwLock<TreeMeta>,
    config: RStarConfig,
    distance: D,
    closed: RwLock<bool>,
    reinsertions: AtomicU64,
    splits: AtomicU64,
}

impl<D: SpatialDistance + Default> RStarTree<D> {
    /// Create an empty tree at the given path.
    pub fn create(path: impl AsRef<Path>, dims: usize, config: RStarConfig) -> Result<Self> {
        Self::create_with_distance(path, dims, config, D::default())
    }

    /// Open an existing tree; the file header's magic and version are
    /// validated, and the persisted fan-out and dimensionality take
    /// precedence over the config.
    pub fn open(path: impl AsRef<Path>, config: RStarConfig) -> Result<Self> {
        Self::open_with_distance(path, config, D::default())
    }

    /// Build a tree from a full entry set using sort-tile-recursive
    /// packing. Much faster than repeated insertion and yields better
    /// node separation; each node is written exactly once.
    pub fn bulk_load(
        path: impl AsRef<Path>,
        dims: usize,
        config: RStarConfig,
        entries: impl IntoIterator<Item = (Vec<f64>, ObjectId)>,
    ) -> Result<Self> {
        Self::bulk_load_with_distance(path, dims, config, D::default(), entries)
    }
}

impl<D: SpatialDistance> RStarTree<D> {
    pub fn create_with_distance(
        path: impl AsRef<Path>,
        dims: usize,
        config: RStarConfig,
        distance: D,
    ) -> Result<Self> {
        config.validate()?;
        if dims == 0 {
            return Err(TreeError::InvalidArgument(
                "dimensionality must be at least 1".into(),
            ));
        }
        let meta = TreeMeta::new(dims as u32, config.capacity as u32);
        let storage = PageStorage::create(path.as_ref(), RSTAR_MAGIC, config.page_size, &meta)?;
        log::debug!("created r*-tree at {:?}, dims={}", path.as_ref(), dims);
        Ok(RStarTree {
            file: CachedFile::new(storage, config.cache_pages),
            meta: RwLock::new(meta),
            config,
            distance,
            closed: RwLock::new(false),
            reinsertions: AtomicU64::new(0),
            splits: AtomicU64::new(0),
        })
    }

    pub fn open_with_distance(
        path: impl AsRef<Path>,
        mut config: RStarConfig,
        distance: D,
    ) -> Result<Self> {
        let (storage, meta) = PageStorage::open(path.as_ref(), RSTAR_MAGIC)?;
        config.capacity = meta.capacity as usize;
        config.min_fill = config.min_fill.min(config.capacity / 2).max(1);
        config.validate()?;
        log::debug!(
            "opened r*-tree at {:?}, entries={}, height={}",
            path.as_ref(),
            meta.entry_count,
            meta.height
        );
        Ok(RStarTree {
            file: CachedFile::new(storage, config.cache_pages),
            meta: RwLock::new(meta),
            config,
            distance,
            closed: RwLock::new(false),
            reinsertions: AtomicU64::new(0),
            splits: AtomicU64::new(0),
        })
    }

    pub fn bulk_load_with_distance(
        path: impl AsRef<Path>,
        dims: usize,
        config: RStarConfig,
        distance: D,
        entries: impl IntoIterator<Item = (Vec<f64>, ObjectId)>,
    ) -> Result<Self> {
        let tree = Self::create_with_distance(path, dims, config, distance)?;

        let mut items = Vec::new();
        for (point, id) in entries {
            if point.len() != dims {
                return Err(TreeError::InvalidArgument(format!(
                    "entry dimensionality {} does not match tree dimensionality {}",
                    point.len(),
                    dims
                )));
            }
            items.push(LeafEntry { id, point });
        }
        if items.is_empty() {
            return Ok(tree);
        }
        let total = items.len() as u64;

        // Leaf level.
        let groups = str_groups(items, dims, tree.config.capacity, |e| e.point.clone());
        let mut current: Vec<DirEntry> = Vec::with_capacity(groups.len());
        for group in groups {
            let page = tree.allocate_page();
            let node = Node::Leaf { entries: group };
            current.push(DirEntry {
                mbr: node.compute_mbr(dims),
                page,
            });
            tree.file.write(page, node)?;
        }

        // Directory levels, bottom up.
        let mut level = 1u32;
        while current.len() > tree.config.capacity {
            let groups = str_groups(current, dims, tree.config.capacity, |c| c.mbr.center());
            let mut next = Vec::with_capacity(groups.len());
            for group in groups {
                let page = tree.allocate_page();
                let node = Node::Directory {
                    children: group,
                    level,
                };
                next.push(DirEntry {
                    mbr: node.compute_mbr(dims),
                    page,
                });
                tree.file.write(page, node)?;
            }
            current = next;
            level += 1;
        }

        let (root_page, root_level) = if current.len() == 1 && level == 1 {
            (current[0].page, 0)
        } else {
            let page = tree.allocate_page();
            tree.file.write(
                page,
                Node::Directory {
                    children: current,
                    level,
                },
            )?;
            (page, level)
        };

        {
            let mut meta = tree.meta.write();
            meta.root_page = root_page;
            meta.height = root_level + 1;
            meta.entry_count = total;
        }
        tree.flush()?;
        log::debug!("bulk loaded {} entries, height {}", total, root_level + 1);
        Ok(tree)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn len(&self) -> u64 {
        self.meta.read().entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn height(&self) -> u32 {
        self.meta.read().height
    }

    pub fn dims(&self) -> usize {
        self.meta.read().dims as usize
    }

    pub fn stats(&self) -> TreeStats {
        let meta = self.meta.read();
        TreeStats {
            entries: meta.entry_count,
            height: meta.height,
            reinsertions: self.reinsertions.load(Ordering::Relaxed),
            splits: self.splits.load(Ordering::Relaxed),
            cache: self.file.stats(),
        }
    }

    fn check_closed(&self) -> Result<()> {
        if *self.closed.read() {
            Err(TreeError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_dims(&self, point: &[f64]) -> Result<()> {
        let dims = self.dims();
        if point.len() != dims {
            return Err(TreeError::InvalidArgument(format!(
                "query dimensionality {} does not match tree dimensionality {}",
                point.len(),
                dims
            )));
        }
        Ok(())
    }

    fn allocate_page(&self) -> PageId {
        let mut meta = self.meta.write();
        let page = meta.next_page_id;
        meta.next_page_id += 1;
        page
    }

    fn node_mbr(&self, page: PageId) -> Result<Mbr> {
        let dims = self.dims();
        Ok(self.file.read(page)?.compute_mbr(dims))
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// Insert a point with its object id.
    pub fn insert(&self, point: &[f64], id: ObjectId) -> Result<()> {
        self.check_closed()?;
        self.check_dims(point)?;
        let entry = LeafEntry {
            id,
            point: point.to_vec(),
        };

        let root = self.meta.read().root_page;
        if root == 0 {
            let page = self.allocate_page();
            self.file.write(
                page,
                Node::Leaf {
                    entries: vec![entry],
                },
            )?;
            let mut meta = self.meta.write();
            meta.root_page = page;
            meta.height = 1;
            meta.entry_count = 1;
            self.file.storage().write_meta(&meta)?;
            return Ok(());
        }

        let mut op = OpState::default();
        self.insert_item(InsertItem::Leaf(entry), 0, &mut op)?;

        let mut meta = self.meta.write();
        meta.entry_count += 1;
        self.file.storage().write_meta(&meta)?;
        Ok(())
    }

    /// Insert an item into a node of the given level, splitting or
    /// reinserting on overflow.
    fn insert_item(&self, item: InsertItem, target_level: u32, op: &mut OpState) -> Result<()> {
        let item_mbr = match &item {
            InsertItem::Leaf(e) => Mbr::from_point(&e.point),
            InsertItem::Dir(c) => c.mbr.clone(),
        };

        // Descend by minimum enlargement, ties by smaller area.
        let mut path: Vec<(PageId, usize)> = Vec::new();
        let mut page = self.meta.read().root_page;
        let mut node = self.file.read(page)?;
        while node.level() > target_level {
            let children = match &node {
                Node::Directory { children, .. } => children,
                Node::Leaf { .. } => {
                    return Err(TreeError::Format(
                        "leaf encountered above target level".into(),
                    ))
                }
            };
            let mut best_idx = 0;
            let mut best_enlargement = f64::INFINITY;
            let mut best_area = f64::INFINITY;
            for (i, child) in children.iter().enumerate() {
                let enlargement = child.mbr.enlargement(&item_mbr);
                let area = child.mbr.area();
                if enlargement < best_enlargement
                    || (enlargement == best_enlargement && area < best_area)
                {
                    best_enlargement = enlargement;
                    best_area = area;
                    best_idx = i;
                }
            }
            path.push((page, best_idx));
            page = children[best_idx].page;
            node = self.file.read(page)?;
        }

        match (&mut node, item) {
            (Node::Leaf { entries }, InsertItem::Leaf(e)) => entries.push(e),
            (Node::Directory { children, .. }, InsertItem::Dir(c)) => children.push(c),
            _ => {
                return Err(TreeError::Format(
                    "item kind does not match node kind".into(),
                ))
            }
        }
        let overflow = node.len() > self.config.capacity;
        self.file.write(page, node)?;

        if overflow {
            self.handle_overflow(page, &path, op)
        } else {
            self.adjust_path(&path)
        }
    }

    fn handle_overflow(&self, page: PageId, path: &[(PageId, usize)], op: &mut OpState) -> Result<()> {
        let level = self.file.read(page)?.level();
        let reinsert = match self.config.overflow {
            OverflowStrategy::LimitedReinsert { fraction }
                if !path.is_empty() && op.reinserted.insert(level) =>
            {
                Some(fraction)
            }
            _ => None,
        };
        match reinsert {
            Some(fraction) => self.reinsert(page, path, fraction, op),
            None => self.split_and_propagate(page, path, op),
        }
    }

    /// Remove the entries farthest from the node center and push them back
    /// in from the root.
    fn reinsert(
        &self,
        page: PageId,
        path: &[(PageId, usize)],
        fraction: f64,
        op: &mut OpState,
    ) -> Result<()> {
        self.reinsertions.fetch_add(1, Ordering::Relaxed);
        let dims = self.dims();
        let mut node = self.file.read(page)?;
        let level = node.level();
        let center = node.compute_mbr(dims).center();
        let count = ((node.len() as f64) * fraction).ceil() as usize;
        let count = count.clamp(1, node.len() - self.config.min_fill);

        let removed: Vec<InsertItem> = match &mut node {
            Node::Leaf { entries } => {
                let mut order: Vec<usize> = (0..entries.len()).collect();
                order.sort_by(|&a, &b| {
                    let da = center_dist_sq(&entries[a].point, &center);
                    let db = center_dist_sq(&entries[b].point, &center);
                    db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal)
                });
                let far: HashSet<usize> = order.into_iter().take(count).collect();
                let mut kept = Vec::with_capacity(entries.len() - count);
                let mut out = Vec::with_capacity(count);
                for (i, e) in entries.drain(..).enumerate() {
                    if far.contains(&i) {
                        out.push(InsertItem::Leaf(e));
                    } else {
                        kept.push(e);
                    }
                }
                *entries = kept;
                out
            }
            Node::Directory { children, .. } => {
                let mut order: Vec<usize> = (0..children.len()).collect();
                order.sort_by(|&a, &b| {
                    let da = center_dist_sq(&children[a].mbr.center(), &center);
                    let db = center_dist_sq(&children[b].mbr.center(), &center);
                    db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal)
                });
                let far: HashSet<usize> = order.into_iter().take(count).collect();
                let mut kept = Vec::with_capacity(children.len() - count);
                let mut out = Vec::with_capacity(count);
                for (i, c) in children.drain(..).enumerate() {
                    if far.contains(&i) {
                        out.push(InsertItem::Dir(c));
                    } else {
                        kept.push(c);
                    }
                }
                *children = kept;
                out
            }
        };

        self.file.write(page, node)?;
        self.adjust_path(path)?;
        for item in removed {
            self.insert_item(item, level, op)?;
        }
        Ok(())
    }

    fn split_and_propagate(
        &self,
        page: PageId,
        path: &[(PageId, usize)],
        op: &mut OpState,
    ) -> Result<()> {
        self.splits.fetch_add(1, Ordering::Relaxed);
        let dims = self.dims();
        let node = self.file.read(page)?;
        let level = node.level();
        let (kept, split_off) = match node {
            Node::Leaf { entries } => {
                let (a, b) = topological_split(entries, self.config.min_fill);
                (Node::Leaf { entries: a }, Node::Leaf { entries: b })
            }
            Node::Directory { children, level } => {
                let (a, b) = topological_split(children, self.config.min_fill);
                (
                    Node::Directory { children: a, level },
                    Node::Directory { children: b, level },
                )
            }
        };

        let new_page = self.allocate_page();
        let new_mbr = split_off.compute_mbr(dims);
        self.file.write(page, kept)?;
        self.file.write(new_page, split_off)?;

        match path.split_last() {
            Some((&(parent_id, child_idx), rest)) => {
                let mut parent = self.file.read(parent_id)?;
                let len = match &mut parent {
                    Node::Directory { children, .. } => {
                        children[child_idx].mbr = self.node_mbr(children[child_idx].page)?;
                        children.push(DirEntry {
                            mbr: new_mbr,
                            page: new_page,
                        });
                        children.len()
                    }
                    Node::Leaf { .. } => {
                        return Err(TreeError::Format("leaf node on directory path".into()))
                    }
                };
                self.file.write(parent_id, parent)?;
                if len > self.config.capacity {
                    self.handle_overflow(parent_id, rest, op)
                } else {
                    self.adjust_path(rest)
                }
            }
            None => {
                // Root split: the tree grows by one level.
                let old_root_mbr = self.node_mbr(page)?;
                let new_root_page = self.allocate_page();
                self.file.write(
                    new_root_page,
                    Node::Directory {
                        children: vec![
                            DirEntry {
                                mbr: old_root_mbr,
                                page,
                            },
                            DirEntry {
                                mbr: new_mbr,
                                page: new_page,
                            },
                        ],
                        level: level + 1,
                    },
                )?;
                let mut meta = self.meta.write();
                meta.root_page = new_root_page;
                meta.height += 1;
                Ok(())
            }
        }
    }

    /// Recompute ancestor boxes bottom-up so every parent covers its
    /// subtree again.
    fn adjust_path(&self, path: &[(PageId, usize)]) -> Result<()> {
        for &(parent_id, child_idx) in path.iter().rev() {
            let mut parent = self.file.read(parent_id)?;
            if let Node::Directory {
                ref mut children, ..
            } = parent
            {
                children[child_idx].mbr = self.node_mbr(children[child_idx].page)?;
            }
            self.file.write(parent_id, parent)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------

    /// Remove one entry matching point and id; returns whether a match
    /// was found.
    pub fn remove(&self, point: &[f64], id: ObjectId) -> Result<bool> {
        self.check_closed()?;
        self.check_dims(point)?;
        let root = self.meta.read().root_page;
        if root == 0 {
            return Ok(false);
        }

        let removed = self.remove_recursive(root, point, id)?;
        if removed {
            let mut meta = self.meta.write();
            meta.entry_count = meta.entry_count.saturating_sub(1);

            let root_node = self.file.read(meta.root_page)?;
            match &root_node {
                Node::Directory { children, .. } if children.len() == 1 => {
                    meta.root_page = children[0].page;
                    meta.height = meta.height.saturating_sub(1);
                }
                Node::Leaf { entries } if entries.is_empty() => {
                    meta.root_page = 0;
                    meta.height = 0;
                }
                _ => {}
            }
            self.file.storage().write_meta(&meta)?;
        }
        Ok(removed)
    }

    fn remove_recursive(&self, page: PageId, point: &[f64], id: ObjectId) -> Result<bool> {
        let mut node = self.file.read(page)?;
        match &mut node {
            Node::Leaf { entries } => {
                let before = entries.len();
                entries.retain(|e| !(e.id == id && e.point == point));
                if entries.len() < before {
                    self.file.write(page, node)?;
                    return Ok(true);
                }
                Ok(false)
            }
            Node::Directory { children, .. } => {
                for i in 0..children.len() {
                    if children[i].mbr.contains_point(point)
                        && self.remove_recursive(children[i].page, point, id)?
                    {
                        let child = self.file.read(children[i].page)?;
                        if child.is_empty() {
                            children.remove(i);
                        } else {
                            children[i].mbr = child.compute_mbr(self.dims());
                        }
                        self.file.write(page, node)?;
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// All entries within `radius` of `query`, ascending by distance and
    /// ties by id.
    pub fn range(&self, query: &[f64], radius: f64) -> Result<Vec<(ObjectId, f64)>> {
        self.check_closed()?;
        self.check_dims(query)?;
        if radius < 0.0 {
            return Err(TreeError::InvalidArgument(
                "radius must be non-negative".into(),
            ));
        }
        let root = self.meta.read().root_page;
        if root == 0 {
            return Ok(Vec::new());
        }

        let tau = self.distance.internalize(radius);
        let mut results = Vec::new();
        self.range_recursive(root, query, tau, &mut results)?;
        results.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        for r in &mut results {
            r.1 = self.distance.restore(r.1);
        }
        Ok(results)
    }

    fn range_recursive(
        &self,
        page: PageId,
        query: &[f64],
        tau: f64,
        results: &mut Vec<(ObjectId, f64)>,
    ) -> Result<()> {
        match self.file.read(page)? {
            Node::Leaf { entries } => {
                for e in entries {
                    let d = self.distance.distance(&e.point, query);
                    if d <= tau {
                        results.push((e.id, d));
                    }
                }
            }
            Node::Directory { children, .. } => {
                for c in children {
                    if self.distance.min_dist(&c.mbr, query) <= tau {
                        self.range_recursive(c.page, query, tau, results)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// The `k` nearest entries to `query`, ascending by distance and ties
    /// by id; fewer when the tree holds fewer entries.
    pub fn knn(&self, query: &[f64], k: usize) -> Result<Vec<(ObjectId, f64)>> {
        self.check_closed()?;
        self.check_dims(query)?;
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
                Node::Leaf { entries } => {
                    for e in entries {
                        heap.insert(self.distance.distance(&e.point, query), e.id);
                    }
                }
                Node::Directory { children, .. } => {
                    for c in children {
                        let bound = self.distance.min_dist(&c.mbr, query);
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
        Ok(heap
            .into_sorted()
            .into_iter()
            .map(|(id, d)| (id, self.distance.restore(d)))
            .collect())
    }

    /// Lazy distance-ordered traversal: entries come out in non-decreasing
    /// distance, each page read at most once, and stopping early skips all
    /// remaining I/O.
    pub fn priority_search(&self, query: &[f64]) -> Result<PrioritySearch<'_, D>> {
        self.check_closed()?;
        self.check_dims(query)?;
        let mut queue = BinaryHeap::new();
        let root = self.meta.read().root_page;
        if root != 0 {
            queue.push(Candidate {
                key: 0.0,
                payload: PriorityItem::Node(root),
            });
        }
        Ok(PrioritySearch {
            tree: self,
            query: query.to_vec(),
            queue,
        })
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Write back all dirty pages and the header, then fsync.
    pub fn flush(&self) -> Result<()> {
        self.file.storage().write_meta(&self.meta.read())?;
        self.file.flush()
    }

    /// Drop every entry. Page space is not reclaimed, only unlinked.
    pub fn clear(&self) -> Result<()> {
        self.check_closed()?;
        self.file.cache().clear();
        let mut meta = self.meta.write();
        meta.root_page = 0;
        meta.height = 0;
        meta.entry_count = 0;
        self.file.storage().write_meta(&meta)?;
        self.file.storage().sync()
    }

    /// Flush and mark the tree closed; further operations fail with
    /// [`TreeError::Closed`].
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

fn center_dist_sq(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Queue element of the incremental search: either a subtree keyed by its
/// lower bound or a concrete object keyed by its exact distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PriorityItem {
    Object(ObjectId),
    Node(PageId),
}

/// Incremental nearest-neighbor iterator (pop-expand over a min-queue).
///
/// Not restartable; dropping it is the way to stop early.
pub struct PrioritySearch<'a, D: SpatialDistance> {
    tree: &'a RStarTree<D>,
    query: Vec<f64>,
    queue: BinaryHeap<Candidate<PriorityItem>>,
}

impl<D: SpatialDistance> Iterator for PrioritySearch<'_, D> {
    type Item = Result<(ObjectId, f64)>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(candidate) = self.queue.pop() {
            match candidate.payload {
                PriorityItem::Object(id) => {
                    return Some(Ok((id, self.tree.distance.restore(candidate.key))))
                }
                PriorityItem::Node(page) => {
                    let node = match self.tree.file.read(page) {
                        Ok(node) => node,
                        Err(e) => return Some(Err(e)),
                    };
                    match node {
                        Node::Leaf { entries } => {
                            for e in entries {
                                self.queue.push(Candidate {
                                    key: self.tree.distance.distance(&e.point, &self.query),
                                    payload: PriorityItem::Object(e.id),
                                });
                            }
                        }
                        Node::Directory { children, .. } => {
                            for c in children {
                                self.queue.push(Candidate {
                                    key: self.tree.distance.min_dist(&c.mbr, &self.query),
                                    payload: PriorityItem::Node(c.page),
                                });
                            }
                        }
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
impl<D: SpatialDistance> RStarTree<D> {
    /// Walk the whole tree asserting structural invariants; returns the
    /// number of entries found.
    fn check_invariants(&self, enforce_min: bool) -> u64 {
        let meta = self.meta.read().clone();
        if meta.root_page == 0 {
            assert_eq!(meta.entry_count, 0);
            return 0;
        }
        let count = self.check_node(meta.root_page, meta.height - 1, true, enforce_min);
        assert_eq!(count, meta.entry_count, "entry count mismatch");
        count
    }

    fn check_node(&self, page: PageId, expected_level: u32, is_root: bool, enforce_min: bool) -> u64 {
        let node = self.file.read(page).unwrap();
        assert_eq!(node.level(), expected_level, "level mismatch at page {}", page);
        assert!(node.len() <= self.config.capacity, "node over capacity");
        if !is_root && enforce_min {
            assert!(
                node.len() >= self.config.min_fill,
                "node under min fill: {} < {}",
                node.len(),
                self.config.min_fill
            );
        }
        match node {
            Node::Leaf { entries } => entries.len() as u64,
            Node::Directory { children, .. } => {
                assert!(!children.is_empty(), "empty directory node");
                let mut count = 0;
                for c in &children {
                    let actual = self.node_mbr(c.page).unwrap();
                    assert_eq!(c.mbr, actual, "stale directory box at page {}", page);
                    count += self.check_node(c.page, expected_level - 1, false, enforce_min);
                }
                count
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::SquaredEuclidean;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    fn small_config() -> RStarConfig {
        let mut config = RStarConfig::with_capacity(4);
        config.page_size = 1024;
        config
    }

    fn random_points(n: usize, dims: usize, seed: u64) -> Vec<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..dims).map(|_| rng.gen_range(-100.0..100.0)).collect())
            .collect()
    }

    fn linear_knn(points: &[Vec<f64>], query: &[f64], k: usize) -> Vec<(ObjectId, f64)> {
        let mut all: Vec<(ObjectId, f64)> = points
            .iter()
            .enumerate()
            .map(|(i, p)| (i as ObjectId, Euclidean.distance(p, query)))
            .collect();
        all.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        all.truncate(k);
        all
    }

    #[test]
    fn test_grid_knn_matches_brute_force() {
        let dir = tempdir().unwrap();
        let tree: RStarTree =
            RStarTree::create(dir.path().join("grid.idx"), 2, small_config()).unwrap();
        let points: Vec<Vec<f64>> = (0..10)
            .map(|i| vec![(i % 5) as f64, (i / 5) as f64])
            .collect();
        for (i, p) in points.iter().enumerate() {
            tree.insert(p, i as ObjectId).unwrap();
        }

        let got = tree.knn(&[0.0, 0.0], 3).unwrap();
        let want = linear_knn(&points, &[0.0, 0.0], 3);
        assert_eq!(got.len(), 3);
        for (g, w) in got.iter().zip(&want) {
            assert_eq!(g.0, w.0);
            assert!((g.1 - w.1).abs() < 1e-10);
        }
    }

    #[test]
    fn test_knn_matches_linear_scan() {
        let dir = tempdir().unwrap();
        let tree: RStarTree =
            RStarTree::create(dir.path().join("knn.idx"), 3, small_config()).unwrap();
        let points = random_points(200, 3, 11);
        for (i, p) in points.iter().enumerate() {
            tree.insert(p, i as ObjectId).unwrap();
        }

        let mut rng = StdRng::seed_from_u64(12);
        for _ in 0..20 {
            let query: Vec<f64> = (0..3).map(|_| rng.gen_range(-120.0..120.0)).collect();
            let k = rng.gen_range(1..=50);
            let got = tree.knn(&query, k).unwrap();
            let want = linear_knn(&points, &query, k);
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
        let tree: RStarTree =
            RStarTree::create(dir.path().join("range.idx"), 2, small_config()).unwrap();
        let points = random_points(150, 2, 21);
        for (i, p) in points.iter().enumerate() {
            tree.insert(p, i as ObjectId).unwrap();
        }

        let mut rng = StdRng::seed_from_u64(22);
        for _ in 0..20 {
            let query: Vec<f64> = (0..2).map(|_| rng.gen_range(-100.0..100.0)).collect();
            let radius = rng.gen_range(0.0..80.0);
            let got = tree.range(&query, radius).unwrap();
            let mut want: Vec<(ObjectId, f64)> = points
                .iter()
                .enumerate()
                .map(|(i, p)| (i as ObjectId, Euclidean.distance(p, &query)))
                .filter(|(_, d)| *d <= radius)
                .collect();
            want.sort_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.0.cmp(&b.0))
            });
            assert_eq!(got.len(), want.len());
            for (g, w) in got.iter().zip(&want) {
                assert_eq!(g.0, w.0);
            }
        }
    }

    #[test]
    fn test_invariants_with_reinsertion() {
        let dir = tempdir().unwrap();
        let tree: RStarTree =
            RStarTree::create(dir.path().join("inv.idx"), 2, small_config()).unwrap();
        for (i, p) in random_points(300, 2, 31).iter().enumerate() {
            tree.insert(p, i as ObjectId).unwrap();
        }
        tree.check_invariants(true);
        assert!(tree.height() > 1);
    }

    #[test]
    fn test_reinsert_used_once_per_level_per_insert() {
        let dir = tempdir().unwrap();
        let tree: RStarTree =
            RStarTree::create(dir.path().join("reins.idx"), 2, small_config()).unwrap();

        // Two far-apart full leaves under one root.
        let near = [[0.0, 0.0], [1.0, 0.5], [0.5, 1.0], [1.0, 1.0]];
        let far = [[100.0, 100.0], [101.0, 100.5], [100.5, 101.0], [101.0, 101.0]];
        let leaf_a = tree.allocate_page();
        tree.file
            .write(
                leaf_a,
                Node::Leaf {
                    entries: near
                        .iter()
                        .enumerate()
                        .map(|(i, p)| LeafEntry {
                            id: i as ObjectId,
                            point: p.to_vec(),
                        })
                        .collect(),
                },
            )
            .unwrap();
        let leaf_b = tree.allocate_page();
        tree.file
            .write(
                leaf_b,
                Node::Leaf {
                    entries: far
                        .iter()
                        .enumerate()
                        .map(|(i, p)| LeafEntry {
                            id: 4 + i as ObjectId,
                            point: p.to_vec(),
                        })
                        .collect(),
                },
            )
            .unwrap();
        let root = tree.allocate_page();
        tree.file
            .write(
                root,
                Node::Directory {
                    children: vec![
                        DirEntry {
                            mbr: tree.node_mbr(leaf_a).unwrap(),
                            page: leaf_a,
                        },
                        DirEntry {
                            mbr: tree.node_mbr(leaf_b).unwrap(),
                            page: leaf_b,
                        },
                    ],
                    level: 1,
                },
            )
            .unwrap();
        {
            let mut meta = tree.meta.write();
            meta.root_page = root;
            meta.height = 2;
            meta.entry_count = 8;
        }

        // The new point lands inside the first leaf's box and overflows it,
        // triggering the one reinsertion at leaf level. The displaced
        // entries also fall inside that box, so one of them overflows the
        // same leaf again within the same insert; the second overflow must
        // split instead of reinserting (otherwise this loops forever).
        tree.insert(&[0.5, 0.5], 8).unwrap();

        let stats = tree.stats();
        assert_eq!(stats.reinsertions, 1, "reinsertion ran twice at one level");
        assert!(stats.splits >= 1, "second overflow did not split");
        assert_eq!(tree.len(), 9);
        tree.check_invariants(true);
    }

    #[test]
    fn test_invariants_with_split_only() {
        let dir = tempdir().unwrap();
        let mut config = small_config();
        config.overflow = OverflowStrategy::Split;
        let tree: RStarTree = RStarTree::create(dir.path().join("inv2.idx"), 2, config).unwrap();
        for (i, p) in random_points(300, 2, 32).iter().enumerate() {
            tree.insert(p, i as ObjectId).unwrap();
        }
        tree.check_invariants(true);
    }

    #[test]
    fn test_remove_and_invariants() {
        let dir = tempdir().unwrap();
        let tree: RStarTree =
            RStarTree::create(dir.path().join("rm.idx"), 2, small_config()).unwrap();
        let points = random_points(100, 2, 41);
        for (i, p) in points.iter().enumerate() {
            tree.insert(p, i as ObjectId).unwrap();
        }

        for (i, p) in points.iter().enumerate().take(50) {
            assert!(tree.remove(p, i as ObjectId).unwrap());
        }
        assert_eq!(tree.len(), 50);
        assert!(!tree.remove(&points[0], 0).unwrap());

        // Removed entries are gone, survivors still found.
        let got = tree.knn(&points[70], 1).unwrap();
        assert_eq!(got[0].0, 70);
        let hits = tree.range(&points[10], 0.0).unwrap();
        assert!(hits.iter().all(|(id, _)| *id != 10));
        tree.check_invariants(false);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persist.idx");
        let points = random_points(80, 2, 51);
        {
            let tree: RStarTree = RStarTree::create(&path, 2, small_config()).unwrap();
            for (i, p) in points.iter().enumerate() {
                tree.insert(p, i as ObjectId).unwrap();
            }
            tree.close().unwrap();
        }

        let tree: RStarTree = RStarTree::open(&path, small_config()).unwrap();
        assert_eq!(tree.len(), 80);
        assert_eq!(tree.dims(), 2);
        let got = tree.knn(&points[5], 1).unwrap();
        assert_eq!(got[0].0, 5);
        assert!(got[0].1 < 1e-12);
        tree.check_invariants(false);
    }

    #[test]
    fn test_squared_euclidean_equivalent() {
        let dir = tempdir().unwrap();
        let points = random_points(120, 2, 61);

        let plain: RStarTree =
            RStarTree::create(dir.path().join("plain.idx"), 2, small_config()).unwrap();
        let squared: RStarTree<SquaredEuclidean> =
            RStarTree::create(dir.path().join("sq.idx"), 2, small_config()).unwrap();
        for (i, p) in points.iter().enumerate() {
            plain.insert(p, i as ObjectId).unwrap();
            squared.insert(p, i as ObjectId).unwrap();
        }

        let query = [3.0, -7.0];
        let a = plain.knn(&query, 10).unwrap();
        let b = squared.knn(&query, 10).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.0, y.0);
            assert!((x.1 - y.1).abs() < 1e-9);
        }

        let ra = plain.range(&query, 25.0).unwrap();
        let rb = squared.range(&query, 25.0).unwrap();
        assert_eq!(
            ra.iter().map(|r| r.0).collect::<Vec<_>>(),
            rb.iter().map(|r| r.0).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_bulk_load_equivalent_to_incremental() {
        let dir = tempdir().unwrap();
        let points = random_points(250, 2, 71);

        let incremental: RStarTree =
            RStarTree::create(dir.path().join("inc.idx"), 2, small_config()).unwrap();
        for (i, p) in points.iter().enumerate() {
            incremental.insert(p, i as ObjectId).unwrap();
        }
        let bulk: RStarTree = RStarTree::bulk_load(
            dir.path().join("bulk.idx"),
            2,
            small_config(),
            points.iter().enumerate().map(|(i, p)| (p.clone(), i as ObjectId)),
        )
        .unwrap();
        assert_eq!(bulk.len(), 250);

        let mut rng = StdRng::seed_from_u64(72);
        for _ in 0..10 {
            let query: Vec<f64> = (0..2).map(|_| rng.gen_range(-100.0..100.0)).collect();
            let a = incremental.knn(&query, 7).unwrap();
            let b = bulk.knn(&query, 7).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_priority_search_ordering_and_early_stop() {
        let dir = tempdir().unwrap();
        let tree: RStarTree =
            RStarTree::create(dir.path().join("prio.idx"), 2, small_config()).unwrap();
        let points = random_points(100, 2, 81);
        for (i, p) in points.iter().enumerate() {
            tree.insert(p, i as ObjectId).unwrap();
        }

        let query = [0.0, 0.0];
        let all: Vec<(ObjectId, f64)> = tree
            .priority_search(&query)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(all.len(), 100);
        for pair in all.windows(2) {
            assert!(pair[0].1 <= pair[1].1, "distances not non-decreasing");
        }

        // Taking a prefix matches a knn of the same size.
        let prefix: Vec<(ObjectId, f64)> = tree
            .priority_search(&query)
            .unwrap()
            .take(5)
            .collect::<Result<_>>()
            .unwrap();
        let knn = tree.knn(&query, 5).unwrap();
        assert_eq!(
            prefix.iter().map(|r| r.0).collect::<Vec<_>>(),
            knn.iter().map(|r| r.0).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_invalid_arguments_rejected() {
        let dir = tempdir().unwrap();
        let tree: RStarTree =
            RStarTree::create(dir.path().join("bad.idx"), 2, small_config()).unwrap();
        tree.insert(&[1.0, 2.0], 1).unwrap();

        assert!(matches!(
            tree.knn(&[0.0, 0.0], 0),
            Err(TreeError::InvalidArgument(_))
        ));
        assert!(matches!(
            tree.range(&[0.0, 0.0], -1.0),
            Err(TreeError::InvalidArgument(_))
        ));
        assert!(matches!(
            tree.knn(&[0.0, 0.0, 0.0], 1),
            Err(TreeError::InvalidArgument(_))
        ));
        assert!(matches!(
            tree.insert(&[1.0], 2),
            Err(TreeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_empty_tree_queries() {
        let dir = tempdir().unwrap();
        let tree: RStarTree =
            RStarTree::create(dir.path().join("empty.idx"), 2, small_config()).unwrap();
        assert!(tree.is_empty());
        assert!(tree.knn(&[0.0, 0.0], 3).unwrap().is_empty());
        assert!(tree.range(&[0.0, 0.0], 10.0).unwrap().is_empty());
        assert_eq!(tree.priority_search(&[0.0, 0.0]).unwrap().count(), 0);
    }

    #[test]
    fn test_closed_tree_rejects_operations() {
        let dir = tempdir().unwrap();
        let tree: RStarTree =
            RStarTree::create(dir.path().join("closed.idx"), 2, small_config()).unwrap();
        tree.insert(&[1.0, 1.0], 1).unwrap();
        tree.close().unwrap();
        assert!(matches!(
            tree.insert(&[2.0, 2.0], 2),
            Err(TreeError::Closed)
        ));
        assert!(matches!(tree.knn(&[0.0, 0.0], 1), Err(TreeError::Closed)));
        // Closing twice is fine.
        tree.close().unwrap();
    }

    #[test]
    fn test_clear_empties_tree() {
        let dir = tempdir().unwrap();
        let tree: RStarTree =
            RStarTree::create(dir.path().join("clear.idx"), 2, small_config()).unwrap();
        for (i, p) in random_points(50, 2, 91).iter().enumerate() {
            tree.insert(p, i as ObjectId).unwrap();
        }
        tree.clear().unwrap();
        assert!(tree.is_empty());
        assert!(tree.knn(&[0.0, 0.0], 1).unwrap().is_empty());
        tree.insert(&[1.0, 1.0], 7).unwrap();
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_wrong_magic_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("magic.idx");
        {
            let tree: RStarTree = RStarTree::create(&path, 2, small_config()).unwrap();
            tree.close().unwrap();
        }
        // An M-tree file is not an R*-tree file.
        let result = PageStorage::<Node>::open(&path, 0xDEAD_BEEF);
        assert!(matches!(result, Err(TreeError::Format(_))));
    }
}
