//! Node and configuration types for the R*-tree.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeError};
use crate::mbr::Mbr;
use crate::page::{PageId, DEFAULT_CACHE_PAGES, DEFAULT_PAGE_SIZE};
use crate::relation::ObjectId;

/// Magic number identifying an R*-tree page file.
pub const RSTAR_MAGIC: u32 = 0x5254_5331;

/// A point entry stored in a leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafEntry {
    pub id: ObjectId,
    pub point: Vec<f64>,
}

/// Reference to a child node, with the box covering its whole subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirEntry {
    pub mbr: Mbr,
    pub page: PageId,
}

/// A tree node, one per page. Leaves sit at level 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Leaf { entries: Vec<LeafEntry> },
    Directory { children: Vec<DirEntry>, level: u32 },
}

impl Node {
    pub fn len(&self) -> usize {
        match self {
            Node::Leaf { entries } => entries.len(),
            Node::Directory { children, .. } => children.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn level(&self) -> u32 {
        match self {
            Node::Leaf { .. } => 0,
            Node::Directory { level, .. } => *level,
        }
    }

    /// Smallest box covering everything in this node.
    pub fn compute_mbr(&self, dims: usize) -> Mbr {
        let mut mbr = Mbr::empty(dims);
        match self {
            Node::Leaf { entries } => {
                for e in entries {
                    mbr.expand(&Mbr::from_point(&e.point));
                }
            }
            Node::Directory { children, .. } => {
                for c in children {
                    mbr.expand(&c.mbr);
                }
            }
        }
        mbr
    }
}

/// What to do when a node exceeds its capacity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverflowStrategy {
    /// Always split, cascading upward.
    Split,
    /// On the first overflow per level within one top-level insert, remove
    /// the given fraction of entries farthest from the node center and
    /// reinsert them from the root. A second overflow at the same level
    /// falls back to a split.
    LimitedReinsert { fraction: f64 },
}

impl Default for OverflowStrategy {
    fn default() -> Self {
        OverflowStrategy::LimitedReinsert { fraction: 0.3 }
    }
}

/// Construction-time parameters of an R*-tree.
#[derive(Debug, Clone)]
pub struct RStarConfig {
    /// Maximum entries per node.
    pub capacity: usize,
    /// Minimum entries per non-root node; at most half the capacity.
    pub min_fill: usize,
    pub overflow: OverflowStrategy,
    pub page_size: usize,
    pub cache_pages: usize,
}

impl Default for RStarConfig {
    fn default() -> Self {
        RStarConfig::with_capacity(64)
    }
}

impl RStarConfig {
    /// Config with the given fan-out and a 40% minimum fill.
    pub fn with_capacity(capacity: usize) -> Self {
        RStarConfig {
            capacity,
            min_fill: (capacity * 2 / 5).max(1),
            overflow: OverflowStrategy::default(),
            page_size: DEFAULT_PAGE_SIZE,
            cache_pages: DEFAULT_CACHE_PAGES,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.capacity < 2 {
            return Err(TreeError::InvalidArgument(
                "node capacity must be at least 2".into(),
            ));
        }
        if self.min_fill < 1 || self.min_fill * 2 > self.capacity {
            return Err(TreeError::InvalidArgument(format!(
                "min_fill {} out of range for capacity {}",
                self.min_fill, self.capacity
            )));
        }
        if let OverflowStrategy::LimitedReinsert { fraction } = self.overflow {
            if !(fraction > 0.0 && fraction < 1.0) {
                return Err(TreeError::InvalidArgument(format!(
                    "reinsert fraction {} must lie in (0, 1)",
                    fraction
                )));
            }
        }
        Ok(())
    }
}
