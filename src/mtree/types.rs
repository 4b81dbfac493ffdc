//! Node and configuration types for the M-tree.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeError};
use crate::page::{PageId, DEFAULT_CACHE_PAGES, DEFAULT_PAGE_SIZE};
use crate::relation::ObjectId;

/// Magic number identifying an M-tree page file.
pub const MTREE_MAGIC: u32 = 0x4D54_5231;

/// Object entry in a leaf. `parent_dist` is the distance to the routing
/// object of the directory entry pointing at this leaf (0 at the root).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MLeafEntry {
    pub id: ObjectId,
    pub parent_dist: f64,
}

/// Routing entry in a directory node. `radius` covers the distance from
/// the routing object to everything in the subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MDirEntry {
    pub routing: ObjectId,
    pub page: PageId,
    pub radius: f64,
    pub parent_dist: f64,
}

/// A tree node, one per page. Leaves sit at level 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MNode {
    Leaf { entries: Vec<MLeafEntry> },
    Directory { children: Vec<MDirEntry>, level: u32 },
}

impl MNode {
    pub fn len(&self) -> usize {
        match self {
            MNode::Leaf { entries } => entries.len(),
            MNode::Directory { children, .. } => children.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn level(&self) -> u32 {
        match self {
            MNode::Leaf { .. } => 0,
            MNode::Directory { level, .. } => *level,
        }
    }
}

/// Construction-time parameters of an M-tree.
#[derive(Debug, Clone)]
pub struct MTreeConfig {
    pub capacity: usize,
    pub min_fill: usize,
    pub page_size: usize,
    pub cache_pages: usize,
}

impl Default for MTreeConfig {
    fn default() -> Self {
        MTreeConfig::with_capacity(32)
    }
}

impl MTreeConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        MTreeConfig {
            capacity,
            min_fill: (capacity * 2 / 5).max(1),
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
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_basics() {
        let leaf = MNode::Leaf {
            entries: vec![MLeafEntry {
                id: 3,
                parent_dist: 1.5,
            }],
        };
        assert_eq!(leaf.level(), 0);
        assert_eq!(leaf.len(), 1);

        let dir = MNode::Directory {
            children: vec![],
            level: 2,
        };
        assert_eq!(dir.level(), 2);
        assert!(dir.is_empty());
    }

    #[test]
    fn test_config_validation() {
        assert!(MTreeConfig::default().validate().is_ok());
        let mut bad = MTreeConfig::with_capacity(6);
        bad.min_fill = 4;
        assert!(bad.validate().is_err());
    }
}
