//! Disk-backed R*-tree over coordinate points.
//!
//! Insertion follows the R* scheme: descend by minimum enlargement, treat
//! overflow by limited reinsertion first and topological split after, and
//! grow the tree only at the root. Bulk loading packs entries with
//! sort-tile-recursive partitioning. Queries prune by the distance lower
//! bound on directory boxes.

mod bulk;
mod split;
mod tree;
mod types;

pub use tree::{PrioritySearch, RStarTree, TreeStats};
pub use types::{DirEntry, LeafEntry, Node, OverflowStrategy, RStarConfig, RSTAR_MAGIC};
