//! Disk-backed M-tree over arbitrary metric objects.
//!
//! Every subtree is summarized by a routing object and a covering radius;
//! insertion descends to the nearest routing object, enlarging radii on
//! the way, and overflow splits around the two most separated members.
//! Queries prune with triangle-inequality lower bounds, so any proper
//! metric works without coordinates.

mod tree;
mod types;

pub use tree::{MTree, PrioritySearch};
pub use types::{MDirEntry, MLeafEntry, MNode, MTreeConfig, MTREE_MAGIC};
