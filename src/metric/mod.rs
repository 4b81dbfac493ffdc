//! In-memory distance-only indexes.
//!
//! These trees never look at coordinates; everything is driven by a
//! [`Metric`](crate::distance::Metric) and pruned with precomputed
//! distance intervals. They build once over a
//! [`Relation`](crate::relation::Relation) and serve queries from memory.

pub mod mvp;
pub mod vptree;

pub use mvp::{Gnat, GnatConfig, MvpTree, MvpTreeConfig};
pub use vptree::{VpTree, VpTreeConfig};
