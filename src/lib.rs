//! # Treeline - Disk-Backed Spatial and Metric Indexes
//!
//! This crate provides tree indexes for similarity search over points and
//! arbitrary objects, built on a shared paged file format with an LRU
//! page cache.
//!
//! ## Features
//!
//! - **Disk-Based Storage**: One node per page, loaded on demand
//! - **LRU Cache**: Frequently accessed pages kept in memory
//! - **Persistent**: Trees survive process restarts
//! - **R\*-Tree**: Coordinate points with limited reinsertion, topological
//!   splits, and sort-tile-recursive bulk loading
//! - **M-Tree**: Arbitrary objects under any metric, routing objects with
//!   covering radii
//! - **Distance-Only Trees**: In-memory VP-tree, GNAT, and MVP-tree
//! - **Three Query Forms**: Range, k-nearest-neighbor, and incremental
//!   distance-ordered iteration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use treeline::{RStarConfig, RStarTree};
//! use tempfile::tempdir;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = tempdir()?;
//! let tree: RStarTree = RStarTree::create(
//!     dir.path().join("points.idx"),
//!     2,
//!     RStarConfig::default(),
//! )?;
//!
//! tree.insert(&[1.0, 2.0], 1)?;
//! tree.insert(&[4.0, 6.0], 2)?;
//!
//! let nearest = tree.knn(&[0.0, 0.0], 1)?;
//! assert_eq!(nearest[0].0, 1);
//!
//! for item in tree.priority_search(&[0.0, 0.0])?.take(2) {
//!     let (id, dist) = item?;
//!     println!("{id} at {dist}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Metric trees index objects held in a [`Relation`](relation::Relation):
//!
//! ```rust,no_run
//! use treeline::distance::EuclideanVec;
//! use treeline::metric::{VpTree, VpTreeConfig};
//! use treeline::relation::VecRelation;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let relation = VecRelation::new(vec![
//!     (1, vec![0.0, 0.0]),
//!     (2, vec![3.0, 4.0]),
//! ]);
//! let tree = VpTree::build(EuclideanVec, relation, VpTreeConfig::default())?;
//! assert_eq!(tree.knn(&vec![3.0, 3.0], 1)?[0].0, 2);
//! # Ok(())
//! # }
//! ```

pub mod distance;
pub mod error;
pub mod knn;
pub mod mbr;
pub mod metric;
pub mod mtree;
pub mod ondisk;
pub mod page;
pub mod relation;
pub mod rstar;

pub use distance::{Euclidean, Manhattan, Metric, SpatialDistance, SquaredEuclidean};
pub use error::{Result, TreeError};
pub use mbr::Mbr;
pub use mtree::{MTree, MTreeConfig};
pub use relation::{ObjectId, Relation, VecRelation};
pub use rstar::{OverflowStrategy, RStarConfig, RStarTree};
