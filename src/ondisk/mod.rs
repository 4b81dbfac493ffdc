//! On-disk record files.
//!
//! [`OnDiskArray`] is a flat array of fixed-size binary records behind a
//! small validated header; [`OnDiskUpperTriangleMatrix`] stores the upper
//! half of a symmetric matrix on top of it. Both are the durable layer the
//! page storage builds on.

pub mod array;
pub mod matrix;

pub use array::{OnDiskArray, FORMAT_VERSION};
pub use matrix::OnDiskUpperTriangleMatrix;
