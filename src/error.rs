//! Error types shared by all index structures.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in index and storage operations.
#[derive(Debug, Error)]
pub enum TreeError {
    /// Disk read/write failure, annotated with the file and operation
    /// that triggered it. Never retried internally.
    #[error("I/O error during {op} on {path:?}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Bad magic number, unsupported version, or truncated file.
    /// Fatal for the operation that attempted the load.
    #[error("file format error: {0}")]
    Format(String),

    /// Lookup of an object id not present in the backing relation.
    /// Distinct from an empty query result.
    #[error("object {0} not found in relation")]
    NotFound(u64),

    /// A call that would violate an invariant (k < 1, negative radius,
    /// dimensionality mismatch). Rejected before any I/O or mutation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The index has been closed; no further operations are possible.
    #[error("index is closed")]
    Closed,
}

impl TreeError {
    /// Wrap an I/O error with file and operation context.
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        TreeError::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Result type for index operations.
pub type Result<T> = std::result::Result<T, TreeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_carries_context() {
        let err = TreeError::io(
            "read_record",
            "/tmp/idx.dat",
            io::Error::new(io::ErrorKind::UnexpectedEof, "eof"),
        );
        let msg = err.to_string();
        assert!(msg.contains("read_record"));
        assert!(msg.contains("idx.dat"));
    }

    #[test]
    fn test_not_found_is_distinct() {
        let err = TreeError::NotFound(42);
        assert!(matches!(err, TreeError::NotFound(42)));
        assert!(err.to_string().contains("42"));
    }
}
