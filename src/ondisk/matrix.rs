//! Upper-triangle matrix of fixed-size records on disk.
//!
//! Stores only the upper half of a symmetric `N x N` matrix, so a file of
//! `N * (N + 1) / 2` records covers every unordered pair. Access with
//! `i > j` transparently delegates to `(j, i)`.

use std::path::Path;

use crate::error::Result;
use crate::ondisk::array::OnDiskArray;

pub struct OnDiskUpperTriangleMatrix {
    array: OnDiskArray,
    matrix_size: usize,
}

/// Number of records needed for a triangular matrix of the given size.
fn triangle_len(matrix_size: usize) -> usize {
    matrix_size * (matrix_size + 1) / 2
}

impl OnDiskUpperTriangleMatrix {
    pub fn create(
        path: &Path,
        magic: u32,
        extra_header: &[u8],
        record_size: usize,
        matrix_size: usize,
    ) -> Result<Self> {
        let array = OnDiskArray::create(
            path,
            magic,
            extra_header,
            record_size,
            triangle_len(matrix_size),
        )?;
        Ok(OnDiskUpperTriangleMatrix { array, matrix_size })
    }

    pub fn open(path: &Path, magic: u32) -> Result<Self> {
        let array = OnDiskArray::open(path, magic)?;
        // Recover N from N(N+1)/2 stored records.
        let records = array.record_count();
        let mut n = 0usize;
        while triangle_len(n + 1) <= records {
            n += 1;
        }
        Ok(OnDiskUpperTriangleMatrix {
            array,
            matrix_size: n,
        })
    }

    pub fn matrix_size(&self) -> usize {
        self.matrix_size
    }

    /// Linear index of cell `(i, j)`; symmetric in its arguments.
    fn cell_index(&self, i: usize, j: usize) -> usize {
        let (i, j) = if i > j { (j, i) } else { (i, j) };
        j * (j + 1) / 2 + i
    }

    pub fn read_cell(&self, i: usize, j: usize) -> Result<Vec<u8>> {
        self.array.read_record(self.cell_index(i, j))
    }

    pub fn write_cell(&self, i: usize, j: usize, buffer: &[u8]) -> Result<()> {
        self.array.write_record(self.cell_index(i, j), buffer)
    }

    /// Grow or shrink the matrix, preserving the triangular prefix.
    pub fn resize(&mut self, matrix_size: usize) -> Result<()> {
        self.array.resize(triangle_len(matrix_size))?;
        self.matrix_size = matrix_size;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.array.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TreeError;
    use tempfile::tempdir;

    const MAGIC: u32 = 0x54524D58; // "TRMX"

    #[test]
    fn test_symmetric_access() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("matrix.dat");
        let matrix = OnDiskUpperTriangleMatrix::create(&path, MAGIC, &[], 8, 4).unwrap();

        matrix.write_cell(1, 3, &42f64.to_le_bytes()).unwrap();
        // (3, 1) is the same cell as (1, 3).
        assert_eq!(matrix.read_cell(3, 1).unwrap(), 42f64.to_le_bytes());
        assert_eq!(matrix.read_cell(1, 3).unwrap(), 42f64.to_le_bytes());
    }

    #[test]
    fn test_all_cells_distinct() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("matrix.dat");
        let n = 5;
        let matrix = OnDiskUpperTriangleMatrix::create(&path, MAGIC, &[], 8, n).unwrap();

        for i in 0..n {
            for j in i..n {
                let value = (i * 10 + j) as f64;
                matrix.write_cell(i, j, &value.to_le_bytes()).unwrap();
            }
        }
        for i in 0..n {
            for j in i..n {
                let expected = (i * 10 + j) as f64;
                assert_eq!(matrix.read_cell(j, i).unwrap(), expected.to_le_bytes());
            }
        }
    }

    #[test]
    fn test_roundtrip_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("matrix.dat");
        {
            let matrix = OnDiskUpperTriangleMatrix::create(&path, MAGIC, &[], 4, 3).unwrap();
            matrix.write_cell(0, 2, &[1, 2, 3, 4]).unwrap();
            matrix.sync().unwrap();
        }
        let matrix = OnDiskUpperTriangleMatrix::open(&path, MAGIC).unwrap();
        assert_eq!(matrix.matrix_size(), 3);
        assert_eq!(matrix.read_cell(2, 0).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_resize_preserves_prefix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("matrix.dat");
        let mut matrix = OnDiskUpperTriangleMatrix::create(&path, MAGIC, &[], 4, 2).unwrap();
        matrix.write_cell(0, 1, &[9; 4]).unwrap();
        matrix.resize(6).unwrap();
        assert_eq!(matrix.matrix_size(), 6);
        assert_eq!(matrix.read_cell(1, 0).unwrap(), vec![9; 4]);
        assert_eq!(matrix.read_cell(5, 5).unwrap(), vec![0; 4]);
    }

    #[test]
    fn test_wrong_magic_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("matrix.dat");
        OnDiskUpperTriangleMatrix::create(&path, MAGIC, &[], 4, 2).unwrap();
        assert!(matches!(
            OnDiskUpperTriangleMatrix::open(&path, 0x1234),
            Err(TreeError::Format(_))
        ));
    }
}
