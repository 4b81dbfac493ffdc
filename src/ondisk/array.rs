//! Flat on-disk array of fixed-size records.
//!
//! File layout, little-endian u32 fields:
//!
//! ```text
//! +----------+------------------+-------------+--------------+-------+
//! | version  | extra header len | record size | record count | magic |
//! +----------+------------------+-------------+--------------+-------+
//! | extra header bytes (caller-defined) ...                          |
//! +------------------------------------------------------------------+
//! | record 0 | record 1 | ... | record N-1                            |
//! +------------------------------------------------------------------+
//! ```
//!
//! `record_offset(i) = 20 + extra_header_len + i * record_size`. Opening a
//! file validates version and magic; a mismatch is a fatal format error.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Result, TreeError};

/// Current file format version.
pub const FORMAT_VERSION: u32 = 1;

/// Fixed header bytes before the extra header region.
const BASE_HEADER_SIZE: u64 = 20;

#[derive(Debug)]
struct ArrayState {
    file: File,
    record_count: usize,
}

/// An array of `record_count` records of `record_size` bytes each,
/// preceded by a validated header and a caller-defined extra header.
#[derive(Debug)]
pub struct OnDiskArray {
    state: Mutex<ArrayState>,
    path: PathBuf,
    magic: u32,
    extra_header_size: usize,
    record_size: usize,
}

impl OnDiskArray {
    /// Create a new array file, truncating any existing one.
    pub fn create(
        path: &Path,
        magic: u32,
        extra_header: &[u8],
        record_size: usize,
        record_count: usize,
    ) -> Result<Self> {
        if record_size == 0 {
            return Err(TreeError::InvalidArgument("record size must be > 0".into()));
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| TreeError::io("create", path, e))?;

        let mut header = [0u8; BASE_HEADER_SIZE as usize];
        header[0..4].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        header[4..8].copy_from_slice(&(extra_header.len() as u32).to_le_bytes());
        header[8..12].copy_from_slice(&(record_size as u32).to_le_bytes());
        header[12..16].copy_from_slice(&(record_count as u32).to_le_bytes());
        header[16..20].copy_from_slice(&magic.to_le_bytes());

        file.write_all(&header)
            .map_err(|e| TreeError::io("write_header", path, e))?;
        file.write_all(extra_header)
            .map_err(|e| TreeError::io("write_extra_header", path, e))?;
        let total = BASE_HEADER_SIZE
            + extra_header.len() as u64
            + (record_count as u64) * (record_size as u64);
        file.set_len(total)
            .map_err(|e| TreeError::io("set_len", path, e))?;

        log::debug!(
            "created on-disk array at {:?}: {} records of {} bytes",
            path,
            record_count,
            record_size
        );

        Ok(OnDiskArray {
            state: Mutex::new(ArrayState { file, record_count }),
            path: path.to_path_buf(),
            magic,
            extra_header_size: extra_header.len(),
            record_size,
        })
    }

    /// Open an existing array file and validate its header against the
    /// expected magic number.
    pub fn open(path: &Path, magic: u32) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| TreeError::io("open", path, e))?;

        let mut header = [0u8; BASE_HEADER_SIZE as usize];
        file.read_exact(&mut header)
            .map_err(|_| TreeError::Format(format!("{:?}: truncated header", path)))?;

        let version = u32::from_le_bytes(header[0..4].try_into().unwrap_or_default());
        let extra_header_size =
            u32::from_le_bytes(header[4..8].try_into().unwrap_or_default()) as usize;
        let record_size = u32::from_le_bytes(header[8..12].try_into().unwrap_or_default()) as usize;
        let record_count =
            u32::from_le_bytes(header[12..16].try_into().unwrap_or_default()) as usize;
        let file_magic = u32::from_le_bytes(header[16..20].try_into().unwrap_or_default());

        if version != FORMAT_VERSION {
            return Err(TreeError::Format(format!(
                "{:?}: unsupported format version {}",
                path, version
            )));
        }
        if file_magic != magic {
            return Err(TreeError::Format(format!(
                "{:?}: magic number mismatch (expected {:#x}, found {:#x})",
                path, magic, file_magic
            )));
        }
        if record_size == 0 {
            return Err(TreeError::Format(format!("{:?}: zero record size", path)));
        }

        let expected = BASE_HEADER_SIZE
            + extra_header_size as u64
            + (record_count as u64) * (record_size as u64);
        let actual = file
            .metadata()
            .map_err(|e| TreeError::io("metadata", path, e))?
            .len();
        if actual < expected {
            return Err(TreeError::Format(format!(
                "{:?}: truncated file ({} bytes, expected {})",
                path, actual, expected
            )));
        }

        log::debug!("opened on-disk array at {:?}: {} records", path, record_count);

        Ok(OnDiskArray {
            state: Mutex::new(ArrayState { file, record_count }),
            path: path.to_path_buf(),
            magic,
            extra_header_size,
            record_size,
        })
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().record_count
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }

    fn record_offset(&self, index: usize) -> u64 {
        BASE_HEADER_SIZE + self.extra_header_size as u64 + (index as u64) * (self.record_size as u64)
    }

    /// Read record `index` into a fresh buffer.
    pub fn read_record(&self, index: usize) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        if index >= state.record_count {
            return Err(TreeError::InvalidArgument(format!(
                "record index {} out of bounds ({} records)",
                index, state.record_count
            )));
        }
        let offset = self.record_offset(index);
        let mut buffer = vec![0u8; self.record_size];
        state
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| state.file.read_exact(&mut buffer))
            .map_err(|e| TreeError::io("read_record", &self.path, e))?;
        Ok(buffer)
    }

    /// Overwrite record `index`. The buffer length must match the record
    /// size exactly.
    pub fn write_record(&self, index: usize, buffer: &[u8]) -> Result<()> {
        if buffer.len() != self.record_size {
            return Err(TreeError::InvalidArgument(format!(
                "record buffer is {} bytes, record size is {}",
                buffer.len(),
                self.record_size
            )));
        }
        let mut state = self.state.lock();
        if index >= state.record_count {
            return Err(TreeError::InvalidArgument(format!(
                "record index {} out of bounds ({} records)",
                index, state.record_count
            )));
        }
        let offset = self.record_offset(index);
        state
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| state.file.write_all(buffer))
            .map_err(|e| TreeError::io("write_record", &self.path, e))?;
        Ok(())
    }

    pub fn read_extra_header(&self) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        let mut buffer = vec![0u8; self.extra_header_size];
        state
            .file
            .seek(SeekFrom::Start(BASE_HEADER_SIZE))
            .and_then(|_| state.file.read_exact(&mut buffer))
            .map_err(|e| TreeError::io("read_extra_header", &self.path, e))?;
        Ok(buffer)
    }

    pub fn write_extra_header(&self, buffer: &[u8]) -> Result<()> {
        if buffer.len() != self.extra_header_size {
            return Err(TreeError::InvalidArgument(format!(
                "extra header is {} bytes, expected {}",
                buffer.len(),
                self.extra_header_size
            )));
        }
        let mut state = self.state.lock();
        state
            .file
            .seek(SeekFrom::Start(BASE_HEADER_SIZE))
            .and_then(|_| state.file.write_all(buffer))
            .map_err(|e| TreeError::io("write_extra_header", &self.path, e))?;
        Ok(())
    }

    /// Grow or shrink to `new_count` records. Existing records are kept;
    /// new slots read back as zeroes.
    pub fn resize(&self, new_count: usize) -> Result<()> {
        let mut state = self.state.lock();
        if new_count == state.record_count {
            return Ok(());
        }
        let total = BASE_HEADER_SIZE
            + self.extra_header_size as u64
            + (new_count as u64) * (self.record_size as u64);
        state
            .file
            .set_len(total)
            .map_err(|e| TreeError::io("resize", &self.path, e))?;
        state
            .file
            .seek(SeekFrom::Start(12))
            .and_then(|_| state.file.write_all(&(new_count as u32).to_le_bytes()))
            .map_err(|e| TreeError::io("resize", &self.path, e))?;
        state.record_count = new_count;
        Ok(())
    }

    /// Flush file contents and metadata to the device.
    pub fn sync(&self) -> Result<()> {
        self.state
            .lock()
            .file
            .sync_all()
            .map_err(|e| TreeError::io("sync", &self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MAGIC: u32 = 0x54524545; // "TREE"

    #[test]
    fn test_create_and_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("array.dat");
        let array = OnDiskArray::create(&path, MAGIC, &[], 8, 4).unwrap();

        array.write_record(0, &[1; 8]).unwrap();
        array.write_record(3, &[9; 8]).unwrap();
        assert_eq!(array.read_record(0).unwrap(), vec![1; 8]);
        assert_eq!(array.read_record(3).unwrap(), vec![9; 8]);
        // Untouched slots are zero-filled.
        assert_eq!(array.read_record(1).unwrap(), vec![0; 8]);
    }

    #[test]
    fn test_reopen_preserves_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("array.dat");
        {
            let array = OnDiskArray::create(&path, MAGIC, &[7, 7], 4, 3).unwrap();
            array.write_record(1, &[1, 2, 3, 4]).unwrap();
            array.sync().unwrap();
        }
        let array = OnDiskArray::open(&path, MAGIC).unwrap();
        assert_eq!(array.record_count(), 3);
        assert_eq!(array.record_size(), 4);
        assert_eq!(array.read_record(1).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(array.read_extra_header().unwrap(), vec![7, 7]);
    }

    #[test]
    fn test_magic_mismatch_is_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("array.dat");
        OnDiskArray::create(&path, MAGIC, &[], 4, 1).unwrap();
        let err = OnDiskArray::open(&path, 0xDEADBEEF).unwrap_err();
        assert!(matches!(err, TreeError::Format(_)));
    }

    #[test]
    fn test_truncated_file_is_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("array.dat");
        OnDiskArray::create(&path, MAGIC, &[], 16, 8).unwrap();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(30).unwrap();
        let err = OnDiskArray::open(&path, MAGIC).unwrap_err();
        assert!(matches!(err, TreeError::Format(_)));
    }

    #[test]
    fn test_resize_grows_and_zero_fills() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("array.dat");
        let array = OnDiskArray::create(&path, MAGIC, &[], 4, 2).unwrap();
        array.write_record(1, &[5; 4]).unwrap();

        array.resize(5).unwrap();
        assert_eq!(array.record_count(), 5);
        assert_eq!(array.read_record(1).unwrap(), vec![5; 4]);
        assert_eq!(array.read_record(4).unwrap(), vec![0; 4]);

        // The new count survives a reopen.
        drop(array);
        let array = OnDiskArray::open(&path, MAGIC).unwrap();
        assert_eq!(array.record_count(), 5);
        assert_eq!(array.read_record(1).unwrap(), vec![5; 4]);
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("array.dat");
        let array = OnDiskArray::create(&path, MAGIC, &[], 4, 2).unwrap();
        assert!(matches!(
            array.read_record(2),
            Err(TreeError::InvalidArgument(_))
        ));
        assert!(matches!(
            array.write_record(0, &[1, 2]),
            Err(TreeError::InvalidArgument(_))
        ));
    }
}
