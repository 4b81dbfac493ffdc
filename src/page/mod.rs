//! Page-based node storage.
//!
//! A [`PageStorage`] keeps one serialized tree node per fixed-size record
//! of an [`OnDiskArray`]; tree metadata lives in the array's extra header.
//! Each read or write touches exactly one record. The LRU layer on top is
//! in [`cache`].

pub mod cache;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::path::Path;

use crate::error::{Result, TreeError};
use crate::ondisk::OnDiskArray;

pub use cache::{CacheStats, CachedFile, PageCache};

/// Identifier of a node page. Page 0 is reserved and means "no page".
pub type PageId = u64;

/// Default page size (16KB).
pub const DEFAULT_PAGE_SIZE: usize = 16384;

/// Default cache capacity in pages.
pub const DEFAULT_CACHE_PAGES: usize = 1024;

/// Byte budget for the serialized [`TreeMeta`] in the extra header.
const META_REGION: usize = 256;

/// Tree-level metadata persisted in the file's extra header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeMeta {
    /// Root page, 0 while the tree is empty.
    pub root_page: PageId,
    /// Next page id to hand out; starts at 1.
    pub next_page_id: PageId,
    pub entry_count: u64,
    pub height: u32,
    /// Dimensionality of indexed points; 0 for metric trees.
    pub dims: u32,
    /// Node fan-out the tree was built with; must match across reopen.
    pub capacity: u32,
}

impl TreeMeta {
    pub fn new(dims: u32, capacity: u32) -> Self {
        TreeMeta {
            root_page: 0,
            next_page_id: 1,
            entry_count: 0,
            height: 0,
            dims,
            capacity,
        }
    }
}

/// Reads and writes single node pages on disk.
pub struct PageStorage<N> {
    array: OnDiskArray,
    page_size: usize,
    _node: PhantomData<fn() -> N>,
}

impl<N: Serialize + DeserializeOwned> PageStorage<N> {
    /// Create a fresh storage file holding the given metadata and no pages.
    pub fn create(path: &Path, magic: u32, page_size: usize, meta: &TreeMeta) -> Result<Self> {
        let extra = encode_meta(meta)?;
        let array = OnDiskArray::create(path, magic, &extra, page_size, 0)?;
        Ok(PageStorage {
            array,
            page_size,
            _node: PhantomData,
        })
    }

    /// Open an existing storage file; validates magic and version and
    /// returns the persisted metadata.
    pub fn open(path: &Path, magic: u32) -> Result<(Self, TreeMeta)> {
        let array = OnDiskArray::open(path, magic)?;
        let meta = decode_meta(&array.read_extra_header()?)?;
        let page_size = array.record_size();
        Ok((
            PageStorage {
                array,
                page_size,
                _node: PhantomData,
            },
            meta,
        ))
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn record_index(&self, page_id: PageId) -> Result<usize> {
        if page_id == 0 {
            return Err(TreeError::InvalidArgument(
                "page 0 is reserved and cannot hold a node".into(),
            ));
        }
        Ok((page_id - 1) as usize)
    }

    /// Read a single node page (one seek, one read).
    pub fn read_page(&self, page_id: PageId) -> Result<N> {
        let index = self.record_index(page_id)?;
        let buffer = self.array.read_record(index)?;
        bincode::serde::decode_from_slice(&buffer, bincode::config::legacy())
            .map(|(node, _)| node)
            .map_err(|e| TreeError::Serialization(format!("page {}: {}", page_id, e)))
    }

    /// Write a single node page, growing the file as needed.
    pub fn write_page(&self, page_id: PageId, node: &N) -> Result<()> {
        let index = self.record_index(page_id)?;
        let bytes = bincode::serde::encode_to_vec(node, bincode::config::legacy())
            .map_err(|e| TreeError::Serialization(e.to_string()))?;
        if bytes.len() > self.page_size {
            return Err(TreeError::Serialization(format!(
                "node too large for page: {} bytes (page size {})",
                bytes.len(),
                self.page_size
            )));
        }
        if index >= self.array.record_count() {
            self.array.resize(index + 1)?;
        }
        let mut padded = bytes;
        padded.resize(self.page_size, 0);
        self.array.write_record(index, &padded)
    }

    pub fn write_meta(&self, meta: &TreeMeta) -> Result<()> {
        self.array.write_extra_header(&encode_meta(meta)?)
    }

    pub fn read_meta(&self) -> Result<TreeMeta> {
        decode_meta(&self.array.read_extra_header()?)
    }

    pub fn sync(&self) -> Result<()> {
        self.array.sync()
    }
}

fn encode_meta(meta: &TreeMeta) -> Result<Vec<u8>> {
    let mut bytes = bincode::serde::encode_to_vec(meta, bincode::config::legacy())
        .map_err(|e| TreeError::Serialization(e.to_string()))?;
    if bytes.len() > META_REGION {
        return Err(TreeError::Serialization(
            "tree metadata exceeds header region".into(),
        ));
    }
    bytes.resize(META_REGION, 0);
    Ok(bytes)
}

fn decode_meta(bytes: &[u8]) -> Result<TreeMeta> {
    bincode::serde::decode_from_slice(bytes, bincode::config::legacy())
        .map(|(meta, _)| meta)
        .map_err(|e| TreeError::Serialization(format!("tree metadata: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MAGIC: u32 = 0x50414745; // "PAGE"

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestNode {
        values: Vec<u64>,
    }

    #[test]
    fn test_page_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.idx");
        let storage =
            PageStorage::<TestNode>::create(&path, MAGIC, 512, &TreeMeta::new(2, 64)).unwrap();

        let node = TestNode {
            values: vec![1, 2, 3],
        };
        storage.write_page(1, &node).unwrap();
        storage.write_page(7, &node).unwrap();
        assert_eq!(storage.read_page(7).unwrap(), node);
    }

    #[test]
    fn test_page_zero_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.idx");
        let storage =
            PageStorage::<TestNode>::create(&path, MAGIC, 512, &TreeMeta::new(2, 64)).unwrap();
        let node = TestNode { values: vec![] };
        assert!(storage.write_page(0, &node).is_err());
        assert!(storage.read_page(0).is_err());
    }

    #[test]
    fn test_meta_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.idx");
        {
            let storage =
                PageStorage::<TestNode>::create(&path, MAGIC, 512, &TreeMeta::new(3, 64)).unwrap();
            let meta = TreeMeta {
                root_page: 4,
                next_page_id: 9,
                entry_count: 100,
                height: 2,
                dims: 3,
                capacity: 64,
            };
            storage.write_meta(&meta).unwrap();
            storage.sync().unwrap();
        }
        let (_, meta) = PageStorage::<TestNode>::open(&path, MAGIC).unwrap();
        assert_eq!(meta.root_page, 4);
        assert_eq!(meta.next_page_id, 9);
        assert_eq!(meta.entry_count, 100);
        assert_eq!(meta.height, 2);
        assert_eq!(meta.dims, 3);
    }

    #[test]
    fn test_oversized_node_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.idx");
        let storage =
            PageStorage::<TestNode>::create(&path, MAGIC, 64, &TreeMeta::new(2, 64)).unwrap();
        let node = TestNode {
            values: (0..1000).collect(),
        };
        assert!(matches!(
            storage.write_page(1, &node),
            Err(TreeError::Serialization(_))
        ));
    }
}
