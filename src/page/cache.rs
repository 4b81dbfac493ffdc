//! LRU cache over a page storage file.
//!
//! Pages are loaded lazily: nothing is read until first access, and dirty
//! pages reach disk only when evicted or explicitly flushed. The cache is
//! internally synchronized; `get`/`put`/`remove`/`clear` take `&self` and
//! concurrent callers observe a consistent recency order with no lost
//! evictions.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::page::{PageId, PageStorage};

struct CachedPage<N> {
    node: N,
    dirty: bool,
    /// Clock value of the page's most recent use; queue entries with an
    /// older tick are stale.
    tick: u64,
}

struct LruState<N> {
    pages: HashMap<PageId, CachedPage<N>>,
    // Front = least recently used. Entries are (tick, page); a touch
    // appends instead of rewriting the queue, and superseded entries are
    // dropped lazily, so every operation stays amortized O(1).
    order: VecDeque<(u64, PageId)>,
    clock: u64,
}

impl<N> LruState<N> {
    fn touch(&mut self, page_id: PageId) {
        self.clock += 1;
        let clock = self.clock;
        if let Some(page) = self.pages.get_mut(&page_id) {
            page.tick = clock;
        }
        self.order.push_back((clock, page_id));
        // Keep the queue within a constant factor of residency.
        if self.order.len() > self.pages.len().saturating_mul(2).max(64) {
            let pages = &self.pages;
            self.order
                .retain(|&(tick, id)| pages.get(&id).map_or(false, |p| p.tick == tick));
        }
    }

    fn pop_lru(&mut self) -> Option<(PageId, CachedPage<N>)> {
        while let Some((tick, id)) = self.order.pop_front() {
            let current = self.pages.get(&id).map_or(false, |p| p.tick == tick);
            if current {
                if let Some(page) = self.pages.remove(&id) {
                    return Some((id, page));
                }
            }
        }
        None
    }
}

/// Cache counters, all monotonically increasing.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub disk_reads: u64,
    pub disk_writes: u64,
    pub resident: u64,
}

/// Bounded LRU cache of node pages.
///
/// Owns the resident copy of every cached page; readers get clones, so no
/// reference into the cache survives a later eviction.
pub struct PageCache<N> {
    state: Mutex<LruState<N>>,
    capacity: usize,
}

impl<N: Clone> PageCache<N> {
    pub fn new(capacity: usize) -> Self {
        PageCache {
            state: Mutex::new(LruState {
                pages: HashMap::new(),
                order: VecDeque::new(),
                clock: 0,
            }),
            capacity,
        }
    }

    /// Fetch a resident page, marking it most recently used.
    pub fn get(&self, page_id: PageId) -> Option<N> {
        let mut state = self.state.lock();
        if !state.pages.contains_key(&page_id) {
            return None;
        }
        state.touch(page_id);
        state.pages.get(&page_id).map(|c| c.node.clone())
    }

    /// Insert a page; returns the evicted `(id, node, dirty)` when the
    /// residency bound was exceeded.
    pub fn put(&self, page_id: PageId, node: N, dirty: bool) -> Option<(PageId, N, bool)> {
        let mut state = self.state.lock();
        if let Some(existing) = state.pages.get_mut(&page_id) {
            existing.node = node;
            existing.dirty = existing.dirty || dirty;
            state.touch(page_id);
            return None;
        }
        state.pages.insert(
            page_id,
            CachedPage {
                node,
                dirty,
                tick: 0,
            },
        );
        state.touch(page_id);
        if state.pages.len() <= self.capacity {
            return None;
        }
        // Exactly one page leaves: the least recently used.
        state
            .pop_lru()
            .map(|(id, page)| (id, page.node, page.dirty))
    }

    /// Drop a page from the cache, returning it for write-back. Its queue
    /// entries go stale and fall out at the next eviction scan.
    pub fn remove(&self, page_id: PageId) -> Option<(N, bool)> {
        let mut state = self.state.lock();
        state.pages.remove(&page_id).map(|c| (c.node, c.dirty))
    }

    /// Drop everything without write-back. Teardown only.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.pages.clear();
        state.order.clear();
    }

    pub fn contains(&self, page_id: PageId) -> bool {
        self.state.lock().pages.contains_key(&page_id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dirty_pages(&self) -> Vec<PageId> {
        self.state
            .lock()
            .pages
            .iter()
            .filter(|(_, c)| c.dirty)
            .map(|(id, _)| *id)
            .collect()
    }

    fn clean_copy(&self, page_id: PageId) -> Option<N> {
        let mut state = self.state.lock();
        state.pages.get_mut(&page_id).map(|c| {
            c.dirty = false;
            c.node.clone()
        })
    }
}

/// Read-through, write-back combination of a [`PageStorage`] and a
/// [`PageCache`]. The only paths by which a dirty page reaches disk are
/// LRU eviction, [`CachedFile::remove`], and [`CachedFile::flush`].
pub struct CachedFile<N> {
    storage: PageStorage<N>,
    cache: PageCache<N>,
    hits: AtomicU64,
    misses: AtomicU64,
    disk_reads: AtomicU64,
    disk_writes: AtomicU64,
}

impl<N: Clone + Serialize + DeserializeOwned> CachedFile<N> {
    pub fn new(storage: PageStorage<N>, cache_pages: usize) -> Self {
        CachedFile {
            storage,
            cache: PageCache::new(cache_pages),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            disk_reads: AtomicU64::new(0),
            disk_writes: AtomicU64::new(0),
        }
    }

    pub fn storage(&self) -> &PageStorage<N> {
        &self.storage
    }

    pub fn cache(&self) -> &PageCache<N> {
        &self.cache
    }

    /// Read a node, from cache when resident, loading the single page from
    /// disk otherwise.
    pub fn read(&self, page_id: PageId) -> Result<N> {
        if let Some(node) = self.cache.get(page_id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(node);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.disk_reads.fetch_add(1, Ordering::Relaxed);
        let node = self.storage.read_page(page_id)?;
        self.insert(page_id, node.clone(), false)?;
        Ok(node)
    }

    /// Stage a node write in the cache, marked dirty.
    pub fn write(&self, page_id: PageId, node: N) -> Result<()> {
        self.insert(page_id, node, true)
    }

    fn insert(&self, page_id: PageId, node: N, dirty: bool) -> Result<()> {
        if let Some((victim_id, victim, victim_dirty)) = self.cache.put(page_id, node, dirty) {
            if victim_dirty {
                self.storage.write_page(victim_id, &victim)?;
                self.disk_writes.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Evict a page explicitly, writing it back if dirty.
    pub fn remove(&self, page_id: PageId) -> Result<Option<N>> {
        match self.cache.remove(page_id) {
            Some((node, dirty)) => {
                if dirty {
                    self.storage.write_page(page_id, &node)?;
                    self.disk_writes.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }

    /// Write back every dirty page and fsync.
    pub fn flush(&self) -> Result<()> {
        for page_id in self.cache.dirty_pages() {
            if let Some(node) = self.cache.clean_copy(page_id) {
                self.storage.write_page(page_id, &node)?;
                self.disk_writes.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.storage.sync()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            disk_reads: self.disk_reads.load(Ordering::Relaxed),
            disk_writes: self.disk_writes.load(Ordering::Relaxed),
            resident: self.cache.len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::TreeMeta;
    use serde::Deserialize;
    use tempfile::tempdir;

    const MAGIC: u32 = 0x43414348; // "CACH"

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestNode(u64);

    fn cached_file(dir: &tempfile::TempDir, capacity: usize) -> CachedFile<TestNode> {
        let path = dir.path().join("cache.idx");
        let storage =
            PageStorage::<TestNode>::create(&path, MAGIC, 128, &TreeMeta::new(0, 64)).unwrap();
        CachedFile::new(storage, capacity)
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let dir = tempdir().unwrap();
        let file = cached_file(&dir, 3);

        // Fill capacity with pages 1..=3, then insert page 4.
        for id in 1..=4u64 {
            file.write(id, TestNode(id * 10)).unwrap();
        }

        // Page 1 was least recently used: evicted and written back.
        assert!(!file.cache().contains(1));
        assert!(file.cache().contains(2));
        assert!(file.cache().contains(4));
        assert_eq!(file.storage().read_page(1).unwrap(), TestNode(10));
        assert_eq!(file.stats().disk_writes, 1);
    }

    #[test]
    fn test_access_refreshes_recency() {
        let dir = tempdir().unwrap();
        let file = cached_file(&dir, 3);

        for id in 1..=3u64 {
            file.write(id, TestNode(id)).unwrap();
        }
        // Touch page 1 so page 2 becomes the eviction victim.
        assert_eq!(file.read(1).unwrap(), TestNode(1));
        file.write(4, TestNode(4)).unwrap();

        assert!(file.cache().contains(1));
        assert!(!file.cache().contains(2));
        assert_eq!(file.storage().read_page(2).unwrap(), TestNode(2));
    }

    #[test]
    fn test_read_through_on_miss() {
        let dir = tempdir().unwrap();
        let file = cached_file(&dir, 2);

        file.storage().write_page(5, &TestNode(55)).unwrap();
        assert_eq!(file.read(5).unwrap(), TestNode(55));
        let stats = file.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.disk_reads, 1);
        // Second read hits the cache.
        assert_eq!(file.read(5).unwrap(), TestNode(55));
        assert_eq!(file.stats().hits, 1);
    }

    #[test]
    fn test_clean_eviction_skips_write_back() {
        let dir = tempdir().unwrap();
        let file = cached_file(&dir, 1);

        file.storage().write_page(1, &TestNode(1)).unwrap();
        file.read(1).unwrap(); // resident, clean
        file.write(2, TestNode(2)).unwrap(); // evicts clean page 1
        assert_eq!(file.stats().disk_writes, 0);
    }

    #[test]
    fn test_remove_writes_back_dirty() {
        let dir = tempdir().unwrap();
        let file = cached_file(&dir, 4);

        file.write(3, TestNode(33)).unwrap();
        let removed = file.remove(3).unwrap();
        assert_eq!(removed, Some(TestNode(33)));
        assert_eq!(file.storage().read_page(3).unwrap(), TestNode(33));
        assert_eq!(file.remove(3).unwrap(), None);
    }

    #[test]
    fn test_flush_persists_all_dirty_pages() {
        let dir = tempdir().unwrap();
        let file = cached_file(&dir, 8);

        for id in 1..=5u64 {
            file.write(id, TestNode(id)).unwrap();
        }
        file.flush().unwrap();
        for id in 1..=5u64 {
            assert_eq!(file.storage().read_page(id).unwrap(), TestNode(id));
        }
        // Flushed pages are clean; a second flush writes nothing new.
        let writes = file.stats().disk_writes;
        file.flush().unwrap();
        assert_eq!(file.stats().disk_writes, writes);
    }

    #[test]
    fn test_clear_drops_without_write_back() {
        let dir = tempdir().unwrap();
        let file = cached_file(&dir, 4);

        file.write(9, TestNode(9)).unwrap();
        file.cache().clear();
        assert!(file.cache().is_empty());
        // Never written back: reading from storage fails (page never allocated
        // would read zeroes and fail to decode, or be out of bounds).
        assert!(file.storage().read_page(9).is_err() || file.stats().disk_writes == 0);
    }

    #[test]
    fn test_repeated_touches_keep_eviction_order() {
        let dir = tempdir().unwrap();
        let file = cached_file(&dir, 2);

        file.write(1, TestNode(1)).unwrap();
        file.write(2, TestNode(2)).unwrap();
        // Hammer page 1 well past the queue compaction threshold; page 2
        // must still be the one eviction victim.
        for _ in 0..200 {
            assert_eq!(file.read(1).unwrap(), TestNode(1));
        }
        file.write(3, TestNode(3)).unwrap();

        assert!(file.cache().contains(1));
        assert!(!file.cache().contains(2));
        assert!(file.cache().contains(3));
        assert_eq!(file.stats().disk_writes, 1);
    }

    #[test]
    fn test_removed_page_leaves_no_ghost_eviction() {
        let dir = tempdir().unwrap();
        let file = cached_file(&dir, 2);

        file.write(1, TestNode(1)).unwrap();
        file.write(2, TestNode(2)).unwrap();
        file.remove(1).unwrap();
        file.write(3, TestNode(3)).unwrap();
        // Page 1's stale queue entry must be skipped: the next eviction
        // takes page 2, the oldest resident page.
        file.write(4, TestNode(4)).unwrap();

        assert!(!file.cache().contains(2));
        assert!(file.cache().contains(3));
        assert!(file.cache().contains(4));
        assert_eq!(file.storage().read_page(2).unwrap(), TestNode(2));
    }

    #[test]
    fn test_rewrite_updates_in_place() {
        let dir = tempdir().unwrap();
        let file = cached_file(&dir, 2);
        file.write(1, TestNode(1)).unwrap();
        file.write(1, TestNode(100)).unwrap();
        assert_eq!(file.cache().len(), 1);
        assert_eq!(file.read(1).unwrap(), TestNode(100));
    }
}
