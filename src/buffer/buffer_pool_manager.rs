use crate::buffer::lru_k_replacer::{AccessType, LRUKReplacer};
use crate::common::config::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::container::extendible_hash_table::ExtendibleHashTable;
use crate::recovery::log_manager::LogManager;
use crate::storage::disk::disk_manager::DiskManager;
use crate::storage::page::page::{Frame, PageData};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

const PAGE_TABLE_BUCKET_SIZE: usize = 32;

struct PoolInner {
    free_list: VecDeque<FrameId>,
}

/// BufferPoolManager caches disk pages in a fixed set of in-memory frames.
///
/// Clients fetch a page to pin its frame, work against the frame's payload
/// under the per-frame reader/writer latch, and unpin when done; a frame
/// whose pin count reaches zero becomes a candidate for eviction through the
/// LRU-K replacer. The page table mapping resident page ids to frames is an
/// extendible hash table.
///
/// The pool latch covers bookkeeping only: the free list, the page table,
/// the replacer, and frame metadata. Payload bytes are covered by the
/// per-frame latch, which clients must only hold while the page is pinned
/// and must release before unpinning.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<Arc<Frame>>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LRUKReplacer,
    inner: Mutex<PoolInner>,
    disk: Arc<dyn DiskManager>,
    /// Stored for future WAL integration; never invoked by the pool.
    #[allow(dead_code)]
    log_manager: Option<Arc<LogManager>>,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        replacer_k: usize,
        disk: Arc<dyn DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        assert!(pool_size >= 1, "pool must hold at least one frame");
        Self {
            pool_size,
            frames: (0..pool_size).map(|i| Arc::new(Frame::new(i))).collect(),
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            replacer: LRUKReplacer::new(pool_size, replacer_k),
            inner: Mutex::new(PoolInner {
                free_list: (0..pool_size).collect(),
            }),
            disk,
            log_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Creates a brand-new page, pins it into a frame and returns the frame.
    /// The frame comes back zeroed, with pin count 1 and the dirty bit
    /// clear. Returns `None` when every frame is pinned.
    pub fn new_page(&self) -> Option<Arc<Frame>> {
        let mut inner = self.inner.lock();
        let Some(frame_id) = self.acquire_victim_frame(&mut inner) else {
            warn!("new_page failed: all frames are pinned");
            return None;
        };

        let frame = &self.frames[frame_id];
        let page_id = self.disk.allocate_page();
        frame.reset();
        frame.set_page_id(page_id);
        frame.set_pin_count(1);
        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id, AccessType::Lookup);
        self.replacer.set_evictable(frame_id, false);

        debug!("Created page {} in frame {}", page_id, frame_id);
        Some(Arc::clone(frame))
    }

    /// Pins the requested page, reading it from disk if it is not already
    /// resident, and returns its frame. Returns `None` when the page would
    /// need a frame and every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Option<Arc<Frame>> {
        if page_id == INVALID_PAGE_ID {
            return None;
        }
        let mut inner = self.inner.lock();

        // Resident: pin and return without touching the disk.
        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id];
            frame.increment_pin_count();
            self.replacer.record_access(frame_id, AccessType::Lookup);
            self.replacer.set_evictable(frame_id, false);
            return Some(Arc::clone(frame));
        }

        let Some(frame_id) = self.acquire_victim_frame(&mut inner) else {
            warn!("fetch_page({}) failed: all frames are pinned", page_id);
            return None;
        };

        let frame = &self.frames[frame_id];
        frame.reset();
        // Disk I/O happens into a local buffer; the frame latch is taken
        // only for the copy afterwards.
        let mut data = [0u8; PAGE_SIZE];
        self.read_from_disk(page_id, &mut data);
        *frame.write() = data;
        frame.set_page_id(page_id);
        frame.set_pin_count(1);
        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id, AccessType::Lookup);
        self.replacer.set_evictable(frame_id, false);

        debug!("Fetched page {} into frame {}", page_id, frame_id);
        Some(Arc::clone(frame))
    }

    /// Drops one pin on the page. `is_dirty` is sticky: passing `true`
    /// marks the frame dirty, passing `false` leaves the current dirty bit
    /// alone. Fails when the page is not resident or not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _inner = self.inner.lock();
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id];
        if frame.pin_count() <= 0 {
            return false;
        }

        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.decrement_pin_count() == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Writes the page's current bytes to disk and clears the dirty bit,
    /// regardless of pin count. Fails for `INVALID_PAGE_ID` or a
    /// non-resident page.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        if page_id == INVALID_PAGE_ID {
            return false;
        }
        let frame_id = {
            let _inner = self.inner.lock();
            match self.page_table.find(&page_id) {
                Some(frame_id) => frame_id,
                None => return false,
            }
        };
        self.flush_frame(page_id, frame_id);
        true
    }

    /// Flushes every resident page.
    pub fn flush_all_pages(&self) {
        let resident: Vec<(PageId, FrameId)> = {
            let _inner = self.inner.lock();
            self.frames
                .iter()
                .filter(|f| f.page_id() != INVALID_PAGE_ID)
                .map(|f| (f.page_id(), f.frame_id()))
                .collect()
        };
        for (page_id, frame_id) in resident {
            self.flush_frame(page_id, frame_id);
        }
    }

    /// Removes the page from the pool and hands its id back to the disk
    /// manager. Returns `true` if the page was not resident to begin with,
    /// `false` if it is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut inner = self.inner.lock();
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return true;
        };
        let frame = &self.frames[frame_id];
        if frame.pin_count() > 0 {
            return false;
        }

        if frame.is_dirty() {
            // Snapshot under the latch, write after releasing it. The page
            // is unpinned, so the latch is free and the pool latch keeps
            // anyone from re-dirtying the bytes before the write lands.
            let snapshot = *frame.read();
            self.write_to_disk(page_id, &snapshot);
        }
        self.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        frame.reset();
        inner.free_list.push_back(frame_id);
        self.disk.deallocate_page(page_id);

        info!("Deleted page {} from frame {}", page_id, frame_id);
        true
    }

    /// Finds a frame to put a page in: the free list first, then a victim
    /// from the replacer. Writes back a dirty occupant and unmaps it.
    /// Called with the pool latch held.
    fn acquire_victim_frame(&self, inner: &mut PoolInner) -> Option<FrameId> {
        let frame_id = match inner.free_list.pop_front() {
            Some(frame_id) => frame_id,
            None => self.replacer.evict()?,
        };

        let frame = &self.frames[frame_id];
        let old_page_id = frame.page_id();
        if old_page_id != INVALID_PAGE_ID {
            if frame.is_dirty() {
                // Snapshot under the latch, write after releasing it. The
                // victim is unpinned, so the latch is free, and the pool
                // latch keeps the frame from being handed out again before
                // the write lands.
                let snapshot = *frame.read();
                self.write_to_disk(old_page_id, &snapshot);
            }
            self.page_table.remove(&old_page_id);
            debug!("Evicted page {} from frame {}", old_page_id, frame_id);
        }
        Some(frame_id)
    }

    /// Flush body shared by `flush_page` and `flush_all_pages`. Pins the
    /// frame, then performs the disk write under the frame's read latch
    /// with the pool latch released. Keeping the latch across the write is
    /// what makes concurrent flushes write identical bytes and keeps a
    /// writer's unpin from racing the dirty-bit clear; the price is that
    /// flushing a page someone holds write-latched waits for that writer
    /// first (the pool latch stays free, so the writer can finish).
    fn flush_frame(&self, page_id: PageId, frame_id: FrameId) {
        {
            let _inner = self.inner.lock();
            // Re-check residency: the page may have been evicted between the
            // caller's lookup and here.
            match self.page_table.find(&page_id) {
                Some(f) if f == frame_id => {}
                _ => return,
            }
            let frame = &self.frames[frame_id];
            frame.increment_pin_count();
            self.replacer.set_evictable(frame_id, false);
        }

        let frame = &self.frames[frame_id];
        {
            let data = frame.read();
            self.write_to_disk(page_id, &data);
            // Still under the read latch: nobody can have re-dirtied the
            // bytes we just wrote.
            frame.set_dirty(false);
        }

        self.unpin_page(page_id, false);
    }

    fn read_from_disk(&self, page_id: PageId, data: &mut PageData) {
        if let Err(e) = self.disk.read_page(page_id, data) {
            error!("I/O failure reading page {}: {}", page_id, e);
            panic!("disk read failed for page {}: {}", page_id, e);
        }
    }

    fn write_to_disk(&self, page_id: PageId, data: &PageData) {
        if let Err(e) = self.disk.write_page(page_id, data) {
            error!("I/O failure writing page {}: {}", page_id, e);
            panic!("disk write failed for page {}: {}", page_id, e);
        }
    }
}
