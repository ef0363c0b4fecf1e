use crate::common::config::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use log::debug;
use parking_lot::{RawRwLock, RwLock};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

pub type PageData = [u8; PAGE_SIZE];

/// Owned read guard over a frame's payload. Holding one is the read latch
/// on the page data; dropping it releases the latch.
pub type PageReadGuard = parking_lot::lock_api::ArcRwLockReadGuard<RawRwLock, PageData>;
/// Owned write guard over a frame's payload.
pub type PageWriteGuard = parking_lot::lock_api::ArcRwLockWriteGuard<RawRwLock, PageData>;

/// One slot of the buffer pool.
///
/// A frame wraps the in-memory copy of whatever disk page currently occupies
/// the slot, together with the bookkeeping the pool needs: the occupying
/// page id (`INVALID_PAGE_ID` when the slot is free), a pin count, and a
/// dirty bit. The bookkeeping fields are only mutated while the pool latch
/// is held; the payload bytes are guarded separately by the per-frame
/// reader/writer latch so that long page operations never block the pool.
pub struct Frame {
    frame_id: FrameId,
    page_id: AtomicI32,
    pin_count: AtomicI32,
    is_dirty: AtomicBool,
    data: Arc<RwLock<PageData>>,
}

impl Frame {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicI32::new(INVALID_PAGE_ID),
            pin_count: AtomicI32::new(0),
            is_dirty: AtomicBool::new(false),
            data: Arc::new(RwLock::new([0; PAGE_SIZE])),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn page_id(&self) -> PageId {
        self.page_id.load(Ordering::Acquire)
    }

    pub fn pin_count(&self) -> i32 {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Acquires the read latch on the page data. The caller must hold a pin
    /// on the page for the whole time the guard is alive.
    pub fn read(&self) -> PageReadGuard {
        RwLock::read_arc(&self.data)
    }

    /// Acquires the read latch without blocking, if it is free.
    pub fn try_read(&self) -> Option<PageReadGuard> {
        RwLock::try_read_arc(&self.data)
    }

    /// Acquires the write latch on the page data. The caller must hold a pin
    /// on the page for the whole time the guard is alive.
    pub fn write(&self) -> PageWriteGuard {
        RwLock::write_arc(&self.data)
    }

    pub(crate) fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id, Ordering::Release);
    }

    pub(crate) fn set_dirty(&self, is_dirty: bool) {
        self.is_dirty.store(is_dirty, Ordering::Release);
    }

    pub(crate) fn set_pin_count(&self, pin_count: i32) {
        self.pin_count.store(pin_count, Ordering::Release);
    }

    pub(crate) fn increment_pin_count(&self) -> i32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn decrement_pin_count(&self) -> i32 {
        self.pin_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Zeroes the payload and clears the bookkeeping. Called with the pool
    /// latch held, on a frame no client holds a pin on.
    pub(crate) fn reset(&self) {
        self.data.write().fill(0);
        self.page_id.store(INVALID_PAGE_ID, Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        debug!("Reset memory for frame {}", self.frame_id);
    }
}
