use crate::common::config::{PageId, PAGE_SIZE};
use log::{debug, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Result as IoResult;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};

/// Blocking, thread-safe block I/O abstraction under the buffer pool.
///
/// Pages are opaque fixed-size byte arrays addressed by page id. Page ids
/// handed out by `allocate_page` are monotonic and never reused until the
/// caller deallocates them. Page 0 is reserved for the header page and is
/// never returned by `allocate_page`.
pub trait DiskManager: Send + Sync {
    fn read_page(&self, page_id: PageId, page_data: &mut [u8; PAGE_SIZE]) -> IoResult<()>;
    fn write_page(&self, page_id: PageId, page_data: &[u8; PAGE_SIZE]) -> IoResult<()>;
    fn allocate_page(&self) -> PageId;
    fn deallocate_page(&self, page_id: PageId);
}

/// Disk manager backed by a single database file. One page occupies one
/// `PAGE_SIZE`-aligned slot at offset `page_id * PAGE_SIZE`.
pub struct FileDiskManager {
    file_name: String,
    db_io: Mutex<File>,
    next_page_id: AtomicI32,
    num_writes: AtomicI32,
}

impl FileDiskManager {
    pub fn new(db_file: impl AsRef<Path>) -> IoResult<Self> {
        let path = db_file.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        // Data pages start after the reserved header page.
        let existing_pages = (file.metadata()?.len() as usize).div_ceil(PAGE_SIZE);
        let next_page_id = existing_pages.max(1) as PageId;

        Ok(Self {
            file_name: path.to_string_lossy().into_owned(),
            db_io: Mutex::new(file),
            next_page_id: AtomicI32::new(next_page_id),
            num_writes: AtomicI32::new(0),
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Number of page writes issued so far.
    pub fn num_writes(&self) -> i32 {
        self.num_writes.load(Ordering::SeqCst)
    }

    pub fn shut_down(&self) -> IoResult<()> {
        self.db_io.lock().sync_all()
    }
}

impl DiskManager for FileDiskManager {
    fn read_page(&self, page_id: PageId, page_data: &mut [u8; PAGE_SIZE]) -> IoResult<()> {
        let offset = page_id as u64 * PAGE_SIZE as u64;
        trace!("Reading page {} at offset {}", page_id, offset);

        let mut db_io = self.db_io.lock();
        db_io.seek(SeekFrom::Start(offset))?;
        match db_io.read_exact(page_data) {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Reading past the end of the file yields a zeroed page; the
                // slot has simply never been written.
                page_data.fill(0);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn write_page(&self, page_id: PageId, page_data: &[u8; PAGE_SIZE]) -> IoResult<()> {
        let offset = page_id as u64 * PAGE_SIZE as u64;
        trace!("Writing page {} at offset {}", page_id, offset);

        let mut db_io = self.db_io.lock();
        db_io.seek(SeekFrom::Start(offset))?;
        db_io.write_all(page_data)?;
        db_io.flush()?;
        self.num_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    fn deallocate_page(&self, page_id: PageId) {
        // The slot stays in the file; the id is simply free for future use.
        debug!("Deallocated page {}", page_id);
    }
}

/// In-memory disk manager. Replicates the utility of `FileDiskManager`
/// without touching the filesystem; primarily used for data structure
/// testing.
pub struct MemoryDiskManager {
    data: RwLock<HashMap<PageId, Box<[u8; PAGE_SIZE]>>>,
    next_page_id: AtomicI32,
}

impl MemoryDiskManager {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            next_page_id: AtomicI32::new(1),
        }
    }
}

impl Default for MemoryDiskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskManager for MemoryDiskManager {
    fn read_page(&self, page_id: PageId, page_data: &mut [u8; PAGE_SIZE]) -> IoResult<()> {
        let data = self.data.read();
        match data.get(&page_id) {
            Some(page) => page_data.copy_from_slice(&page[..]),
            None => {
                // Same contract as the file manager: untouched slots read
                // back as zeroes.
                warn!("Reading never-written page {}", page_id);
                page_data.fill(0);
            }
        }
        Ok(())
    }

    fn write_page(&self, page_id: PageId, page_data: &[u8; PAGE_SIZE]) -> IoResult<()> {
        let mut data = self.data.write();
        data.insert(page_id, Box::new(*page_data));
        Ok(())
    }

    fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    fn deallocate_page(&self, page_id: PageId) {
        debug!("Deallocated page {}", page_id);
    }
}
