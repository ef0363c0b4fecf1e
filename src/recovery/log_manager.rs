use crate::common::config::Lsn;
use std::sync::atomic::{AtomicI64, Ordering};

/// Write-ahead-log collaborator.
///
/// The buffer pool accepts and stores a handle so a WAL can be wired in
/// later; the storage core never invokes it itself.
pub struct LogManager {
    next_lsn: AtomicI64,
}

impl LogManager {
    pub fn new() -> Self {
        Self {
            next_lsn: AtomicI64::new(0),
        }
    }

    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}
