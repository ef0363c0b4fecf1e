use crate::common::config::{PageId, TxnId};
use parking_lot::Mutex;

/// Opaque transaction token handed through index operations.
///
/// The storage core itself does not interpret transactions; the page-id sets
/// exist so an index operation can stash pages it latched or deleted for a
/// higher layer to release once the operation commits.
pub struct Transaction {
    txn_id: TxnId,
    page_set: Mutex<Vec<PageId>>,
    deleted_page_set: Mutex<Vec<PageId>>,
}

impl Transaction {
    pub fn new(txn_id: TxnId) -> Self {
        Self {
            txn_id,
            page_set: Mutex::new(Vec::new()),
            deleted_page_set: Mutex::new(Vec::new()),
        }
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    pub fn add_into_page_set(&self, page_id: PageId) {
        self.page_set.lock().push(page_id);
    }

    pub fn take_page_set(&self) -> Vec<PageId> {
        std::mem::take(&mut *self.page_set.lock())
    }

    pub fn add_into_deleted_page_set(&self, page_id: PageId) {
        self.deleted_page_set.lock().push(page_id);
    }

    pub fn take_deleted_page_set(&self) -> Vec<PageId> {
        std::mem::take(&mut *self.deleted_page_set.lock())
    }
}
