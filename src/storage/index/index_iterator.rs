use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::common::config::INVALID_PAGE_ID;
use crate::storage::index::types::{IndexKey, IndexValue};
use crate::storage::page::b_plus_tree_leaf_page::BPlusTreeLeafPage;
use crate::storage::page::page::{Frame, PageReadGuard};
use std::sync::Arc;

struct LeafPosition<K, V> {
    frame: Arc<Frame>,
    guard: PageReadGuard,
    page: BPlusTreeLeafPage<K, V>,
    index: usize,
}

/// Forward iterator over B+Tree leaf entries.
///
/// The iterator keeps a shared latch (and pin) on exactly one leaf at a
/// time and walks the `next_page_id` chain. It normally takes the next
/// leaf's latch before letting go of the current one so no gap opens up
/// mid-scan; when that latch is contended the iterator backs off, releases
/// the current leaf first and then waits, which keeps a leaf-merge running
/// in the opposite direction from deadlocking against the scan.
pub struct IndexIterator<K, V> {
    bpm: Arc<BufferPoolManager>,
    current: Option<LeafPosition<K, V>>,
}

impl<K, V> IndexIterator<K, V>
where
    K: IndexKey,
    V: IndexValue,
{
    pub(crate) fn new(
        bpm: Arc<BufferPoolManager>,
        frame: Arc<Frame>,
        guard: PageReadGuard,
        page: BPlusTreeLeafPage<K, V>,
        index: usize,
    ) -> Self {
        Self {
            bpm,
            current: Some(LeafPosition {
                frame,
                guard,
                page,
                index,
            }),
        }
    }

    pub(crate) fn empty(bpm: Arc<BufferPoolManager>) -> Self {
        Self { bpm, current: None }
    }

    /// True once the iterator has run off the end of the leaf chain.
    pub fn is_end(&self) -> bool {
        self.current.is_none()
    }

    fn release_current(&mut self) {
        if let Some(position) = self.current.take() {
            let page_id = position.frame.page_id();
            drop(position.guard);
            self.bpm.unpin_page(page_id, false);
        }
    }

    fn advance_to_next_leaf(&mut self) {
        let Some(position) = self.current.as_ref() else {
            return;
        };
        let next_id = position.page.next_page_id();
        if next_id == INVALID_PAGE_ID {
            self.release_current();
            return;
        }
        let Some(next_frame) = self.bpm.fetch_page(next_id) else {
            self.release_current();
            return;
        };

        let next_guard = match next_frame.try_read() {
            Some(guard) => guard,
            None => {
                // Contended: back off the current latch before blocking.
                self.release_current();
                next_frame.read()
            }
        };
        let next_page = BPlusTreeLeafPage::from_bytes(&next_guard);
        self.release_current();
        self.current = Some(LeafPosition {
            frame: next_frame,
            guard: next_guard,
            page: next_page,
            index: 0,
        });
    }
}

impl<K, V> Iterator for IndexIterator<K, V>
where
    K: IndexKey,
    V: IndexValue,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        loop {
            let position = self.current.as_mut()?;
            if position.index < position.page.size() {
                let entry = (
                    position.page.key_at(position.index).clone(),
                    position.page.value_at(position.index).clone(),
                );
                position.index += 1;
                return Some(entry);
            }
            self.advance_to_next_leaf();
        }
    }
}

impl<K, V> Drop for IndexIterator<K, V> {
    fn drop(&mut self) {
        if let Some(position) = self.current.take() {
            let page_id = position.frame.page_id();
            drop(position.guard);
            self.bpm.unpin_page(page_id, false);
        }
    }
}
