use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::common::config::{PageId, HEADER_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE};
use crate::concurrency::transaction::Transaction;
use crate::storage::index::index_iterator::IndexIterator;
use crate::storage::index::types::{IndexKey, IndexValue, KeyComparator};
use crate::storage::page::b_plus_tree_internal_page::BPlusTreeInternalPage;
use crate::storage::page::b_plus_tree_leaf_page::BPlusTreeLeafPage;
use crate::storage::page::b_plus_tree_page::{
    page_size_of, page_type_of, write_page_id, IndexPageType, PARENT_PAGE_ID_OFFSET,
};
use crate::storage::page::header_page::HeaderPage;
use crate::storage::page::page::{Frame, PageWriteGuard};
use log::{debug, trace, warn};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOp {
    Insert,
    Delete,
}

/// Occupancy floor for a non-root internal page. Every internal page keeps
/// at least two children, or it would stop separating anything and leave a
/// later underfull child without a sibling to rebalance against.
fn internal_floor(min_size: usize) -> usize {
    min_size.max(2)
}

/// A write-latched ancestor on the crabbing stack. `dirty` records whether
/// the page was modified in place and must be unpinned dirty.
struct Ancestor {
    frame: Arc<Frame>,
    guard: PageWriteGuard,
    dirty: bool,
}

/// The latched path produced by a pessimistic descent: the target leaf, the
/// unsafe ancestors still held (root first), and the root-id guard when the
/// root itself may still change.
struct WritePath<'a> {
    leaf_frame: Arc<Frame>,
    leaf_guard: PageWriteGuard,
    stack: Vec<Ancestor>,
    root_guard: Option<RwLockWriteGuard<'a, PageId>>,
}

/// Ordered unique-key index over the buffer pool.
///
/// Pages hold the whole tree: a header-page record maps the index name to
/// the root page id, internal pages route by separator keys, and leaves form
/// a singly-linked list in key order. Reads couple shared frame latches down
/// the tree; writes crab exclusive latches, releasing every held ancestor as
/// soon as the newly latched child is safe (cannot split on insert, cannot
/// underflow on delete). The cached root page id sits under its own lock at
/// the top of the latching order.
pub struct BPlusTree<K, V, C> {
    index_name: String,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
    root_page_id: RwLock<PageId>,
    _marker: std::marker::PhantomData<(K, V)>,
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: IndexKey,
    V: IndexValue,
    C: KeyComparator<K>,
{
    /// Opens (or registers) the index named `name`, reading its root page id
    /// from the header page.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Self {
        let name = name.into();
        assert!(leaf_max_size >= 2, "leaf pages need at least two slots");
        assert!(
            internal_max_size >= 3,
            "internal pages need at least three slots"
        );
        assert!(
            leaf_max_size <= BPlusTreeLeafPage::<K, V>::max_capacity()
                && internal_max_size <= BPlusTreeInternalPage::<K>::max_capacity(),
            "page sizes exceed what fits in {} bytes",
            PAGE_SIZE
        );

        let root_page_id = {
            let frame = bpm
                .fetch_page(HEADER_PAGE_ID)
                .unwrap_or_else(|| panic!("buffer pool exhausted while opening index {}", name));
            let mut guard = frame.write();
            let mut header = HeaderPage::new(&mut guard);
            let (root, registered) = match header.get_root_id(&name) {
                Some(root) => (root, false),
                None => {
                    header
                        .insert_record(&name, INVALID_PAGE_ID)
                        .unwrap_or_else(|e| panic!("cannot register index {}: {}", name, e));
                    (INVALID_PAGE_ID, true)
                }
            };
            drop(guard);
            bpm.unpin_page(HEADER_PAGE_ID, registered);
            root
        };
        debug!("Opened index {} with root page {}", name, root_page_id);

        Self {
            index_name: name,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            root_page_id: RwLock::new(root_page_id),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.index_name
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    /*****************************************************************************
     * SEARCH
     *****************************************************************************/

    /// Point lookup: returns the value stored under `key`, if any.
    pub fn get_value(&self, key: &K, _transaction: Option<&Transaction>) -> Option<V> {
        let root_guard = self.root_page_id.read();
        if *root_guard == INVALID_PAGE_ID {
            return None;
        }
        let mut frame = self.bpm.fetch_page(*root_guard)?;
        let mut guard = frame.read();
        drop(root_guard);

        loop {
            match page_type_of(&guard) {
                IndexPageType::InvalidIndexPage => {
                    let page_id = frame.page_id();
                    drop(guard);
                    self.bpm.unpin_page(page_id, false);
                    warn!("search hit an uninitialized page {}", page_id);
                    return None;
                }
                IndexPageType::InternalPage => {
                    let page: BPlusTreeInternalPage<K> = BPlusTreeInternalPage::from_bytes(&guard);
                    let child_id = page.value_at(page.find(key, &self.comparator));
                    let Some(child_frame) = self.bpm.fetch_page(child_id) else {
                        let page_id = frame.page_id();
                        drop(guard);
                        self.bpm.unpin_page(page_id, false);
                        return None;
                    };
                    // Latch coupling: take the child's latch, then release
                    // the parent.
                    let child_guard = child_frame.read();
                    let parent_id = frame.page_id();
                    drop(guard);
                    self.bpm.unpin_page(parent_id, false);
                    frame = child_frame;
                    guard = child_guard;
                }
                IndexPageType::LeafPage => {
                    let page: BPlusTreeLeafPage<K, V> = BPlusTreeLeafPage::from_bytes(&guard);
                    let result = page
                        .find(key, &self.comparator)
                        .map(|i| page.value_at(i).clone());
                    let page_id = frame.page_id();
                    drop(guard);
                    self.bpm.unpin_page(page_id, false);
                    return result;
                }
            }
        }
    }

    /*****************************************************************************
     * INSERTION
     *****************************************************************************/

    /// Inserts a key/value pair. Returns `false` if the key already exists
    /// (this is a unique-key index) or no frame could be obtained for the
    /// descent.
    pub fn insert(&self, key: K, value: V, _transaction: Option<&Transaction>) -> bool {
        let mut root_guard = self.root_page_id.write();
        if *root_guard == INVALID_PAGE_ID {
            return self.start_new_tree(&mut root_guard, key, value);
        }

        let Some(mut path) = self.descend_for_write(&key, WriteOp::Insert, root_guard) else {
            return false;
        };

        let mut leaf: BPlusTreeLeafPage<K, V> = BPlusTreeLeafPage::from_bytes(&path.leaf_guard);
        if leaf.find(&key, &self.comparator).is_some() {
            trace!("duplicate key rejected by index {}", self.index_name);
            self.release_leaf(path.leaf_frame, path.leaf_guard, false);
            self.release_stack(path.stack);
            return false;
        }

        if !leaf.is_full() {
            leaf.insert(key, value, &self.comparator);
            leaf.to_bytes(&mut path.leaf_guard);
            self.release_leaf(path.leaf_frame, path.leaf_guard, true);
            self.release_stack(path.stack);
            return true;
        }

        // Leaf overflow: the leaf splits, every full ancestor on the stack
        // splits after it, and a held root guard means the root itself is
        // full and the tree grows a level. Reserve every frame those steps
        // need up front, so pool exhaustion surfaces here, before anything
        // has been mutated.
        let new_root_needed = path.root_guard.is_some();
        let split_count = 1
            + if new_root_needed {
                path.stack.len()
            } else {
                path.stack.len().saturating_sub(1)
            };
        let Some(mut fresh) = self.reserve_pages(split_count + usize::from(new_root_needed)) else {
            warn!(
                "insert aborted: no free frames for a split in index {}",
                self.index_name
            );
            self.release_leaf(path.leaf_frame, path.leaf_guard, false);
            self.release_stack(path.stack);
            return false;
        };
        let header_frame = if new_root_needed {
            match self.bpm.fetch_page(HEADER_PAGE_ID) {
                Some(frame) => Some(frame),
                None => {
                    warn!(
                        "insert aborted: cannot pin the header page for a root change in index {}",
                        self.index_name
                    );
                    self.discard_reserved(fresh);
                    self.release_leaf(path.leaf_frame, path.leaf_guard, false);
                    self.release_stack(path.stack);
                    return false;
                }
            }
        } else {
            None
        };

        leaf.insert(key, value, &self.comparator);
        let new_frame = fresh
            .pop_front()
            .expect("reserved frames cover the leaf split");

        let mut new_guard = new_frame.write();
        let new_leaf = leaf.split(new_frame.page_id());
        let separator = new_leaf.key_at(0).clone();
        leaf.to_bytes(&mut path.leaf_guard);
        new_leaf.to_bytes(&mut new_guard);

        let left_id = path.leaf_frame.page_id();
        let right_id = new_frame.page_id();
        drop(path.leaf_guard);
        drop(new_guard);
        self.bpm.unpin_page(left_id, true);
        self.bpm.unpin_page(right_id, true);
        debug!(
            "split leaf {} into {} in index {}",
            left_id, right_id, self.index_name
        );

        self.insert_into_parent(
            path.stack,
            path.root_guard,
            left_id,
            separator,
            right_id,
            fresh,
            header_frame,
        );
        true
    }

    fn start_new_tree(
        &self,
        root_guard: &mut RwLockWriteGuard<'_, PageId>,
        key: K,
        value: V,
    ) -> bool {
        // Pin the header page first: starting a tree moves the root, and
        // the record update must not be able to fail halfway.
        let Some(header_frame) = self.bpm.fetch_page(HEADER_PAGE_ID) else {
            warn!(
                "cannot start index {}: no frame for the header page",
                self.index_name
            );
            return false;
        };
        let Some(frame) = self.bpm.new_page() else {
            warn!(
                "cannot start index {}: buffer pool exhausted",
                self.index_name
            );
            self.bpm.unpin_page(HEADER_PAGE_ID, false);
            return false;
        };
        let page_id = frame.page_id();
        let mut leaf: BPlusTreeLeafPage<K, V> =
            BPlusTreeLeafPage::new(page_id, INVALID_PAGE_ID, self.leaf_max_size);
        leaf.insert(key, value, &self.comparator);

        let mut guard = frame.write();
        leaf.to_bytes(&mut guard);
        drop(guard);
        self.bpm.unpin_page(page_id, true);

        **root_guard = page_id;
        self.write_root_record(&header_frame, page_id);
        self.bpm.unpin_page(HEADER_PAGE_ID, true);
        debug!("started index {} at root page {}", self.index_name, page_id);
        true
    }

    /// Propagates a split upward: links `(separator, right_id)` next to
    /// `left_id` in the nearest held ancestor, splitting ancestors in turn
    /// and growing a new root when the old root itself split. Every frame
    /// this needs was reserved in `fresh` (plus the pinned header page when
    /// the root can move) before the first page was mutated.
    #[allow(clippy::too_many_arguments)]
    fn insert_into_parent(
        &self,
        mut stack: Vec<Ancestor>,
        mut root_guard: Option<RwLockWriteGuard<'_, PageId>>,
        mut left_id: PageId,
        mut separator: K,
        mut right_id: PageId,
        mut fresh: VecDeque<Arc<Frame>>,
        header_frame: Option<Arc<Frame>>,
    ) {
        loop {
            let Some(mut ancestor) = stack.pop() else {
                // The root split: grow the tree by one level.
                let mut guard = root_guard
                    .take()
                    .expect("root guard must be held when the root splits");
                let new_root_frame = fresh
                    .pop_front()
                    .expect("reserved frames cover the root split");
                let new_root_id = new_root_frame.page_id();
                let mut new_root: BPlusTreeInternalPage<K> = BPlusTreeInternalPage::new(
                    new_root_id,
                    INVALID_PAGE_ID,
                    self.internal_max_size,
                );
                new_root.populate_new_root(left_id, separator, right_id);

                let mut root_page_guard = new_root_frame.write();
                new_root.to_bytes(&mut root_page_guard);
                drop(root_page_guard);

                self.set_parent(left_id, new_root_id);
                self.set_parent(right_id, new_root_id);
                self.bpm.unpin_page(new_root_id, true);

                *guard = new_root_id;
                let header = header_frame.expect("header page pinned for a root change");
                self.write_root_record(&header, new_root_id);
                self.bpm.unpin_page(HEADER_PAGE_ID, true);
                debug_assert!(fresh.is_empty(), "every reserved frame must be consumed");
                debug!(
                    "grew index {} with new root page {}",
                    self.index_name, new_root_id
                );
                return;
            };

            let mut parent: BPlusTreeInternalPage<K> =
                BPlusTreeInternalPage::from_bytes(&ancestor.guard);
            debug_assert!(parent.child_index(left_id).is_some());

            if !parent.is_full() {
                parent.insert(separator, right_id, &self.comparator);
                parent.to_bytes(&mut ancestor.guard);
                let parent_id = ancestor.frame.page_id();
                drop(ancestor.guard);
                self.bpm.unpin_page(parent_id, true);
                self.release_stack(stack);
                debug_assert!(fresh.is_empty(), "every reserved frame must be consumed");
                debug_assert!(header_frame.is_none(), "the root cannot move past a safe node");
                return;
            }

            // The parent is full as well: split it and keep climbing.
            parent.insert(separator, right_id, &self.comparator);
            let sibling_frame = fresh
                .pop_front()
                .expect("reserved frames cover every full ancestor");
            let mut sibling_guard = sibling_frame.write();
            let (push_up, sibling) = parent.split(sibling_frame.page_id());

            // Children that moved to the sibling record their new parent
            // while both halves are still latched.
            for &child in sibling.children() {
                self.set_parent(child, sibling.page_id());
            }

            parent.to_bytes(&mut ancestor.guard);
            sibling.to_bytes(&mut sibling_guard);

            let parent_id = ancestor.frame.page_id();
            let sibling_id = sibling_frame.page_id();
            drop(ancestor.guard);
            drop(sibling_guard);
            self.bpm.unpin_page(parent_id, true);
            self.bpm.unpin_page(sibling_id, true);
            debug!(
                "split internal {} into {} in index {}",
                parent_id, sibling_id, self.index_name
            );

            left_id = parent_id;
            separator = push_up;
            right_id = sibling_id;
        }
    }

    /*****************************************************************************
     * REMOVE
     *****************************************************************************/

    /// Deletes `key` from the index if present. An underfull leaf borrows
    /// from a sibling when it can and merges with it when it cannot; merges
    /// delete a separator from the parent, which may cascade toward the
    /// root. An internal root left with a single child is promoted away.
    pub fn remove(&self, key: &K, _transaction: Option<&Transaction>) {
        let root_guard = self.root_page_id.write();
        if *root_guard == INVALID_PAGE_ID {
            return;
        }

        let Some(mut path) = self.descend_for_write(key, WriteOp::Delete, root_guard) else {
            return;
        };

        let mut leaf: BPlusTreeLeafPage<K, V> = BPlusTreeLeafPage::from_bytes(&path.leaf_guard);
        if !leaf.remove(key, &self.comparator) {
            self.release_leaf(path.leaf_frame, path.leaf_guard, false);
            self.release_stack(path.stack);
            return;
        }

        let leaf_id = leaf.page_id();
        if leaf.is_empty() && path.stack.is_empty() {
            // Only a root leaf can empty out without a latched parent, and
            // an unsafe root leaf always kept the root-id guard. The tree is
            // empty again.
            let Some(header_frame) = self.bpm.fetch_page(HEADER_PAGE_ID) else {
                // The root change cannot be persisted right now; an empty
                // root leaf is still a valid tree.
                warn!(
                    "remove in index {} kept an empty root leaf: no frame for the header page",
                    self.index_name
                );
                leaf.to_bytes(&mut path.leaf_guard);
                self.release_leaf(path.leaf_frame, path.leaf_guard, true);
                return;
            };
            drop(path.leaf_guard);
            self.bpm.unpin_page(leaf_id, false);
            self.bpm.delete_page(leaf_id);
            let mut guard = path
                .root_guard
                .expect("an emptied root leaf holds the root guard");
            *guard = INVALID_PAGE_ID;
            self.write_root_record(&header_frame, INVALID_PAGE_ID);
            self.bpm.unpin_page(HEADER_PAGE_ID, true);
            debug!("index {} is empty again", self.index_name);
            return;
        }

        // A leaf with no latched parent is the root (or was provably safe);
        // the occupancy minimum only binds leaves that have a parent.
        if path.stack.is_empty() || leaf.size() >= leaf.min_size() {
            leaf.to_bytes(&mut path.leaf_guard);
            self.release_leaf(path.leaf_frame, path.leaf_guard, true);
            self.release_stack(path.stack);
            return;
        }

        // A held root guard means the propagation below may collapse the
        // root; pin the header page now so the change can always be
        // persisted. If that pin is unavailable, skip the rebalance: the
        // under-occupied leaf is still a valid tree and a later delete
        // retries.
        let mut header_frame = if path.root_guard.is_some() {
            match self.bpm.fetch_page(HEADER_PAGE_ID) {
                Some(frame) => Some(frame),
                None => {
                    warn!(
                        "remove in index {} skipped rebalancing: no frame for the header page",
                        self.index_name
                    );
                    leaf.to_bytes(&mut path.leaf_guard);
                    self.release_leaf(path.leaf_frame, path.leaf_guard, true);
                    self.release_stack(path.stack);
                    return;
                }
            }
        } else {
            None
        };

        // Leaf underflow: rebalance against a sibling under the same parent.
        let mut merged =
            self.rebalance_leaf(leaf, path.leaf_frame, path.leaf_guard, &mut path.stack);

        // Each merge removes a slot from the parent; walk up while parents
        // underflow in turn.
        while merged {
            let node_entry = path
                .stack
                .pop()
                .expect("a merge always has its parent latched");
            let node: BPlusTreeInternalPage<K> = BPlusTreeInternalPage::from_bytes(&node_entry.guard);
            let node_id = node.page_id();
            let node_is_root = path.stack.is_empty() && path.root_guard.is_some();

            if node_is_root {
                if node.size() == 1 {
                    // The root routes to a single child: promote it.
                    let child_id = node.value_at(0);
                    drop(node_entry.guard);
                    self.set_parent(child_id, INVALID_PAGE_ID);
                    self.bpm.unpin_page(node_id, false);
                    self.bpm.delete_page(node_id);

                    let mut guard = path.root_guard.take().expect("checked above");
                    *guard = child_id;
                    let header = header_frame
                        .take()
                        .expect("header page pinned while the root guard is held");
                    self.write_root_record(&header, child_id);
                    self.bpm.unpin_page(HEADER_PAGE_ID, true);
                    debug!(
                        "collapsed root of index {} to page {}",
                        self.index_name, child_id
                    );
                } else {
                    drop(node_entry.guard);
                    self.bpm.unpin_page(node_id, node_entry.dirty);
                }
                break;
            }

            if node.size() >= internal_floor(node.min_size()) {
                drop(node_entry.guard);
                self.bpm.unpin_page(node_id, node_entry.dirty);
                break;
            }

            merged = self.rebalance_internal(node, node_entry, &mut path.stack);
        }

        self.release_stack(path.stack);
        if header_frame.is_some() {
            self.bpm.unpin_page(HEADER_PAGE_ID, false);
        }
    }

    /// Restores minimum occupancy of an underfull leaf. Consumes the leaf
    /// latch. Returns `true` when the leaf merged with its sibling, i.e. the
    /// parent lost a slot.
    fn rebalance_leaf(
        &self,
        mut leaf: BPlusTreeLeafPage<K, V>,
        leaf_frame: Arc<Frame>,
        mut leaf_guard: PageWriteGuard,
        stack: &mut Vec<Ancestor>,
    ) -> bool {
        let parent_entry = stack
            .last_mut()
            .expect("an unsafe leaf always has its parent latched");
        let mut parent: BPlusTreeInternalPage<K> =
            BPlusTreeInternalPage::from_bytes(&parent_entry.guard);
        let leaf_index = parent
            .child_index(leaf.page_id())
            .expect("parent must reference the leaf being rebalanced");

        // Prefer the left sibling; the leftmost child borrows from the right.
        let from_left = leaf_index > 0;
        let sibling_index = if from_left {
            leaf_index - 1
        } else {
            leaf_index + 1
        };
        let sibling_id = parent.value_at(sibling_index);
        let Some(sibling_frame) = self.bpm.fetch_page(sibling_id) else {
            // Leave the leaf under-occupied rather than tearing anything:
            // lookups stay correct and a later delete retries the rebalance.
            warn!(
                "no free frame to rebalance leaf {} in index {}",
                leaf.page_id(),
                self.index_name
            );
            leaf.to_bytes(&mut leaf_guard);
            self.release_leaf(leaf_frame, leaf_guard, true);
            return false;
        };
        let mut sibling_guard = sibling_frame.write();
        let mut sibling: BPlusTreeLeafPage<K, V> = BPlusTreeLeafPage::from_bytes(&sibling_guard);

        if sibling.size() > sibling.min_size() {
            // Borrow one entry through the parent separator.
            if from_left {
                leaf.push_front(sibling.pop_back());
                parent.set_key_at(leaf_index, leaf.key_at(0).clone());
            } else {
                leaf.push_back(sibling.pop_front());
                parent.set_key_at(sibling_index, sibling.key_at(0).clone());
            }
            parent.to_bytes(&mut parent_entry.guard);
            parent_entry.dirty = true;

            trace!(
                "redistributed into leaf {} from sibling {} in index {}",
                leaf.page_id(),
                sibling_id,
                self.index_name
            );
            leaf.to_bytes(&mut leaf_guard);
            sibling.to_bytes(&mut sibling_guard);
            self.release_leaf(leaf_frame, leaf_guard, true);
            drop(sibling_guard);
            self.bpm.unpin_page(sibling_id, true);
            return false;
        }

        // Merge. The right page of the pair is emptied into the left one and
        // deleted together with its separator.
        if from_left {
            let leaf_id = leaf.page_id();
            sibling.merge_from_right(leaf);
            parent.remove_at(leaf_index);

            sibling.to_bytes(&mut sibling_guard);
            drop(sibling_guard);
            self.bpm.unpin_page(sibling_id, true);

            drop(leaf_guard);
            self.bpm.unpin_page(leaf_id, false);
            self.discard_page(leaf_id);
            trace!(
                "merged leaf {} into left sibling {} in index {}",
                leaf_id,
                sibling_id,
                self.index_name
            );
        } else {
            leaf.merge_from_right(sibling);
            parent.remove_at(sibling_index);

            let leaf_id = leaf.page_id();
            leaf.to_bytes(&mut leaf_guard);
            self.release_leaf(leaf_frame, leaf_guard, true);

            drop(sibling_guard);
            self.bpm.unpin_page(sibling_id, false);
            self.discard_page(sibling_id);
            trace!(
                "merged right sibling {} into leaf {} in index {}",
                sibling_id,
                leaf_id,
                self.index_name
            );
        }

        parent.to_bytes(&mut parent_entry.guard);
        parent_entry.dirty = true;
        true
    }

    /// Restores minimum occupancy of an underfull internal node. Consumes
    /// the node's latch. Returns `true` when the node merged with a sibling.
    fn rebalance_internal(
        &self,
        mut node: BPlusTreeInternalPage<K>,
        mut node_entry: Ancestor,
        stack: &mut Vec<Ancestor>,
    ) -> bool {
        let node_id = node.page_id();
        let parent_entry = stack
            .last_mut()
            .expect("an unsafe internal node always has its parent latched");
        let mut parent: BPlusTreeInternalPage<K> =
            BPlusTreeInternalPage::from_bytes(&parent_entry.guard);
        let node_index = parent
            .child_index(node_id)
            .expect("parent must reference the node being rebalanced");

        let from_left = node_index > 0;
        let sibling_index = if from_left {
            node_index - 1
        } else {
            node_index + 1
        };
        let sibling_id = parent.value_at(sibling_index);
        let Some(sibling_frame) = self.bpm.fetch_page(sibling_id) else {
            // The node stays under-occupied but valid; stop propagating.
            warn!(
                "no free frame to rebalance internal {} in index {}",
                node_id, self.index_name
            );
            drop(node_entry.guard);
            self.bpm.unpin_page(node_id, node_entry.dirty);
            return false;
        };
        let mut sibling_guard = sibling_frame.write();
        let mut sibling: BPlusTreeInternalPage<K> =
            BPlusTreeInternalPage::from_bytes(&sibling_guard);

        if sibling.size() > internal_floor(sibling.min_size()) {
            // Rotate one slot through the parent separator.
            if from_left {
                let (moved_key, moved_child) = sibling.remove_at(sibling.size() - 1);
                let separator = parent.key_at(node_index).clone();
                node.push_front(moved_child, separator);
                parent.set_key_at(node_index, moved_key);
                self.set_parent(moved_child, node_id);
            } else {
                let (moved_child, uncovered_key) = sibling.remove_front();
                let separator = parent.key_at(sibling_index).clone();
                node.push_back(separator, moved_child);
                parent.set_key_at(sibling_index, uncovered_key);
                self.set_parent(moved_child, node_id);
            }
            parent.to_bytes(&mut parent_entry.guard);
            parent_entry.dirty = true;

            node.to_bytes(&mut node_entry.guard);
            sibling.to_bytes(&mut sibling_guard);
            drop(node_entry.guard);
            self.bpm.unpin_page(node_id, true);
            drop(sibling_guard);
            self.bpm.unpin_page(sibling_id, true);
            trace!(
                "redistributed into internal {} from sibling {} in index {}",
                node_id,
                sibling_id,
                self.index_name
            );
            return false;
        }

        // Merge around the parent separator.
        if from_left {
            let separator = parent.key_at(node_index).clone();
            let moved = node.children().to_vec();
            sibling.merge_from_right(separator, node);
            for child in moved {
                self.set_parent(child, sibling_id);
            }
            parent.remove_at(node_index);

            sibling.to_bytes(&mut sibling_guard);
            drop(sibling_guard);
            self.bpm.unpin_page(sibling_id, true);

            drop(node_entry.guard);
            self.bpm.unpin_page(node_id, false);
            self.discard_page(node_id);
            trace!(
                "merged internal {} into left sibling {} in index {}",
                node_id,
                sibling_id,
                self.index_name
            );
        } else {
            let separator = parent.key_at(sibling_index).clone();
            let moved = sibling.children().to_vec();
            node.merge_from_right(separator, sibling);
            for child in moved {
                self.set_parent(child, node_id);
            }
            parent.remove_at(sibling_index);

            node.to_bytes(&mut node_entry.guard);
            drop(node_entry.guard);
            self.bpm.unpin_page(node_id, true);

            drop(sibling_guard);
            self.bpm.unpin_page(sibling_id, false);
            self.discard_page(sibling_id);
            trace!(
                "merged right sibling {} into internal {} in index {}",
                sibling_id,
                node_id,
                self.index_name
            );
        }

        parent.to_bytes(&mut parent_entry.guard);
        parent_entry.dirty = true;
        true
    }

    /*****************************************************************************
     * ITERATION
     *****************************************************************************/

    /// Forward iterator over every leaf entry, in key order.
    pub fn iter(&self) -> IndexIterator<K, V> {
        self.make_iterator(None)
    }

    /// Forward iterator starting at the first key `>= key`.
    pub fn iter_from(&self, key: &K) -> IndexIterator<K, V> {
        self.make_iterator(Some(key))
    }

    fn make_iterator(&self, start_key: Option<&K>) -> IndexIterator<K, V> {
        let root_guard = self.root_page_id.read();
        if *root_guard == INVALID_PAGE_ID {
            return IndexIterator::empty(Arc::clone(&self.bpm));
        }
        let Some(mut frame) = self.bpm.fetch_page(*root_guard) else {
            return IndexIterator::empty(Arc::clone(&self.bpm));
        };
        let mut guard = frame.read();
        drop(root_guard);

        loop {
            match page_type_of(&guard) {
                IndexPageType::InvalidIndexPage => {
                    let page_id = frame.page_id();
                    drop(guard);
                    self.bpm.unpin_page(page_id, false);
                    return IndexIterator::empty(Arc::clone(&self.bpm));
                }
                IndexPageType::InternalPage => {
                    let page: BPlusTreeInternalPage<K> = BPlusTreeInternalPage::from_bytes(&guard);
                    let child_id = match start_key {
                        Some(key) => page.value_at(page.find(key, &self.comparator)),
                        None => page.value_at(0),
                    };
                    let Some(child_frame) = self.bpm.fetch_page(child_id) else {
                        let page_id = frame.page_id();
                        drop(guard);
                        self.bpm.unpin_page(page_id, false);
                        return IndexIterator::empty(Arc::clone(&self.bpm));
                    };
                    let child_guard = child_frame.read();
                    let parent_id = frame.page_id();
                    drop(guard);
                    self.bpm.unpin_page(parent_id, false);
                    frame = child_frame;
                    guard = child_guard;
                }
                IndexPageType::LeafPage => {
                    let page: BPlusTreeLeafPage<K, V> = BPlusTreeLeafPage::from_bytes(&guard);
                    let start = match start_key {
                        Some(key) => page.lower_bound(key, &self.comparator),
                        None => 0,
                    };
                    return IndexIterator::new(Arc::clone(&self.bpm), frame, guard, page, start);
                }
            }
        }
    }

    /*****************************************************************************
     * UTILITIES
     *****************************************************************************/

    /// Pessimistic crabbing descent to the leaf responsible for `key`.
    /// Latches are exclusive top to bottom; whenever the newly latched node
    /// is safe for `op`, everything above it (the root-id guard included) is
    /// released. Returns `None` (with everything released) when a frame
    /// could not be fetched.
    fn descend_for_write<'a>(
        &'a self,
        key: &K,
        op: WriteOp,
        root_guard: RwLockWriteGuard<'a, PageId>,
    ) -> Option<WritePath<'a>> {
        let mut current_id = *root_guard;
        let mut root_guard = Some(root_guard);
        let mut stack: Vec<Ancestor> = Vec::new();

        loop {
            let Some(frame) = self.bpm.fetch_page(current_id) else {
                warn!(
                    "descent in index {} aborted: cannot fetch page {}",
                    self.index_name, current_id
                );
                self.release_stack(stack);
                return None;
            };
            let guard = frame.write();
            let is_root = stack.is_empty();

            match page_type_of(&guard) {
                IndexPageType::InvalidIndexPage => {
                    warn!("descent hit an uninitialized page {}", current_id);
                    drop(guard);
                    self.bpm.unpin_page(current_id, false);
                    self.release_stack(stack);
                    return None;
                }
                IndexPageType::LeafPage => {
                    let size = page_size_of(&guard);
                    let safe = match op {
                        WriteOp::Insert => size < self.leaf_max_size,
                        WriteOp::Delete if is_root => size > 1,
                        WriteOp::Delete => size > self.leaf_max_size / 2,
                    };
                    if safe {
                        self.release_stack(std::mem::take(&mut stack));
                        root_guard = None;
                    }
                    return Some(WritePath {
                        leaf_frame: frame,
                        leaf_guard: guard,
                        stack,
                        root_guard,
                    });
                }
                IndexPageType::InternalPage => {
                    let page: BPlusTreeInternalPage<K> = BPlusTreeInternalPage::from_bytes(&guard);
                    let safe = match op {
                        WriteOp::Insert => page.size() < page.max_size(),
                        WriteOp::Delete if is_root => page.size() > 2,
                        WriteOp::Delete => page.size() > internal_floor(page.min_size()),
                    };
                    if safe {
                        self.release_stack(std::mem::take(&mut stack));
                        root_guard = None;
                    }
                    current_id = page.value_at(page.find(key, &self.comparator));
                    stack.push(Ancestor {
                        frame,
                        guard,
                        dirty: false,
                    });
                }
            }
        }
    }

    fn release_leaf(&self, frame: Arc<Frame>, guard: PageWriteGuard, dirty: bool) {
        let page_id = frame.page_id();
        drop(guard);
        self.bpm.unpin_page(page_id, dirty);
    }

    fn release_stack(&self, stack: Vec<Ancestor>) {
        // Drop order within an entry matters: latch first, then the pin.
        for ancestor in stack {
            let page_id = ancestor.frame.page_id();
            let dirty = ancestor.dirty;
            drop(ancestor.guard);
            self.bpm.unpin_page(page_id, dirty);
        }
    }

    /// Rewrites a page's parent pointer in place. Parent pointers are
    /// bookkeeping only (descents are driven by the latched ancestor stack
    /// and never follow them), so a child that cannot be pinned right now
    /// is skipped rather than aborting the structural change around it.
    fn set_parent(&self, child_id: PageId, parent_id: PageId) {
        let Some(frame) = self.bpm.fetch_page(child_id) else {
            warn!(
                "could not pin page {} to update its parent pointer",
                child_id
            );
            return;
        };
        let mut guard = frame.write();
        write_page_id(&mut guard, PARENT_PAGE_ID_OFFSET, parent_id);
        drop(guard);
        self.bpm.unpin_page(child_id, true);
    }

    /// Returns a structurally unlinked page to the pool. A reader that still
    /// pins it (an in-flight iterator) keeps the frame alive; the page is
    /// unreachable from the tree either way.
    fn discard_page(&self, page_id: PageId) {
        if !self.bpm.delete_page(page_id) {
            debug!("page {} still pinned; left for the replacer", page_id);
        }
    }

    /// Persists the root page id for this index on an already-pinned header
    /// page. The caller unpins the frame dirty afterwards.
    fn write_root_record(&self, header_frame: &Frame, root_id: PageId) {
        let mut guard = header_frame.write();
        let mut header = HeaderPage::new(&mut guard);
        if !header.update_record(&self.index_name, root_id) {
            header
                .insert_record(&self.index_name, root_id)
                .unwrap_or_else(|e| panic!("cannot persist root of {}: {}", self.index_name, e));
        }
    }

    /// Pins `count` brand-new pages for an upcoming split, handing back all
    /// of them or none.
    fn reserve_pages(&self, count: usize) -> Option<VecDeque<Arc<Frame>>> {
        let mut fresh = VecDeque::with_capacity(count);
        for _ in 0..count {
            match self.bpm.new_page() {
                Some(frame) => fresh.push_back(frame),
                None => {
                    self.discard_reserved(fresh);
                    return None;
                }
            }
        }
        Some(fresh)
    }

    /// Returns reserved-but-unused pages to the pool.
    fn discard_reserved(&self, fresh: VecDeque<Arc<Frame>>) {
        for frame in fresh {
            let page_id = frame.page_id();
            self.bpm.unpin_page(page_id, false);
            self.bpm.delete_page(page_id);
        }
    }
}
