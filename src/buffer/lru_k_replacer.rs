use crate::common::config::FrameId;
use log::{trace, warn};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

/// How a frame was touched. Only recorded for bookkeeping today; scan
/// resistance by access type is a possible refinement.
#[derive(Debug, Clone, Copy)]
pub enum AccessType {
    Unknown,
    Lookup,
    Scan,
    Index,
}

#[derive(Debug, Clone, Copy)]
struct FrameEntry {
    /// Number of recorded accesses.
    hits: usize,
    /// Logical timestamp of the most recent access.
    timestamp: u64,
    evictable: bool,
}

#[derive(Default)]
struct ReplacerInner {
    /// Evictable frames with fewer than k accesses, ordered by timestamp.
    /// Every entry here has infinite backward k-distance, so the oldest one
    /// is always the victim.
    history: BTreeSet<(u64, FrameId)>,
    /// Evictable frames with at least k accesses, ordered by timestamp.
    buffered: BTreeSet<(u64, FrameId)>,
    entries: HashMap<FrameId, FrameEntry>,
    current_timestamp: u64,
    /// Number of evictable frames.
    curr_size: usize,
}

impl ReplacerInner {
    fn detach(&mut self, frame_id: FrameId, entry: &FrameEntry, k: usize) {
        let key = (entry.timestamp, frame_id);
        if entry.hits >= k {
            self.buffered.remove(&key);
        } else {
            self.history.remove(&key);
        }
    }

    fn attach(&mut self, frame_id: FrameId, entry: &FrameEntry, k: usize) {
        let key = (entry.timestamp, frame_id);
        if entry.hits >= k {
            self.buffered.insert(key);
        } else {
            self.history.insert(key);
        }
    }
}

/// LRUKReplacer implements the LRU-k replacement policy.
///
/// The LRU-k algorithm evicts the frame whose backward k-distance is the
/// maximum over all evictable frames. Backward k-distance is computed as the
/// difference in time between the current timestamp and the timestamp of the
/// k-th previous access.
///
/// A frame with fewer than k historical accesses has +inf backward
/// k-distance. When multiple frames have +inf backward k-distance, classical
/// LRU is used to pick the victim among them. Keeping those frames in a
/// separate ordered collection makes "infinite distance wins over finite"
/// hold by construction, with no scan over all frames.
pub struct LRUKReplacer {
    inner: Mutex<ReplacerInner>,
    replacer_size: usize,
    k: usize,
}

impl LRUKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "k must be at least 1");
        Self {
            inner: Mutex::new(ReplacerInner::default()),
            replacer_size: num_frames,
            k,
        }
    }

    /// Picks and removes the evictable frame with the largest backward
    /// k-distance. Returns `None` when no frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();

        let victim = inner
            .history
            .first()
            .or_else(|| inner.buffered.first())
            .copied();

        let (timestamp, frame_id) = victim?;
        let entry = inner.entries.remove(&frame_id).unwrap();
        inner.detach(frame_id, &entry, self.k);
        inner.curr_size -= 1;
        trace!("Evicting frame {} (last access {})", frame_id, timestamp);
        Some(frame_id)
    }

    /// Records an access to the given frame at the current logical time,
    /// creating the entry on first access.
    pub fn record_access(&self, frame_id: FrameId, _access_type: AccessType) {
        assert!(
            frame_id < self.replacer_size,
            "frame id {} out of range for replacer of size {}",
            frame_id,
            self.replacer_size
        );
        let mut inner = self.inner.lock();
        inner.current_timestamp += 1;
        let now = inner.current_timestamp;

        match inner.entries.get(&frame_id).copied() {
            Some(mut entry) => {
                if entry.evictable {
                    inner.detach(frame_id, &entry, self.k);
                }
                entry.hits += 1;
                entry.timestamp = now;
                if entry.evictable {
                    inner.attach(frame_id, &entry, self.k);
                }
                inner.entries.insert(frame_id, entry);
            }
            None => {
                let entry = FrameEntry {
                    hits: 1,
                    timestamp: now,
                    evictable: true,
                };
                inner.attach(frame_id, &entry, self.k);
                inner.entries.insert(frame_id, entry);
                inner.curr_size += 1;
            }
        }
    }

    /// Toggles whether a frame may be chosen as a victim. Unknown frames are
    /// ignored.
    pub fn set_evictable(&self, frame_id: FrameId, set_evictable: bool) {
        let mut inner = self.inner.lock();
        let Some(mut entry) = inner.entries.get(&frame_id).copied() else {
            warn!("set_evictable on unknown frame {}", frame_id);
            return;
        };
        if entry.evictable == set_evictable {
            return;
        }

        if set_evictable {
            entry.evictable = true;
            inner.attach(frame_id, &entry, self.k);
            inner.curr_size += 1;
        } else {
            inner.detach(frame_id, &entry, self.k);
            entry.evictable = false;
            inner.curr_size -= 1;
        }
        inner.entries.insert(frame_id, entry);
    }

    /// Purges a specific evictable frame along with its access history,
    /// regardless of its backward k-distance. Unknown frames are ignored;
    /// removing a pinned frame is a caller bug.
    pub fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get(&frame_id).copied() else {
            return;
        };
        assert!(
            entry.evictable,
            "cannot remove non-evictable frame {}",
            frame_id
        );
        inner.detach(frame_id, &entry, self.k);
        inner.entries.remove(&frame_id);
        inner.curr_size -= 1;
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().curr_size
    }

    /// Number of frames with recorded history, evictable or not.
    pub fn total_frames(&self) -> usize {
        self.inner.lock().entries.len()
    }
}
