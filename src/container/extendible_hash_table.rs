use crate::container::hash_function::HashFunction;
use log::{debug, trace};
use parking_lot::{Mutex, RwLock};
use std::hash::Hash;
use std::sync::Arc;

/// One bucket of the hash table, holding up to `capacity` key/value pairs.
/// Several directory slots may share a bucket; the slots that do are exactly
/// those whose low `depth` bits match the bucket's canonical pattern.
struct Bucket<K, V> {
    depth: usize,
    capacity: usize,
    items: Mutex<Vec<(K, V)>>,
}

impl<K: Eq, V> Bucket<K, V> {
    fn new(capacity: usize, depth: usize) -> Self {
        Self {
            depth,
            capacity,
            items: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    fn find(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.items
            .lock()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Overwrites in place if the key exists; appends otherwise. Hands the
    /// pair back when the bucket is full.
    fn insert(&self, key: K, value: V) -> Result<(), (K, V)> {
        let mut items = self.items.lock();
        if let Some(slot) = items.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
            return Ok(());
        }
        if items.len() >= self.capacity {
            return Err((key, value));
        }
        items.push((key, value));
        Ok(())
    }

    fn remove(&self, key: &K) -> bool {
        let mut items = self.items.lock();
        match items.iter().position(|(k, _)| k == key) {
            Some(index) => {
                items.swap_remove(index);
                true
            }
            None => false,
        }
    }
}

struct Directory<K, V> {
    global_depth: usize,
    num_buckets: usize,
    dir: Vec<Arc<Bucket<K, V>>>,
}

/// Thread-safe extendible hash table.
///
/// The directory holds `2^global_depth` references to shared buckets, each
/// with its own local depth `<= global_depth`. A key hashes to directory
/// slot `hash & (2^global_depth - 1)`. A full bucket is split in two at one
/// greater depth, doubling the directory first when the bucket was already
/// at global depth. Buckets are never merged.
///
/// Reads take the directory latch shared, writes exclusive; the per-bucket
/// mutex is a leaf lock held only for the scan of one bucket.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    hasher: Box<dyn Fn(&K) -> u64 + Send + Sync>,
    inner: RwLock<Directory<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(bucket_size: usize) -> Self {
        let hash_fn: HashFunction<K> = HashFunction::new();
        Self::with_hasher(bucket_size, move |key| hash_fn.get_hash(key))
    }

    /// Builds a table with a caller-provided hash function. Mostly useful in
    /// tests, where a transparent hash makes bucket placement predictable.
    pub fn with_hasher<F>(bucket_size: usize, hasher: F) -> Self
    where
        F: Fn(&K) -> u64 + Send + Sync + 'static,
    {
        assert!(bucket_size >= 1, "bucket size must be at least 1");
        Self {
            bucket_size,
            hasher: Box::new(hasher),
            inner: RwLock::new(Directory {
                global_depth: 0,
                num_buckets: 1,
                dir: vec![Arc::new(Bucket::new(bucket_size, 0))],
            }),
        }
    }

    fn index_of(&self, key: &K, global_depth: usize) -> usize {
        let mask = (1u64 << global_depth) - 1;
        ((self.hasher)(key) & mask) as usize
    }

    pub fn find(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let inner = self.inner.read();
        let index = self.index_of(key, inner.global_depth);
        inner.dir[index].find(key)
    }

    /// Inserts the pair, overwriting any previous value for the key. Splits
    /// full buckets (growing the directory as needed) until the pair fits.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.write();
        let mut pending = (key, value);
        loop {
            let index = self.index_of(&pending.0, inner.global_depth);
            match inner.dir[index].insert(pending.0, pending.1) {
                Ok(()) => return,
                Err(kv) => {
                    pending = kv;
                    self.split_bucket(&mut inner, index);
                }
            }
        }
    }

    pub fn remove(&self, key: &K) -> bool {
        let inner = self.inner.write();
        let index = self.index_of(key, inner.global_depth);
        inner.dir[index].remove(key)
    }

    pub fn global_depth(&self) -> usize {
        self.inner.read().global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> usize {
        self.inner.read().dir[dir_index].depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.read().num_buckets
    }

    pub fn dir_size(&self) -> usize {
        self.inner.read().dir.len()
    }

    /// Splits the bucket referenced by directory slot `index`, called with
    /// the directory latch held exclusively.
    fn split_bucket(&self, inner: &mut Directory<K, V>, index: usize) {
        let target = Arc::clone(&inner.dir[index]);

        // A bucket already at global depth needs the directory doubled
        // before it can deepen.
        if target.depth == inner.global_depth {
            inner.global_depth += 1;
            inner.dir.extend_from_within(..);
            debug!(
                "Doubled directory: global depth {}, {} slots",
                inner.global_depth,
                inner.dir.len()
            );
        }

        let new_depth = target.depth + 1;
        let zero: Arc<Bucket<K, V>> = Arc::new(Bucket::new(self.bucket_size, new_depth));
        let one: Arc<Bucket<K, V>> = Arc::new(Bucket::new(self.bucket_size, new_depth));
        let bit = 1usize << (new_depth - 1);

        // Re-point every slot that referenced the old bucket at one of the
        // two replacements, split on the new depth's distinguishing bit.
        for i in 0..inner.dir.len() {
            if Arc::ptr_eq(&inner.dir[i], &target) {
                inner.dir[i] = if i & bit != 0 {
                    Arc::clone(&one)
                } else {
                    Arc::clone(&zero)
                };
            }
        }

        // Redistribute the old bucket's items by the same bit of their hash.
        for (k, v) in target.items.lock().drain(..) {
            let bucket = if ((self.hasher)(&k) as usize) & bit != 0 {
                &one
            } else {
                &zero
            };
            bucket.items.lock().push((k, v));
        }

        inner.num_buckets += 1;
        trace!(
            "Split bucket at slot {} to local depth {}",
            index,
            new_depth
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overwrite_in_place() {
        let table: ExtendibleHashTable<i32, String> = ExtendibleHashTable::new(4);
        table.insert(1, "a".to_string());
        table.insert(1, "b".to_string());
        assert_eq!(table.find(&1), Some("b".to_string()));
        assert_eq!(table.num_buckets(), 1);
    }

    #[test]
    fn test_split_with_transparent_hash() {
        // bucket_size 2, hash(k) = k: inserting 1, 2, 3 forces one split.
        let table: ExtendibleHashTable<i32, char> =
            ExtendibleHashTable::with_hasher(2, |k| *k as u64);
        table.insert(1, 'a');
        table.insert(2, 'b');
        assert_eq!(table.global_depth(), 0);

        table.insert(3, 'c');
        assert_eq!(table.global_depth(), 1);
        assert_eq!(table.dir_size(), 2);
        assert_eq!(table.find(&1), Some('a'));
        assert_eq!(table.find(&2), Some('b'));
        assert_eq!(table.find(&3), Some('c'));
    }

    #[test]
    fn test_local_depth_invariant() {
        let table: ExtendibleHashTable<i32, i32> =
            ExtendibleHashTable::with_hasher(1, |k| *k as u64);
        for i in 0..8 {
            table.insert(i, i * 10);
        }
        let global = table.global_depth();
        for slot in 0..table.dir_size() {
            assert!(table.local_depth(slot) <= global);
        }
        for i in 0..8 {
            assert_eq!(table.find(&i), Some(i * 10));
        }
    }

    #[test]
    fn test_remove() {
        let table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(4);
        table.insert(7, 70);
        assert!(table.remove(&7));
        assert!(!table.remove(&7));
        assert_eq!(table.find(&7), None);
    }
}
