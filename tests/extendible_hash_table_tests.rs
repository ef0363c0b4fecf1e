use siderite::container::extendible_hash_table::ExtendibleHashTable;
use std::sync::Arc;
use std::thread;

#[test]
fn test_insert_find_remove() {
    let table: ExtendibleHashTable<i32, String> = ExtendibleHashTable::new(4);

    for i in 0..64 {
        table.insert(i, format!("value-{}", i));
    }
    for i in 0..64 {
        assert_eq!(table.find(&i), Some(format!("value-{}", i)));
    }
    assert_eq!(table.find(&100), None);

    for i in (0..64).step_by(2) {
        assert!(table.remove(&i));
    }
    for i in 0..64 {
        let expected = if i % 2 == 0 {
            None
        } else {
            Some(format!("value-{}", i))
        };
        assert_eq!(table.find(&i), expected);
        assert_eq!(table.remove(&i), i % 2 == 1);
    }
}

#[test]
fn test_insert_overwrites() {
    let table: ExtendibleHashTable<String, i32> = ExtendibleHashTable::new(8);
    table.insert("k".to_string(), 1);
    table.insert("k".to_string(), 2);
    assert_eq!(table.find(&"k".to_string()), Some(2));
    assert_eq!(table.num_buckets(), 1);
}

#[test]
fn test_directory_doubling() {
    // bucket_size 2 with a transparent hash: inserting 1, 2, 3 overflows the
    // single initial bucket, doubling the directory once.
    let table: ExtendibleHashTable<i32, char> = ExtendibleHashTable::with_hasher(2, |k| *k as u64);

    table.insert(1, 'a');
    table.insert(2, 'b');
    assert_eq!(table.global_depth(), 0);
    assert_eq!(table.dir_size(), 1);

    table.insert(3, 'c');
    assert_eq!(table.global_depth(), 1);
    assert_eq!(table.dir_size(), 2);
    assert_eq!(table.num_buckets(), 2);
    assert_eq!(table.find(&1), Some('a'));
    assert_eq!(table.find(&2), Some('b'));
    assert_eq!(table.find(&3), Some('c'));
}

#[test]
fn test_recursive_splits_keep_items_findable() {
    // Keys that share low bits force several levels of splitting.
    let table: ExtendibleHashTable<u64, u64> = ExtendibleHashTable::with_hasher(2, |k| *k);
    for i in 0..64u64 {
        table.insert(i * 8, i); // low three bits always zero
    }
    for i in 0..64u64 {
        assert_eq!(table.find(&(i * 8)), Some(i));
    }
    // Local depth never exceeds global depth.
    let global = table.global_depth();
    for slot in 0..table.dir_size() {
        assert!(table.local_depth(slot) <= global);
    }
}

#[test]
fn test_concurrent_inserts() {
    let table: Arc<ExtendibleHashTable<i32, i32>> = Arc::new(ExtendibleHashTable::new(4));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for i in 0..100 {
                    let key = t * 100 + i;
                    table.insert(key, key * 2);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for key in 0..800 {
        assert_eq!(table.find(&key), Some(key * 2));
    }
}

#[test]
fn test_concurrent_mixed_workload() {
    let table: Arc<ExtendibleHashTable<i32, i32>> = Arc::new(ExtendibleHashTable::new(4));
    for i in 0..200 {
        table.insert(i, i);
    }

    let writer = {
        let table = Arc::clone(&table);
        thread::spawn(move || {
            for i in 200..400 {
                table.insert(i, i);
            }
        })
    };
    let remover = {
        let table = Arc::clone(&table);
        thread::spawn(move || {
            for i in 0..100 {
                assert!(table.remove(&i));
            }
        })
    };
    let reader = {
        let table = Arc::clone(&table);
        thread::spawn(move || {
            for i in 100..200 {
                assert_eq!(table.find(&i), Some(i));
            }
        })
    };

    writer.join().unwrap();
    remover.join().unwrap();
    reader.join().unwrap();

    for i in 0..100 {
        assert_eq!(table.find(&i), None);
    }
    for i in 100..400 {
        assert_eq!(table.find(&i), Some(i));
    }
}
