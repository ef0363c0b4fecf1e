mod common;

use common::TestContext;
use rand::Rng;
use siderite::common::config::{PageId, PAGE_SIZE};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

#[test]
fn binary_data_test() {
    let ctx = TestContext::new("binary_data_test", 5, 2);
    let bpm = &ctx.bpm;

    // Scenario: the buffer pool is empty; we should be able to create a new
    // page and write arbitrary binary content into it.
    let page0 = bpm.new_page().expect("failed to create a new page");
    let page0_id = page0.page_id();

    let mut rng = rand::thread_rng();
    let mut random_binary_data = [0u8; PAGE_SIZE];
    rng.fill(&mut random_binary_data[..]);
    random_binary_data[PAGE_SIZE / 2] = 0;
    random_binary_data[PAGE_SIZE - 1] = 0;

    {
        let mut data = page0.write();
        data.copy_from_slice(&random_binary_data);
    }

    // Scenario: we can keep creating pages until the pool is full.
    let mut pinned = vec![];
    for _ in 1..5 {
        pinned.push(bpm.new_page().expect("pool should still have frames"));
    }

    // Scenario: once the pool is full of pinned pages, creation fails.
    for _ in 0..5 {
        assert!(bpm.new_page().is_none());
    }

    // Scenario: after unpinning everything dirty, new pages fit again.
    assert!(bpm.unpin_page(page0_id, true));
    for frame in &pinned {
        assert!(bpm.unpin_page(frame.page_id(), true));
    }
    for _ in 0..5 {
        let frame = bpm.new_page().expect("pool should have evictable frames");
        assert!(bpm.unpin_page(frame.page_id(), false));
    }

    // Scenario: page 0 went through eviction; its bytes come back intact.
    let page0 = bpm.fetch_page(page0_id).expect("failed to fetch page 0");
    {
        let data = page0.read();
        assert_eq!(&data[..], &random_binary_data[..], "data mismatch after fetching");
    }
    assert!(bpm.unpin_page(page0_id, false));
}

#[test]
fn pool_exhaustion_and_reuse() {
    // Scenario 1 from the design: pool of three frames fills up, then one
    // unpin makes room for exactly one more page.
    let ctx = TestContext::new("pool_exhaustion_and_reuse", 3, 2);
    let bpm = &ctx.bpm;

    let p1 = bpm.new_page().expect("first page");
    let _p2 = bpm.new_page().expect("second page");
    let _p3 = bpm.new_page().expect("third page");
    assert!(bpm.new_page().is_none(), "all frames pinned");

    let p1_id = p1.page_id();
    {
        let mut data = p1.write();
        data[0..4].copy_from_slice(b"old!");
    }
    assert!(bpm.unpin_page(p1_id, true));

    let writes_before = ctx.disk.num_writes();
    let p4 = bpm.new_page().expect("one frame became evictable");
    assert_ne!(p4.page_id(), p1_id, "a fresh page id is allocated");
    assert!(
        ctx.disk.num_writes() > writes_before,
        "evicting dirty p1 must write it back"
    );
}

#[test]
fn dirty_eviction_persists() {
    // Pool of one frame: creating a second page forces the first one out,
    // and its dirty contents must survive the round trip.
    let ctx = TestContext::new("dirty_eviction_persists", 1, 2);
    let bpm = &ctx.bpm;

    let p1 = bpm.new_page().expect("first page");
    let p1_id = p1.page_id();
    {
        let mut data = p1.write();
        data[0] = b'X';
    }
    assert!(bpm.unpin_page(p1_id, true));

    let p2 = bpm.new_page().expect("evicts p1");
    assert!(bpm.unpin_page(p2.page_id(), false));

    let p1 = bpm.fetch_page(p1_id).expect("p1 comes back from disk");
    assert_eq!(p1.read()[0], b'X');
    assert!(bpm.unpin_page(p1_id, false));
}

#[test]
fn unpin_semantics() {
    let ctx = TestContext::new("unpin_semantics", 3, 2);
    let bpm = &ctx.bpm;

    // Unpinning a page that is not resident fails.
    assert!(!bpm.unpin_page(99, false));

    let page = bpm.new_page().expect("new page");
    let page_id = page.page_id();
    assert_eq!(page.pin_count(), 1);

    // Two fetches stack pins; the pin count tracks fetches minus unpins.
    let again = bpm.fetch_page(page_id).expect("resident fetch");
    assert_eq!(again.pin_count(), 2);
    assert!(bpm.unpin_page(page_id, false));
    assert_eq!(page.pin_count(), 1);
    assert!(bpm.unpin_page(page_id, true));
    assert_eq!(page.pin_count(), 0);

    // No pins left: another unpin fails.
    assert!(!bpm.unpin_page(page_id, false));

    // Dirty is sticky: the unpin(false) above must not have cleared the
    // dirty bit set by unpin(true).
    assert!(page.is_dirty());
    assert!(bpm.flush_page(page_id));
    assert!(!page.is_dirty());
}

#[test]
fn flush_semantics() {
    let ctx = TestContext::new("flush_semantics", 3, 2);
    let bpm = &ctx.bpm;

    assert!(!bpm.flush_page(siderite::common::config::INVALID_PAGE_ID));
    assert!(!bpm.flush_page(1234), "flushing a non-resident page fails");

    let page = bpm.new_page().expect("new page");
    let page_id = page.page_id();
    {
        let mut data = page.write();
        data[7] = 42;
    }
    // Flush works on a pinned page and clears dirty.
    assert!(bpm.unpin_page(page_id, true));
    let _repin = bpm.fetch_page(page_id).expect("refetch");
    assert!(bpm.flush_page(page_id));
    assert!(!page.is_dirty());

    ctx.bpm.flush_all_pages();
}

#[test]
fn delete_requires_unpinned() {
    // Scenario 6 from the design: delete fails while pinned, succeeds after
    // the unpin, and the page table entry is really gone.
    let ctx = TestContext::new("delete_requires_unpinned", 3, 2);
    let bpm = &ctx.bpm;

    let page = bpm.new_page().expect("new page");
    let page_id = page.page_id();
    {
        let mut data = page.write();
        data[0..5].copy_from_slice(b"stale");
    }

    assert!(!bpm.delete_page(page_id), "pinned page cannot be deleted");
    assert!(bpm.unpin_page(page_id, false));
    assert!(bpm.delete_page(page_id));

    // Deleting a non-resident page reports success.
    assert!(bpm.delete_page(page_id));

    // The bytes were never flushed (the page was not dirty), so a re-fetch
    // reads the zeroed disk slot rather than the stale frame contents.
    let refetched = bpm.fetch_page(page_id).expect("fetch after delete");
    assert_eq!(&refetched.read()[0..5], &[0u8; 5]);
}

#[test]
fn concurrent_fetch_and_unpin() {
    let ctx = TestContext::new("concurrent_fetch_and_unpin", 16, 2);
    let bpm = Arc::clone(&ctx.bpm);

    // Seed a handful of pages.
    let mut page_ids: Vec<PageId> = vec![];
    for i in 0..8u8 {
        let page = bpm.new_page().expect("seed page");
        {
            let mut data = page.write();
            data[0] = i;
        }
        page_ids.push(page.page_id());
        assert!(bpm.unpin_page(page.page_id(), true));
    }

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let bpm = Arc::clone(&bpm);
            let page_ids = page_ids.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    for (i, &page_id) in page_ids.iter().enumerate() {
                        let frame = bpm.fetch_page(page_id).expect("fetch");
                        {
                            let data = frame.read();
                            assert_eq!(data[0], i as u8);
                        }
                        assert!(bpm.unpin_page(page_id, false));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Every pin was matched by an unpin, so all frames are evictable again.
    let mut seen = HashSet::new();
    for _ in 0..8 {
        let page = bpm.new_page().expect("pool fully reusable");
        assert!(seen.insert(page.page_id()));
        assert!(bpm.unpin_page(page.page_id(), false));
    }
}
