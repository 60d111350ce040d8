//! Search tree integration tests.
//!
//! Covers the tree end to end through the tiering pool:
//! - upsert round trips over shuffled keys
//! - remove, rebalance and compaction
//! - ordered bulk load height
//! - browser bounds, probes and mutation while browsing
//! - pages spilled to disk
//! - spill store growth and storage faults

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::tempdir;

use strata_buffer::{BufferPool, BufferPoolConfig};
use strata_common::{TreeConfig, Tuple, TypeId, Value};
use strata_index::{Direction, InsertMode, KeyComparator, STree, TupleBrowser};
use strata_storage::{FileStorageManager, StorageManager};

// =============================================================================
// Helpers
// =============================================================================

fn create_test_tree(page_size: usize, threshold: usize, pool: &BufferPool) -> STree {
    let config = TreeConfig {
        page_size,
        leaf_batch_threshold: threshold,
        seed: 1234,
    };
    STree::new(
        "stree",
        vec![TypeId::Int64, TypeId::Varchar],
        1,
        Arc::new(KeyComparator::ascending(1)),
        Arc::new(pool.clone()),
        &config,
    )
    .unwrap()
}

fn row(k: i64, v: &str) -> Tuple {
    Tuple::new(vec![Value::Int64(k), Value::Varchar(v.to_string())])
}

fn key(k: i64) -> Vec<Value> {
    vec![Value::Int64(k)]
}

fn key_of(tuple: &Tuple) -> i64 {
    tuple.get(0).and_then(Value::as_i64).unwrap()
}

fn collect_keys(browser: &mut TupleBrowser, tree: &STree) -> Vec<i64> {
    let mut keys = Vec::new();
    while let Some(tuple) = browser.next(tree).unwrap() {
        keys.push(key_of(&tuple));
    }
    keys
}

// =============================================================================
// Insert and lookup
// =============================================================================

#[test]
fn test_update_round_trip_shuffled() {
    let pool = BufferPool::in_memory(1_000_000);
    let mut tree = create_test_tree(16, 8, &pool);
    let mut keys: Vec<i64> = (0..2000).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(42));

    for &k in &keys {
        assert!(tree.insert(row(k, "a"), InsertMode::Update, None).unwrap().is_none());
    }
    assert_eq!(tree.row_count(), 2000);
    tree.verify().unwrap();

    for &k in &keys {
        assert_eq!(tree.find(&key(k)).unwrap(), Some(row(k, "a")));
    }

    for &k in keys.iter().take(500) {
        let old = tree.insert(row(k, "b"), InsertMode::Update, None).unwrap();
        assert_eq!(old, Some(row(k, "a")));
    }
    assert_eq!(tree.row_count(), 2000);
    for &k in keys.iter().take(500) {
        assert_eq!(tree.find(&key(k)).unwrap(), Some(row(k, "b")));
    }
    assert!(tree.find(&key(-1)).unwrap().is_none());
    assert!(tree.find(&key(2000)).unwrap().is_none());
}

#[test]
fn test_ordered_load_height() {
    let pool = BufferPool::in_memory(10_000);
    let mut tree = create_test_tree(4, 16, &pool);
    for k in 0..64 {
        tree.insert(row(k, "x"), InsertMode::Ordered, None).unwrap();
    }
    tree.verify().unwrap();
    // at most three index levels above the leaf level
    assert!(tree.height() <= 4, "height {}", tree.height());
    for k in 0..64 {
        assert!(tree.find(&key(k)).unwrap().is_some());
    }
}

#[test]
fn test_random_height_tracks_page_size() {
    let pool = BufferPool::in_memory(1_000_000);
    let mut tree = create_test_tree(16, 32, &pool);
    let mut rng = StdRng::seed_from_u64(9);
    for _ in 0..20_000 {
        let k = rng.gen_range(0..1_000_000);
        tree.insert(row(k, "r"), InsertMode::New, None).unwrap();
    }
    tree.verify().unwrap();
    // log16(20000) is about 3.6
    assert!(tree.height() >= 2 && tree.height() <= 8, "height {}", tree.height());
}

// =============================================================================
// Remove
// =============================================================================

#[test]
fn test_remove_then_find() {
    let pool = BufferPool::in_memory(1_000_000);
    let mut tree = create_test_tree(8, 4, &pool);
    let mut keys: Vec<i64> = (0..1000).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(3));
    for &k in &keys {
        tree.insert(row(k, "v"), InsertMode::New, None).unwrap();
    }

    let (gone, kept) = keys.split_at(600);
    for &k in gone {
        assert_eq!(tree.remove(&key(k)).unwrap(), Some(row(k, "v")));
        assert!(tree.remove(&key(k)).unwrap().is_none());
    }
    tree.verify().unwrap();
    assert_eq!(tree.row_count(), 400);
    for &k in gone {
        assert!(tree.find(&key(k)).unwrap().is_none());
    }
    for &k in kept {
        assert_eq!(tree.find(&key(k)).unwrap(), Some(row(k, "v")));
    }

    for &k in kept {
        tree.remove(&key(k)).unwrap();
    }
    assert_eq!(tree.row_count(), 0);
    assert_eq!(tree.height(), 1);
    assert_eq!(pool.stats().total_batches, 0);
}

#[test]
fn test_mixed_operations_match_model() {
    let pool = BufferPool::in_memory(1_000_000);
    let mut tree = create_test_tree(8, 4, &pool);
    let mut model: BTreeMap<i64, String> = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(2024);

    for step in 0..5000 {
        let k = rng.gen_range(0..400);
        match rng.gen_range(0..3) {
            0 => {
                let v = format!("n{}", step);
                let existing = tree.insert(row(k, &v), InsertMode::New, None).unwrap();
                assert_eq!(existing.is_some(), model.contains_key(&k));
                model.entry(k).or_insert(v);
            }
            1 => {
                let v = format!("u{}", step);
                tree.insert(row(k, &v), InsertMode::Update, None).unwrap();
                model.insert(k, v);
            }
            _ => {
                let removed = tree.remove(&key(k)).unwrap();
                assert_eq!(removed.is_some(), model.remove(&k).is_some());
            }
        }
    }
    tree.verify().unwrap();
    assert_eq!(tree.row_count(), model.len() as u64);

    let scanned: Vec<Tuple> = {
        let mut browser = TupleBrowser::full_scan(Direction::Ascending);
        let mut out = Vec::new();
        while let Some(t) = browser.next(&tree).unwrap() {
            out.push(t);
        }
        out
    };
    let expected: Vec<Tuple> = model.iter().map(|(k, v)| row(*k, v)).collect();
    assert_eq!(scanned, expected);
}

// =============================================================================
// Browser
// =============================================================================

#[test]
fn test_browser_bounds() {
    let pool = BufferPool::in_memory(100_000);
    let mut tree = create_test_tree(8, 4, &pool);
    let mut keys: Vec<i64> = (1..=100).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(1));
    for k in keys {
        tree.insert(row(k, "b"), InsertMode::New, None).unwrap();
    }

    let mut asc = TupleBrowser::range(Some(key(10)), Some(key(20)), Direction::Ascending);
    assert_eq!(collect_keys(&mut asc, &tree), (10..=20).collect::<Vec<_>>());

    let mut desc = TupleBrowser::range(Some(key(10)), Some(key(20)), Direction::Descending);
    assert_eq!(collect_keys(&mut desc, &tree), (10..=20).rev().collect::<Vec<_>>());

    let mut open_low = TupleBrowser::range(None, Some(key(3)), Direction::Ascending);
    assert_eq!(collect_keys(&mut open_low, &tree), vec![1, 2, 3]);

    let mut open_high = TupleBrowser::range(Some(key(98)), None, Direction::Descending);
    assert_eq!(collect_keys(&mut open_high, &tree), vec![100, 99, 98]);

    // bounds between stored keys
    tree.remove(&key(10)).unwrap();
    let mut gap = TupleBrowser::range(Some(key(10)), Some(key(12)), Direction::Ascending);
    assert_eq!(collect_keys(&mut gap, &tree), vec![11, 12]);
}

#[test]
fn test_browser_probes() {
    let pool = BufferPool::in_memory(100_000);
    let mut tree = create_test_tree(4, 4, &pool);
    for k in (0..200).step_by(2) {
        tree.insert(row(k, "p"), InsertMode::Ordered, None).unwrap();
    }

    let probes: Vec<Vec<Value>> = [4, 5, 50, 51, 198].iter().map(|k| key(*k)).collect();
    let mut asc = TupleBrowser::probes(probes.clone(), false, Direction::Ascending);
    assert_eq!(collect_keys(&mut asc, &tree), vec![4, 50, 198]);

    let mut desc = TupleBrowser::probes(probes, false, Direction::Descending);
    assert_eq!(collect_keys(&mut desc, &tree), vec![198, 50, 4]);

    let mut none = TupleBrowser::probes(Vec::new(), false, Direction::Ascending);
    assert!(none.next(&tree).unwrap().is_none());
}

#[test]
fn test_update_and_remove_while_browsing() {
    let pool = BufferPool::in_memory(100_000);
    let mut tree = create_test_tree(4, 3, &pool);
    for k in 0..100 {
        tree.insert(row(k, "old"), InsertMode::Ordered, None).unwrap();
    }

    let mut browser = TupleBrowser::full_scan(Direction::Ascending);
    let mut seen = Vec::new();
    while let Some(tuple) = browser.next(&tree).unwrap() {
        let k = key_of(&tuple);
        seen.push(k);
        if k % 2 == 0 {
            tree.remove(&key(k)).unwrap();
            browser.removed();
        } else {
            browser.update(&mut tree, row(k, "new")).unwrap();
        }
    }
    assert_eq!(seen, (0..100).collect::<Vec<_>>());
    tree.verify().unwrap();
    assert_eq!(tree.row_count(), 50);
    for k in 0..100 {
        let found = tree.find(&key(k)).unwrap();
        if k % 2 == 0 {
            assert!(found.is_none());
        } else {
            assert_eq!(found, Some(row(k, "new")));
        }
    }
}

#[test]
fn test_browser_resumes_after_inserts() {
    let pool = BufferPool::in_memory(100_000);
    let mut tree = create_test_tree(4, 16, &pool);
    for k in (0..40).step_by(4) {
        tree.insert(row(k, "s"), InsertMode::New, None).unwrap();
    }

    let mut browser = TupleBrowser::full_scan(Direction::Descending);
    let mut seen = Vec::new();
    while let Some(tuple) = browser.next(&tree).unwrap() {
        let k = key_of(&tuple);
        seen.push(k);
        // keys inserted behind the cursor are not revisited
        tree.insert(row(k + 1, "late"), InsertMode::New, None).unwrap();
        if k == 20 {
            tree.insert(row(k - 1, "ahead"), InsertMode::New, None).unwrap();
        }
    }
    assert_eq!(seen, vec![36, 32, 28, 24, 20, 19, 16, 12, 8, 4, 0]);
}

// =============================================================================
// Spilled pages
// =============================================================================

#[test]
fn test_pages_spilled_to_disk() {
    let dir = tempdir().unwrap();
    let storage = Arc::new(FileStorageManager::new(dir.path(), false).unwrap());
    let pool = BufferPool::new(
        BufferPoolConfig {
            max_resident_rows: 200,
            spill_buffer_size: 256,
        },
        storage.clone(),
    );
    let mut tree = create_test_tree(32, 8, &pool);
    let mut keys: Vec<i64> = (0..3000).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(77));
    for &k in &keys {
        tree.insert(row(k, &format!("payload-{}", k)), InsertMode::New, None)
            .unwrap();
    }

    let stats = pool.stats();
    assert!(stats.spills > 0);
    assert!(stats.persisted_batches > 0);
    tree.verify().unwrap();

    let mut browser = TupleBrowser::range(Some(key(1000)), Some(key(1099)), Direction::Ascending);
    assert_eq!(collect_keys(&mut browser, &tree), (1000..1100).collect::<Vec<_>>());
    assert_eq!(
        tree.find(&key(2999)).unwrap(),
        Some(row(2999, "payload-2999"))
    );

    tree.truncate().unwrap();
    assert_eq!(pool.stats().total_batches, 0);
    drop(tree);
    drop(pool);
    assert_eq!(storage.open_store_count(), 0);
}

// =============================================================================
// Storage faults and spill store growth
// =============================================================================

fn create_disk_pool(spill_dir: &std::path::Path, max_resident_rows: usize) -> BufferPool {
    let storage = Arc::new(FileStorageManager::new(spill_dir, false).unwrap());
    BufferPool::new(
        BufferPoolConfig {
            max_resident_rows,
            spill_buffer_size: 256,
        },
        storage,
    )
}

#[test]
fn test_lookups_under_pressure_keep_spill_store_bounded() {
    let dir = tempdir().unwrap();
    let pool = create_disk_pool(dir.path(), 40);
    let mut tree = create_test_tree(16, 4, &pool);
    for k in 0..400 {
        tree.insert(row(k, &format!("payload-{}", k)), InsertMode::Ordered, None)
            .unwrap();
    }
    let after_load = pool.stats().spill_bytes;
    assert!(after_load > 0);

    for _ in 0..20 {
        for k in 0..400 {
            assert!(tree.find(&key(k)).unwrap().is_some());
        }
    }
    let stats = pool.stats();
    assert!(stats.reloads > 400);
    // each batch is written at most once more, however often it is reloaded
    assert!(
        stats.spill_bytes <= 2 * after_load,
        "spill store grew from {} to {}",
        after_load,
        stats.spill_bytes
    );
    tree.verify().unwrap();
}

#[test]
fn test_insert_survives_failed_spill() {
    let dir = tempdir().unwrap();
    let spill_dir = dir.path().join("spill");
    let pool = create_disk_pool(&spill_dir, 3);
    let mut tree = create_test_tree(16, 2, &pool);
    for k in 0..3 {
        tree.insert(row(k, "v"), InsertMode::Ordered, None).unwrap();
    }
    std::fs::remove_dir_all(&spill_dir).unwrap();

    // the pool cannot spill, so the grown leaf stays in memory
    tree.insert(row(3, "v"), InsertMode::Ordered, None).unwrap();
    tree.verify().unwrap();
    assert_eq!(tree.row_count(), 4);
    for k in 0..4 {
        assert_eq!(tree.find(&key(k)).unwrap(), Some(row(k, "v")));
    }
    let stats = pool.stats();
    assert_eq!(stats.total_batches, 0);
    assert_eq!(stats.resident_rows, 0);

    // once storage is back the page is tiered on its next change
    std::fs::create_dir_all(&spill_dir).unwrap();
    for k in 4..40 {
        tree.insert(row(k, "v"), InsertMode::Update, None).unwrap();
    }
    tree.verify().unwrap();
    assert!(pool.stats().spills > 0);
    for k in 0..40 {
        assert_eq!(tree.find(&key(k)).unwrap(), Some(row(k, "v")));
    }
}
