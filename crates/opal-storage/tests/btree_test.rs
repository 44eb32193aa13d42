//! B+tree scenario tests: splits, underflow repair, iteration order, and
//! multi-threaded insert/lookup over a real buffer pool.

use opal_buffer::{BufferPoolManager, DiskManager};
use opal_common::config::DiskManagerConfig;
use opal_storage::BPlusTree;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use tempfile::TempDir;

fn create_pool(dir: &TempDir, frames: usize) -> Arc<BufferPoolManager> {
    let disk = Arc::new(
        DiskManager::new(DiskManagerConfig {
            db_path: dir.path().join("btree.db"),
            fsync_enabled: false,
            initial_capacity: 16,
        })
        .unwrap(),
    );
    Arc::new(BufferPoolManager::new(frames, disk))
}

fn create_tree(
    pool: &Arc<BufferPoolManager>,
    leaf_max: usize,
    internal_max: usize,
) -> BPlusTree<i64, i64> {
    let header = pool.new_page();
    assert!(header.is_valid());
    BPlusTree::new(Arc::clone(pool), header, leaf_max, internal_max).unwrap()
}

#[test]
fn test_empty_tree() {
    let dir = TempDir::new().unwrap();
    let pool = create_pool(&dir, 16);
    let tree = create_tree(&pool, 2, 3);

    assert!(tree.is_empty().unwrap());
    assert_eq!(tree.get(&1).unwrap(), None);
    assert!(!tree.remove(&1).unwrap());
    assert!(tree.iter().unwrap().next().is_none());
}

#[test]
fn test_insert_get_roundtrip() {
    let dir = TempDir::new().unwrap();
    let pool = create_pool(&dir, 16);
    let tree = create_tree(&pool, 2, 3);

    for k in 1..=5 {
        assert!(tree.insert(k, k * 100).unwrap());
    }
    assert!(!tree.is_empty().unwrap());
    for k in 1..=5 {
        assert_eq!(tree.get(&k).unwrap(), Some(k * 100));
    }
    assert_eq!(tree.get(&99).unwrap(), None);
}

#[test]
fn test_duplicate_insert_rejected() {
    let dir = TempDir::new().unwrap();
    let pool = create_pool(&dir, 16);
    let tree = create_tree(&pool, 2, 3);

    assert!(tree.insert(7, 1).unwrap());
    assert!(!tree.insert(7, 2).unwrap());
    // The original value survives.
    assert_eq!(tree.get(&7).unwrap(), Some(1));
}

#[test]
fn test_delete_with_underflow() {
    let dir = TempDir::new().unwrap();
    let pool = create_pool(&dir, 16);
    let tree = create_tree(&pool, 2, 3);

    // Small fan-out forces splits on the way up.
    for k in 1..=5 {
        assert!(tree.insert(k, k).unwrap());
    }
    assert!(tree.remove(&1).unwrap());

    for k in 2..=5 {
        assert_eq!(tree.get(&k).unwrap(), Some(k), "lost key {k}");
    }
    assert_eq!(tree.get(&1).unwrap(), None);

    // Ascending iteration still sees exactly the surviving keys.
    let keys: Vec<i64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![2, 3, 4, 5]);
}

#[test]
fn test_delete_everything_empties_tree() {
    let dir = TempDir::new().unwrap();
    let pool = create_pool(&dir, 32);
    let tree = create_tree(&pool, 2, 3);

    for k in 1..=32 {
        assert!(tree.insert(k, k).unwrap());
    }
    for k in 1..=32 {
        assert!(tree.remove(&k).unwrap(), "failed to remove {k}");
        // Everything after k is still reachable.
        for j in (k + 1)..=32 {
            assert_eq!(tree.get(&j).unwrap(), Some(j), "lost {j} after removing {k}");
        }
    }
    assert!(tree.is_empty().unwrap());
    assert_eq!(tree.root_page_id().unwrap(), None);

    // The tree is reusable after being emptied.
    assert!(tree.insert(100, 1).unwrap());
    assert_eq!(tree.get(&100).unwrap(), Some(1));
}

#[test]
fn test_random_insert_delete_matches_reference() {
    let dir = TempDir::new().unwrap();
    let pool = create_pool(&dir, 64);
    let tree = create_tree(&pool, 4, 5);
    let mut reference = std::collections::BTreeMap::new();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xB7EE);

    let mut keys: Vec<i64> = (0..500).collect();
    keys.shuffle(&mut rng);
    for &k in &keys {
        assert!(tree.insert(k, k * 7).unwrap());
        reference.insert(k, k * 7);
    }

    keys.shuffle(&mut rng);
    for &k in keys.iter().take(250) {
        assert!(tree.remove(&k).unwrap());
        reference.remove(&k);
    }

    for k in 0..500 {
        assert_eq!(tree.get(&k).unwrap(), reference.get(&k).copied(), "key {k}");
    }
    let scanned: Vec<(i64, i64)> = tree.iter().unwrap().collect();
    let expected: Vec<(i64, i64)> = reference.iter().map(|(&k, &v)| (k, v)).collect();
    assert_eq!(scanned, expected);
}

#[test]
fn test_iterator_ascending_and_range() {
    let dir = TempDir::new().unwrap();
    let pool = create_pool(&dir, 32);
    let tree = create_tree(&pool, 3, 4);

    for k in (0..100).rev() {
        assert!(tree.insert(k, k).unwrap());
    }

    let keys: Vec<i64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys, (0..100).collect::<Vec<_>>());

    // Range scan from a key boundary and from between keys.
    let from_50: Vec<i64> = tree.iter_from(&50).unwrap().map(|(k, _)| k).collect();
    assert_eq!(from_50, (50..100).collect::<Vec<_>>());
    tree.remove(&60).unwrap();
    let after_gap: Vec<i64> = tree.iter_from(&60).unwrap().map(|(k, _)| k).take(3).collect();
    assert_eq!(after_gap, vec![61, 62, 63]);

    // Past-the-end seek yields an exhausted cursor.
    assert!(tree.iter_from(&1000).unwrap().next().is_none());
}

#[test]
fn test_concurrent_disjoint_inserts() {
    let dir = TempDir::new().unwrap();
    let pool = create_pool(&dir, 64);
    let tree = Arc::new(create_tree(&pool, 8, 8));

    const THREADS: i64 = 4;
    const PER_THREAD: i64 = 250;

    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let tree = Arc::clone(&tree);
            scope.spawn(move || {
                for i in 0..PER_THREAD {
                    let k = t * PER_THREAD + i;
                    assert!(tree.insert(k, k * 2).unwrap());
                }
            });
        }
    });

    for k in 0..THREADS * PER_THREAD {
        assert_eq!(tree.get(&k).unwrap(), Some(k * 2), "dropped write for {k}");
    }
    let keys: Vec<i64> = tree.iter().unwrap().map(|(k, _)| k).collect();
    assert_eq!(keys, (0..THREADS * PER_THREAD).collect::<Vec<_>>());
}

#[test]
fn test_concurrent_readers_during_inserts() {
    let dir = TempDir::new().unwrap();
    let pool = create_pool(&dir, 64);
    let tree = Arc::new(create_tree(&pool, 8, 8));

    for k in 0..200 {
        tree.insert(k, k).unwrap();
    }

    std::thread::scope(|scope| {
        let writer_tree = Arc::clone(&tree);
        scope.spawn(move || {
            for k in 200..400 {
                assert!(writer_tree.insert(k, k).unwrap());
            }
        });
        for _ in 0..2 {
            let tree = Arc::clone(&tree);
            scope.spawn(move || {
                for _ in 0..50 {
                    // Pre-existing keys stay visible throughout.
                    for k in (0..200).step_by(17) {
                        assert_eq!(tree.get(&k).unwrap(), Some(k));
                    }
                }
            });
        }
    });

    for k in 0..400 {
        assert_eq!(tree.get(&k).unwrap(), Some(k));
    }
}

#[test]
fn test_concurrent_mixed_insert_delete() {
    let dir = TempDir::new().unwrap();
    let pool = create_pool(&dir, 64);
    let tree = Arc::new(create_tree(&pool, 6, 6));

    // Even keys stay, odd keys are inserted and then removed by a
    // different thread.
    for k in 0..300 {
        tree.insert(k, k).unwrap();
    }

    std::thread::scope(|scope| {
        let remover = Arc::clone(&tree);
        scope.spawn(move || {
            for k in (1..300).step_by(2) {
                assert!(remover.remove(&k).unwrap());
            }
        });
        let inserter = Arc::clone(&tree);
        scope.spawn(move || {
            for k in 300..450 {
                assert!(inserter.insert(k, k).unwrap());
            }
        });
    });

    for k in (0..300).step_by(2) {
        assert_eq!(tree.get(&k).unwrap(), Some(k));
    }
    for k in (1..300).step_by(2) {
        assert_eq!(tree.get(&k).unwrap(), None);
    }
    for k in 300..450 {
        assert_eq!(tree.get(&k).unwrap(), Some(k));
    }
}

#[test]
fn test_pages_freed_on_merge_are_reusable() {
    let dir = TempDir::new().unwrap();
    let pool = create_pool(&dir, 16);
    let tree = create_tree(&pool, 2, 3);

    for k in 0..40 {
        tree.insert(k, k).unwrap();
    }
    for k in 0..40 {
        tree.remove(&k).unwrap();
    }
    assert!(tree.is_empty().unwrap());

    // Freed index pages flow back through the pool's allocator; a fresh
    // tree life reuses them without exhausting 16 frames.
    for k in 0..40 {
        assert!(tree.insert(k, -k).unwrap());
    }
    for k in 0..40 {
        assert_eq!(tree.get(&k).unwrap(), Some(-k));
    }
}
