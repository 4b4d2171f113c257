//! Block cache tests
//!
//! Tests verify:
//! - Hits, misses and shared blocks
//! - Pin counting
//! - Pinned blocks are never evicted
//! - Eviction is oldest-unpinned first
//! - Concurrent get/release from many threads

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use tabletkv::cell::{Cell, RowRange};
use tabletkv::fragment::{Fragment, FragmentBlock, MemFragment};
use tabletkv::{BlockCache, Result, ScanPredicate};

// =============================================================================
// Helper Functions
// =============================================================================

/// Fragment wrapper counting block loads
struct CountingFragment {
    inner: MemFragment,
    loads: AtomicUsize,
}

impl CountingFragment {
    /// `blocks` blocks of one cell each
    fn new(name: &str, blocks: usize) -> Self {
        let cells = (0..blocks)
            .map(|i| Cell::new(format!("row{:03}", i), "f:q", 1, "0123456789"))
            .collect();
        Self {
            inner: MemFragment::new(name, cells, 1),
            loads: AtomicUsize::new(0),
        }
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl Fragment for CountingFragment {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn block_count(&self) -> usize {
        self.inner.block_count()
    }

    fn next_block(&self, predicate: &ScanPredicate, min_block: usize) -> Option<usize> {
        self.inner.next_block(predicate, min_block)
    }

    fn load_block(&self, index: usize) -> Result<Arc<dyn FragmentBlock>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load_block(index)
    }

    fn column_families(&self) -> Vec<Bytes> {
        self.inner.column_families()
    }

    fn partial_data_size(&self, rows: &RowRange) -> u64 {
        self.inner.partial_data_size(rows)
    }
}

fn block_size(fragment: &CountingFragment) -> usize {
    fragment.inner.load_block(0).unwrap().data_size()
}

// =============================================================================
// Basic Tests
// =============================================================================

#[test]
fn test_miss_then_hit() {
    let cache = BlockCache::new(1 << 20);
    let fragment = CountingFragment::new("f", 3);

    cache.get_block(&fragment, 0).unwrap();
    cache.get_block(&fragment, 0).unwrap();

    assert_eq!(fragment.loads(), 1);
    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(cache.pin_count("f", 0), 2);
}

#[test]
fn test_release_unpins() {
    let cache = BlockCache::new(1 << 20);
    let fragment = CountingFragment::new("f", 1);

    cache.get_block(&fragment, 0).unwrap();
    cache.get_block(&fragment, 0).unwrap();
    cache.release_block("f", 0);
    assert_eq!(cache.pin_count("f", 0), 1);
    cache.release_block("f", 0);
    assert_eq!(cache.pin_count("f", 0), 0);

    // Still cached while within budget
    assert!(cache.contains("f", 0));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_release_of_unknown_block_is_ignored() {
    let cache = BlockCache::new(1 << 20);
    cache.release_block("nothing", 7);
    assert!(cache.is_empty());
}

#[test]
fn test_load_error_propagates() {
    let cache = BlockCache::new(1 << 20);
    let fragment = CountingFragment::new("f", 1);
    assert!(cache.get_block(&fragment, 9).is_err());
    assert!(!cache.contains("f", 9));
}

// =============================================================================
// Eviction Tests
// =============================================================================

#[test]
fn test_pinned_blocks_survive_over_budget() {
    let fragment = CountingFragment::new("f", 4);
    let size = block_size(&fragment);
    let cache = BlockCache::new(size);

    for i in 0..4 {
        cache.get_block(&fragment, i).unwrap();
    }
    assert_eq!(cache.len(), 4);
    assert_eq!(cache.cached_bytes(), 4 * size);
    assert_eq!(cache.stats().evictions, 0);
}

#[test]
fn test_evicts_oldest_unpinned_first() {
    let fragment = CountingFragment::new("f", 4);
    let size = block_size(&fragment);
    let cache = BlockCache::new(2 * size);

    for i in 0..2 {
        cache.get_block(&fragment, i).unwrap();
    }
    // Unpin 1 before 0: block 1 is now the oldest candidate
    cache.release_block("f", 1);
    cache.release_block("f", 0);

    cache.get_block(&fragment, 2).unwrap();
    assert!(!cache.contains("f", 1));
    assert!(cache.contains("f", 0));
    assert!(cache.contains("f", 2));
    assert_eq!(cache.stats().evictions, 1);
    assert!(cache.cached_bytes() <= cache.capacity_bytes());
}

#[test]
fn test_repinning_removes_eviction_candidate() {
    let fragment = CountingFragment::new("f", 3);
    let size = block_size(&fragment);
    let cache = BlockCache::new(size);

    cache.get_block(&fragment, 0).unwrap();
    cache.release_block("f", 0);
    // Hit re-pins block 0, so loading block 1 cannot evict it
    cache.get_block(&fragment, 0).unwrap();
    cache.get_block(&fragment, 1).unwrap();

    assert!(cache.contains("f", 0));
    assert_eq!(cache.pin_count("f", 0), 1);
    assert_eq!(fragment.loads(), 2);
}

#[test]
fn test_evicted_block_reloads() {
    let fragment = CountingFragment::new("f", 2);
    let size = block_size(&fragment);
    let cache = BlockCache::new(size);

    cache.get_block(&fragment, 0).unwrap();
    cache.release_block("f", 0);
    cache.get_block(&fragment, 1).unwrap();
    cache.release_block("f", 1);
    assert!(!cache.contains("f", 0));

    cache.get_block(&fragment, 0).unwrap();
    assert_eq!(fragment.loads(), 3);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_get_release() {
    let fragment = Arc::new(CountingFragment::new("f", 8));
    let size = block_size(&fragment);
    let cache = Arc::new(BlockCache::new(4 * size));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let fragment = Arc::clone(&fragment);
            thread::spawn(move || {
                for round in 0..200 {
                    let index = (t + round) % 8;
                    cache.get_block(fragment.as_ref(), index).unwrap();
                    cache.release_block("f", index);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for i in 0..8 {
        assert_eq!(cache.pin_count("f", i), 0);
    }
    assert!(cache.cached_bytes() <= cache.capacity_bytes());
}
