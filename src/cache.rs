//! Block Cache
//!
//! Pinning cache of loaded fragment blocks, shared across scanners.
//!
//! ## Responsibilities
//! - Load each (fragment, block) once and share it between readers
//! - Pin blocks while a merge is reading them (explicit pin counts)
//! - Evict only unpinned blocks, oldest-unpinned first, down to a byte budget
//!
//! ## Structure
//! ```text
//!   entries:  (fragment, block) → { block, pins, size, tick }
//!   unpinned: tick → (fragment, block)     (BTreeMap, oldest first)
//! ```
//! An entry sits in `unpinned` exactly when its pin count is zero.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::fragment::{Fragment, FragmentBlock};

/// Cache key: fragment identity plus block index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub fragment: Arc<str>,
    pub block: usize,
}

impl BlockKey {
    pub fn new(fragment: &str, block: usize) -> Self {
        Self {
            fragment: Arc::from(fragment),
            block,
        }
    }
}

/// Counters for cache effectiveness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct CacheEntry {
    block: Arc<dyn FragmentBlock>,
    pins: usize,
    size: usize,
    /// Position in the unpinned list (Some iff pins == 0)
    tick: Option<u64>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<BlockKey, CacheEntry>,
    unpinned: BTreeMap<u64, BlockKey>,
    next_tick: u64,
    total_bytes: usize,
    stats: CacheStats,
}

impl CacheState {
    /// Take a pin on an existing entry, removing it from the eviction list
    fn pin(&mut self, key: &BlockKey) -> Option<Arc<dyn FragmentBlock>> {
        let entry = self.entries.get_mut(key)?;
        if let Some(tick) = entry.tick.take() {
            self.unpinned.remove(&tick);
        }
        entry.pins += 1;
        Some(Arc::clone(&entry.block))
    }

    /// Drop unpinned entries, oldest first, until within `capacity`
    fn evict(&mut self, capacity: usize) {
        while self.total_bytes > capacity {
            let (tick, key) = match self.unpinned.pop_first() {
                Some(oldest) => oldest,
                None => break,
            };
            if let Some(entry) = self.entries.remove(&key) {
                debug_assert_eq!(entry.tick, Some(tick));
                self.total_bytes -= entry.size;
                self.stats.evictions += 1;
                tracing::trace!(fragment = %key.fragment, block = key.block, "evicted block");
            }
        }
    }
}

/// Reference-counted block cache with LRU eviction among unpinned blocks
///
/// ## Concurrency:
/// - All bookkeeping behind one `Mutex`; held only for map updates
/// - Block loads run outside the lock, so a slow load never stalls hits
pub struct BlockCache {
    capacity_bytes: usize,
    state: Mutex<CacheState>,
}

impl BlockCache {
    /// Create a cache keeping at most `capacity_bytes` of blocks (pinned blocks excepted)
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Get and pin a block, loading it via `Fragment::load_block` on a miss
    ///
    /// Every successful call must be matched by one `release_block`.
    pub fn get_block(&self, fragment: &dyn Fragment, index: usize) -> Result<Arc<dyn FragmentBlock>> {
        let key = BlockKey::new(fragment.name(), index);

        {
            let mut state = self.state.lock();
            if let Some(block) = state.pin(&key) {
                state.stats.hits += 1;
                return Ok(block);
            }
            state.stats.misses += 1;
        }

        // Miss: load without holding the lock
        let loaded = fragment.load_block(index)?;

        let mut state = self.state.lock();
        // Another scanner may have loaded the same block meanwhile
        if let Some(block) = state.pin(&key) {
            return Ok(block);
        }

        let size = loaded.data_size();
        state.entries.insert(
            key,
            CacheEntry {
                block: Arc::clone(&loaded),
                pins: 1,
                size,
                tick: None,
            },
        );
        state.total_bytes += size;
        state.evict(self.capacity_bytes);

        Ok(loaded)
    }

    /// Drop one pin; the block becomes evictable when no pins remain
    pub fn release_block(&self, fragment: &str, index: usize) {
        let key = BlockKey::new(fragment, index);
        let mut state = self.state.lock();

        let tick = state.next_tick;
        let unpinned = match state.entries.get_mut(&key) {
            Some(entry) if entry.pins > 0 => {
                entry.pins -= 1;
                if entry.pins == 0 {
                    entry.tick = Some(tick);
                    true
                } else {
                    false
                }
            }
            _ => {
                tracing::warn!(fragment, block = index, "release of unpinned block");
                return;
            }
        };

        if unpinned {
            state.next_tick += 1;
            state.unpinned.insert(tick, key);
            state.evict(self.capacity_bytes);
        }
    }

    /// Current pin count of a block (0 if pinned by nobody or not cached)
    pub fn pin_count(&self, fragment: &str, index: usize) -> usize {
        let key = BlockKey::new(fragment, index);
        self.state.lock().entries.get(&key).map_or(0, |e| e.pins)
    }

    pub fn contains(&self, fragment: &str, index: usize) -> bool {
        let key = BlockKey::new(fragment, index);
        self.state.lock().entries.contains_key(&key)
    }

    /// Number of cached blocks (pinned and unpinned)
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held by cached blocks
    pub fn cached_bytes(&self) -> usize {
        self.state.lock().total_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }
}
