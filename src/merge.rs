//! Fragment Merge
//!
//! k-way merge of a fragment chain into one ordered, de-duplicated cell stream.
//!
//! ## Precedence
//! Chain position 0 is the newest fragment. When several fragments hold the
//! same cell key, the lowest chain position wins and the others' cells for
//! that key are skipped without being copied.
//!
//! ## Algorithm (one step of `copy_merged`)
//! ```text
//!   1. pop winner = min (next_key, position)
//!   2. pop every input whose next_key == winner.key, skip past that key
//!   3. winner copies its cells strictly before the next distinct key
//!   4. re-push inputs that still have data
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::cache::BlockCache;
use crate::cell::{Cell, CellKey};
use crate::error::Result;
use crate::fragment::{CellSink, DiscardSink, Fragment, FragmentBlockReader};
use crate::predicate::ScanPredicate;

/// Tuning for one merge segment
#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    /// Drop erasure cells from the output (raw merges keep them)
    pub filter_erasures: bool,

    /// Max block loads per `copy_merged` call
    pub block_quota: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            filter_erasures: true,
            block_quota: 64,
        }
    }
}

// =============================================================================
// Heap Entry
// =============================================================================

/// Next key of one input, ordered for a min-heap on (key, position)
#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    key: CellKey,
    /// Chain position of the input; lower is newer
    position: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse both comparisons so the smallest
        // key, and on ties the lowest (newest) position, is popped first.
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.position.cmp(&self.position))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// =============================================================================
// Input
// =============================================================================

/// Cursor over one fragment of the chain
struct Input {
    fragment: Arc<dyn Fragment>,
    /// Merge predicate narrowed to the fragment's row scope
    predicate: ScanPredicate,
    /// Index of the loaded (pinned) block
    block_index: usize,
    /// Reader over the pinned block; None once the fragment is exhausted
    reader: Option<Box<dyn FragmentBlockReader>>,
}

impl Input {
    /// Open the first block that can satisfy `predicate`
    fn open(
        fragment: Arc<dyn Fragment>,
        cache: &BlockCache,
        predicate: &ScanPredicate,
    ) -> Result<Self> {
        let predicate = match fragment.row_scope() {
            Some(rows) => predicate.restrict_to(rows),
            None => predicate.clone(),
        };
        let mut input = Input {
            fragment,
            predicate,
            block_index: 0,
            reader: None,
        };
        input.load_from(cache, 0)?;
        Ok(input)
    }

    /// Pin and open the first qualifying block at or after `min_block`
    ///
    /// Returns whether a block was loaded.
    fn load_from(&mut self, cache: &BlockCache, min_block: usize) -> Result<bool> {
        match self.fragment.next_block(&self.predicate, min_block) {
            Some(index) => {
                let block = cache.get_block(self.fragment.as_ref(), index)?;
                self.block_index = index;
                self.reader = Some(block.make_reader(&self.predicate));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Unpin the current block, if any
    fn release(&mut self, cache: &BlockCache) {
        if self.reader.take().is_some() {
            cache.release_block(self.fragment.name(), self.block_index);
        }
    }

    /// Next matching key, moving on to later blocks as blocks run dry
    fn next_key(&mut self, cache: &BlockCache, loads: &mut usize) -> Result<Option<CellKey>> {
        loop {
            let reader = match self.reader.as_mut() {
                Some(reader) => reader,
                None => return Ok(None),
            };
            if let Some(key) = reader.advance() {
                return Ok(Some(key));
            }

            let next = self.block_index + 1;
            self.release(cache);
            if !self.load_from(cache, next)? {
                return Ok(None);
            }
            *loads += 1;
        }
    }

    /// Consume every cell with key <= `key` without copying it
    fn skip_through(&mut self, key: &CellKey) {
        if let Some(reader) = self.reader.as_mut() {
            reader.copy_until(Some(&key.successor()), false, &mut DiscardSink);
        }
    }
}

// =============================================================================
// Limited Sink
// =============================================================================

/// Wraps the caller's sink, reporting full once this call's limits are hit
struct LimitedSink<'a> {
    inner: &'a mut dyn CellSink,
    max_cells: usize,
    max_size: usize,
    cells: usize,
    size: usize,
}

impl CellSink for LimitedSink<'_> {
    fn push(&mut self, cell: Cell) {
        let before = self.inner.cell_count();
        let size = cell.data_size();
        self.inner.push(cell);
        // The inner sink may drop cells (history filtering); count what it kept
        if self.inner.cell_count() > before {
            self.cells += 1;
            self.size += size;
        }
    }

    fn cell_count(&self) -> usize {
        self.inner.cell_count()
    }

    fn data_size(&self) -> usize {
        self.inner.data_size()
    }

    fn is_full(&self) -> bool {
        self.cells >= self.max_cells || self.size >= self.max_size || self.inner.is_full()
    }
}

// =============================================================================
// Fragment Merge
// =============================================================================

/// One merge segment over a fragment chain (newest first)
///
/// Holds one pinned block per live input; pins are released as inputs move
/// to later blocks and when the merge is dropped.
pub struct FragmentMerge {
    cache: Arc<BlockCache>,
    predicate: ScanPredicate,
    options: MergeOptions,
    /// Inputs indexed by chain position
    inputs: Vec<Input>,
    heap: BinaryHeap<HeapEntry>,
}

impl FragmentMerge {
    /// Open a merge over `chain`, skipping every key <= `start_after`
    pub fn new(
        chain: &[Arc<dyn Fragment>],
        cache: Arc<BlockCache>,
        predicate: ScanPredicate,
        start_after: Option<&CellKey>,
        options: MergeOptions,
    ) -> Result<Self> {
        let mut merge = FragmentMerge {
            cache,
            predicate,
            options,
            inputs: Vec::with_capacity(chain.len()),
            heap: BinaryHeap::with_capacity(chain.len()),
        };

        // Construction loads are not charged against the per-call quota
        let mut loads = 0;
        for (position, fragment) in chain.iter().enumerate() {
            let input = Input::open(Arc::clone(fragment), &merge.cache, &merge.predicate)?;
            merge.inputs.push(input);

            let input = &mut merge.inputs[position];
            let mut next = input.next_key(&merge.cache, &mut loads)?;
            if let Some(after) = start_after {
                while next.as_ref().is_some_and(|key| key <= after) {
                    input.skip_through(after);
                    next = input.next_key(&merge.cache, &mut loads)?;
                }
            }

            match next {
                Some(key) => merge.heap.push(HeapEntry { key, position }),
                None => input.release(&merge.cache),
            }
        }

        tracing::trace!(
            fragments = chain.len(),
            live = merge.heap.len(),
            predicate = %merge.predicate,
            "fragment merge opened"
        );
        Ok(merge)
    }

    /// Copy merged cells into `sink` until a limit is hit or the segment ends
    ///
    /// Returns whether more data remains in this segment.
    pub fn copy_merged(
        &mut self,
        max_cells: usize,
        max_size: usize,
        sink: &mut dyn CellSink,
    ) -> Result<bool> {
        let mut out = LimitedSink {
            inner: sink,
            max_cells,
            max_size,
            cells: 0,
            size: 0,
        };
        let mut loads = 0;

        while !out.is_full() && loads < self.options.block_quota {
            let winner = match self.heap.pop() {
                Some(entry) => entry,
                None => break,
            };

            // Older copies of the winning key are superseded
            while self.heap.peek().is_some_and(|e| e.key == winner.key) {
                let Some(dup) = self.heap.pop() else { break };
                let input = &mut self.inputs[dup.position];
                input.skip_through(&dup.key);
                match input.next_key(&self.cache, &mut loads)? {
                    Some(key) => self.heap.push(HeapEntry {
                        key,
                        position: dup.position,
                    }),
                    None => input.release(&self.cache),
                }
            }

            let stop = self.heap.peek().map(|e| e.key.clone());
            let input = &mut self.inputs[winner.position];
            if let Some(reader) = input.reader.as_mut() {
                reader.copy_until(stop.as_ref(), self.options.filter_erasures, &mut out);
            }
            match input.next_key(&self.cache, &mut loads)? {
                Some(key) => self.heap.push(HeapEntry {
                    key,
                    position: winner.position,
                }),
                None => input.release(&self.cache),
            }
        }

        Ok(!self.heap.is_empty())
    }

    /// Copy the whole remaining segment into `sink`
    pub fn copy_all(&mut self, sink: &mut dyn CellSink) -> Result<()> {
        while self.copy_merged(usize::MAX, usize::MAX, sink)? {}
        Ok(())
    }

    /// Whether the segment still has data
    pub fn has_more(&self) -> bool {
        !self.heap.is_empty()
    }

    pub fn predicate(&self) -> &ScanPredicate {
        &self.predicate
    }
}

impl Drop for FragmentMerge {
    fn drop(&mut self) {
        for input in &mut self.inputs {
            input.release(&self.cache);
        }
    }
}
