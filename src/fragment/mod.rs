//! Fragment Module
//!
//! Read-only capability interface over immutable, sorted runs of cells.
//!
//! ## Responsibilities
//! - Expose a fragment as independently loadable blocks
//! - Let the merge engine skip blocks a predicate cannot match
//! - Hand out cursors (readers) over loaded blocks
//!
//! ## Backends
//! ```text
//!            ┌──────────────────────┐
//!            │  dyn Fragment        │
//!            └──────────┬───────────┘
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────┐
//!   │ MemFragment │          │ DiskFragment │
//!   │ (writes,    │          │ (block file, │
//!   │  fixtures)  │          │  CRC32)      │
//!   └─────────────┘          └──────────────┘
//! ```
//! Both backends decode blocks into the same `CellBlock` representation.
//! `ScopedFragment` limits any backend to a set of rows without copying it.

mod block;
pub mod disk;
mod memory;
mod scoped;

use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::cell::{Cell, CellKey, RowRange, RowSet};
use crate::error::Result;
use crate::predicate::ScanPredicate;

pub use block::{CellBlock, CellBlockReader};
pub use disk::{DiskFragment, DiskFragmentLoader, FragmentInfo, FragmentWriter};
pub use memory::MemFragment;
pub use scoped::ScopedFragment;

// =============================================================================
// Capability Traits
// =============================================================================

/// An immutable, externally identified, sorted run of cells
pub trait Fragment: Send + Sync {
    /// Stable identity (file name, URI, ...) used as the block cache key
    fn name(&self) -> &str;

    /// Number of blocks in this fragment
    fn block_count(&self) -> usize;

    /// First block at or after `min_block` that may hold cells matching `predicate`
    fn next_block(&self, predicate: &ScanPredicate, min_block: usize) -> Option<usize>;

    /// Load one block (may perform I/O)
    fn load_block(&self, index: usize) -> Result<Arc<dyn FragmentBlock>>;

    /// Column families present in this fragment
    fn column_families(&self) -> Vec<Bytes>;

    /// Approximate bytes of data in `rows`
    fn partial_data_size(&self, rows: &RowRange) -> u64;

    /// Rows this fragment may serve; None serves everything it holds
    fn row_scope(&self) -> Option<&RowSet> {
        None
    }
}

/// A loaded block; a stateless factory of readers
pub trait FragmentBlock: Send + Sync {
    fn make_reader(&self, predicate: &ScanPredicate) -> Box<dyn FragmentBlockReader>;

    /// Bytes this block occupies in memory (cache accounting)
    fn data_size(&self) -> usize;
}

/// Cursor over one block, filtered by a predicate
pub trait FragmentBlockReader: Send {
    /// Position on the next matching cell and return its key, without consuming it
    fn advance(&mut self) -> Option<CellKey>;

    /// Consume matching cells strictly before `stop` (or to block end), emitting them
    ///
    /// Erasures are consumed but not emitted when `filter_erasures` is set.
    /// Stops early when the sink reports full. Returns whether unconsumed
    /// matching data remains in the block.
    fn copy_until(
        &mut self,
        stop: Option<&CellKey>,
        filter_erasures: bool,
        out: &mut dyn CellSink,
    ) -> bool;
}

/// Supplies fragments given a name or URI
pub trait FragmentLoader: Send + Sync {
    fn load(&self, uri: &str) -> Result<Arc<dyn Fragment>>;
}

// =============================================================================
// Cell Sink
// =============================================================================

/// Destination for cells produced by readers and merges
pub trait CellSink {
    fn push(&mut self, cell: Cell);

    fn cell_count(&self) -> usize;

    fn data_size(&self) -> usize;

    /// When true, producers stop emitting
    fn is_full(&self) -> bool {
        false
    }
}

impl CellSink for Vec<Cell> {
    fn push(&mut self, cell: Cell) {
        Vec::push(self, cell);
    }

    fn cell_count(&self) -> usize {
        self.len()
    }

    fn data_size(&self) -> usize {
        self.iter().map(Cell::data_size).sum()
    }
}

/// Sink that throws everything away (used to skip superseded cells)
#[derive(Debug, Default)]
pub struct DiscardSink;

impl CellSink for DiscardSink {
    fn push(&mut self, _cell: Cell) {}

    fn cell_count(&self) -> usize {
        0
    }

    fn data_size(&self) -> usize {
        0
    }
}

// =============================================================================
// Block Metadata
// =============================================================================

/// Summary of one block, used to skip blocks a predicate cannot match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub first_row: Bytes,
    pub last_row: Bytes,
    pub families: BTreeSet<Bytes>,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
    pub cell_count: u32,
    pub data_size: u64,
}

impl BlockMeta {
    /// Summarize a non-empty sorted slice of cells
    pub fn from_cells(cells: &[Cell]) -> Option<Self> {
        let first = cells.first()?;
        let last = cells.last()?;

        let mut meta = BlockMeta {
            first_row: first.key.row.clone(),
            last_row: last.key.row.clone(),
            families: BTreeSet::new(),
            min_timestamp: i64::MAX,
            max_timestamp: i64::MIN,
            cell_count: 0,
            data_size: 0,
        };
        for cell in cells {
            meta.observe(cell);
        }
        Some(meta)
    }

    fn observe(&mut self, cell: &Cell) {
        if !self.families.contains(cell.key.family()) {
            self.families
                .insert(Bytes::copy_from_slice(cell.key.family()));
        }
        self.min_timestamp = self.min_timestamp.min(cell.key.timestamp);
        self.max_timestamp = self.max_timestamp.max(cell.key.timestamp);
        self.cell_count += 1;
        self.data_size += cell.data_size() as u64;
    }

    pub fn row_range(&self) -> RowRange {
        RowRange::new(
            Bound::Included(self.first_row.clone()),
            Bound::Included(self.last_row.clone()),
        )
    }

    /// Whether any cell in this block could match `predicate`
    pub fn may_match(&self, predicate: &ScanPredicate) -> bool {
        let time = predicate.time_predicate();
        if self.max_timestamp < *time.start() || self.min_timestamp > *time.end() {
            return false;
        }
        if !self.families.iter().any(|f| predicate.matches_family(f)) {
            return false;
        }
        predicate.row_predicate().overlaps(&self.row_range())
    }
}

/// Shared `next_block` over an ordered list of block summaries
pub(crate) fn next_matching_block<'a, I>(
    metas: I,
    predicate: &ScanPredicate,
    min_block: usize,
) -> Option<usize>
where
    I: IntoIterator<Item = &'a BlockMeta>,
{
    metas
        .into_iter()
        .enumerate()
        .skip(min_block)
        .find(|(_, meta)| meta.may_match(predicate))
        .map(|(idx, _)| idx)
}

/// Shared `partial_data_size`: bytes of every block touching `rows`
pub(crate) fn overlapping_size<'a, I>(metas: I, rows: &RowRange) -> u64
where
    I: IntoIterator<Item = &'a BlockMeta>,
{
    metas
        .into_iter()
        .filter(|meta| meta.row_range().overlaps(rows))
        .map(|meta| meta.data_size)
        .sum()
}
