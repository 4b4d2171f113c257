//! Row-scoped view of a fragment
//!
//! After a split both tablets keep the parent's fragments. Each tablet sees
//! them through a view limited to its own rows, so a fragment rewritten on
//! one side stops contributing there while the other side still reads it.

use std::sync::Arc;

use bytes::Bytes;

use crate::cell::{RowRange, RowSet};
use crate::error::Result;
use crate::predicate::ScanPredicate;

use super::{Fragment, FragmentBlock};

/// A fragment limited to `rows`
///
/// Shares name and blocks with the wrapped fragment, so cached blocks are
/// reused by every view of it.
pub struct ScopedFragment {
    inner: Arc<dyn Fragment>,
    rows: RowSet,
}

impl ScopedFragment {
    pub fn new(inner: Arc<dyn Fragment>, rows: RowSet) -> Self {
        Self { inner, rows }
    }
}

impl Fragment for ScopedFragment {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn block_count(&self) -> usize {
        self.inner.block_count()
    }

    fn next_block(&self, predicate: &ScanPredicate, min_block: usize) -> Option<usize> {
        self.inner
            .next_block(&predicate.restrict_to(&self.rows), min_block)
    }

    fn load_block(&self, index: usize) -> Result<Arc<dyn FragmentBlock>> {
        self.inner.load_block(index)
    }

    fn column_families(&self) -> Vec<Bytes> {
        self.inner.column_families()
    }

    fn partial_data_size(&self, rows: &RowRange) -> u64 {
        self.rows
            .intersect_range(rows)
            .ranges()
            .iter()
            .map(|r| self.inner.partial_data_size(r))
            .sum()
    }

    fn row_scope(&self) -> Option<&RowSet> {
        Some(&self.rows)
    }
}
