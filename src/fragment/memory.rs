//! In-memory fragments
//!
//! Hold freshly committed cells until they are flushed, and serve as test
//! fixtures for the merge engine.

use std::sync::Arc;

use bytes::Bytes;

use crate::cell::{Cell, RowRange};
use crate::error::{Result, TabletError};
use crate::predicate::ScanPredicate;

use super::{next_matching_block, overlapping_size, BlockMeta, CellBlock, Fragment, FragmentBlock};

/// An immutable fragment whose blocks live in memory
pub struct MemFragment {
    name: String,
    blocks: Vec<Arc<CellBlock>>,
    metas: Vec<BlockMeta>,
}

impl MemFragment {
    /// Build a fragment from cells in any order
    ///
    /// Cells are sorted by key; when a key repeats, the cell appearing later
    /// in `cells` wins.
    pub fn new(name: impl Into<String>, mut cells: Vec<Cell>, block_cells: usize) -> Self {
        cells.sort_by(|a, b| a.key.cmp(&b.key));

        let mut deduped: Vec<Cell> = Vec::with_capacity(cells.len());
        for cell in cells {
            match deduped.last_mut() {
                Some(last) if last.key == cell.key => *last = cell,
                _ => deduped.push(cell),
            }
        }

        let block_cells = block_cells.max(1);
        let mut blocks = Vec::new();
        let mut metas = Vec::new();
        for chunk in deduped.chunks(block_cells) {
            if let Some(meta) = BlockMeta::from_cells(chunk) {
                metas.push(meta);
                blocks.push(Arc::new(CellBlock::new(chunk.to_vec())));
            }
        }

        Self {
            name: name.into(),
            blocks,
            metas,
        }
    }

    /// Total cells held
    pub fn cell_count(&self) -> usize {
        self.metas.iter().map(|m| m.cell_count as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// All cells in key order (used when flushing to disk)
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.blocks.iter().flat_map(|b| b.cells().iter())
    }
}

impl Fragment for MemFragment {
    fn name(&self) -> &str {
        &self.name
    }

    fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn next_block(&self, predicate: &ScanPredicate, min_block: usize) -> Option<usize> {
        next_matching_block(&self.metas, predicate, min_block)
    }

    fn load_block(&self, index: usize) -> Result<Arc<dyn FragmentBlock>> {
        match self.blocks.get(index) {
            Some(block) => Ok(block.clone() as Arc<dyn FragmentBlock>),
            None => Err(TabletError::MalformedData(format!(
                "{}: block {} out of range ({} blocks)",
                self.name,
                index,
                self.blocks.len()
            ))),
        }
    }

    fn column_families(&self) -> Vec<Bytes> {
        let mut families: Vec<Bytes> = self
            .metas
            .iter()
            .flat_map(|m| m.families.iter().cloned())
            .collect();
        families.sort();
        families.dedup();
        families
    }

    fn partial_data_size(&self, rows: &RowRange) -> u64 {
        overlapping_size(&self.metas, rows)
    }
}
