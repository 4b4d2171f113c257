//! Decoded block and its reader
//!
//! Every backend validates and decodes a block into a `CellBlock`, so readers
//! operate on trusted, sorted cells and never fail.

use std::sync::Arc;

use crate::cell::{Cell, CellKey};
use crate::predicate::ScanPredicate;

use super::{CellSink, FragmentBlock, FragmentBlockReader};

/// A loaded block of sorted cells
#[derive(Debug, Clone)]
pub struct CellBlock {
    cells: Arc<[Cell]>,
    data_size: usize,
}

impl CellBlock {
    /// Wrap cells that are already sorted by key
    pub fn new(cells: Vec<Cell>) -> Self {
        let data_size = cells.iter().map(Cell::data_size).sum();
        Self {
            cells: cells.into(),
            data_size,
        }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }
}

impl FragmentBlock for CellBlock {
    fn make_reader(&self, predicate: &ScanPredicate) -> Box<dyn FragmentBlockReader> {
        Box::new(CellBlockReader {
            cells: Arc::clone(&self.cells),
            predicate: predicate.clone(),
            pos: 0,
        })
    }

    fn data_size(&self) -> usize {
        self.data_size
    }
}

/// Predicate-filtered cursor over a `CellBlock`
pub struct CellBlockReader {
    cells: Arc<[Cell]>,
    predicate: ScanPredicate,
    /// Index of the next unconsumed cell
    pos: usize,
}

impl CellBlockReader {
    /// Skip non-matching cells; return the next matching one without consuming it
    fn seek_match(&mut self) -> Option<&Cell> {
        while let Some(cell) = self.cells.get(self.pos) {
            if self.predicate.matches(&cell.key) {
                break;
            }
            self.pos += 1;
        }
        self.cells.get(self.pos)
    }
}

impl FragmentBlockReader for CellBlockReader {
    fn advance(&mut self) -> Option<CellKey> {
        self.seek_match().map(|cell| cell.key.clone())
    }

    fn copy_until(
        &mut self,
        stop: Option<&CellKey>,
        filter_erasures: bool,
        out: &mut dyn CellSink,
    ) -> bool {
        loop {
            let cell = match self.seek_match() {
                Some(cell) => cell,
                None => return false,
            };
            if stop.is_some_and(|stop| cell.key >= *stop) {
                return true;
            }
            if out.is_full() {
                return true;
            }
            if !(filter_erasures && cell.is_erasure()) {
                let cell = cell.clone();
                out.push(cell);
            }
            self.pos += 1;
        }
    }
}
