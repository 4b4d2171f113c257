//! Batch assembly with version-history limiting

use bytes::Bytes;

use crate::cell::{Cell, CellKey};
use crate::fragment::CellSink;

/// Versions already emitted for the current (row, column)
///
/// Lives on the scanner so limits hold across batches and merge reopens.
#[derive(Debug, Clone, Default)]
pub(crate) struct HistoryState {
    column: Option<(Bytes, Bytes)>,
    kept: usize,
}

impl HistoryState {
    /// Count a version of `key`, returning whether it is within `max_history`
    fn admit(&mut self, key: &CellKey, max_history: usize) -> bool {
        let same = self
            .column
            .as_ref()
            .is_some_and(|(row, column)| *row == key.row && *column == key.column);
        if same {
            self.kept += 1;
        } else {
            self.column = Some((key.row.clone(), key.column.clone()));
            self.kept = 1;
        }
        self.kept <= max_history
    }
}

/// Collects one scan batch from merged output
pub(crate) struct BatchSink {
    cells: Vec<Cell>,
    size: usize,
    history: HistoryState,
    /// 0 keeps every version
    max_history: usize,
}

impl BatchSink {
    pub(crate) fn new(history: HistoryState, max_history: usize) -> Self {
        Self {
            cells: Vec::new(),
            size: 0,
            history,
            max_history,
        }
    }

    pub(crate) fn finish(self) -> (Vec<Cell>, HistoryState) {
        (self.cells, self.history)
    }
}

impl CellSink for BatchSink {
    fn push(&mut self, cell: Cell) {
        if self.max_history > 0 && !self.history.admit(&cell.key, self.max_history) {
            return;
        }
        self.size += cell.data_size();
        self.cells.push(cell);
    }

    fn cell_count(&self) -> usize {
        self.cells.len()
    }

    fn data_size(&self) -> usize {
        self.size
    }
}
