//! Scanner Module
//!
//! Paginated, restartable scan across every tablet a predicate covers.
//!
//! ## States
//! ```text
//!   Fresh ──scan──▶ Merging(tablet A) ──A done, clip──▶ Merging(tablet B) ──▶ …
//!                        │  ▲                                 │
//!            invalidated │  │ next scan reopens               │ no rows left
//!                        ▼  │ from last key                   ▼
//!                      (no merge)                          EndOfScan
//! ```
//!
//! ## Locking
//! A scanner is driven through `&mut self`; callers that share one wrap it
//! in a mutex (see `ScannerManager`). That mutex is the scanner lock. The
//! table lock is only taken inside `Table` calls to snapshot a chain, never
//! while the merge is copying. Table listeners signal the scanner through
//! its `MergeWatch`, not through the scanner lock.

mod batch;
mod manager;
mod watch;

use std::sync::Arc;
use std::time::Instant;

use crate::cache::BlockCache;
use crate::cell::{Cell, CellKey, RowRange, TxnId};
use crate::config::Config;
use crate::error::{Result, TabletError};
use crate::fragment::CellSink;
use crate::merge::{FragmentMerge, MergeOptions};
use crate::predicate::{ScanMode, ScanPredicate};
use crate::table::{FragmentListener, ListenerId, Table, TabletListener};

use batch::{BatchSink, HistoryState};
use watch::{Invalidation, MergeWatch};

pub use manager::{ScannerId, ScannerManager};

/// One bounded batch of scan results
#[derive(Debug, Clone)]
pub struct ScanBatch {
    /// Cells in ascending key order
    pub cells: Vec<Cell>,

    /// Whether a later `scan` call may return more
    pub has_more: bool,

    /// Table max commit when the merge serving this batch opened
    pub scan_txn: TxnId,
}

/// The merge currently open over one tablet
struct Segment {
    merge: FragmentMerge,
    rows: RowRange,
}

/// Cursor state that a failed scan call rolls back
#[derive(Clone)]
struct Cursor {
    predicate: ScanPredicate,
    end_of_scan: bool,
    scan_txn: TxnId,
    history: HistoryState,
}

/// A client scan over one table
pub struct Scanner {
    table: Arc<Table>,
    cache: Arc<BlockCache>,
    mode: ScanMode,
    merge_options: MergeOptions,

    /// Rows still to scan; clipped as each tablet finishes
    predicate: ScanPredicate,
    segment: Option<Segment>,
    last_key: Option<CellKey>,
    scan_txn: TxnId,
    end_of_scan: bool,
    history: HistoryState,

    watch: Arc<MergeWatch>,
    fragment_listener: ListenerId,
    tablet_listener: ListenerId,
    last_used: Instant,
}

impl Scanner {
    /// Create a scanner; no data is read until the first `scan`
    pub fn new(
        table: Arc<Table>,
        cache: Arc<BlockCache>,
        predicate: ScanPredicate,
        mode: ScanMode,
        config: &Config,
    ) -> Result<Self> {
        config.validate()?;
        // Reject unknown families up front rather than on first scan
        table.schema().groups_for(&predicate)?;

        let watch = Arc::new(MergeWatch::new());
        let fragment_watch: Arc<dyn FragmentListener> = watch.clone();
        let tablet_watch: Arc<dyn TabletListener> = watch.clone();
        let fragment_listener = table.add_fragment_listener(&fragment_watch);
        let tablet_listener = table.add_tablet_listener(&tablet_watch);

        let end_of_scan = predicate.row_predicate().is_empty();
        tracing::debug!(
            table = %table.name(),
            predicate = %predicate,
            mode = mode.as_str(),
            "scanner opened"
        );

        Ok(Self {
            table,
            cache,
            mode,
            merge_options: MergeOptions {
                filter_erasures: true,
                block_quota: config.max_blocks_per_call,
            },
            predicate,
            segment: None,
            last_key: None,
            scan_txn: 0,
            end_of_scan,
            history: HistoryState::default(),
            watch,
            fragment_listener,
            tablet_listener,
            last_used: Instant::now(),
        })
    }

    /// Produce the next batch of at most `max_cells` cells / `max_size` bytes
    ///
    /// May finish one tablet and continue into the next within a single
    /// call. On error, the open merge is discarded and the cursor is left
    /// where the previous successful call put it.
    pub fn scan(&mut self, max_cells: usize, max_size: usize) -> Result<ScanBatch> {
        self.last_used = Instant::now();
        let saved = self.cursor();

        if self.mode == ScanMode::LatestTxn
            && self.segment.is_some()
            && self.table.max_commit() > self.scan_txn
        {
            self.close_segment();
        }

        let mut sink = BatchSink::new(self.history.clone(), self.predicate.max_history());
        let result = self.fill(&mut sink, max_cells, max_size);
        let (cells, history) = sink.finish();

        if let Err(e) = result {
            self.close_segment();
            self.restore(saved);
            tracing::warn!(table = %self.table.name(), error = %e, "scan segment aborted");
            return Err(e);
        }

        self.history = history;
        if let Some(cell) = cells.last() {
            self.last_key = Some(cell.key.clone());
        }
        Ok(ScanBatch {
            cells,
            has_more: !self.end_of_scan,
            scan_txn: self.scan_txn,
        })
    }

    fn fill(&mut self, sink: &mut BatchSink, max_cells: usize, max_size: usize) -> Result<()> {
        loop {
            if self.end_of_scan || sink.cell_count() >= max_cells || sink.data_size() >= max_size {
                return Ok(());
            }

            // Step 1: Apply any structural change seen since the last step
            match self.watch.take() {
                Invalidation::Clean => {}
                Invalidation::Rebuild => self.close_segment(),
                Invalidation::Dropped => {
                    self.close_segment();
                    return Err(TabletError::NotLoaded(format!(
                        "tablet under scan of {} was dropped",
                        self.table.name()
                    )));
                }
            }

            // Step 2: Open a merge over the next tablet if needed
            if self.segment.is_none() && !self.open_segment()? {
                self.end_of_scan = true;
                return Ok(());
            }
            let Some(segment) = self.segment.as_mut() else {
                return Ok(());
            };

            // Step 3: Copy what fits
            let more = segment.merge.copy_merged(
                max_cells - sink.cell_count(),
                max_size - sink.data_size(),
                sink,
            )?;
            if more {
                return Ok(());
            }

            // Step 4: Tablet finished; drop its rows (and anything before)
            let rows = segment.rows.clone();
            self.close_segment();
            self.predicate = self.predicate.clip_to_future_rows(&rows);
            if self.predicate.row_predicate().is_empty() {
                self.end_of_scan = true;
            }
        }
    }

    /// Snapshot the chain for the first remaining row and open a merge on it
    ///
    /// Returns false when no rows remain.
    fn open_segment(&mut self) -> Result<bool> {
        loop {
            self.watch.begin_open();
            let Some(snapshot) = self.table.get_first_fragment_chain(&self.predicate)? else {
                self.watch.idle();
                return Ok(false);
            };

            let merge = FragmentMerge::new(
                &snapshot.chain,
                Arc::clone(&self.cache),
                self.predicate.restrict_rows(&snapshot.rows),
                self.last_key.as_ref(),
                self.merge_options,
            )?;

            if !self.watch.watch(snapshot.rows.clone()) {
                tracing::trace!(rows = %snapshot.rows, "chain changed while opening, retrying");
                continue;
            }

            tracing::trace!(
                table = %self.table.name(),
                rows = %snapshot.rows,
                fragments = snapshot.chain.len(),
                scan_txn = snapshot.scan_txn,
                "merge segment opened"
            );
            self.scan_txn = snapshot.scan_txn;
            self.segment = Some(Segment {
                merge,
                rows: snapshot.rows,
            });
            return Ok(true);
        }
    }

    fn close_segment(&mut self) {
        self.segment = None;
        self.watch.idle();
    }

    fn cursor(&self) -> Cursor {
        Cursor {
            predicate: self.predicate.clone(),
            end_of_scan: self.end_of_scan,
            scan_txn: self.scan_txn,
            history: self.history.clone(),
        }
    }

    fn restore(&mut self, cursor: Cursor) {
        self.predicate = cursor.predicate;
        self.end_of_scan = cursor.end_of_scan;
        self.scan_txn = cursor.scan_txn;
        self.history = cursor.history;
    }

    // =========================================================================
    // Cursor State
    // =========================================================================

    /// Key of the last cell returned
    pub fn last_key(&self) -> Option<&CellKey> {
        self.last_key.as_ref()
    }

    /// Whether the scan may still produce cells
    pub fn scan_continues(&self) -> bool {
        !self.end_of_scan
    }

    /// Table max commit when the current (or last) merge segment opened
    pub fn scan_transaction(&self) -> TxnId {
        self.scan_txn
    }

    /// Predicate over the rows not yet finished
    pub fn predicate(&self) -> &ScanPredicate {
        &self.predicate
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.table.remove_fragment_listener(self.fragment_listener);
        self.table.remove_tablet_listener(self.tablet_listener);
    }
}
