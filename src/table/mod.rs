//! Table Module
//!
//! Registry of the tablets a server holds for one table, plus the commit
//! ring used for optimistic conflict checks.
//!
//! ## Responsibilities
//! - Map a row (or a scan predicate) to the fragment chain that answers it
//! - Track per-row commit versions and reject conflicting mutations
//! - Apply structural changes (fragment replacement, split, merge, drop)
//!   and tell registered listeners about them before the lock is released

mod commit;
mod listener;
mod schema;
mod tablet;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::cell::{Cell, RowProbe, RowRange, TxnId};
use crate::config::Config;
use crate::error::{Result, TabletError};
use crate::fragment::{Fragment, MemFragment};
use crate::predicate::ScanPredicate;

pub use commit::CommitRing;
pub use listener::{
    FragmentListener, ListenerId, ListenerRegistry, TabletEvent, TabletListener,
};
pub use schema::{ColumnGroup, TableSchema};
pub use tablet::{FragmentChain, Tablet};

/// Fragment chain captured for one merge segment
pub struct ChainSnapshot {
    /// Fragments to merge, newest first, over every relevant column group
    pub chain: Vec<Arc<dyn Fragment>>,

    /// Row range of the tablet the chain belongs to
    pub rows: RowRange,

    /// Table max commit when the snapshot was taken
    pub scan_txn: TxnId,
}

impl std::fmt::Debug for ChainSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainSnapshot")
            .field("chain", &self.chain.iter().map(|x| x.name()).collect::<Vec<_>>())
            .field("rows", &self.rows)
            .field("scan_txn", &self.scan_txn)
            .finish()
    }
}

/// Everything guarded by the table lock
struct TableState {
    /// Loaded tablets, sorted by upper bound and pairwise disjoint
    tablets: Vec<Tablet>,
    commits: CommitRing,
    fragment_listeners: ListenerRegistry<dyn FragmentListener>,
    tablet_listeners: ListenerRegistry<dyn TabletListener>,
}

impl TableState {
    /// Index of the tablet containing `row`
    fn find(&self, row: &[u8]) -> Option<usize> {
        let idx = match self
            .tablets
            .binary_search_by(|t| RowProbe::Row(row).cmp_upper(&t.range().upper))
        {
            Ok(idx) | Err(idx) => idx,
        };
        self.tablets
            .get(idx)
            .filter(|t| t.range().contains(row))
            .map(|_| idx)
    }

    fn verify_commit_applies<'a>(
        &self,
        rows: impl IntoIterator<Item = &'a Bytes>,
        max_txn: TxnId,
    ) -> Result<()> {
        if max_txn >= self.commits.max_commit() {
            return Ok(());
        }
        for row in rows {
            let commit = self.commits.commit_of(row);
            if commit > max_txn {
                return Err(TabletError::MutationConflict {
                    row: row.clone(),
                    commit,
                    max_txn,
                });
            }
        }
        Ok(())
    }
}

/// One table as served by this process
///
/// ## Concurrency Model
///
/// A single `RwLock` (the table lock) guards the tablet list, every fragment
/// chain, the commit ring and both listener registries. It is only held for
/// short, non-blocking work: lookups, chain snapshots and listener dispatch.
/// Block I/O never happens under it.
///
/// Listeners are called while the write lock is held, on the thread making
/// the structural change.
pub struct Table {
    schema: TableSchema,
    config: Config,
    state: RwLock<TableState>,

    /// Sequence for naming in-memory fragments
    next_mem_seq: AtomicU64,
}

impl Table {
    /// Create a table with no tablets loaded
    pub fn new(schema: TableSchema, config: Config) -> Self {
        let commits = CommitRing::new(config.commit_ring_capacity);
        Self {
            schema,
            config,
            state: RwLock::new(TableState {
                tablets: Vec::new(),
                commits,
                fragment_listeners: ListenerRegistry::default(),
                tablet_listeners: ListenerRegistry::default(),
            }),
            next_mem_seq: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Tablet Loading
    // =========================================================================

    /// Start serving `range` from the given per-group fragment chains
    ///
    /// `chains` maps a column group name to its on-disk fragments, newest
    /// first. Groups not listed start empty.
    pub fn load_tablet(
        &self,
        range: RowRange,
        chains: Vec<(&str, Vec<Arc<dyn Fragment>>)>,
    ) -> Result<()> {
        if range.is_empty() {
            return Err(TabletError::Storage(format!("cannot load empty tablet {}", range)));
        }

        let mut groups = vec![FragmentChain::default(); self.schema.groups.len()];
        for (name, fragments) in chains {
            let idx = self.schema.group_index(name).ok_or_else(|| {
                TabletError::Storage(format!("table {} has no column group {}", self.name(), name))
            })?;
            groups[idx] = FragmentChain::from_disk(fragments);
        }

        let mut state = self.state.write();
        let idx = match state
            .tablets
            .binary_search_by(|t| RowProbe::Upper(&range.upper).cmp_upper(&t.range().upper))
        {
            Ok(idx) | Err(idx) => idx,
        };
        let clash = [idx.checked_sub(1), Some(idx)]
            .into_iter()
            .flatten()
            .filter_map(|i| state.tablets.get(i))
            .any(|t| t.range().overlaps(&range));
        if clash {
            return Err(TabletError::Storage(format!(
                "tablet {} overlaps a loaded tablet of {}",
                range,
                self.name()
            )));
        }

        tracing::debug!(table = %self.name(), rows = %range, "tablet loaded");
        state.tablets.insert(idx, Tablet::new(range, groups));
        Ok(())
    }

    /// Row ranges of the loaded tablets, in row order
    pub fn tablet_ranges(&self) -> Vec<RowRange> {
        self.state
            .read()
            .tablets
            .iter()
            .map(|t| t.range().clone())
            .collect()
    }

    pub fn tablet_count(&self) -> usize {
        self.state.read().tablets.len()
    }

    /// Fragment names of one group's chain in the tablet holding `row`
    pub fn chain_names(&self, row: &[u8], group: &str) -> Result<Vec<String>> {
        let group = self.group_index(group)?;
        let state = self.state.read();
        let idx = state.find(row).ok_or_else(|| self.not_loaded(row))?;
        Ok(state.tablets[idx]
            .chain(group)
            .map(FragmentChain::names)
            .unwrap_or_default())
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Fragment chain for the lowest row `predicate` can match
    ///
    /// Returns None when the predicate's row restriction is empty. Chains of
    /// every column group the predicate needs are concatenated in schema
    /// order; in-memory fragments lead each group's chain.
    pub fn get_first_fragment_chain(
        &self,
        predicate: &ScanPredicate,
    ) -> Result<Option<ChainSnapshot>> {
        let Some(row) = predicate.row_predicate().first_row() else {
            return Ok(None);
        };
        let groups = self.schema.groups_for(predicate)?;

        let state = self.state.read();
        let idx = state.find(&row).ok_or_else(|| self.not_loaded(&row))?;
        let tablet = &state.tablets[idx];

        let chain = groups
            .iter()
            .filter_map(|&g| tablet.chain(g))
            .flat_map(|c| c.iter().cloned())
            .collect();

        Ok(Some(ChainSnapshot {
            chain,
            rows: tablet.range().clone(),
            scan_txn: state.commits.max_commit(),
        }))
    }

    // =========================================================================
    // Commit Tracking
    // =========================================================================

    /// Fail if any of `rows` was committed after `max_txn`
    ///
    /// A caller whose `max_txn` is at or past the table's max commit has seen
    /// everything, so it never conflicts.
    pub fn verify_commit_applies<'a>(
        &self,
        rows: impl IntoIterator<Item = &'a Bytes>,
        max_txn: TxnId,
    ) -> Result<()> {
        self.state.read().verify_commit_applies(rows, max_txn)
    }

    /// Record `txn` as the last commit of each of `rows`
    pub fn update_row_commits<'a>(&self, rows: impl IntoIterator<Item = &'a Bytes>, txn: TxnId) {
        let mut state = self.state.write();
        for row in rows {
            state.commits.set_commit(row.clone(), txn);
        }
    }

    pub fn max_commit(&self) -> TxnId {
        self.state.read().commits.max_commit()
    }

    pub fn min_commit(&self) -> TxnId {
        self.state.read().commits.min_commit()
    }

    pub fn commit_of(&self, row: &[u8]) -> TxnId {
        self.state.read().commits.commit_of(row)
    }

    /// Apply `cells` as one mutation and return its transaction id
    ///
    /// The cells become a new in-memory fragment at the head of each affected
    /// (tablet, column group) chain.
    pub fn commit(&self, cells: Vec<Cell>, max_txn: TxnId) -> Result<TxnId> {
        if cells.is_empty() {
            return Ok(self.max_commit());
        }

        // Step 1: Resolve column groups before touching any state
        let groups = cells
            .iter()
            .map(|c| self.schema.group_of_family(c.key.family()))
            .collect::<Result<Vec<_>>>()?;
        let rows: BTreeSet<Bytes> = cells.iter().map(|c| c.key.row.clone()).collect();

        let mut state = self.state.write();

        // Step 2: Optimistic conflict check
        state.verify_commit_applies(&rows, max_txn)?;

        // Step 3: Route cells to tablets
        let mut routed: BTreeMap<(usize, usize), Vec<Cell>> = BTreeMap::new();
        for (cell, group) in cells.into_iter().zip(groups) {
            let tablet = state
                .find(&cell.key.row)
                .ok_or_else(|| self.not_loaded(&cell.key.row))?;
            routed.entry((tablet, group)).or_default().push(cell);
        }

        // Step 4: Install in-memory fragments and advance commits
        let txn = state.commits.max_commit() + 1;
        for ((tablet, group), cells) in routed {
            let seq = self.next_mem_seq.fetch_add(1, Ordering::Relaxed);
            let name = format!("mem:{}:{}", self.name(), seq);
            let fragment = MemFragment::new(name, cells, self.config.mem_block_cells);
            if let Some(chain) = state.tablets[tablet].chain_mut(group) {
                chain.push_mem(Arc::new(fragment));
            }
        }
        for row in rows {
            state.commits.set_commit(row, txn);
        }

        tracing::trace!(table = %self.name(), txn, "mutation committed");
        Ok(txn)
    }

    // =========================================================================
    // Structural Changes
    // =========================================================================

    /// Swap fragments `old` for `new` in every tablet overlapping `rows`
    ///
    /// Used to install a compaction result or a memory flush. Returns how
    /// many tablet chains changed; fragment listeners hear about `rows` when
    /// any did.
    pub fn replace_fragments(
        &self,
        rows: &RowRange,
        group: &str,
        old: &[&str],
        new: Option<Arc<dyn Fragment>>,
    ) -> Result<usize> {
        let group = self.group_index(group)?;
        let mut state = self.state.write();

        // Stage every change first so a bad request leaves all chains intact
        let mut staged = Vec::new();
        for (idx, tablet) in state.tablets.iter().enumerate() {
            if !tablet.range().overlaps(rows) {
                continue;
            }
            let mut chain = tablet.chain(group).cloned().unwrap_or_default();
            if chain.replace(old, new.clone())? {
                staged.push((idx, chain));
            }
        }

        let changed = staged.len();
        for (idx, chain) in staged {
            if let Some(slot) = state.tablets[idx].chain_mut(group) {
                *slot = chain;
            }
        }

        if changed > 0 {
            state.fragment_listeners.notify(|l| l.fragments_replaced(rows));
            tracing::debug!(
                table = %self.name(),
                rows = %rows,
                replaced = old.len(),
                tablets = changed,
                "fragments replaced"
            );
        }
        Ok(changed)
    }

    /// Split the tablet holding `at` so that `at` starts a new tablet
    pub fn split_tablet(&self, at: &[u8]) -> Result<()> {
        let mut state = self.state.write();
        let idx = state.find(at).ok_or_else(|| self.not_loaded(at))?;

        let rows = state.tablets[idx].range().clone();
        let (left, right) = state.tablets[idx].split(at)?;
        state.tablets[idx] = left;
        state.tablets.insert(idx + 1, right);

        let event = TabletEvent::Split {
            rows,
            at: Bytes::copy_from_slice(at),
        };
        state.tablet_listeners.notify(|l| l.tablet_changed(&event));
        tracing::debug!(table = %self.name(), rows = %event.rows(), "tablet split");
        Ok(())
    }

    /// Join the tablet holding `row` with the tablet right after it
    ///
    /// Returns the joined range.
    pub fn merge_tablets(&self, row: &[u8]) -> Result<RowRange> {
        let mut state = self.state.write();
        let idx = state.find(row).ok_or_else(|| self.not_loaded(row))?;

        let joined = match state.tablets.get(idx + 1) {
            Some(next) if state.tablets[idx].range().is_followed_by(next.range()) => {
                state.tablets[idx].join(next)?
            }
            _ => {
                return Err(TabletError::Storage(format!(
                    "tablet {} has no adjacent successor",
                    state.tablets[idx].range()
                )))
            }
        };

        let rows = joined.range().clone();
        state.tablets[idx] = joined;
        state.tablets.remove(idx + 1);

        let event = TabletEvent::Merged { rows: rows.clone() };
        state.tablet_listeners.notify(|l| l.tablet_changed(&event));
        tracing::debug!(table = %self.name(), rows = %rows, "tablets merged");
        Ok(rows)
    }

    /// Stop serving the tablet holding `row`
    ///
    /// Returns the dropped range.
    pub fn drop_tablet(&self, row: &[u8]) -> Result<RowRange> {
        let mut state = self.state.write();
        let idx = state.find(row).ok_or_else(|| self.not_loaded(row))?;
        let tablet = state.tablets.remove(idx);
        let rows = tablet.range().clone();

        let event = TabletEvent::Dropped { rows: rows.clone() };
        state.tablet_listeners.notify(|l| l.tablet_changed(&event));
        tracing::debug!(table = %self.name(), rows = %rows, "tablet dropped");
        Ok(rows)
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    pub fn add_fragment_listener(&self, listener: &Arc<dyn FragmentListener>) -> ListenerId {
        self.state.write().fragment_listeners.add(listener)
    }

    pub fn remove_fragment_listener(&self, id: ListenerId) -> bool {
        self.state.write().fragment_listeners.remove(id)
    }

    pub fn add_tablet_listener(&self, listener: &Arc<dyn TabletListener>) -> ListenerId {
        self.state.write().tablet_listeners.add(listener)
    }

    pub fn remove_tablet_listener(&self, id: ListenerId) -> bool {
        self.state.write().tablet_listeners.remove(id)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn group_index(&self, group: &str) -> Result<usize> {
        self.schema
            .group_index(group)
            .ok_or_else(|| TabletError::UnknownColumnFamily(group.to_string()))
    }

    fn not_loaded(&self, row: &[u8]) -> TabletError {
        TabletError::NotLoaded(format!(
            "table {} has no tablet for row {:?}",
            self.name(),
            String::from_utf8_lossy(row)
        ))
    }
}
