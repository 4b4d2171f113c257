//! Tablet
//!
//! One row range of a table and, per column group, its fragment chain.
//!
//! ## Chain Layout
//! ```text
//!   newest ──────────────────────────────────────────▶ oldest
//!   [ mem_k … mem_0 ][ disk_n … disk_0 ]
//!     not yet flushed   on-disk fragments
//! ```
//! In-memory fragments always precede on-disk ones in merge order. A split
//! scopes every fragment of the parent to the rows of each half.

use std::ops::Bound;
use std::sync::Arc;

use bytes::Bytes;

use crate::cell::{RowRange, RowSet};
use crate::error::{Result, TabletError};
use crate::fragment::{Fragment, ScopedFragment};

/// A fragment as one chain holds it
#[derive(Clone)]
struct ChainEntry {
    fragment: Arc<dyn Fragment>,
    /// Rows this chain reads from the fragment; None reads all of it
    scope: Option<RowSet>,
    /// What merges see: `fragment` itself, or a scoped view of it
    view: Arc<dyn Fragment>,
}

impl ChainEntry {
    fn new(fragment: Arc<dyn Fragment>) -> Self {
        Self {
            view: Arc::clone(&fragment),
            fragment,
            scope: None,
        }
    }

    fn scoped(fragment: Arc<dyn Fragment>, scope: RowSet) -> Self {
        let view: Arc<dyn Fragment> =
            Arc::new(ScopedFragment::new(Arc::clone(&fragment), scope.clone()));
        Self {
            fragment,
            scope: Some(scope),
            view,
        }
    }

    fn name(&self) -> &str {
        self.fragment.name()
    }

    /// Rows of `range` this entry reads
    fn rows_within(&self, range: &RowRange) -> RowSet {
        match &self.scope {
            Some(scope) => scope.intersect_range(range),
            None => RowSet::from(range.clone()),
        }
    }

    /// The same fragment limited to `range`
    fn clip(&self, range: &RowRange) -> Self {
        Self::scoped(Arc::clone(&self.fragment), self.rows_within(range))
    }
}

/// Ordered fragments of one column group, newest first
#[derive(Clone, Default)]
pub struct FragmentChain {
    mem: Vec<ChainEntry>,
    disk: Vec<ChainEntry>,
}

impl FragmentChain {
    /// Chain of on-disk fragments, given newest first
    pub fn from_disk(fragments: Vec<Arc<dyn Fragment>>) -> Self {
        Self {
            mem: Vec::new(),
            disk: fragments.into_iter().map(ChainEntry::new).collect(),
        }
    }

    /// Add a freshly committed in-memory fragment at the head
    pub fn push_mem(&mut self, fragment: Arc<dyn Fragment>) {
        self.mem.insert(0, ChainEntry::new(fragment));
    }

    /// Fragments in merge order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Fragment>> {
        self.entries().map(|e| &e.view)
    }

    fn entries(&self) -> impl Iterator<Item = &ChainEntry> {
        self.mem.iter().chain(self.disk.iter())
    }

    pub fn len(&self) -> usize {
        self.mem.len() + self.disk.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mem_len(&self) -> usize {
        self.mem.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries().map(|e| e.name().to_string()).collect()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries().position(|e| e.name() == name)
    }

    fn find(&self, name: &str) -> Option<&ChainEntry> {
        self.entries().find(|e| e.name() == name)
    }

    /// Swap the contiguous run named by `old` for `new` (or nothing)
    ///
    /// A run touching in-memory fragments must include the oldest of them;
    /// its replacement becomes the newest on-disk fragment. Returns false
    /// when none of `old` is in this chain.
    pub fn replace(&mut self, old: &[&str], new: Option<Arc<dyn Fragment>>) -> Result<bool> {
        let mut positions: Vec<usize> = old.iter().filter_map(|n| self.position(n)).collect();
        if positions.is_empty() {
            return Ok(false);
        }
        if positions.len() != old.len() {
            return Err(TabletError::Storage(format!(
                "replacement names {:?} only partly present in chain",
                old
            )));
        }

        positions.sort_unstable();
        let start = positions[0];
        let end = start + positions.len();
        if positions.iter().enumerate().any(|(i, &p)| p != start + i) {
            return Err(TabletError::Storage(format!(
                "replacement names {:?} are not contiguous in chain",
                old
            )));
        }

        let new = new.map(ChainEntry::new);
        let mem_len = self.mem.len();
        if start < mem_len {
            if end < mem_len {
                return Err(TabletError::Storage(format!(
                    "replacement {:?} leaves older in-memory fragments behind",
                    old
                )));
            }
            self.mem.truncate(start);
            self.disk.drain(..end - mem_len);
            if let Some(new) = new {
                self.disk.insert(0, new);
            }
        } else {
            let at = start - mem_len;
            self.disk.drain(at..end - mem_len);
            if let Some(new) = new {
                self.disk.insert(at, new);
            }
        }
        Ok(true)
    }

    /// This chain with every fragment limited to `range`
    fn clip(&self, range: &RowRange) -> FragmentChain {
        FragmentChain {
            mem: self.mem.iter().map(|e| e.clip(range)).collect(),
            disk: self.disk.iter().map(|e| e.clip(range)).collect(),
        }
    }

    /// Combine the on-disk chains of two adjacent tablets
    ///
    /// A fragment held by one side keeps serving only that side's rows. A
    /// fragment held by both (left over from a split) serves the rows either
    /// side read from it; it is older than anything either side gained
    /// since, so it goes last.
    fn join(
        left: &FragmentChain,
        left_rows: &RowRange,
        right: &FragmentChain,
        right_rows: &RowRange,
    ) -> Result<FragmentChain> {
        if !left.mem.is_empty() || !right.mem.is_empty() {
            return Err(TabletError::Storage(
                "cannot join tablets holding unflushed fragments".to_string(),
            ));
        }

        let mut disk = Vec::with_capacity(left.disk.len() + right.disk.len());
        disk.extend(
            left.disk
                .iter()
                .filter(|e| right.position(e.name()).is_none())
                .map(|e| e.clip(left_rows)),
        );
        disk.extend(
            right
                .disk
                .iter()
                .filter(|e| left.position(e.name()).is_none())
                .map(|e| e.clip(right_rows)),
        );
        for entry in &left.disk {
            if let Some(other) = right.find(entry.name()) {
                let rows = entry
                    .rows_within(left_rows)
                    .union(&other.rows_within(right_rows));
                disk.push(ChainEntry::scoped(Arc::clone(&entry.fragment), rows));
            }
        }

        Ok(FragmentChain { mem: Vec::new(), disk })
    }
}

/// A contiguous row-range shard of a table
#[derive(Clone)]
pub struct Tablet {
    range: RowRange,
    /// One chain per column group, in schema order
    groups: Vec<FragmentChain>,
}

impl Tablet {
    pub fn new(range: RowRange, groups: Vec<FragmentChain>) -> Self {
        Self { range, groups }
    }

    pub fn range(&self) -> &RowRange {
        &self.range
    }

    pub fn chain(&self, group: usize) -> Option<&FragmentChain> {
        self.groups.get(group)
    }

    pub(crate) fn chain_mut(&mut self, group: usize) -> Option<&mut FragmentChain> {
        self.groups.get_mut(group)
    }

    /// Split at `at`: rows before it stay left, `at` and after go right
    pub(crate) fn split(&self, at: &[u8]) -> Result<(Tablet, Tablet)> {
        let at = Bytes::copy_from_slice(at);
        let left = RowRange::new(self.range.lower.clone(), Bound::Excluded(at.clone()));
        let right = RowRange::new(Bound::Included(at), self.range.upper.clone());
        if left.is_empty() || right.is_empty() {
            return Err(TabletError::Storage(format!(
                "split point leaves an empty tablet in {}",
                self.range
            )));
        }

        let clip = |range: &RowRange| -> Vec<FragmentChain> {
            self.groups.iter().map(|g| g.clip(range)).collect()
        };
        Ok((
            Tablet::new(left.clone(), clip(&left)),
            Tablet::new(right.clone(), clip(&right)),
        ))
    }

    /// Join with the tablet immediately after this one
    pub(crate) fn join(&self, next: &Tablet) -> Result<Tablet> {
        let range = RowRange::new(self.range.lower.clone(), next.range.upper.clone());
        let groups = self
            .groups
            .iter()
            .zip(next.groups.iter())
            .map(|(l, r)| FragmentChain::join(l, &self.range, r, &next.range))
            .collect::<Result<Vec<_>>>()?;
        Ok(Tablet::new(range, groups))
    }
}
