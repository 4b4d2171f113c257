//! Commit Ring
//!
//! Remembers the last transaction committed for recently written rows.
//!
//! The ring holds at most `capacity` rows. When it overflows, the row with
//! the oldest commit is forgotten and the ring's floor rises to that commit;
//! a forgotten row is conservatively reported as committed at the floor.

use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;

use crate::cell::TxnId;

/// Bounded row → last-commit map used for optimistic conflict checks
#[derive(Debug)]
pub struct CommitRing {
    capacity: usize,
    /// Last commit of each tracked row
    rows: HashMap<Bytes, TxnId>,
    /// Tracked rows ordered by commit, oldest first
    by_commit: BTreeSet<(TxnId, Bytes)>,
    /// Upper bound on the commit of any row no longer tracked
    floor: TxnId,
    /// Highest commit ever recorded
    max: TxnId,
}

impl CommitRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rows: HashMap::new(),
            by_commit: BTreeSet::new(),
            floor: 0,
            max: 0,
        }
    }

    pub fn max_commit(&self) -> TxnId {
        self.max
    }

    /// Oldest commit the ring can still vouch for
    pub fn min_commit(&self) -> TxnId {
        self.by_commit
            .first()
            .map_or(self.floor, |(txn, _)| *txn)
    }

    /// Last commit of `row` (the floor if the row is not tracked)
    pub fn commit_of(&self, row: &[u8]) -> TxnId {
        self.rows.get(row).copied().unwrap_or(self.floor)
    }

    /// Record that `row` was committed at `txn`
    pub fn set_commit(&mut self, row: Bytes, txn: TxnId) {
        self.max = self.max.max(txn);

        if let Some(&old) = self.rows.get(&row) {
            if old >= txn {
                return;
            }
            self.by_commit.remove(&(old, row.clone()));
        }
        self.rows.insert(row.clone(), txn);
        self.by_commit.insert((txn, row));

        while self.rows.len() > self.capacity {
            let Some((txn, row)) = self.by_commit.pop_first() else {
                break;
            };
            self.rows.remove(&row);
            self.floor = self.floor.max(txn);
        }
    }

    /// Number of rows tracked exactly
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
