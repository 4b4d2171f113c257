//! Scan Predicate Module
//!
//! Composable filter over rows, column families, timestamps and history depth.
//!
//! ## Responsibilities
//! - Decide whether a cell key is visible to a scan
//! - Shrink the row restriction as a scan makes progress (clipping)
//! - Narrow a scan to one tablet's rows before merging its fragments

use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Bound, RangeInclusive};
use std::str::FromStr;

use bytes::Bytes;

use crate::cell::{column_family, CellKey, RowRange, RowSet};
use crate::error::TabletError;

/// Filter applied to every scan and merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPredicate {
    /// Rows the scan may still return
    rows: RowSet,

    /// Allowed column families (None = any family)
    families: Option<BTreeSet<Bytes>>,

    /// Allowed timestamps, inclusive on both ends
    time: RangeInclusive<i64>,

    /// Max versions per (row, column); 0 = unlimited
    max_history: usize,
}

impl Default for ScanPredicate {
    fn default() -> Self {
        Self {
            rows: RowSet::all(),
            families: None,
            time: i64::MIN..=i64::MAX,
            max_history: 0,
        }
    }
}

impl ScanPredicate {
    /// A predicate matching every cell
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Builders
    // =========================================================================

    pub fn with_rows(mut self, rows: RowSet) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_row_range(self, range: RowRange) -> Self {
        self.with_rows(RowSet::from(range))
    }

    pub fn with_families<I, F>(mut self, families: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Bytes>,
    {
        self.families = Some(families.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_time_range(mut self, min: i64, max: i64) -> Self {
        self.time = min..=max;
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn row_predicate(&self) -> &RowSet {
        &self.rows
    }

    pub fn column_predicate(&self) -> Option<&BTreeSet<Bytes>> {
        self.families.as_ref()
    }

    pub fn time_predicate(&self) -> &RangeInclusive<i64> {
        &self.time
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    // =========================================================================
    // Matching
    // =========================================================================

    pub fn matches_family(&self, family: &[u8]) -> bool {
        match &self.families {
            Some(families) => families.contains(family),
            None => true,
        }
    }

    pub fn matches_column(&self, column: &[u8]) -> bool {
        self.matches_family(column_family(column))
    }

    pub fn matches(&self, key: &CellKey) -> bool {
        self.time.contains(&key.timestamp)
            && self.matches_column(&key.column)
            && self.rows.contains(&key.row)
    }

    // =========================================================================
    // Clipping
    // =========================================================================

    /// Copy of this predicate without the rows in `range`
    pub fn clip_rows(&self, range: &RowRange) -> ScanPredicate {
        ScanPredicate {
            rows: self.rows.subtract(range),
            ..self.clone()
        }
    }

    /// Copy of this predicate without `range` or any row before it
    pub fn clip_to_future_rows(&self, range: &RowRange) -> ScanPredicate {
        self.clip_rows(&RowRange::new(Bound::Unbounded, range.upper.clone()))
    }

    /// Copy of this predicate limited to the rows in `range`
    pub fn restrict_rows(&self, range: &RowRange) -> ScanPredicate {
        ScanPredicate {
            rows: self.rows.intersect_range(range),
            ..self.clone()
        }
    }

    /// Copy of this predicate limited to the rows in `rows`
    pub fn restrict_to(&self, rows: &RowSet) -> ScanPredicate {
        ScanPredicate {
            rows: self.rows.intersect(rows),
            ..self.clone()
        }
    }
}

impl fmt::Display for ScanPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rows {}", self.rows)?;
        if let Some(families) = &self.families {
            let names: Vec<_> = families.iter().map(|f| String::from_utf8_lossy(f)).collect();
            write!(f, " and family in ({})", names.join(", "))?;
        }
        if *self.time.start() != i64::MIN || *self.time.end() != i64::MAX {
            write!(f, " and {} <= time <= {}", self.time.start(), self.time.end())?;
        }
        if self.max_history > 0 {
            write!(f, " and history = {}", self.max_history)?;
        }
        Ok(())
    }
}

// =============================================================================
// Scan Mode
// =============================================================================

/// Isolation mode requested by a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// Each merge segment reads whatever was committed when it opened
    #[default]
    AnyTxn,

    /// Reopen the merge whenever newer commits have landed since it opened
    LatestTxn,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::AnyTxn => "any_txn",
            ScanMode::LatestTxn => "latest_txn",
        }
    }
}

impl FromStr for ScanMode {
    type Err = TabletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any_txn" => Ok(ScanMode::AnyTxn),
            "latest_txn" => Ok(ScanMode::LatestTxn),
            other => Err(TabletError::BadScanMode(other.to_string())),
        }
    }
}
