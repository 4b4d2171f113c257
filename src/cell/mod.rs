//! Cell Module
//!
//! The versioned record stored in tables and its sort key.
//!
//! ## Ordering
//! ```text
//! (row ASC, column ASC, timestamp DESC)
//!
//!   (r1, c1, 5) < (r1, c1, 3) < (r1, c2, 9) < (r2, c1, 1)
//! ```
//! The newest version of a (row, column) pair sorts first.

mod range;

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;

pub use range::{cmp_lower, cmp_upper, RowProbe, RowRange, RowSet};

/// Transaction id assigned to commits (monotonically increasing per table)
pub type TxnId = i64;

/// Separator between family and qualifier in a column name
pub const FAMILY_SEPARATOR: u8 = b':';

// =============================================================================
// CellKey
// =============================================================================

/// Sort key of a cell: (row, column, timestamp)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellKey {
    pub row: Bytes,
    pub column: Bytes,
    pub timestamp: i64,
}

impl CellKey {
    pub fn new(row: impl Into<Bytes>, column: impl Into<Bytes>, timestamp: i64) -> Self {
        Self {
            row: row.into(),
            column: column.into(),
            timestamp,
        }
    }

    /// Column family: the column up to the first ':' (or the whole column)
    pub fn family(&self) -> &[u8] {
        column_family(&self.column)
    }

    /// Smallest key strictly greater than this one
    ///
    /// Timestamps sort descending, so the successor is the next older version;
    /// past `i64::MIN` it rolls to the next possible column.
    pub fn successor(&self) -> CellKey {
        if self.timestamp > i64::MIN {
            CellKey {
                row: self.row.clone(),
                column: self.column.clone(),
                timestamp: self.timestamp - 1,
            }
        } else {
            let mut column = self.column.to_vec();
            column.push(0);
            CellKey {
                row: self.row.clone(),
                column: Bytes::from(column),
                timestamp: i64::MAX,
            }
        }
    }

    /// Whether `other` names the same (row, column) pair
    pub fn same_column(&self, other: &CellKey) -> bool {
        self.row == other.row && self.column == other.column
    }
}

impl Ord for CellKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.row
            .cmp(&other.row)
            .then_with(|| self.column.cmp(&other.column))
            .then_with(|| other.timestamp.cmp(&self.timestamp))
    }
}

impl PartialOrd for CellKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            String::from_utf8_lossy(&self.row),
            String::from_utf8_lossy(&self.column),
            self.timestamp
        )
    }
}

/// Column family of a raw column name
pub fn column_family(column: &[u8]) -> &[u8] {
    match column.iter().position(|&b| b == FAMILY_SEPARATOR) {
        Some(pos) => &column[..pos],
        None => column,
    }
}

// =============================================================================
// Cell
// =============================================================================

/// Payload of a cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    /// A live value
    Value(Bytes),

    /// An erasure marker (tombstone) for exactly this key
    Erasure,
}

/// A versioned record: key plus value or erasure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub key: CellKey,
    pub value: CellValue,
}

impl Cell {
    /// Create a live cell
    pub fn new(
        row: impl Into<Bytes>,
        column: impl Into<Bytes>,
        timestamp: i64,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            key: CellKey::new(row, column, timestamp),
            value: CellValue::Value(value.into()),
        }
    }

    /// Create an erasure cell
    pub fn erasure(row: impl Into<Bytes>, column: impl Into<Bytes>, timestamp: i64) -> Self {
        Self {
            key: CellKey::new(row, column, timestamp),
            value: CellValue::Erasure,
        }
    }

    pub fn is_erasure(&self) -> bool {
        matches!(self.value, CellValue::Erasure)
    }

    /// Value bytes, or None for an erasure
    pub fn value(&self) -> Option<&Bytes> {
        match &self.value {
            CellValue::Value(v) => Some(v),
            CellValue::Erasure => None,
        }
    }

    /// Approximate in-memory size used for batch and cache accounting
    pub fn data_size(&self) -> usize {
        let value_len = self.value().map_or(0, |v| v.len());
        self.key.row.len() + self.key.column.len() + 8 + value_len
    }
}
