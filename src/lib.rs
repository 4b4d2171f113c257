//! # tabletkv
//!
//! Tablet serving core for a versioned, BigTable-style table store:
//! - Cells keyed by (row, column, timestamp), newest version first
//! - Tables split into row-range tablets, each a chain of immutable fragments
//! - k-way merge with newest-fragment-wins precedence
//! - Paginated scanners that survive compaction, split, merge and drop
//! - Reference-counted block cache shared by every scanner
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ScannerManager / Scanner                     │
//! │        (paging cursor, invalidation, tablet clipping)        │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │ chain snapshot               │ listener events
//!                ▼                              │
//! ┌─────────────────────────────┐               │
//! │            Table            │───────────────┘
//! │ (tablets, commit ring, RwLock)
//! └──────────────┬──────────────┘
//!                │ Vec<Arc<dyn Fragment>>
//!                ▼
//! ┌─────────────────────────────┐       ┌─────────────────────┐
//! │        FragmentMerge        │──────▶│     BlockCache      │
//! │     (heap, newest wins)     │ pins  │  (LRU of unpinned)  │
//! └──────────────┬──────────────┘       └──────────┬──────────┘
//!                │                                 │ load_block
//!                ▼                                 ▼
//!         ┌─────────────┐                   ┌──────────────┐
//!         │ MemFragment │                   │ DiskFragment │
//!         └─────────────┘                   └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod cache;
pub mod cell;
pub mod fragment;
pub mod merge;
pub mod predicate;
pub mod scanner;
pub mod table;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use cache::BlockCache;
pub use cell::{Cell, CellKey, CellValue, RowRange, RowSet, TxnId};
pub use config::Config;
pub use error::{Result, TabletError};
pub use fragment::{Fragment, FragmentLoader};
pub use merge::{FragmentMerge, MergeOptions};
pub use predicate::{ScanMode, ScanPredicate};
pub use scanner::{ScanBatch, Scanner, ScannerId, ScannerManager};
pub use table::{Table, TableSchema};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of tabletkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
