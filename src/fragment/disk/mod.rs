//! Disk Fragment Module
//!
//! Block-structured, immutable fragment files.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Header (8 bytes)                                            │
//! │   Magic: "TKVF" (4) | Version: u16 (2) | Reserved (2)       │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Data Blocks (variable)                                      │
//! │   [RowLen: u32][ColLen: u32][Ts: i64][ValLen: u32]          │
//! │   [Row][Column][Value]                                      │
//! │   ... repeated for each cell, in key order ...              │
//! │   (ValLen = u32::MAX means erasure, no value bytes)         │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Index Block (bincode Vec<BlockHandle>)                      │
//! │   offset, length, CRC32 and summary of each data block      │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Footer (20 bytes)                                           │
//! │   IndexOffset: u64 (8) | IndexLen: u32 (4)                  │
//! │   IndexCRC: u32 (4) | Magic: "TKVF" (4)                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod reader;
mod writer;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::{BlockMeta, Fragment, FragmentLoader};

pub use reader::DiskFragment;
pub use writer::{FragmentInfo, FragmentWriter};

// =============================================================================
// Shared Constants (used by writer and reader)
// =============================================================================

/// Magic bytes identifying a tabletkv fragment file
pub(crate) const MAGIC: &[u8; 4] = b"TKVF";

/// Current fragment format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + Reserved (2) = 8 bytes
pub(crate) const HEADER_SIZE: u64 = 8;

/// Footer size: IndexOffset (8) + IndexLen (4) + IndexCRC (4) + Magic (4) = 20 bytes
pub(crate) const FOOTER_SIZE: u64 = 20;

/// Fixed part of a cell entry: RowLen (4) + ColLen (4) + Ts (8) + ValLen (4)
pub(crate) const ENTRY_HEADER_SIZE: usize = 20;

/// Sentinel value length indicating an erasure
pub(crate) const ERASURE_MARKER: u32 = u32::MAX;

/// Location and summary of one data block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct BlockHandle {
    pub offset: u64,
    pub length: u32,
    pub crc: u32,
    pub meta: BlockMeta,
}

// =============================================================================
// Loader
// =============================================================================

/// Opens fragment files named relative to a root directory
#[derive(Debug, Clone)]
pub struct DiskFragmentLoader {
    root: PathBuf,
}

impl DiskFragmentLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FragmentLoader for DiskFragmentLoader {
    fn load(&self, uri: &str) -> Result<Arc<dyn Fragment>> {
        let path = self.root.join(uri);
        let fragment = DiskFragment::open(&path)?;
        Ok(Arc::new(fragment))
    }
}
