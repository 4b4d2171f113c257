//! Fragment Reader
//!
//! Opens fragment files and loads individual blocks on demand.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::cell::{Cell, CellKey, CellValue, RowRange};
use crate::error::{Result, TabletError};
use crate::fragment::{
    next_matching_block, overlapping_size, CellBlock, Fragment, FragmentBlock,
};
use crate::predicate::ScanPredicate;

use super::{
    BlockHandle, ENTRY_HEADER_SIZE, ERASURE_MARKER, FOOTER_SIZE, HEADER_SIZE, MAGIC, VERSION,
};

/// A fragment backed by a file; only the block index is held in memory
pub struct DiskFragment {
    /// Fragment identity (the file path)
    name: String,
    path: PathBuf,
    /// File handle; loads from many scanners serialize on the seek
    file: Mutex<File>,
    /// Block index loaded at open
    handles: Vec<BlockHandle>,
}

impl DiskFragment {
    /// Open a fragment file, validating header, footer and index
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let malformed = |what: String| {
            TabletError::MalformedData(format!("{}: {}", path.display(), what))
        };

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(malformed(format!("file too small ({} bytes)", file_size)));
        }

        // Read and validate header
        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        if &header[0..4] != MAGIC {
            return Err(malformed(format!("bad magic {:?}", &header[0..4])));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(malformed(format!("unsupported version {}", version)));
        }

        // Read footer to locate the index
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;
        if &footer[16..20] != MAGIC {
            return Err(malformed("bad footer magic".to_string()));
        }
        let index_offset = read_u64(&footer[0..8]);
        let index_len = read_u32(&footer[8..12]) as u64;
        let index_crc = read_u32(&footer[12..16]);

        if index_offset < HEADER_SIZE
            || index_offset.checked_add(index_len) != Some(file_size - FOOTER_SIZE)
        {
            return Err(malformed(format!(
                "index at {}+{} does not end at footer",
                index_offset, index_len
            )));
        }

        // Load and verify the index
        file.seek(SeekFrom::Start(index_offset))?;
        let mut index = vec![0u8; index_len as usize];
        file.read_exact(&mut index)?;
        if crc32fast::hash(&index) != index_crc {
            return Err(malformed("index checksum mismatch".to_string()));
        }
        let handles: Vec<BlockHandle> = bincode::deserialize(&index)
            .map_err(|e| malformed(format!("undecodable index: {}", e)))?;

        let mut expected = HEADER_SIZE;
        for (i, handle) in handles.iter().enumerate() {
            if handle.offset != expected {
                return Err(malformed(format!(
                    "block {} at offset {}, expected {}",
                    i, handle.offset, expected
                )));
            }
            expected += handle.length as u64;
        }
        if expected != index_offset {
            return Err(malformed("blocks do not end at index".to_string()));
        }

        Ok(Self {
            name: path.display().to_string(),
            path: path.to_path_buf(),
            file: Mutex::new(file),
            handles,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total cells across all blocks
    pub fn cell_count(&self) -> u64 {
        self.handles.iter().map(|h| h.meta.cell_count as u64).sum()
    }

    fn read_block_bytes(&self, handle: &BlockHandle) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; handle.length as usize];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(handle.offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl Fragment for DiskFragment {
    fn name(&self) -> &str {
        &self.name
    }

    fn block_count(&self) -> usize {
        self.handles.len()
    }

    fn next_block(&self, predicate: &ScanPredicate, min_block: usize) -> Option<usize> {
        next_matching_block(self.handles.iter().map(|h| &h.meta), predicate, min_block)
    }

    fn load_block(&self, index: usize) -> Result<Arc<dyn FragmentBlock>> {
        let handle = self.handles.get(index).ok_or_else(|| {
            TabletError::MalformedData(format!("{}: no block {}", self.name, index))
        })?;

        let buf = self.read_block_bytes(handle)?;
        if crc32fast::hash(&buf) != handle.crc {
            tracing::warn!(fragment = %self.name, block = index, "block checksum mismatch");
            return Err(TabletError::MalformedData(format!(
                "{}: block {} checksum mismatch",
                self.name, index
            )));
        }

        let cells = decode_block(buf).map_err(|what| {
            tracing::warn!(fragment = %self.name, block = index, "corrupt block: {}", what);
            TabletError::MalformedData(format!("{}: block {}: {}", self.name, index, what))
        })?;
        if cells.len() != handle.meta.cell_count as usize {
            return Err(TabletError::MalformedData(format!(
                "{}: block {} holds {} cells, index says {}",
                self.name,
                index,
                cells.len(),
                handle.meta.cell_count
            )));
        }

        Ok(Arc::new(CellBlock::new(cells)))
    }

    fn column_families(&self) -> Vec<Bytes> {
        let mut families: Vec<Bytes> = self
            .handles
            .iter()
            .flat_map(|h| h.meta.families.iter().cloned())
            .collect();
        families.sort();
        families.dedup();
        families
    }

    fn partial_data_size(&self, rows: &RowRange) -> u64 {
        overlapping_size(self.handles.iter().map(|h| &h.meta), rows)
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

/// Decode a block's entries, checking bounds and strict key order
fn decode_block(buf: Vec<u8>) -> std::result::Result<Vec<Cell>, String> {
    let data = Bytes::from(buf);
    let mut cells: Vec<Cell> = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        if pos + ENTRY_HEADER_SIZE > data.len() {
            return Err(format!("truncated entry header at {}", pos));
        }
        let row_len = read_u32(&data[pos..]) as usize;
        let col_len = read_u32(&data[pos + 4..]) as usize;
        let timestamp = read_u64(&data[pos + 8..]) as i64;
        let val_len = read_u32(&data[pos + 16..]);
        pos += ENTRY_HEADER_SIZE;

        let value_len = if val_len == ERASURE_MARKER {
            0
        } else {
            val_len as usize
        };
        let entry_len = row_len + col_len + value_len;
        if pos + entry_len > data.len() {
            return Err(format!("entry at {} overruns block", pos));
        }

        let row = data.slice(pos..pos + row_len);
        let column = data.slice(pos + row_len..pos + row_len + col_len);
        let value = if val_len == ERASURE_MARKER {
            CellValue::Erasure
        } else {
            CellValue::Value(data.slice(pos + row_len + col_len..pos + entry_len))
        };
        pos += entry_len;

        let key = CellKey {
            row,
            column,
            timestamp,
        };
        if let Some(prev) = cells.last() {
            if key <= prev.key {
                return Err(format!("key {} out of order after {}", key, prev.key));
            }
        }
        cells.push(Cell { key, value });
    }

    Ok(cells)
}
