//! Fragment Writer
//!
//! Writes sorted cells to a new fragment file, cutting blocks by size.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::cell::{Cell, CellKey, CellValue};
use crate::config::Config;
use crate::error::{Result, TabletError};
use crate::fragment::BlockMeta;

use super::{BlockHandle, ERASURE_MARKER, HEADER_SIZE, MAGIC, VERSION};

/// Summary of a finished fragment file
#[derive(Debug, Clone)]
pub struct FragmentInfo {
    /// Path to the fragment file
    pub path: PathBuf,
    /// Number of cells written
    pub cell_count: u64,
    /// Number of data blocks
    pub block_count: usize,
    /// File size in bytes
    pub file_size: u64,
}

/// Builder for fragment files from cells given in key order
pub struct FragmentWriter {
    /// Output file path
    path: PathBuf,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    /// Target encoded size of a block
    block_size: usize,
    /// Encoded cells of the block being built
    block_buf: Vec<u8>,
    /// Cells of the block being built (for its summary)
    block_meta: Option<BlockMeta>,
    /// Handles of finished blocks
    handles: Vec<BlockHandle>,
    /// Current write position
    current_offset: u64,
    /// Last key written (ordering check)
    last_key: Option<CellKey>,
    cell_count: u64,
}

impl FragmentWriter {
    /// Create a new fragment writer
    ///
    /// Writes the header immediately; call `add()` in key order, then
    /// `finish()` to write the index and footer.
    pub fn new(path: &Path, block_size: usize) -> Result<Self> {
        Self::open(path, block_size)
    }

    /// Create a writer cutting blocks at `config.disk_block_size`
    pub fn with_config(path: &Path, config: &Config) -> Result<Self> {
        config.validate()?;
        Self::open(path, config.disk_block_size)
    }

    fn open(path: &Path, block_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&[0u8; 2])?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            block_size: block_size.max(1),
            block_buf: Vec::new(),
            block_meta: None,
            handles: Vec::new(),
            current_offset: HEADER_SIZE,
            last_key: None,
            cell_count: 0,
        })
    }

    /// Append a cell (keys must be strictly increasing)
    pub fn add(&mut self, cell: &Cell) -> Result<()> {
        if let Some(last) = &self.last_key {
            if cell.key <= *last {
                return Err(TabletError::Storage(format!(
                    "cell {} added after {} to {}",
                    cell.key,
                    last,
                    self.path.display()
                )));
            }
        }

        encode_cell(cell, &mut self.block_buf);
        match &mut self.block_meta {
            Some(meta) => {
                meta.last_row = cell.key.row.clone();
                meta.observe(cell);
            }
            None => self.block_meta = BlockMeta::from_cells(std::slice::from_ref(cell)),
        }

        self.last_key = Some(cell.key.clone());
        self.cell_count += 1;

        if self.block_buf.len() >= self.block_size {
            self.finish_block()?;
        }
        Ok(())
    }

    /// Write out the block being built, if any
    fn finish_block(&mut self) -> Result<()> {
        let meta = match self.block_meta.take() {
            Some(meta) => meta,
            None => return Ok(()),
        };

        let crc = crc32fast::hash(&self.block_buf);
        self.writer.write_all(&self.block_buf)?;

        self.handles.push(BlockHandle {
            offset: self.current_offset,
            length: self.block_buf.len() as u32,
            crc,
            meta,
        });
        self.current_offset += self.block_buf.len() as u64;
        self.block_buf.clear();
        Ok(())
    }

    /// Finish building: write index block and footer, and return a summary
    pub fn finish(mut self) -> Result<FragmentInfo> {
        self.finish_block()?;

        let index = bincode::serialize(&self.handles)?;
        let index_offset = self.current_offset;
        let index_crc = crc32fast::hash(&index);

        self.writer.write_all(&index)?;
        self.writer.write_all(&index_offset.to_le_bytes())?;
        self.writer.write_all(&(index.len() as u32).to_le_bytes())?;
        self.writer.write_all(&index_crc.to_le_bytes())?;
        self.writer.write_all(MAGIC)?;
        self.writer.flush()?;

        let file = self.writer.into_inner().map_err(|e| {
            TabletError::Storage(format!("Failed to flush fragment: {}", e))
        })?;
        file.sync_all()?;
        let file_size = file.metadata()?.len();

        tracing::debug!(
            path = %self.path.display(),
            cells = self.cell_count,
            blocks = self.handles.len(),
            "fragment written"
        );

        Ok(FragmentInfo {
            path: self.path,
            cell_count: self.cell_count,
            block_count: self.handles.len(),
            file_size,
        })
    }
}

/// Append one encoded cell entry to `buf`
fn encode_cell(cell: &Cell, buf: &mut Vec<u8>) {
    let key = &cell.key;
    let val_len = match &cell.value {
        CellValue::Value(v) => v.len() as u32,
        CellValue::Erasure => ERASURE_MARKER,
    };

    buf.extend_from_slice(&(key.row.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(key.column.len() as u32).to_le_bytes());
    buf.extend_from_slice(&key.timestamp.to_le_bytes());
    buf.extend_from_slice(&val_len.to_le_bytes());
    buf.extend_from_slice(&key.row);
    buf.extend_from_slice(&key.column);
    if let CellValue::Value(v) = &cell.value {
        buf.extend_from_slice(v);
    }
}
