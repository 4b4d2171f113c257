//! Configuration for tabletkv
//!
//! Centralized configuration with sensible defaults.

use crate::error::{Result, TabletError};

/// Serving configuration shared by tables, scanners and the block cache
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Block Cache Configuration
    // -------------------------------------------------------------------------
    /// Byte budget for unpinned blocks kept in the cache
    pub block_cache_bytes: usize,

    // -------------------------------------------------------------------------
    // Merge / Scan Configuration
    // -------------------------------------------------------------------------
    /// Max block loads a single `copy_merged` call may perform
    pub max_blocks_per_call: usize,

    /// Scanners untouched for longer than this are reaped (milliseconds)
    pub scanner_idle_timeout_ms: u64,

    /// Batch cell limit used when the client does not give one
    pub default_max_cells: usize,

    /// Batch byte limit used when the client does not give one
    pub default_max_size: usize,

    // -------------------------------------------------------------------------
    // Table Configuration
    // -------------------------------------------------------------------------
    /// Number of rows whose last commit is remembered exactly
    pub commit_ring_capacity: usize,

    /// Cells per block in in-memory fragments
    pub mem_block_cells: usize,

    /// Target block size for fragment files (in bytes)
    pub disk_block_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_cache_bytes: 64 * 1024 * 1024, // 64 MB
            max_blocks_per_call: 64,
            scanner_idle_timeout_ms: 60_000,
            default_max_cells: 1000,
            default_max_size: 1024 * 1024, // 1 MB
            commit_ring_capacity: 64 * 1024,
            mem_block_cells: 128,
            disk_block_size: 64 * 1024, // 64 KB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject configurations that would stall scans or the commit ring
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("max_blocks_per_call", self.max_blocks_per_call),
            ("default_max_cells", self.default_max_cells),
            ("default_max_size", self.default_max_size),
            ("commit_ring_capacity", self.commit_ring_capacity),
            ("mem_block_cells", self.mem_block_cells),
            ("disk_block_size", self.disk_block_size),
        ]
        .into_iter()
        .find(|(_, v)| *v == 0);

        match zero {
            Some((name, _)) => Err(TabletError::Config(format!("{} must be non-zero", name))),
            None => Ok(()),
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the block cache byte budget
    pub fn block_cache_bytes(mut self, bytes: usize) -> Self {
        self.config.block_cache_bytes = bytes;
        self
    }

    /// Set the per-call block load quota
    pub fn max_blocks_per_call(mut self, count: usize) -> Self {
        self.config.max_blocks_per_call = count;
        self
    }

    /// Set the scanner idle timeout (in milliseconds)
    pub fn scanner_idle_timeout_ms(mut self, ms: u64) -> Self {
        self.config.scanner_idle_timeout_ms = ms;
        self
    }

    /// Set the default batch cell limit
    pub fn default_max_cells(mut self, count: usize) -> Self {
        self.config.default_max_cells = count;
        self
    }

    /// Set the default batch size limit (in bytes)
    pub fn default_max_size(mut self, size: usize) -> Self {
        self.config.default_max_size = size;
        self
    }

    /// Set the commit ring capacity (in rows)
    pub fn commit_ring_capacity(mut self, rows: usize) -> Self {
        self.config.commit_ring_capacity = rows;
        self
    }

    /// Set the number of cells per in-memory block
    pub fn mem_block_cells(mut self, count: usize) -> Self {
        self.config.mem_block_cells = count;
        self
    }

    /// Set the target on-disk block size (in bytes)
    pub fn disk_block_size(mut self, size: usize) -> Self {
        self.config.disk_block_size = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
