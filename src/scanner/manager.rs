//! Scanner Manager
//!
//! Owns open scanners by id so a transport layer can page through results
//! across calls, and reaps scanners clients have abandoned.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use super::{ScanBatch, Scanner};
use crate::cache::BlockCache;
use crate::config::Config;
use crate::error::{Result, TabletError};
use crate::predicate::{ScanMode, ScanPredicate};
use crate::table::Table;

/// Handle for an open scanner
pub type ScannerId = u64;

/// Registry of open scanners sharing one block cache
pub struct ScannerManager {
    config: Config,
    cache: Arc<BlockCache>,
    next_id: AtomicU64,
    /// Each scanner sits behind its own lock (the scanner lock)
    scanners: RwLock<HashMap<ScannerId, Arc<Mutex<Scanner>>>>,
}

impl ScannerManager {
    pub fn new(config: Config, cache: Arc<BlockCache>) -> Self {
        Self {
            config,
            cache,
            next_id: AtomicU64::new(1),
            scanners: RwLock::new(HashMap::new()),
        }
    }

    /// Open a scanner over `table`
    pub fn open(
        &self,
        table: Arc<Table>,
        predicate: ScanPredicate,
        mode: ScanMode,
    ) -> Result<ScannerId> {
        let scanner = Scanner::new(table, Arc::clone(&self.cache), predicate, mode, &self.config)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.scanners.write().insert(id, Arc::new(Mutex::new(scanner)));
        Ok(id)
    }

    pub fn get(&self, id: ScannerId) -> Result<Arc<Mutex<Scanner>>> {
        self.scanners
            .read()
            .get(&id)
            .cloned()
            .ok_or(TabletError::UnknownScanner(id))
    }

    /// Next batch from scanner `id`, using configured limits where none given
    pub fn scan(
        &self,
        id: ScannerId,
        max_cells: Option<usize>,
        max_size: Option<usize>,
    ) -> Result<ScanBatch> {
        let scanner = self.get(id)?;
        let mut scanner = scanner.lock();
        scanner.scan(
            max_cells.unwrap_or(self.config.default_max_cells),
            max_size.unwrap_or(self.config.default_max_size),
        )
    }

    /// Close scanner `id`, releasing its pins and listener registrations
    pub fn close(&self, id: ScannerId) -> bool {
        self.scanners.write().remove(&id).is_some()
    }

    /// Close scanners idle for longer than the configured timeout
    pub fn reap_idle(&self) -> usize {
        self.reap_idle_at(Instant::now())
    }

    /// `reap_idle` as of `now`
    ///
    /// Scanners busy in a `scan` call are never reaped.
    pub fn reap_idle_at(&self, now: Instant) -> usize {
        let timeout = Duration::from_millis(self.config.scanner_idle_timeout_ms);
        let mut scanners = self.scanners.write();
        let before = scanners.len();
        scanners.retain(|_, scanner| match scanner.try_lock() {
            Some(s) => now.saturating_duration_since(s.last_used()) <= timeout,
            None => true,
        });
        let reaped = before - scanners.len();
        if reaped > 0 {
            tracing::info!(reaped, "idle scanners closed");
        }
        reaped
    }

    pub fn len(&self) -> usize {
        self.scanners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scanners.read().is_empty()
    }
}
