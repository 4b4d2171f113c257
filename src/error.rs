//! Error types for tabletkv
//!
//! Provides a unified error type for the tablet serving path.

use bytes::Bytes;
use thiserror::Error;

use crate::cell::TxnId;

/// Result type alias using TabletError
pub type Result<T> = std::result::Result<T, TabletError>;

/// Unified error type for tabletkv operations
#[derive(Debug, Error)]
pub enum TabletError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Serving Errors
    // -------------------------------------------------------------------------
    /// The tablet covering the requested rows is not resident on this server
    #[error("Tablet not loaded: {0}")]
    NotLoaded(String),

    /// Optimistic version check failed for a row
    #[error("Mutation conflict on row {row:?}: committed at txn {commit}, caller saw {max_txn}")]
    MutationConflict {
        row: Bytes,
        commit: TxnId,
        max_txn: TxnId,
    },

    #[error("Unknown column family: {0}")]
    UnknownColumnFamily(String),

    #[error("Unsupported scan mode: {0}")]
    BadScanMode(String),

    /// No open scanner has this id (closed or reaped)
    #[error("Unknown scanner: {0}")]
    UnknownScanner(u64),

    // -------------------------------------------------------------------------
    // Data Integrity Errors
    // -------------------------------------------------------------------------
    /// Bad checksum, magic, offsets or ordering in fragment data
    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Storage / Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TabletError {
    /// Whether the caller may reasonably retry (elsewhere, or with a newer txn)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TabletError::NotLoaded(_) | TabletError::MutationConflict { .. }
        )
    }
}

impl From<bincode::Error> for TabletError {
    fn from(e: bincode::Error) -> Self {
        TabletError::Serialization(e.to_string())
    }
}
