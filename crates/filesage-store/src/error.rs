//! Store error types.

use std::path::PathBuf;

use filesage_core::{RunId, RunStatus};
use thiserror::Error;

/// Errors returned by [`Store`](crate::Store) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The file is not a usable filesage database.
    #[error("Store at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Scan run {0} not found")]
    RunNotFound(RunId),

    #[error("Scan run {id} cannot be resumed: {reason}")]
    RunNotResumable { id: RunId, reason: String },

    #[error("Scan run {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: RunId,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("No completed scan run with hashing enabled")]
    NoEligibleRun,

    #[error("Scan run {0} was recorded without content hashes")]
    HashingDisabled(RunId),

    #[error("Failed to prepare store location {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid run options: {0}")]
    Options(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
