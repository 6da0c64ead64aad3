//! Error types for scanning operations.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while walking or hashing.
///
/// `EntryUnreadable` and `HashIo` are recoverable: the run records a warning
/// and continues. The others abort the run.
#[derive(Debug, Error)]
pub enum ScanError {
    /// A single entry could not be read; siblings are still visited.
    #[error("Unreadable entry {path}: {message}")]
    EntryUnreadable { path: PathBuf, message: String },

    /// Reading file content for hashing failed.
    #[error("Hash failed for {path}: {source}")]
    HashIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Root path does not exist.
    #[error("Root path not found: {path}")]
    RootNotFound { path: PathBuf },

    /// Root path is not a directory.
    #[error("Root path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid ignore pattern or option.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl ScanError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the walk continues after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::EntryUnreadable { .. } | Self::HashIo { .. })
    }

    /// Path the error refers to.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::EntryUnreadable { path, .. }
            | Self::HashIo { path, .. }
            | Self::RootNotFound { path }
            | Self::NotADirectory { path }
            | Self::Io { path, .. } => Some(path),
            Self::InvalidConfig { .. } => None,
        }
    }
}

/// Kind of scan warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// Directory listing or metadata could not be read.
    UnreadableEntry,
    /// Content hash could not be computed.
    HashFailed,
    /// Any other recovered failure.
    Other,
}

/// Non-fatal warning encountered during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanWarning {
    /// Path where the warning occurred.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Kind of warning.
    pub kind: WarningKind,
}

impl ScanWarning {
    /// Create a new scan warning.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Create a warning from a recovered scan error.
    pub fn from_error(error: &ScanError) -> Self {
        let kind = match error {
            ScanError::EntryUnreadable { .. } => WarningKind::UnreadableEntry,
            ScanError::HashIo { .. } => WarningKind::HashFailed,
            _ => WarningKind::Other,
        };
        Self {
            path: error.path().cloned().unwrap_or_default(),
            message: error.to_string(),
            kind,
        }
    }
}
