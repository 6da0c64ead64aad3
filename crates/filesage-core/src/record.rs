//! Walker entries and persisted file records.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::run::RunId;

/// BLAKE3 content hash of a file's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the hash as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse a 64 character hex string.
    pub fn from_hex(hex: &str) -> Result<Self, ParseHashError> {
        if hex.len() != 64 {
            return Err(ParseHashError::Length(hex.len()));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| ParseHashError::Digit)?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| ParseHashError::Digit)?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Failure to parse a stored content hash.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseHashError {
    #[error("expected 64 hex characters, got {0}")]
    Length(usize),
    #[error("invalid hex digit")]
    Digit,
}

/// Inode information for hardlink detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InodeInfo {
    /// Inode number.
    pub inode: u64,
    /// Device ID.
    pub device: u64,
}

impl InodeInfo {
    /// Create new inode info.
    pub fn new(inode: u64, device: u64) -> Self {
        Self { inode, device }
    }
}

/// Type of a walked filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link (never followed).
    Symlink,
    /// Sockets, devices, fifos.
    Other,
}

impl EntryKind {
    /// Stable name used in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
            Self::Other => "other",
        }
    }

    /// Whether entries of this kind are persisted as file records.
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::File | Self::Symlink)
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "directory" => Ok(Self::Directory),
            "symlink" => Ok(Self::Symlink),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown entry kind: {other}")),
        }
    }
}

/// One entry yielded by the tree walker, before hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Absolute path of the entry.
    pub path: PathBuf,
    /// Entry type, taken without following symlinks.
    pub kind: EntryKind,
    /// Size in bytes (the link itself for symlinks).
    pub size: u64,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Device and inode identity.
    pub inode: InodeInfo,
    /// Hard link count at observation time.
    pub nlink: u64,
    /// Target of a symlink.
    pub link_target: Option<PathBuf>,
}

impl RawEntry {
    /// Whether this entry is a regular file whose bytes can be hashed.
    pub fn is_regular(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// A file observed during a scan run, as persisted in the store.
///
/// Records are append-only. A stored hash is never rewritten; a later
/// observation of the same path produces a new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub scan_run_id: RunId,
    pub path: PathBuf,
    pub kind: EntryKind,
    pub size: u64,
    pub mtime: SystemTime,
    pub inode: InodeInfo,
    pub nlink: u64,
    pub content_hash: Option<ContentHash>,
    pub link_target: Option<PathBuf>,
}

impl FileRecord {
    /// Build a record for `entry` in run `scan_run_id`.
    pub fn from_entry(scan_run_id: RunId, entry: RawEntry, content_hash: Option<ContentHash>) -> Self {
        Self {
            scan_run_id,
            path: entry.path,
            kind: entry.kind,
            size: entry.size,
            mtime: entry.mtime,
            inode: entry.inode,
            nlink: entry.nlink,
            content_hash,
            link_target: entry.link_target,
        }
    }

    /// Two records are content duplicates iff both carry a hash and their
    /// sizes and hashes are equal.
    pub fn is_content_duplicate_of(&self, other: &FileRecord) -> bool {
        match (&self.content_hash, &other.content_hash) {
            (Some(a), Some(b)) => self.size == other.size && a == b,
            _ => false,
        }
    }
}

/// Convert a modification time to signed nanoseconds since the Unix epoch.
pub fn mtime_to_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_nanos()).unwrap_or(i64::MAX),
    }
}

/// Inverse of [`mtime_to_nanos`].
pub fn mtime_from_nanos(nanos: i64) -> SystemTime {
    if nanos >= 0 {
        UNIX_EPOCH + Duration::from_nanos(nanos as u64)
    } else {
        UNIX_EPOCH - Duration::from_nanos(nanos.unsigned_abs())
    }
}
