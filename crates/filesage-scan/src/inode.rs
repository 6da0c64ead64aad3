//! Inode tracking so hardlinked files are counted once.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashSet;
use filesage_core::InodeInfo;

/// Tracks seen (inode, device) pairs and the bytes they account for.
///
/// A run records every path, but a file reachable through several hardlinks
/// only occupies its size once on disk.
#[derive(Debug, Default)]
pub struct InodeTracker {
    seen: DashSet<InodeInfo>,
    unique_bytes: AtomicU64,
}

impl InodeTracker {
    /// Create a new inode tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an inode of `size` bytes. Returns `true` the first time it is seen.
    pub fn track(&self, info: InodeInfo, size: u64) -> bool {
        let first = self.seen.insert(info);
        if first {
            self.unique_bytes.fetch_add(size, Ordering::Relaxed);
        }
        first
    }

    /// Bytes of all distinct inodes tracked so far.
    pub fn unique_bytes(&self) -> u64 {
        self.unique_bytes.load(Ordering::Relaxed)
    }

    /// Get the number of unique inodes tracked.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
