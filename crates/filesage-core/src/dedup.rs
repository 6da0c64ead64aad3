//! Duplicate groups and hardlink plans.
//!
//! Both are derived from stored records on demand and never persisted.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::record::{ContentHash, InodeInfo};
use crate::run::RunId;

/// One file taking part in a duplicate group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateMember {
    pub path: PathBuf,
    pub inode: InodeInfo,
    /// Link count recorded at scan time.
    pub nlink: u64,
    pub mtime: SystemTime,
}

/// Files of one run sharing size and content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Size of each file in bytes.
    pub size: u64,
    /// Content hash shared by all members.
    pub content_hash: ContentHash,
    /// Members, sorted by path.
    pub members: Vec<DuplicateMember>,
}

impl DuplicateGroup {
    /// Create a group, sorting members by path.
    pub fn new(size: u64, content_hash: ContentHash, mut members: Vec<DuplicateMember>) -> Self {
        members.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            size,
            content_hash,
            members,
        }
    }

    /// Get the number of duplicate files.
    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// Paths of all members.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.members.iter().map(|m| m.path.clone()).collect()
    }

    /// Space that keeping a single copy would reclaim: size * (count - 1).
    pub fn wasted_bytes(&self) -> u64 {
        self.size.saturating_mul(self.count().saturating_sub(1) as u64)
    }

    /// Whether every member already points at the same inode.
    pub fn all_same_inode(&self) -> bool {
        match self.members.split_first() {
            Some((first, rest)) => rest.iter().all(|m| m.inode == first.inode),
            None => true,
        }
    }
}

/// Replace every path in `replace` with a hardlink to `keep`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardlinkAction {
    pub size: u64,
    pub content_hash: ContentHash,
    pub keep: DuplicateMember,
    pub replace: Vec<DuplicateMember>,
}

impl HardlinkAction {
    /// Bytes reclaimed once every replacement is linked. Replacements that
    /// already share an inode free their space once.
    pub fn reclaimable_bytes(&self) -> u64 {
        let distinct: HashSet<InodeInfo> = self.replace.iter().map(|m| m.inode).collect();
        self.size.saturating_mul(distinct.len() as u64)
    }
}

/// Ordered set of hardlink actions derived from one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardlinkPlan {
    pub run_id: RunId,
    pub min_size: u64,
    pub actions: Vec<HardlinkAction>,
}

impl HardlinkPlan {
    /// Check if there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Number of paths that would be replaced.
    pub fn files_to_replace(&self) -> usize {
        self.actions.iter().map(|a| a.replace.len()).sum()
    }

    /// Total reclaimable bytes across all actions.
    pub fn bytes_reclaimable(&self) -> u64 {
        self.actions.iter().map(HardlinkAction::reclaimable_bytes).sum()
    }
}
