//! Hardlink planning.
//!
//! A plan is derived from duplicate groups alone and touches nothing on disk.
//! Executing it lives in `filesage-ops`, which this crate does not depend on.

use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

use filesage_core::{DuplicateGroup, DuplicateMember, HardlinkAction, HardlinkPlan, RunId};

/// Files at or below one filesystem block gain nothing from linking.
pub const DEFAULT_HARDLINK_MIN_SIZE: u64 = 4097;

/// Turns duplicate groups into hardlink actions.
#[derive(Debug, Clone, Copy)]
pub struct HardlinkPlanner {
    min_size: u64,
}

impl Default for HardlinkPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_HARDLINK_MIN_SIZE)
    }
}

impl HardlinkPlanner {
    pub fn new(min_size: u64) -> Self {
        Self { min_size }
    }

    pub fn min_size(&self) -> u64 {
        self.min_size
    }

    /// Build a plan. Each group keeps the member with the most links, then
    /// the oldest mtime, then the smallest path; every member on a different
    /// inode is scheduled for replacement.
    pub fn plan(&self, run_id: RunId, groups: &[DuplicateGroup]) -> HardlinkPlan {
        let actions: Vec<HardlinkAction> = groups
            .iter()
            .filter(|g| g.size >= self.min_size)
            .filter_map(plan_group)
            .collect();

        debug!(run_id, actions = actions.len(), "Planned hardlink actions");
        HardlinkPlan {
            run_id,
            min_size: self.min_size,
            actions,
        }
    }
}

fn plan_group(group: &DuplicateGroup) -> Option<HardlinkAction> {
    let keep = group.members.iter().min_by(|a, b| {
        b.nlink
            .cmp(&a.nlink)
            .then_with(|| a.mtime.cmp(&b.mtime))
            .then_with(|| a.path.cmp(&b.path))
    })?;

    let replace: Vec<DuplicateMember> = group
        .members
        .iter()
        .filter(|m| m.inode != keep.inode)
        .cloned()
        .collect();
    if replace.is_empty() {
        return None;
    }

    Some(HardlinkAction {
        size: group.size,
        content_hash: group.content_hash,
        keep: keep.clone(),
        replace,
    })
}

/// One planned action as a dry run reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DryRunAction {
    pub keep: PathBuf,
    pub would_replace: Vec<PathBuf>,
    pub size: u64,
}

/// What executing a plan would do.
#[derive(Debug, Clone, Serialize)]
pub struct DryRunReport {
    pub run_id: RunId,
    pub actions: Vec<DryRunAction>,
    pub files_to_replace: usize,
    pub bytes_reclaimable: u64,
}

impl DryRunReport {
    /// Human readable lines, one per replacement.
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.actions.iter().flat_map(|action| {
            action.would_replace.iter().map(move |path| {
                format!(
                    "Would replace {} with hardlink to {}",
                    path.display(),
                    action.keep.display()
                )
            })
        })
    }
}

/// Describe a plan without touching the filesystem.
pub fn dry_run(plan: &HardlinkPlan) -> DryRunReport {
    let actions = plan
        .actions
        .iter()
        .map(|a| DryRunAction {
            keep: a.keep.path.clone(),
            would_replace: a.replace.iter().map(|m| m.path.clone()).collect(),
            size: a.size,
        })
        .collect();

    DryRunReport {
        run_id: plan.run_id,
        actions,
        files_to_replace: plan.files_to_replace(),
        bytes_reclaimable: plan.bytes_reclaimable(),
    }
}
