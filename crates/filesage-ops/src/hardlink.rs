//! Hardlink replacement.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use filesage_core::{DuplicateMember, HardlinkAction, HardlinkPlan, InodeInfo};
use filesage_scan::hash_file;

use crate::OPERATION_CHANNEL_SIZE;
use crate::progress::HardlinkProgress;

/// Errors scoped to one action or one replaced path.
#[derive(Debug, Error)]
pub enum HardlinkError {
    /// The live filesystem no longer matches what the scan recorded.
    #[error("Stale state at {path}: {reason}")]
    StaleState { path: PathBuf, reason: String },

    #[error("Failed to link {path}: {source}")]
    Link {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl HardlinkError {
    fn stale(path: &Path, reason: impl Into<String>) -> Self {
        Self::StaleState {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::StaleState { path, .. } | Self::Link { path, .. } => path,
        }
    }
}

/// Options for executing a hardlink plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteOptions {
    /// Re-hash files before linking instead of trusting size and mtime.
    pub strict: bool,
}

/// Result of a completed hardlink pass.
#[derive(Debug, Default)]
pub struct ExecutionSummary {
    /// Actions where at least one path was linked or already linked.
    pub applied: usize,
    /// Actions skipped entirely.
    pub skipped: usize,
    pub files_linked: usize,
    /// Paths found already sharing the kept inode.
    pub already_linked: usize,
    pub bytes_reclaimed: u64,
    pub failures: Vec<HardlinkError>,
}

impl ExecutionSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Get a human-readable summary of the pass.
    pub fn summary(&self) -> String {
        let mut text = format!(
            "Hardlinked {} files in {} actions, {} skipped",
            self.files_linked, self.applied, self.skipped
        );
        if self.already_linked > 0 {
            text.push_str(&format!(", {} already linked", self.already_linked));
        }
        if !self.failures.is_empty() {
            text.push_str(&format!(", {} failed", self.failures.len()));
        }
        text
    }
}

/// Result sent through the channel during a hardlink pass.
#[derive(Debug)]
pub enum HardlinkResult {
    Progress(HardlinkProgress),
    Complete(ExecutionSummary),
}

/// Applies hardlink plans to the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct HardlinkExecutor {
    options: ExecuteOptions,
}

impl HardlinkExecutor {
    pub fn new(options: ExecuteOptions) -> Self {
        Self { options }
    }

    /// Execute every action of `plan`.
    pub fn execute(&self, plan: &HardlinkPlan) -> ExecutionSummary {
        self.execute_with_progress(plan, |_| {})
    }

    /// Execute `plan`, reporting progress after every action.
    ///
    /// An action whose files no longer match the scan is skipped as a whole
    /// and recorded; the remaining actions still run.
    pub fn execute_with_progress(
        &self,
        plan: &HardlinkPlan,
        mut on_progress: impl FnMut(&HardlinkProgress),
    ) -> ExecutionSummary {
        let mut summary = ExecutionSummary::default();
        let mut progress = HardlinkProgress::new(plan.actions.len());

        for action in &plan.actions {
            progress.current_file = Some(action.keep.path.clone());
            let before = summary.failures.len();
            self.apply(action, &mut summary);

            progress.actions_completed += 1;
            progress.files_linked = summary.files_linked;
            progress.bytes_reclaimed = summary.bytes_reclaimed;
            progress.error_count += summary.failures.len() - before;
            on_progress(&progress);
        }

        info!(
            run_id = plan.run_id,
            applied = summary.applied,
            skipped = summary.skipped,
            files_linked = summary.files_linked,
            "Hardlink pass finished"
        );
        summary
    }

    fn apply(&self, action: &HardlinkAction, summary: &mut ExecutionSummary) {
        let pending = match self.verify(action) {
            Ok(pending) => pending,
            Err(e) => {
                warn!("{e}");
                summary.skipped += 1;
                summary.failures.push(e);
                return;
            }
        };

        let mut touched = false;
        let mut freed: HashSet<InodeInfo> = HashSet::new();
        for (member, state) in pending {
            match state {
                Replaced::AlreadyLinked => {
                    touched = true;
                    summary.already_linked += 1;
                }
                Replaced::NeedsLink => match link_over(&action.keep.path, &member.path) {
                    Ok(()) => {
                        debug!(
                            path = %member.path.display(),
                            keep = %action.keep.path.display(),
                            "Replaced with hardlink"
                        );
                        touched = true;
                        summary.files_linked += 1;
                        freed.insert(member.inode);
                    }
                    Err(e) => {
                        warn!("{e}");
                        summary.failures.push(e);
                    }
                },
            }
        }
        summary.bytes_reclaimed += action.size * freed.len() as u64;

        if touched {
            summary.applied += 1;
        } else {
            summary.skipped += 1;
        }
    }

    /// Check the whole action against the live filesystem before any link is
    /// made. Returns what to do with each replace path.
    fn verify<'a>(
        &self,
        action: &'a HardlinkAction,
    ) -> Result<Vec<(&'a DuplicateMember, Replaced)>, HardlinkError> {
        let keep_inode = self.verify_keep(action)?;
        action
            .replace
            .iter()
            .map(|member| {
                self.verify_replace(action, member, keep_inode)
                    .map(|state| (member, state))
            })
            .collect()
    }

    fn verify_keep(&self, action: &HardlinkAction) -> Result<InodeInfo, HardlinkError> {
        let path = &action.keep.path;
        let metadata = fs::symlink_metadata(path)
            .map_err(|e| HardlinkError::stale(path, format!("kept file is gone: {e}")))?;
        if !metadata.is_file() {
            return Err(HardlinkError::stale(path, "kept path is no longer a regular file"));
        }
        let inode = inode_of(&metadata);
        if inode != action.keep.inode {
            return Err(HardlinkError::stale(path, "kept file was replaced since scan"));
        }
        if metadata.len() != action.size {
            return Err(HardlinkError::stale(
                path,
                format!("size changed from {} to {}", action.size, metadata.len()),
            ));
        }
        if metadata.modified().ok() != Some(action.keep.mtime) {
            return Err(HardlinkError::stale(path, "kept file modified since scan"));
        }
        if self.options.strict {
            self.verify_hash(path, action)?;
        }
        Ok(inode)
    }

    fn verify_replace(
        &self,
        action: &HardlinkAction,
        member: &DuplicateMember,
        keep_inode: InodeInfo,
    ) -> Result<Replaced, HardlinkError> {
        let path = &member.path;
        let metadata = fs::symlink_metadata(path)
            .map_err(|e| HardlinkError::stale(path, format!("file is gone: {e}")))?;
        if !metadata.is_file() {
            return Err(HardlinkError::stale(path, "no longer a regular file"));
        }
        if inode_of(&metadata) == keep_inode {
            return Ok(Replaced::AlreadyLinked);
        }
        if metadata.len() != action.size {
            return Err(HardlinkError::stale(
                path,
                format!("size changed from {} to {}", action.size, metadata.len()),
            ));
        }
        if metadata.modified().ok() != Some(member.mtime) {
            return Err(HardlinkError::stale(path, "modified since scan"));
        }
        if self.options.strict {
            self.verify_hash(path, action)?;
        }
        Ok(Replaced::NeedsLink)
    }

    fn verify_hash(&self, path: &Path, action: &HardlinkAction) -> Result<(), HardlinkError> {
        let live = hash_file(path).map_err(|e| HardlinkError::stale(path, e.to_string()))?;
        if live != action.content_hash {
            return Err(HardlinkError::stale(path, "content changed since scan"));
        }
        Ok(())
    }
}

enum Replaced {
    NeedsLink,
    AlreadyLinked,
}

/// Attempts at finding an unused temporary link name.
const TEMP_LINK_ATTEMPTS: u32 = 64;

/// Point `target` at `keep`'s inode. The new link is created beside the
/// target first and renamed over it, so `target` always names a complete
/// file. Existing files are never removed to make room for the temporary
/// link; a taken name moves on to the next suffix.
fn link_over(keep: &Path, target: &Path) -> Result<(), HardlinkError> {
    let link_err = |source: io::Error| HardlinkError::Link {
        path: target.to_path_buf(),
        source,
    };

    let mut attempt = 0;
    let temp = loop {
        let candidate = temp_link_path(target, attempt);
        match fs::hard_link(keep, &candidate) {
            Ok(()) => break candidate,
            Err(e)
                if e.kind() == io::ErrorKind::AlreadyExists && attempt + 1 < TEMP_LINK_ATTEMPTS =>
            {
                attempt += 1;
            }
            Err(e) => return Err(link_err(e)),
        }
    };

    if let Err(e) = fs::rename(&temp, target) {
        let _ = fs::remove_file(&temp);
        return Err(link_err(e));
    }
    Ok(())
}

fn temp_link_path(target: &Path, attempt: u32) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_name = format!(".{}.filesage-link-{}-{}", name, std::process::id(), attempt);
    match target.parent() {
        Some(parent) => parent.join(temp_name),
        None => PathBuf::from(temp_name),
    }
}

#[cfg(unix)]
fn inode_of(metadata: &fs::Metadata) -> InodeInfo {
    use std::os::unix::fs::MetadataExt;
    InodeInfo::new(metadata.ino(), metadata.dev())
}

#[cfg(not(unix))]
fn inode_of(_metadata: &fs::Metadata) -> InodeInfo {
    InodeInfo::new(0, 0)
}

/// Start a hardlink pass on the blocking pool.
///
/// Progress is sent after every action, followed by one `Complete`.
pub fn start_hardlink(plan: HardlinkPlan, options: ExecuteOptions) -> mpsc::Receiver<HardlinkResult> {
    let (tx, rx) = mpsc::channel(OPERATION_CHANNEL_SIZE);

    tokio::spawn(async move {
        let progress_tx = tx.clone();
        let result = tokio::task::spawn_blocking(move || {
            HardlinkExecutor::new(options).execute_with_progress(&plan, |progress| {
                let _ = progress_tx.blocking_send(HardlinkResult::Progress(progress.clone()));
            })
        })
        .await;

        match result {
            Ok(summary) => {
                let _ = tx.send(HardlinkResult::Complete(summary)).await;
            }
            Err(e) => warn!("Hardlink task failed: {e}"),
        }
    });

    rx
}
