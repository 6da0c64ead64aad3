//! Run controller: drives a scan as a resumable unit of work.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use derive_builder::Builder;
use rayon::prelude::*;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use filesage_core::{
    ContentHash, EntryKind, FileRecord, RawEntry, RunId, RunMetadata, RunOptions, RunStatus,
    ScanError, ScanWarning,
};
use filesage_store::{Store, StoreError};

use crate::hasher::hash_file;
use crate::inode::InodeTracker;
use crate::progress::{ProgressTracker, ScanProgress};
use crate::walker::TreeWalker;

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scan(#[from] ScanError),
}

/// Tunables of the controller itself; these are not stored with a run.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct ControllerSettings {
    /// Records hashed and committed together.
    #[builder(default = "256")]
    pub batch_size: usize,

    /// Emit progress every this many files.
    #[builder(default = "1000")]
    pub progress_every: u64,

    /// Emit progress at least this often.
    #[builder(default = "Duration::from_millis(500)")]
    pub progress_interval: Duration,

    /// Never auto-resume; mark unfinished runs of the same root skip-resume
    /// and start fresh.
    #[builder(default = "false")]
    pub skip_resume: bool,

    /// Directory reading threads (0 = auto).
    #[builder(default = "0")]
    pub threads: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            batch_size: 256,
            progress_every: 1000,
            progress_interval: Duration::from_millis(500),
            skip_resume: false,
            threads: 0,
        }
    }
}

impl ControllerSettings {
    pub fn builder() -> ControllerSettingsBuilder {
        ControllerSettingsBuilder::default()
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Walk finished; the run is `completed`.
    Completed,
    /// Cancelled; the run stays unfinished and can be resumed.
    Interrupted,
}

/// Result of [`RunController::start`] or [`RunController::resume`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: RunId,
    pub outcome: RunOutcome,
    /// Whether an unfinished run was resumed instead of starting a new one.
    pub resumed: bool,
    /// Auto-resume kept the stored options over different requested ones.
    pub ignored_options: bool,
    pub files_recorded: u64,
    /// Bytes of regular files recorded.
    pub bytes_recorded: u64,
    /// Bytes of regular files counting each inode once.
    pub unique_bytes: u64,
    pub files_hashed: u64,
    pub warnings: Vec<ScanWarning>,
    pub elapsed: Duration,
}

/// Per-drive mutable state.
struct DriveState {
    progress: ProgressTracker,
    inodes: InodeTracker,
    bytes_recorded: u64,
    warnings: Vec<ScanWarning>,
}

/// Orchestrates one scan run against a store.
///
/// The controller borrows the store mutably for its whole lifetime, so only
/// one controller can write through a given store handle.
pub struct RunController<'s> {
    store: &'s mut Store,
    settings: ControllerSettings,
    progress_tx: broadcast::Sender<ScanProgress>,
    cancel: Arc<AtomicBool>,
}

impl<'s> RunController<'s> {
    /// Create a controller writing to `store`.
    pub fn new(store: &'s mut Store, settings: ControllerSettings) -> Self {
        let (progress_tx, _) = broadcast::channel(100);
        Self {
            store,
            settings,
            progress_tx,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use an externally owned cancellation flag (e.g. set by a signal handler).
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag that interrupts the run when set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Subscribe to scan progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress_tx.subscribe()
    }

    /// Scan `root`, resuming an unfinished run of the same root when allowed.
    ///
    /// The root is validated before any run is created.
    pub fn start(
        &mut self,
        root: &Path,
        options: RunOptions,
        metadata: RunMetadata,
    ) -> Result<RunSummary, RunError> {
        let walker = TreeWalker::new(root, &options)?.with_threads(self.settings.threads);
        let root = walker.root().to_path_buf();

        let unfinished = self.store.incomplete_runs(Some(&root))?;
        if let Some(previous) = unfinished.first() {
            if !self.settings.skip_resume {
                info!(run_id = previous.id, root = %root.display(), "Auto-resuming unfinished run");
                let ignored_options = options != previous.options;
                if ignored_options {
                    warn!(
                        run_id = previous.id,
                        "Requested options differ from the unfinished run; its stored options apply"
                    );
                    self.store.append_log(
                        previous.id,
                        "Auto-resumed with stored options; requested options ignored",
                    )?;
                }
                let mut summary = self.resume(previous.id)?;
                summary.ignored_options = ignored_options;
                return Ok(summary);
            }
            for run in &unfinished {
                self.store.mark_skip_resume(run.id)?;
            }
        }

        let run_id = self.store.begin_run(&root, &options, &metadata)?;
        self.drive_or_fail(run_id, &walker, &options, false)
    }

    /// Resume an interrupted run by re-walking its root with its original
    /// options. New records are appended; existing rows are untouched.
    pub fn resume(&mut self, run_id: RunId) -> Result<RunSummary, RunError> {
        let run = self.store.resume_run(run_id)?;

        let walker = match TreeWalker::new(&run.root, &run.options) {
            Ok(walker) => walker.with_threads(self.settings.threads),
            Err(err) => {
                self.fail(run_id, &err.to_string());
                return Err(err.into());
            }
        };
        self.store.transition(run_id, RunStatus::Running)?;
        self.drive_or_fail(run_id, &walker, &run.options, true)
    }

    fn drive_or_fail(
        &mut self,
        run_id: RunId,
        walker: &TreeWalker,
        options: &RunOptions,
        resumed: bool,
    ) -> Result<RunSummary, RunError> {
        match self.drive(run_id, walker, options, resumed) {
            Ok(summary) => Ok(summary),
            Err(err) => {
                self.fail(run_id, &err.to_string());
                Err(err)
            }
        }
    }

    /// Best effort: log and mark the run failed. Errors here are secondary to
    /// the one being reported.
    fn fail(&mut self, run_id: RunId, reason: &str) {
        warn!(run_id, reason, "Scan run failed");
        if let Err(e) = self.store.append_log(run_id, &format!("Failed: {reason}")) {
            warn!(run_id, error = %e, "Could not log run failure");
        }
        if let Err(e) = self.store.finish_run(run_id, RunStatus::Failed) {
            warn!(run_id, error = %e, "Could not mark run failed");
        }
    }

    fn drive(
        &mut self,
        run_id: RunId,
        walker: &TreeWalker,
        options: &RunOptions,
        resumed: bool,
    ) -> Result<RunSummary, RunError> {
        let mut state = DriveState {
            progress: ProgressTracker::new(run_id),
            inodes: InodeTracker::new(),
            bytes_recorded: 0,
            warnings: Vec::new(),
        };
        let batch_size = self.settings.batch_size.max(1);
        let mut batch: Vec<RawEntry> = Vec::with_capacity(batch_size);
        let mut interrupted = false;

        for item in walker.walk() {
            if self.cancel.load(Ordering::Relaxed) {
                interrupted = true;
                break;
            }

            match item {
                Ok(entry) => {
                    state.progress.set_current_path(entry.path.clone());
                    match entry.kind {
                        EntryKind::Directory => state.progress.record_dir(),
                        EntryKind::Other => {}
                        EntryKind::File | EntryKind::Symlink => {
                            let size = if entry.is_regular() { entry.size } else { 0 };
                            state.progress.record_file(size);
                            batch.push(entry);
                        }
                    }
                }
                Err(err) if err.path().is_some_and(|path| path == walker.root()) => {
                    // Without the root there is nothing left to walk.
                    check_root(walker.root())?;
                    return Err(err.into());
                }
                Err(err) => self.warn(run_id, &err, &mut state)?,
            }

            if batch.len() >= batch_size {
                self.flush(run_id, &mut batch, options.hashing_enabled, &mut state)?;
                self.emit(&state);
            } else if state
                .progress
                .due(self.settings.progress_every, self.settings.progress_interval)
            {
                self.emit(&state);
            }
        }

        self.flush(run_id, &mut batch, options.hashing_enabled, &mut state)?;
        self.emit(&state);

        if !interrupted {
            // A root removed mid-walk only shows up as unreadable children.
            check_root(walker.root())?;
        }

        let outcome = if interrupted {
            self.store.append_log(
                run_id,
                &format!(
                    "Interrupted after {} files; resume with run id {run_id}",
                    state.progress.files_recorded
                ),
            )?;
            info!(run_id, "Scan run interrupted");
            RunOutcome::Interrupted
        } else {
            self.store.append_log(
                run_id,
                &format!(
                    "Finished: {} files recorded, {} hashed, {} warnings",
                    state.progress.files_recorded,
                    state.progress.files_hashed,
                    state.warnings.len()
                ),
            )?;
            self.store.finish_run(run_id, RunStatus::Completed)?;
            RunOutcome::Completed
        };

        Ok(RunSummary {
            run_id,
            outcome,
            resumed,
            ignored_options: false,
            files_recorded: state.progress.files_recorded,
            bytes_recorded: state.bytes_recorded,
            unique_bytes: state.inodes.unique_bytes(),
            files_hashed: state.progress.files_hashed,
            elapsed: state.progress.elapsed(),
            warnings: state.warnings,
        })
    }

    /// Hash the pending batch in parallel, then write it in one transaction.
    fn flush(
        &mut self,
        run_id: RunId,
        batch: &mut Vec<RawEntry>,
        hashing: bool,
        state: &mut DriveState,
    ) -> Result<(), RunError> {
        if batch.is_empty() {
            return Ok(());
        }

        let hashed: Vec<(RawEntry, Option<Result<ContentHash, ScanError>>)> =
            std::mem::take(batch)
                .into_par_iter()
                .map(|entry| {
                    let hash = (hashing && entry.is_regular()).then(|| hash_file(&entry.path));
                    (entry, hash)
                })
                .collect();

        let mut records = Vec::with_capacity(hashed.len());
        for (entry, hash) in hashed {
            let content_hash = match hash {
                Some(Ok(hash)) => {
                    state.progress.files_hashed += 1;
                    Some(hash)
                }
                Some(Err(err)) => {
                    self.warn(run_id, &err, state)?;
                    None
                }
                None => None,
            };
            if entry.is_regular() {
                state.bytes_recorded += entry.size;
                state.inodes.track(entry.inode, entry.size);
            }
            records.push(FileRecord::from_entry(run_id, entry, content_hash));
        }

        let written = self.store.record_files(&records)?;
        state.progress.files_recorded += written as u64;
        debug!(run_id, written, "Flushed batch");
        Ok(())
    }

    fn warn(&mut self, run_id: RunId, err: &ScanError, state: &mut DriveState) -> Result<(), RunError> {
        warn!(run_id, error = %err, "Recovered scan error");
        state.progress.record_error();
        state.warnings.push(ScanWarning::from_error(err));
        self.store.append_log(run_id, &err.to_string())?;
        Ok(())
    }

    fn emit(&self, state: &DriveState) {
        // No subscribers is fine.
        let _ = self.progress_tx.send(state.progress.snapshot());
    }
}

/// Confirm the walk root is still a directory.
fn check_root(root: &Path) -> Result<(), ScanError> {
    match fs::metadata(root) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(ScanError::NotADirectory {
            path: root.to_path_buf(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ScanError::RootNotFound {
            path: root.to_path_buf(),
        }),
        Err(e) => Err(ScanError::io(root, e)),
    }
}
