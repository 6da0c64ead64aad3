//! Scan progress reporting.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use filesage_core::RunId;

/// Progress information during a scan run.
#[derive(Debug, Clone)]
pub struct ScanProgress {
    /// Run being scanned.
    pub run_id: RunId,
    /// Files and symlinks seen so far.
    pub files_scanned: u64,
    /// Directories seen so far.
    pub dirs_scanned: u64,
    /// Bytes of regular files seen so far.
    pub bytes_scanned: u64,
    /// Files whose content hash has been computed.
    pub files_hashed: u64,
    /// Records committed to the store.
    pub files_recorded: u64,
    /// Recovered errors so far.
    pub errors_count: u64,
    /// Current path being scanned.
    pub current_path: PathBuf,
    /// Time elapsed since the run (or its resumption) started.
    pub elapsed: Duration,
}

impl ScanProgress {
    /// Calculate scan rate in files per second.
    pub fn files_per_second(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.files_scanned as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }
}

/// Accumulates counters and decides when a snapshot is due.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    run_id: RunId,
    start_time: Instant,
    last_emit: Instant,
    files_at_last_emit: u64,
    files_scanned: u64,
    dirs_scanned: u64,
    bytes_scanned: u64,
    pub(crate) files_hashed: u64,
    pub(crate) files_recorded: u64,
    errors_count: u64,
    current_path: PathBuf,
}

impl ProgressTracker {
    pub fn new(run_id: RunId) -> Self {
        let now = Instant::now();
        Self {
            run_id,
            start_time: now,
            last_emit: now,
            files_at_last_emit: 0,
            files_scanned: 0,
            dirs_scanned: 0,
            bytes_scanned: 0,
            files_hashed: 0,
            files_recorded: 0,
            errors_count: 0,
            current_path: PathBuf::new(),
        }
    }

    pub fn record_file(&mut self, size: u64) {
        self.files_scanned += 1;
        self.bytes_scanned += size;
    }

    pub fn record_dir(&mut self) {
        self.dirs_scanned += 1;
    }

    pub fn record_error(&mut self) {
        self.errors_count += 1;
    }

    pub fn set_current_path(&mut self, path: PathBuf) {
        self.current_path = path;
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// True every `every` files or once `interval` has passed, whichever
    /// comes first. Resets the window when it fires.
    pub fn due(&mut self, every: u64, interval: Duration) -> bool {
        let by_count = every > 0 && self.files_scanned - self.files_at_last_emit >= every;
        if by_count || self.last_emit.elapsed() >= interval {
            self.last_emit = Instant::now();
            self.files_at_last_emit = self.files_scanned;
            return true;
        }
        false
    }

    pub fn snapshot(&self) -> ScanProgress {
        ScanProgress {
            run_id: self.run_id,
            files_scanned: self.files_scanned,
            dirs_scanned: self.dirs_scanned,
            bytes_scanned: self.bytes_scanned,
            files_hashed: self.files_hashed,
            files_recorded: self.files_recorded,
            errors_count: self.errors_count,
            current_path: self.current_path.clone(),
            elapsed: self.elapsed(),
        }
    }
}
