//! Resumable scanning engine for filesage.
//!
//! `filesage-scan` walks a directory tree, optionally hashes regular files and
//! records every file and symlink into a [`Store`](filesage_store::Store) as
//! part of a scan run. Key features:
//!
//! - **Deterministic traversal** via jwalk with sorted directory listings
//! - **Parallel hashing** of each record batch via rayon
//! - **Resumable runs**: an interrupted run is re-walked and appended to
//! - **Progress updates** via broadcast channels
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use filesage_core::{RunMetadata, RunOptions};
//! use filesage_scan::{ControllerSettings, RunController};
//! use filesage_store::Store;
//!
//! let mut store = Store::open("filesage.db").unwrap();
//! let options = RunOptions::builder().hashing_enabled(true).build().unwrap();
//!
//! let mut controller = RunController::new(&mut store, ControllerSettings::default());
//! let summary = controller
//!     .start(Path::new("/data"), options, RunMetadata::capture())
//!     .unwrap();
//!
//! println!("Run {} recorded {} files", summary.run_id, summary.files_recorded);
//! ```
//!
//! # Progress Monitoring
//!
//! ```rust,no_run
//! # use filesage_scan::{ControllerSettings, RunController};
//! # use filesage_store::Store;
//! let mut store = Store::open_in_memory().unwrap();
//! let controller = RunController::new(&mut store, ControllerSettings::default());
//! let mut progress_rx = controller.subscribe();
//!
//! std::thread::spawn(move || {
//!     while let Ok(progress) = progress_rx.blocking_recv() {
//!         println!("Scanned {} files", progress.files_scanned);
//!     }
//! });
//! ```

mod controller;
mod hasher;
mod inode;
mod progress;
mod walker;

pub use controller::{
    ControllerSettings, ControllerSettingsBuilder, RunController, RunError, RunOutcome,
    RunSummary,
};
pub use hasher::{HASH_BUFFER_SIZE, hash_file};
pub use inode::InodeTracker;
pub use progress::ScanProgress;
pub use walker::{TreeWalker, Walk};

// Re-export core types for convenience
pub use filesage_core::{RawEntry, RunOptions, ScanError, ScanWarning, WarningKind};
