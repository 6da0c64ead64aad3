//! Core types for filesage.
//!
//! This crate provides the data model shared by every other filesage crate:
//! scan runs and their options, the entries produced by the tree walker, the
//! file records persisted by the store, and the duplicate groups and hardlink
//! plans derived from them.

mod dedup;
mod error;
mod record;
mod run;

pub use dedup::{DuplicateGroup, DuplicateMember, HardlinkAction, HardlinkPlan};
pub use error::{ScanError, ScanWarning, WarningKind};
pub use record::{
    ContentHash, EntryKind, FileRecord, InodeInfo, ParseHashError, RawEntry, mtime_from_nanos,
    mtime_to_nanos,
};
pub use run::{
    DEFAULT_SKIP_PATHS, RunId, RunMetadata, RunOptions, RunOptionsBuilder, RunSelector,
    RunStatus, ScanRun,
};
