//! Filesystem mutation for filesage.
//!
//! The only mutation filesage performs is replacing duplicate files with
//! hardlinks to a kept copy. Every action is re-verified against the live
//! filesystem before anything is touched, and a replacement is always
//! link-then-rename, so the original name never points at nothing.

mod hardlink;
mod progress;

pub use hardlink::{
    ExecuteOptions, ExecutionSummary, HardlinkError, HardlinkExecutor, HardlinkResult,
    start_hardlink,
};
pub use progress::HardlinkProgress;

/// Default channel buffer size for operation progress updates.
pub const OPERATION_CHANNEL_SIZE: usize = 100;
