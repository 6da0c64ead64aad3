//! Analysis over recorded scan runs.
//!
//! This crate derives duplicate groups and hardlink plans from a
//! [`Store`](filesage_store::Store). It never modifies the filesystem:
//!
//! - [`DuplicateGrouper`] groups hashed files of one run by size and content
//! - [`HardlinkPlanner`] picks a file to keep per group and lists the rest
//! - [`dry_run`] describes a plan without executing it
//! - [`compare_runs`] lists content of one run that another run lacks

mod compare;
mod duplicates;
mod planner;

pub use compare::{MissingFile, RunComparison, compare_runs};
pub use duplicates::{
    AnalyzeError, DuplicateConfig, DuplicateConfigBuilder, DuplicateGrouper, DuplicateReport,
};
pub use planner::{DEFAULT_HARDLINK_MIN_SIZE, DryRunAction, DryRunReport, HardlinkPlanner, dry_run};
