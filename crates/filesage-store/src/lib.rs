//! SQLite metadata store for filesage.
//!
//! The store persists scan runs, their append-only file records and a
//! per-run event log. Schema changes are applied through an ordered list of
//! idempotent migrations when a store is opened.
//!
//! ```rust,no_run
//! use std::path::Path;
//! use filesage_core::{RunMetadata, RunOptions, RunSelector, RunStatus};
//! use filesage_store::{LogSelector, Store};
//!
//! let mut store = Store::open("/var/lib/filesage/filesage.db").unwrap();
//! let options = RunOptions { hashing_enabled: true, ..RunOptions::default() };
//! let run = store.begin_run(Path::new("/data"), &options, &RunMetadata::capture()).unwrap();
//! store.finish_run(run, RunStatus::Completed).unwrap();
//!
//! let (_, groups) = store.query_duplicates(RunSelector::Latest, 4096).unwrap();
//! println!("{} candidate groups", groups.len());
//!
//! for line in store.print_log(LogSelector::Run(run)).unwrap() {
//!     println!("{}", line.unwrap());
//! }
//! ```

mod codec;
mod error;
mod log;
mod migrations;
mod records;
mod runs;
mod store;

pub use error::{Result, StoreError};
pub use log::{LogLines, LogSelector, RunEvent};
pub use store::Store;
