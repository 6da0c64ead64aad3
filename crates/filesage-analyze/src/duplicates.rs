//! Duplicate grouping over stored scan runs.
//!
//! Content hashes were computed during the scan, so grouping is a pure query
//! over the store: files sharing (size, hash) in the newest row per path of
//! one run form a group. No file is read here.

use derive_builder::Builder;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use filesage_core::{DuplicateGroup, RunId, RunSelector};
use filesage_store::{Store, StoreError};

/// Errors from duplicate analysis.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid exclude pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Configuration for duplicate detection.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct DuplicateConfig {
    /// Minimum file size to consider.
    #[builder(default = "0")]
    pub min_size: u64,

    /// Glob patterns; matching paths are left out of every group.
    #[builder(default)]
    pub exclude_patterns: Vec<String>,

    /// Maximum number of groups to return (0 = unlimited).
    #[builder(default = "0")]
    pub max_groups: usize,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            exclude_patterns: Vec::new(),
            max_groups: 0,
        }
    }
}

impl DuplicateConfig {
    /// Create a new config builder.
    pub fn builder() -> DuplicateConfigBuilder {
        DuplicateConfigBuilder::default()
    }
}

/// Results from duplicate analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateReport {
    /// Run the groups were derived from.
    pub run_id: RunId,

    /// Groups of duplicate files, sorted by wasted space descending.
    pub groups: Vec<DuplicateGroup>,

    /// Total size of all duplicate files.
    pub total_duplicate_size: u64,

    /// Total wasted space (could be reclaimed).
    pub total_wasted_space: u64,

    /// Number of files that have duplicates.
    pub files_with_duplicates: u64,

    /// Number of duplicate groups.
    pub group_count: usize,

    /// Groups dropped because every member already shares one inode.
    pub already_linked_groups: usize,
}

impl DuplicateReport {
    /// Check if any duplicates were found.
    pub fn has_duplicates(&self) -> bool {
        !self.groups.is_empty()
    }
}

/// Derives duplicate groups from a store.
pub struct DuplicateGrouper<'s> {
    store: &'s Store,
    config: DuplicateConfig,
}

impl<'s> DuplicateGrouper<'s> {
    /// Create a grouper with default config.
    pub fn new(store: &'s Store) -> Self {
        Self::with_config(store, DuplicateConfig::default())
    }

    /// Create a grouper with custom config.
    pub fn with_config(store: &'s Store, config: DuplicateConfig) -> Self {
        Self { store, config }
    }

    /// Group the selected run's hashed files.
    ///
    /// Output depends only on store contents: groups are ordered by wasted
    /// bytes descending, then content hash, and members by path.
    pub fn find_duplicates(&self, selector: RunSelector) -> Result<DuplicateReport, AnalyzeError> {
        let exclude = self.exclude_set()?;
        let (run, candidates) = self.store.query_duplicates(selector, self.config.min_size)?;

        let mut already_linked_groups = 0;
        let mut groups: Vec<DuplicateGroup> = candidates
            .into_iter()
            .filter_map(|mut group| {
                group.members.retain(|m| !exclude.is_match(&m.path));
                if group.count() < 2 {
                    return None;
                }
                if group.all_same_inode() {
                    already_linked_groups += 1;
                    return None;
                }
                Some(group)
            })
            .collect();

        groups.sort_by(|a, b| {
            b.wasted_bytes()
                .cmp(&a.wasted_bytes())
                .then_with(|| a.content_hash.cmp(&b.content_hash))
                .then_with(|| a.size.cmp(&b.size))
        });

        if self.config.max_groups > 0 && groups.len() > self.config.max_groups {
            groups.truncate(self.config.max_groups);
        }

        let total_duplicate_size = groups.iter().map(|g| g.size * g.count() as u64).sum();
        let total_wasted_space = groups.iter().map(DuplicateGroup::wasted_bytes).sum();
        let files_with_duplicates = groups.iter().map(|g| g.count() as u64).sum();
        let group_count = groups.len();

        debug!(run_id = run.id, group_count, "Found duplicate groups");
        Ok(DuplicateReport {
            run_id: run.id,
            groups,
            total_duplicate_size,
            total_wasted_space,
            files_with_duplicates,
            group_count,
            already_linked_groups,
        })
    }

    fn exclude_set(&self) -> Result<GlobSet, AnalyzeError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.config.exclude_patterns {
            let glob = Glob::new(pattern).map_err(|e| AnalyzeError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            builder.add(glob);
        }
        builder.build().map_err(|e| AnalyzeError::InvalidPattern {
            pattern: self.config.exclude_patterns.join(", "),
            message: e.to_string(),
        })
    }
}
