//! Cross-run comparison.
//!
//! Answers "what content of run A has no copy anywhere in run B", for
//! example to check that a backup tree holds everything the source does.
//! Paths are ignored; files match by content hash alone. The two runs may
//! live in different stores.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use filesage_core::{ContentHash, RunId, RunSelector};
use filesage_store::Store;

use crate::duplicates::AnalyzeError;

/// A file of the source run whose content the target run lacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingFile {
    pub path: PathBuf,
    pub size: u64,
    pub content_hash: ContentHash,
}

/// Result of [`compare_runs`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunComparison {
    pub source_run: RunId,
    pub target_run: RunId,
    /// Hashed files considered in the source run.
    pub source_files: usize,
    /// Hashed files considered in the target run.
    pub target_files: usize,
    /// Source files without a content match in the target, by path.
    pub missing: Vec<MissingFile>,
    pub missing_bytes: u64,
}

impl RunComparison {
    /// Whether every source file has a copy in the target.
    pub fn is_covered(&self) -> bool {
        self.missing.is_empty()
    }

    /// Missing files grouped by parent directory, directories in path order.
    pub fn missing_by_directory(&self) -> BTreeMap<&Path, Vec<&MissingFile>> {
        let mut tree: BTreeMap<&Path, Vec<&MissingFile>> = BTreeMap::new();
        for file in &self.missing {
            let dir = file.path.parent().unwrap_or(Path::new(""));
            tree.entry(dir).or_default().push(file);
        }
        tree
    }
}

/// List the hashed files of `source_run` whose content appears nowhere in
/// `target_run`.
///
/// Both runs must have been recorded with hashing enabled. Only the newest
/// row per path counts, so rows superseded by a resume are ignored.
pub fn compare_runs(
    source: &Store,
    source_run: RunSelector,
    target: &Store,
    target_run: RunSelector,
) -> Result<RunComparison, AnalyzeError> {
    let (source_meta, source_files) = source.hashed_files(source_run)?;
    let (target_meta, target_files) = target.hashed_files(target_run)?;

    let present: HashSet<ContentHash> = target_files
        .iter()
        .filter_map(|record| record.content_hash)
        .collect();

    let missing: Vec<MissingFile> = source_files
        .iter()
        .filter_map(|record| {
            let hash = record.content_hash?;
            (!present.contains(&hash)).then(|| MissingFile {
                path: record.path.clone(),
                size: record.size,
                content_hash: hash,
            })
        })
        .collect();
    let missing_bytes = missing.iter().map(|m| m.size).sum();

    debug!(
        source_run = source_meta.id,
        target_run = target_meta.id,
        missing = missing.len(),
        "Compared runs"
    );
    Ok(RunComparison {
        source_run: source_meta.id,
        target_run: target_meta.id,
        source_files: source_files.len(),
        target_files: target_files.len(),
        missing,
        missing_bytes,
    })
}
