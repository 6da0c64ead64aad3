//! Deterministic tree walking on top of jwalk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

use globset::{Glob, GlobSet, GlobSetBuilder};
use jwalk::{Parallelism, WalkDir};

use filesage_core::{EntryKind, InodeInfo, RawEntry, RunOptions, ScanError};

type JwalkEntry = jwalk::DirEntry<((), ())>;
type JwalkIter = <WalkDir as IntoIterator>::IntoIter;

/// Decides which paths are removed before the walker descends into them.
#[derive(Debug)]
struct WalkFilter {
    root: PathBuf,
    skip_paths: Vec<PathBuf>,
    ignore: GlobSet,
    /// Set when filesystem boundaries must not be crossed.
    root_device: Option<u64>,
}

impl WalkFilter {
    fn is_pruned(&self, path: &Path) -> bool {
        if self.skip_paths.iter().any(|skip| path.starts_with(skip)) {
            return true;
        }
        path.strip_prefix(&self.root)
            .is_ok_and(|relative| self.ignore.is_match(relative))
    }

    fn is_foreign_device(&self, path: &Path) -> bool {
        match self.root_device {
            Some(device) => fs::symlink_metadata(path).is_ok_and(|m| get_dev(&m) != device),
            None => false,
        }
    }
}

/// Walks a root directory and yields one [`RawEntry`] per filesystem entry.
///
/// Entries are sorted by name within each directory so two walks of an
/// unchanged tree produce the same sequence. Symlinks are reported as their
/// own kind and not followed unless the options ask for it.
#[derive(Debug)]
pub struct TreeWalker {
    filter: Arc<WalkFilter>,
    follow_symlinks: bool,
    include_hidden: bool,
    threads: usize,
}

impl TreeWalker {
    /// Validate `root` and prepare a walker for it.
    pub fn new(root: &Path, options: &RunOptions) -> Result<Self, ScanError> {
        let root = root.canonicalize().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ScanError::RootNotFound {
                path: root.to_path_buf(),
            },
            _ => ScanError::io(root, e),
        })?;
        let metadata = fs::metadata(&root).map_err(|e| ScanError::io(&root, e))?;
        if !metadata.is_dir() {
            return Err(ScanError::NotADirectory { path: root });
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in &options.ignore_patterns {
            let glob = Glob::new(pattern).map_err(|e| ScanError::InvalidConfig {
                message: format!("invalid ignore pattern {pattern:?}: {e}"),
            })?;
            builder.add(glob);
        }
        let ignore = builder.build().map_err(|e| ScanError::InvalidConfig {
            message: e.to_string(),
        })?;

        let filter = WalkFilter {
            skip_paths: options.effective_skip_paths(&root),
            ignore,
            root_device: (!options.cross_filesystems).then(|| get_dev(&metadata)),
            root,
        };

        Ok(Self {
            filter: Arc::new(filter),
            follow_symlinks: options.follow_symlinks,
            include_hidden: options.include_hidden,
            threads: 0,
        })
    }

    /// Number of directory reading threads (0 = rayon default pool).
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Canonical root of the walk.
    pub fn root(&self) -> &Path {
        &self.filter.root
    }

    /// Start walking. Per-entry failures are yielded as
    /// [`ScanError::EntryUnreadable`] and the walk continues.
    pub fn walk(&self) -> Walk {
        let parallelism = match self.threads {
            0 => Parallelism::RayonDefaultPool {
                busy_timeout: Duration::from_millis(100),
            },
            n => Parallelism::RayonNewPool(n),
        };
        let filter = Arc::clone(&self.filter);

        let inner = WalkDir::new(&self.filter.root)
            .sort(true)
            .parallelism(parallelism)
            .skip_hidden(!self.include_hidden)
            .follow_links(self.follow_symlinks)
            .process_read_dir(move |_depth, _dir, _state, children| {
                children.retain(|child| {
                    child
                        .as_ref()
                        .map_or(true, |entry| !filter.is_pruned(&entry.path()))
                });
                for entry in children.iter_mut().flatten() {
                    if entry.file_type().is_dir() && filter.is_foreign_device(&entry.path()) {
                        entry.read_children_path = None;
                    }
                }
            })
            .into_iter();

        Walk {
            inner,
            pending: None,
        }
    }
}

/// Iterator returned by [`TreeWalker::walk`].
pub struct Walk {
    inner: JwalkIter,
    pending: Option<ScanError>,
}

impl Iterator for Walk {
    type Item = Result<RawEntry, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending.take() {
            return Some(Err(err));
        }

        match self.inner.next()? {
            Ok(mut entry) => {
                // A directory whose listing failed is still reported; the
                // listing error follows it.
                if let Some(err) = entry.read_children_error.take() {
                    self.pending = Some(unreadable(&err, entry.path()));
                }
                Some(raw_entry(&entry))
            }
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                Some(Err(unreadable(&err, path)))
            }
        }
    }
}

fn unreadable(err: &jwalk::Error, path: PathBuf) -> ScanError {
    let message = err
        .io_error()
        .map(ToString::to_string)
        .unwrap_or_else(|| err.to_string());
    ScanError::EntryUnreadable { path, message }
}

fn raw_entry(entry: &JwalkEntry) -> Result<RawEntry, ScanError> {
    let path = entry.path();
    let metadata = entry
        .metadata()
        .map_err(|err| unreadable(&err, path.clone()))?;

    let file_type = metadata.file_type();
    let kind = if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    };
    let link_target = match kind {
        EntryKind::Symlink => fs::read_link(&path).ok(),
        _ => None,
    };

    Ok(RawEntry {
        kind,
        size: metadata.len(),
        mtime: metadata.modified().unwrap_or(UNIX_EPOCH),
        inode: InodeInfo::new(get_ino(&metadata), get_dev(&metadata)),
        nlink: get_nlink(&metadata),
        link_target,
        path,
    })
}

// Cross-platform metadata helpers

#[cfg(unix)]
fn get_dev(metadata: &fs::Metadata) -> u64 {
    metadata.dev()
}

#[cfg(not(unix))]
fn get_dev(_metadata: &fs::Metadata) -> u64 {
    0
}

#[cfg(unix)]
fn get_ino(metadata: &fs::Metadata) -> u64 {
    metadata.ino()
}

#[cfg(not(unix))]
fn get_ino(_metadata: &fs::Metadata) -> u64 {
    0
}

#[cfg(unix)]
fn get_nlink(metadata: &fs::Metadata) -> u64 {
    metadata.nlink()
}

#[cfg(not(unix))]
fn get_nlink(_metadata: &fs::Metadata) -> u64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::create_dir(root.join("b_dir")).unwrap();
        fs::create_dir(root.join("cache")).unwrap();
        fs::write(root.join("a.txt"), "hello").unwrap();
        fs::write(root.join("b_dir/inner.txt"), "inner").unwrap();
        fs::write(root.join("b_dir/scratch.tmp"), "tmp").unwrap();
        fs::write(root.join("cache/blob"), "blob").unwrap();
        fs::write(root.join(".hidden"), "h").unwrap();

        temp
    }

    fn names(walker: &TreeWalker) -> Vec<PathBuf> {
        walker
            .walk()
            .filter_map(Result::ok)
            .map(|e| e.path.strip_prefix(walker.root()).unwrap().to_path_buf())
            .collect()
    }

    #[test]
    fn test_sorted_and_complete() {
        let temp = create_test_tree();
        let walker = TreeWalker::new(temp.path(), &RunOptions::default()).unwrap();

        let paths = names(&walker);
        let expected: Vec<PathBuf> = [
            "",
            ".hidden",
            "a.txt",
            "b_dir",
            "b_dir/inner.txt",
            "b_dir/scratch.tmp",
            "cache",
            "cache/blob",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();
        assert_eq!(paths, expected);
        assert_eq!(paths, names(&walker));
    }

    #[test]
    fn test_ignore_patterns_and_skip_paths() {
        let temp = create_test_tree();
        let root = temp.path().canonicalize().unwrap();
        let options = RunOptions::builder()
            .ignore_patterns(vec!["**/*.tmp".to_string()])
            .skip_paths(vec![root.join("cache")])
            .build()
            .unwrap();
        let walker = TreeWalker::new(&root, &options).unwrap();

        let paths = names(&walker);
        assert!(paths.contains(&PathBuf::from("b_dir/inner.txt")));
        assert!(!paths.contains(&PathBuf::from("b_dir/scratch.tmp")));
        assert!(!paths.iter().any(|p| p.starts_with("cache")));
    }

    #[test]
    fn test_entry_kinds() {
        let temp = create_test_tree();
        let walker = TreeWalker::new(temp.path(), &RunOptions::default()).unwrap();
        let entries: Vec<RawEntry> = walker.walk().filter_map(Result::ok).collect();

        let file = entries.iter().find(|e| e.path.ends_with("a.txt")).unwrap();
        assert_eq!(file.kind, EntryKind::File);
        assert_eq!(file.size, 5);
        assert_eq!(file.nlink, 1);
        assert!(entries.iter().any(|e| e.path.ends_with("b_dir") && e.kind == EntryKind::Directory));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_not_followed() {
        let temp = create_test_tree();
        std::os::unix::fs::symlink(temp.path().join("b_dir"), temp.path().join("link")).unwrap();
        let walker = TreeWalker::new(temp.path(), &RunOptions::default()).unwrap();

        let paths = names(&walker);
        assert!(paths.contains(&PathBuf::from("link")));
        assert!(!paths.contains(&PathBuf::from("link/inner.txt")));

        let link = walker
            .walk()
            .filter_map(Result::ok)
            .find(|e| e.path.ends_with("link"))
            .unwrap();
        assert_eq!(link.kind, EntryKind::Symlink);
        assert_eq!(link.link_target, Some(temp.path().join("b_dir")));
    }

    #[test]
    fn test_root_errors() {
        let temp = create_test_tree();
        let missing = TreeWalker::new(&temp.path().join("missing"), &RunOptions::default());
        assert!(matches!(missing, Err(ScanError::RootNotFound { .. })));

        let file = TreeWalker::new(&temp.path().join("a.txt"), &RunOptions::default());
        assert!(matches!(file, Err(ScanError::NotADirectory { .. })));
    }

    #[test]
    fn test_bad_glob() {
        let temp = create_test_tree();
        let options = RunOptions::builder()
            .ignore_patterns(vec!["a[".to_string()])
            .build()
            .unwrap();
        assert!(matches!(
            TreeWalker::new(temp.path(), &options),
            Err(ScanError::InvalidConfig { .. })
        ));
    }
}
