//! Scan run types and run options.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Identifier of a scan run, assigned by the store.
pub type RunId = i64;

/// Paths never descended into unless the scan root itself lies inside them.
pub const DEFAULT_SKIP_PATHS: &[&str] = &[
    "/proc", "/sys", "/dev", "/run", "/tmp", "/snap", "/mnt", "/swap.img",
];

/// Lifecycle state of a scan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Resumed,
}

impl RunStatus {
    /// Stable name used in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Resumed => "resumed",
        }
    }

    /// Completed and failed runs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the run state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Running, Completed)
                | (Running, Failed)
                | (Running, Resumed)
                | (Resumed, Running)
                | (Resumed, Resumed)
                | (Resumed, Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "resumed" => Ok(Self::Resumed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Options fixed at the start of a run and stored with it.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct RunOptions {
    /// Compute a content hash for every regular file.
    #[builder(default = "false")]
    #[serde(default)]
    pub hashing_enabled: bool,

    /// Size filter the run was started with, kept for reporting.
    #[builder(default = "0")]
    #[serde(default)]
    pub min_size: u64,

    /// Absolute paths pruned from the walk.
    #[builder(default = "default_skip_paths()")]
    #[serde(default = "default_skip_paths")]
    pub skip_paths: Vec<PathBuf>,

    /// Glob patterns matched against paths relative to the root.
    #[builder(default)]
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Descend into other mounted filesystems.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub cross_filesystems: bool,

    /// Follow symbolic links into directories.
    #[builder(default = "false")]
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Include hidden files (starting with .).
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub include_hidden: bool,

    /// Optional display name.
    #[builder(default)]
    #[serde(default)]
    pub name: Option<String>,

    /// Free-form comment.
    #[builder(default)]
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_skip_paths() -> Vec<PathBuf> {
    DEFAULT_SKIP_PATHS.iter().map(PathBuf::from).collect()
}

impl RunOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref skip_paths) = self.skip_paths {
            if let Some(relative) = skip_paths.iter().find(|p| !p.is_absolute()) {
                return Err(format!("Skip path must be absolute: {}", relative.display()));
            }
        }
        if let Some(ref patterns) = self.ignore_patterns {
            if patterns.iter().any(|p| p.trim().is_empty()) {
                return Err("Ignore patterns cannot be empty".to_string());
            }
        }
        Ok(())
    }
}

impl RunOptions {
    /// Create a new run options builder.
    pub fn builder() -> RunOptionsBuilder {
        RunOptionsBuilder::default()
    }

    /// Skip paths that apply to a scan of `root`.
    ///
    /// A skip path containing the root is dropped so that e.g. `/tmp/x`
    /// can still be scanned.
    pub fn effective_skip_paths(&self, root: &Path) -> Vec<PathBuf> {
        self.skip_paths
            .iter()
            .filter(|skip| !root.starts_with(skip))
            .cloned()
            .collect()
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            hashing_enabled: false,
            min_size: 0,
            skip_paths: default_skip_paths(),
            ignore_patterns: Vec::new(),
            cross_filesystems: true,
            follow_symlinks: false,
            include_hidden: true,
            name: None,
            comment: None,
        }
    }
}

/// Where and how a run was started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub hostname: Option<String>,
    pub command_line: Option<String>,
    pub current_dir: Option<PathBuf>,
    /// Stable machine identifier, used to tell runs from different hosts
    /// apart when stores are compared.
    #[serde(default)]
    pub hardware_id: Option<String>,
    /// `ID` field of os-release.
    #[serde(default)]
    pub os_id: Option<String>,
    /// Store file the run was written to. Filled in by the store.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl RunMetadata {
    /// Capture metadata for the current process.
    pub fn capture() -> Self {
        let hostname = std::fs::read_to_string("/proc/sys/kernel/hostname")
            .or_else(|_| std::fs::read_to_string("/etc/hostname"))
            .ok()
            .map(|h| h.trim().to_string())
            .or_else(|| std::env::var("HOSTNAME").ok())
            .filter(|h| !h.is_empty());
        let args: Vec<String> = std::env::args().collect();

        Self {
            hostname,
            command_line: (!args.is_empty()).then(|| args.join(" ")),
            current_dir: std::env::current_dir().ok(),
            hardware_id: hardware_id(),
            os_id: std::fs::read_to_string("/etc/os-release")
                .ok()
                .and_then(|release| os_release_id(&release)),
            database_path: None,
        }
    }
}

const MACHINE_ID_FILES: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Machine id file first, then the first real network interface address.
fn hardware_id() -> Option<String> {
    MACHINE_ID_FILES
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .map(|id| id.trim().to_string())
        .find(|id| !id.is_empty())
        .or_else(mac_hardware_id)
}

fn mac_hardware_id() -> Option<String> {
    let mut interfaces: Vec<PathBuf> = std::fs::read_dir("/sys/class/net")
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    interfaces.sort();
    interfaces
        .iter()
        .filter_map(|iface| std::fs::read_to_string(iface.join("address")).ok())
        .find_map(|address| mac_id(&address))
}

/// `mac-` followed by the 12 hex digits of a non-zero MAC address.
fn mac_id(address: &str) -> Option<String> {
    let digits: String = address
        .trim()
        .chars()
        .filter(|c| *c != ':')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let valid = digits.len() == 12
        && digits.chars().all(|c| c.is_ascii_hexdigit())
        && digits.chars().any(|c| c != '0');
    valid.then(|| format!("mac-{digits}"))
}

fn os_release_id(release: &str) -> Option<String> {
    release
        .lines()
        .find_map(|line| line.strip_prefix("ID="))
        .map(|value| value.trim().trim_matches('"').to_string())
        .filter(|id| !id.is_empty())
}

/// One invocation of the tree walker, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRun {
    pub id: RunId,
    /// Canonical root path.
    pub root: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub options: RunOptions,
    /// Excluded from auto-resume and manual resume.
    pub skip_resume: bool,
    pub metadata: RunMetadata,
}

impl ScanRun {
    /// Running or resumed, not skip-marked.
    pub fn is_resumable(&self) -> bool {
        !self.status.is_terminal() && !self.skip_resume
    }

    /// Name shown in listings.
    pub fn display_name(&self) -> String {
        match &self.options.name {
            Some(name) => name.clone(),
            None => format!(
                "{} {} {}",
                self.id,
                self.started_at.format("%Y-%m-%d %H:%M:%S"),
                self.root.display()
            ),
        }
    }
}

/// Selects the run a query reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunSelector {
    /// Most recent completed run with hashing enabled.
    #[default]
    Latest,
    /// A specific run.
    Id(RunId),
}

impl From<Option<RunId>> for RunSelector {
    fn from(id: Option<RunId>) -> Self {
        id.map_or(Self::Latest, Self::Id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        assert!(RunStatus::Running.can_transition_to(RunStatus::Completed));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Resumed));
        assert!(RunStatus::Resumed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Resumed.can_transition_to(RunStatus::Completed));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Resumed));
    }

    #[test]
    fn test_mac_id() {
        assert_eq!(mac_id("52:54:00:AB:cd:01\n"), Some("mac-525400abcd01".to_string()));
        assert_eq!(mac_id("00:00:00:00:00:00"), None);
        assert_eq!(mac_id("not a mac"), None);
    }

    #[test]
    fn test_os_release_id() {
        let release = "NAME=\"Ubuntu\"\nVERSION_ID=\"24.04\"\nID=ubuntu\nID_LIKE=debian\n";
        assert_eq!(os_release_id(release), Some("ubuntu".to_string()));
        assert_eq!(os_release_id("ID=\"fedora\"\n"), Some("fedora".to_string()));
        assert_eq!(os_release_id("NAME=Unknown\n"), None);
    }

    #[test]
    fn test_capture_leaves_database_path_to_store() {
        let metadata = RunMetadata::capture();
        assert!(metadata.database_path.is_none());
        assert!(metadata.current_dir.is_some());
    }

    #[test]
    fn test_status_parse() {
        for status in [
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Resumed,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>(), Ok(status));
        }
        assert!("paused".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let options = RunOptions::builder().hashing_enabled(true).build().unwrap();
        assert!(options.hashing_enabled);
        assert!(options.cross_filesystems);
        assert!(!options.follow_symlinks);
        assert_eq!(options.skip_paths.len(), DEFAULT_SKIP_PATHS.len());
        assert_eq!(options, RunOptions { hashing_enabled: true, ..RunOptions::default() });
    }

    #[test]
    fn test_builder_rejects_relative_skip_path() {
        let result = RunOptions::builder()
            .skip_paths(vec![PathBuf::from("relative/dir")])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_skip_path_containing_root_is_dropped() {
        let options = RunOptions::default();
        let skips = options.effective_skip_paths(Path::new("/tmp/scan-here"));
        assert!(!skips.contains(&PathBuf::from("/tmp")));
        assert!(skips.contains(&PathBuf::from("/proc")));
    }

    #[test]
    fn test_options_deserialize_missing_fields() {
        let options: RunOptions = serde_json::from_str(r#"{"hashing_enabled":true}"#).unwrap();
        assert!(options.hashing_enabled);
        assert!(options.include_hidden);
        assert_eq!(options.skip_paths.len(), DEFAULT_SKIP_PATHS.len());
    }

    #[test]
    fn test_selector_from_option() {
        assert_eq!(RunSelector::from(None), RunSelector::Latest);
        assert_eq!(RunSelector::from(Some(4)), RunSelector::Id(4));
    }
}
