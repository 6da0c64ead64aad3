//! User configuration file.
//!
//! Read from `<config dir>/filesage/config.toml`. Every key is optional and
//! command line flags override it.

use std::path::{Path, PathBuf};

use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use filesage_analyze::DEFAULT_HARDLINK_MIN_SIZE;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database file; defaults to `~/.filesage/filesage.db`.
    pub database: Option<PathBuf>,
    /// Minimum size for duplicate listings.
    pub min_size: u64,
    /// Minimum size for hardlink planning.
    pub hardlink_min_size: u64,
    /// Records hashed and committed per batch.
    pub batch_size: usize,
    /// Replaces the built-in skip list when set.
    pub skip_paths: Option<Vec<PathBuf>>,
    pub ignore_patterns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: None,
            min_size: 0,
            hardlink_min_size: DEFAULT_HARDLINK_MIN_SIZE,
            batch_size: 256,
            skip_paths: None,
            ignore_patterns: Vec::new(),
        }
    }
}

impl Config {
    /// Get the config file path.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("filesage").join("config.toml"))
    }

    /// Load the config file, or defaults when there is none.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Database path, honoring an explicit override.
    pub fn database_path(&self, explicit: Option<PathBuf>) -> PathBuf {
        explicit
            .or_else(|| self.database.clone())
            .unwrap_or_else(default_database_path)
    }
}

fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".filesage")
        .join("filesage.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "min_size = 1024\nignore_patterns = [\"*.tmp\"]\nskip_paths = [\"/backup\"]\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.min_size, 1024);
        assert_eq!(config.hardlink_min_size, DEFAULT_HARDLINK_MIN_SIZE);
        assert_eq!(config.batch_size, 256);
        assert_eq!(config.ignore_patterns, vec!["*.tmp".to_string()]);
        assert_eq!(config.skip_paths, Some(vec![PathBuf::from("/backup")]));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "min_size = \"big\"").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_database_path_precedence() {
        let config = Config {
            database: Some(PathBuf::from("/cfg.db")),
            ..Config::default()
        };
        assert_eq!(config.database_path(Some(PathBuf::from("/cli.db"))), PathBuf::from("/cli.db"));
        assert_eq!(config.database_path(None), PathBuf::from("/cfg.db"));
        assert!(Config::default().database_path(None).ends_with(".filesage/filesage.db"));
    }
}
