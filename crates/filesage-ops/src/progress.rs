//! Progress reporting for hardlink execution.

use std::path::PathBuf;

use serde::Serialize;

/// Progress of an ongoing hardlink pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HardlinkProgress {
    /// Actions finished, applied or skipped.
    pub actions_completed: usize,
    pub actions_total: usize,
    pub files_linked: usize,
    pub bytes_reclaimed: u64,
    /// The path currently being replaced.
    pub current_file: Option<PathBuf>,
    pub error_count: usize,
}

impl HardlinkProgress {
    pub fn new(actions_total: usize) -> Self {
        Self {
            actions_total,
            ..Self::default()
        }
    }

    /// Get the progress as a percentage (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        if self.actions_total > 0 {
            (self.actions_completed as f64 / self.actions_total as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        let mut progress = HardlinkProgress::new(4);
        assert_eq!(progress.percentage(), 0.0);
        progress.actions_completed = 1;
        assert_eq!(progress.percentage(), 25.0);
        assert_eq!(HardlinkProgress::new(0).percentage(), 0.0);
    }

    #[test]
    fn test_has_errors() {
        let mut progress = HardlinkProgress::new(2);
        assert!(!progress.has_errors());
        progress.error_count = 1;
        assert!(progress.has_errors());
    }
}
