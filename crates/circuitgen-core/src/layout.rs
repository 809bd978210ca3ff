//! On-disk layout of one run.
//!
//! ```text
//! <output_dir>/<run_id>/
//!   generated/               successful production programs
//!   failed_programs/         originals of failed production candidates
//!   assembled/               assembled combinations
//!   plots/                   performance and complexity reports
//!   training_phase/<model>/round_<i>/{generated,failed,round_<i>_execution.log}
//!   execution.log
//! ```

use std::path::{Path, PathBuf};

use chrono::Local;

use crate::candidate::OutputDirs;
use crate::types::sanitize_model;

/// Run identifier derived from the local start time.
pub fn default_run_id() -> String {
    Local::now().format("%Y%m%d_%H%M%S_improved").to_string()
}

/// Paths of one run directory.
#[derive(Clone, Debug)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    pub fn new(output_dir: impl AsRef<Path>, run_id: &str) -> Self {
        Self {
            root: output_dir.as_ref().join(run_id),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn generated_dir(&self) -> PathBuf {
        self.root.join("generated")
    }

    pub fn failed_dir(&self) -> PathBuf {
        self.root.join("failed_programs")
    }

    pub fn assembled_dir(&self) -> PathBuf {
        self.root.join("assembled")
    }

    pub fn plots_dir(&self) -> PathBuf {
        self.root.join("plots")
    }

    pub fn execution_log(&self) -> PathBuf {
        self.root.join("execution.log")
    }

    pub fn production_dirs(&self) -> OutputDirs {
        OutputDirs::new(self.generated_dir(), self.failed_dir())
    }

    pub fn training_round_dir(&self, model: &str, round: usize) -> PathBuf {
        self.root
            .join("training_phase")
            .join(sanitize_model(model))
            .join(format!("round_{}", round))
    }

    pub fn training_round_log(&self, model: &str, round: usize) -> PathBuf {
        self.training_round_dir(model, round)
            .join(format!("round_{}_execution.log", round))
    }

    /// Create the production directories.
    pub async fn create(&self) -> std::io::Result<()> {
        for dir in [
            self.generated_dir(),
            self.failed_dir(),
            self.assembled_dir(),
            self.plots_dir(),
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_has_timestamp_shape() {
        let id = default_run_id();
        assert!(id.ends_with("_improved"));
        assert_eq!(id.len(), "20260101_120000_improved".len());
    }

    #[test]
    fn training_paths_use_sanitized_model() {
        let layout = RunLayout::new("/out", "run1");
        assert_eq!(
            layout.training_round_log("openai/gpt-4o", 2),
            PathBuf::from("/out/run1/training_phase/openai_gpt-4o/round_2/round_2_execution.log")
        );
        assert_eq!(layout.failed_dir(), PathBuf::from("/out/run1/failed_programs"));
    }

    #[tokio::test]
    async fn create_makes_production_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RunLayout::new(dir.path(), "r");
        layout.create().await.unwrap();
        assert!(layout.generated_dir().is_dir());
        assert!(layout.assembled_dir().is_dir());
        assert!(layout.plots_dir().is_dir());
    }
}
