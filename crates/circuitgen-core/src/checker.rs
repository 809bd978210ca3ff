//! Program checker — trait for the compile and execution checks.
//!
//! The `ProgramChecker` trait abstracts how a generated circuit program is
//! compiled and executed. What counts as a compile error and how the quality
//! score is computed is up to the implementation; the pipeline only reads the
//! error, the metrics map, and the annotated code shown in verbose logs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ForgeResult;
use crate::types::{quality_score, Language, Metrics};

/// Result of one compile or execution check.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    /// Error output; `None` or blank means the check passed.
    #[serde(default)]
    pub error: Option<String>,
    /// Checker-defined metrics, usually including `quality_score`.
    #[serde(default)]
    pub metrics: Metrics,
    /// Program as the checker saw it (wrapped, instrumented, ...).
    #[serde(default)]
    pub annotated_code: String,
}

impl CheckReport {
    /// Passing report with the given quality score.
    pub fn passed_with_score(score: f64) -> Self {
        let mut metrics = Metrics::new();
        metrics.insert("quality_score".into(), serde_json::json!(score));
        Self {
            error: None,
            metrics,
            annotated_code: String::new(),
        }
    }

    /// Failing report with the given error output.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn passed(&self) -> bool {
        self.error.as_deref().map_or(true, |e| e.trim().is_empty())
    }

    /// The error text of a failed check.
    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or_default()
    }

    pub fn quality_score(&self) -> Option<f64> {
        quality_score(&self.metrics)
    }
}

/// Trait for compile and execution checks.
///
/// An `Err` means the checker itself could not run; a failing program is an
/// `Ok` report with an error.
#[async_trait]
pub trait ProgramChecker: Send + Sync {
    /// Compile-check a generated program.
    async fn compile(&self, code: &str, language: Language) -> ForgeResult<CheckReport>;

    /// Execute a generated program.
    async fn run(&self, code: &str, language: Language) -> ForgeResult<CheckReport>;

    /// Name of this checker for logging.
    fn name(&self) -> &str;
}
