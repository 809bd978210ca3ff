//! Report sinks for the performance and complexity data of a run.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::ForgeResult;
use crate::stats::{BatchSummary, ComplexityRecord};

/// Destination for run reports.
pub trait ReportSink: Send + Sync {
    /// Persist the per-model summaries into `dir`; returns the written file.
    fn summary(&self, summaries: &[BatchSummary], dir: &Path) -> ForgeResult<PathBuf>;

    /// Persist per-program checker metrics into `dir`; returns the written file.
    fn complexity(&self, records: &[ComplexityRecord], dir: &Path) -> ForgeResult<PathBuf>;
}

/// Writes reports as pretty-printed JSON.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonReportSink;

impl JsonReportSink {
    fn write<T: Serialize + ?Sized>(value: &T, dir: &Path, name: &str) -> ForgeResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_string_pretty(value)?)?;
        Ok(path)
    }
}

impl ReportSink for JsonReportSink {
    fn summary(&self, summaries: &[BatchSummary], dir: &Path) -> ForgeResult<PathBuf> {
        Self::write(summaries, dir, "performance.json")
    }

    fn complexity(&self, records: &[ComplexityRecord], dir: &Path) -> ForgeResult<PathBuf> {
        Self::write(records, dir, "complexity.json")
    }
}
