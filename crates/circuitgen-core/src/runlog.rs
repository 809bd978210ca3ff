//! Append-only run log shared by every worker of a batch.
//!
//! Workers only get `append`. All writes go through one mutex so multi-line
//! messages from concurrent candidates never interleave.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;

use crate::error::ForgeResult;

enum LogSink {
    File { file: File, path: PathBuf },
    Memory(Vec<String>),
    Disabled,
}

/// Timestamped append-only log.
pub struct RunLog {
    sink: Mutex<LogSink>,
}

impl RunLog {
    /// Open (or create) a log file in append mode, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> ForgeResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            sink: Mutex::new(LogSink::File { file, path }),
        })
    }

    /// Log kept in memory, for tests and dry runs.
    pub fn memory() -> Self {
        Self {
            sink: Mutex::new(LogSink::Memory(Vec::new())),
        }
    }

    /// Log that discards everything.
    pub fn disabled() -> Self {
        Self {
            sink: Mutex::new(LogSink::Disabled),
        }
    }

    /// Append one entry. Write failures are reported through `tracing` and
    /// otherwise ignored; losing a log line must not fail a candidate.
    pub fn append(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let mut entry = format!("[{}] {}", stamp, message);
        if !entry.ends_with('\n') {
            entry.push('\n');
        }

        let mut sink = self.sink.lock();
        match &mut *sink {
            LogSink::File { file, path } => {
                if let Err(e) = file.write_all(entry.as_bytes()) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to write run log");
                }
            }
            LogSink::Memory(lines) => lines.push(entry),
            LogSink::Disabled => {}
        }
    }

    /// Entries held by a memory log. File and disabled logs return nothing.
    pub fn entries(&self) -> Vec<String> {
        match &*self.sink.lock() {
            LogSink::Memory(lines) => lines.clone(),
            _ => Vec::new(),
        }
    }

    pub fn path(&self) -> Option<PathBuf> {
        match &*self.sink.lock() {
            LogSink::File { path, .. } => Some(path.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for RunLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLog").field("path", &self.path()).finish()
    }
}
