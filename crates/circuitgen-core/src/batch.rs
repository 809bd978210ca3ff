//! Concurrent batch runner.
//!
//! Runs N candidates with at most W in flight. Outcomes are collected in
//! completion order. A candidate that errors or panics is logged and left out
//! of the report; it never takes the batch down with it.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::candidate::{CandidateProcessor, CandidateSettings, Collaborators, OutputDirs};
use crate::error::ForgeResult;
use crate::runlog::RunLog;
use crate::types::{CandidateOutcome, GenerationTask, PromptRef};

/// Outcomes of one batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Completed candidates, in completion order.
    pub outcomes: Vec<CandidateOutcome>,
    /// Units that returned an error or panicked.
    pub crashed: usize,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &CandidateOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn success_count(&self) -> usize {
        self.succeeded().count()
    }

    /// Candidates that needed at least one repair cycle.
    pub fn fixed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.was_fixed).count()
    }

    pub fn saved_paths(&self) -> Vec<PathBuf> {
        self.outcomes
            .iter()
            .filter_map(|o| o.saved_path.clone())
            .collect()
    }

    /// Distinct error messages across the batch, first seen first, at most `limit`.
    pub fn distinct_errors(&self, limit: usize) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for message in self.outcomes.iter().flat_map(|o| o.errors.iter()) {
            if seen.len() == limit {
                break;
            }
            if !seen.contains(message) {
                seen.push(message.clone());
            }
        }
        seen
    }
}

/// Bounded-concurrency executor for candidate processing.
#[derive(Clone, Copy, Debug)]
pub struct BatchRunner {
    workers: usize,
}

impl BatchRunner {
    /// `workers` is clamped to at least one.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `count` units built by `make`, at most `workers` at a time.
    pub async fn run<F, Fut>(&self, count: usize, log: &RunLog, mut make: F) -> BatchReport
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = ForgeResult<CandidateOutcome>> + Send + 'static,
    {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut set = JoinSet::new();

        for index in 0..count {
            let semaphore = Arc::clone(&semaphore);
            let unit = make(index);
            set.spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                (index, unit.await)
            });
        }

        let mut report = BatchReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => {
                    debug!(file = %outcome.task.filename, status = %outcome.status, "candidate finished");
                    report.outcomes.push(outcome);
                }
                Ok((index, Err(e))) => {
                    error!(index, error = %e, "candidate aborted");
                    log.append(format!("Task {} generated an exception: {}", index + 1, e));
                    report.crashed += 1;
                }
                Err(e) => {
                    error!(error = %e, "candidate task panicked");
                    log.append(format!("A generation task crashed: {}", e));
                    report.crashed += 1;
                }
            }
        }

        report.elapsed = started.elapsed();
        report
    }

    /// Run `count` candidates for `model` with the given prompt.
    pub async fn run_candidates(
        &self,
        model: &str,
        count: usize,
        prompt: &PromptRef,
        settings: Arc<CandidateSettings>,
        dirs: Arc<OutputDirs>,
        collab: &Collaborators,
    ) -> BatchReport {
        self.run(count, &collab.log, |index| {
            CandidateProcessor::new(
                GenerationTask::new(index, model),
                prompt.clone(),
                Arc::clone(&settings),
                Arc::clone(&dirs),
                collab.clone(),
            )
            .process()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForgeError;
    use crate::types::{CandidateStatus, GenerationStats};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn outcome(index: usize, was_fixed: bool, errors: &[&str]) -> CandidateOutcome {
        CandidateOutcome {
            task: GenerationTask::new(index, "m"),
            status: CandidateStatus::Succeeded,
            saved_path: Some(PathBuf::from(format!("/out/{}.py", index))),
            stats: GenerationStats::default(),
            errors: errors.iter().map(|e| e.to_string()).collect::<BTreeSet<_>>(),
            was_fixed,
        }
    }

    #[tokio::test]
    async fn in_flight_units_never_exceed_workers() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let log = RunLog::memory();

        let report = BatchRunner::new(3)
            .run(12, &log, |index| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(outcome(index, false, &[]))
                }
            })
            .await;

        assert_eq!(report.outcomes.len(), 12);
        assert_eq!(report.crashed, 0);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn errors_and_panics_are_excluded() {
        let log = RunLog::memory();
        let report = BatchRunner::new(4)
            .run(6, &log, |index| async move {
                match index {
                    2 => Err(ForgeError::Checker("sandbox unavailable".into())),
                    4 => panic!("candidate blew up"),
                    _ => Ok(outcome(index, false, &[])),
                }
            })
            .await;

        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(report.crashed, 2);
        let mut indices: Vec<_> = report.outcomes.iter().map(|o| o.task.index).collect();
        indices.sort();
        assert_eq!(indices, vec![0, 1, 3, 5]);
        let entries = log.entries().join("");
        assert!(entries.contains("Task 3 generated an exception"));
        assert!(entries.contains("crashed"));
    }

    #[tokio::test]
    async fn outcomes_arrive_in_completion_order() {
        let log = RunLog::memory();
        let report = BatchRunner::new(4)
            .run(4, &log, |index| async move {
                tokio::time::sleep(Duration::from_millis(30 * (4 - index as u64))).await;
                Ok(outcome(index, false, &[]))
            })
            .await;

        let order: Vec<_> = report.outcomes.iter().map(|o| o.task.index).collect();
        assert_eq!(order, vec![3, 2, 1, 0]);
    }

    #[tokio::test]
    async fn empty_batch_and_zero_workers() {
        let runner = BatchRunner::new(0);
        assert_eq!(runner.workers(), 1);
        let report = runner
            .run(0, &RunLog::disabled(), |index| async move {
                Ok(outcome(index, false, &[]))
            })
            .await;
        assert!(report.outcomes.is_empty());
        assert_eq!(report.crashed, 0);
    }

    #[test]
    fn report_helpers() {
        let report = BatchReport {
            outcomes: vec![
                outcome(0, true, &["b", "a"]),
                outcome(1, false, &[]),
                outcome(2, true, &["a", "c"]),
            ],
            crashed: 0,
            elapsed: Duration::ZERO,
        };
        assert_eq!(report.fixed_count(), 2);
        assert_eq!(report.success_count(), 3);
        assert_eq!(report.saved_paths().len(), 3);
        assert_eq!(report.distinct_errors(10), vec!["a", "b", "c"]);
        assert_eq!(report.distinct_errors(2), vec!["a", "b"]);
    }
}
