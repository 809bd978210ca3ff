//! Combination sampler — assemble random ordered selections of programs.
//!
//! A selection is an ordered tuple of distinct program indices with a length
//! in `[min_files, max_files]`. Each tuple is attempted at most once, so two
//! selections with the same members in a different order are different
//! combinations. The target is capped at the number of such tuples, and the
//! loop gives up after a long run of draws that produced nothing new.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ForgeError, ForgeResult};
use crate::runlog::RunLog;
use crate::types::Language;

/// Minimum number of consecutive unproductive draws before giving up.
pub const MIN_STALL_LIMIT: usize = 1000;

/// Unproductive draws allowed per targeted combination.
pub const STALL_FACTOR: usize = 25;

/// Trait for combining several programs into one.
#[async_trait]
pub trait Assembler: Send + Sync {
    /// Combine `selected`, in order, into a program written to `output`.
    async fn assemble(
        &self,
        selected: &[PathBuf],
        output: &Path,
        index: usize,
        language: Language,
    ) -> ForgeResult<()>;

    /// Name of this assembler for logging.
    fn name(&self) -> &str;
}

/// Ordered selections of `k` out of `n`: `n! / (n - k)!`, saturating.
pub fn permutation_count(n: usize, k: usize) -> u128 {
    if k > n {
        return 0;
    }
    ((n - k + 1)..=n).fold(1u128, |acc, x| acc.saturating_mul(x as u128))
}

/// Number of distinct ordered selections with a length in `[min_k, max_k]`.
pub fn max_unique_combinations(n: usize, min_k: usize, max_k: usize) -> u128 {
    (min_k..=max_k).fold(0u128, |acc, k| acc.saturating_add(permutation_count(n, k)))
}

#[derive(Clone, Debug)]
pub struct SamplerSettings {
    pub min_files: usize,
    /// Clamped to the number of programs.
    pub max_files: usize,
    pub requested: usize,
    pub language: Language,
}

/// What a sampling run produced.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplerReport {
    pub requested: usize,
    /// `min(requested, max_unique_combinations)`.
    pub target: usize,
    pub generated: usize,
    pub failed: usize,
    pub artifacts: Vec<PathBuf>,
    /// True when the stall limit ended the run before the target was reached.
    pub stopped_early: bool,
}

/// Draws unique ordered selections and hands them to an [`Assembler`].
#[derive(Debug)]
pub struct CombinationSampler {
    programs: Vec<PathBuf>,
    settings: SamplerSettings,
}

impl CombinationSampler {
    /// Validate the bounds against the program list.
    pub fn new(programs: Vec<PathBuf>, settings: SamplerSettings) -> ForgeResult<Self> {
        let n = programs.len();
        if n == 0 {
            return Err(ForgeError::Config("no programs to assemble".into()));
        }
        if settings.min_files == 0 {
            return Err(ForgeError::Config("min_files must be at least 1".into()));
        }
        if settings.max_files < settings.min_files {
            return Err(ForgeError::Config(format!(
                "max_files ({}) must not be less than min_files ({})",
                settings.max_files, settings.min_files
            )));
        }
        if settings.min_files > n {
            return Err(ForgeError::Config(format!(
                "min_files ({}) exceeds the {} available program(s)",
                settings.min_files, n
            )));
        }
        let settings = SamplerSettings {
            max_files: settings.max_files.min(n),
            ..settings
        };
        Ok(Self { programs, settings })
    }

    pub fn settings(&self) -> &SamplerSettings {
        &self.settings
    }

    pub fn capacity(&self) -> u128 {
        max_unique_combinations(
            self.programs.len(),
            self.settings.min_files,
            self.settings.max_files,
        )
    }

    pub fn target(&self) -> usize {
        let capacity = usize::try_from(self.capacity()).unwrap_or(usize::MAX);
        self.settings.requested.min(capacity)
    }

    /// Assemble up to `target()` unique selections.
    ///
    /// `output_for(i)` names the i-th successful artifact. Assembler failures
    /// are counted and logged, and never stop the run.
    pub async fn run<R, F>(
        &self,
        assembler: &dyn Assembler,
        rng: &mut R,
        output_for: F,
        log: &RunLog,
    ) -> SamplerReport
    where
        R: Rng + Send,
        F: Fn(usize) -> PathBuf + Send + Sync,
    {
        let n = self.programs.len();
        let target = self.target();
        let mut report = SamplerReport {
            requested: self.settings.requested,
            target,
            ..Default::default()
        };

        if target < self.settings.requested {
            warn!(
                requested = self.settings.requested,
                target, "requested more combinations than exist"
            );
            log.append(format!(
                "Requested {} combinations, but only {} unique combinations exist for {} programs. Capping target to {}.",
                self.settings.requested, target, n, target
            ));
        }

        let stall_limit = MIN_STALL_LIMIT.max(target.saturating_mul(STALL_FACTOR));
        let mut seen: HashSet<Vec<usize>> = HashSet::new();
        let mut unproductive = 0usize;

        while report.generated < target && unproductive < stall_limit {
            let k = rng.gen_range(self.settings.min_files..=self.settings.max_files);
            let picked = index::sample(rng, n, k).into_vec();
            if !seen.insert(picked.clone()) {
                unproductive += 1;
                continue;
            }

            let selected: Vec<PathBuf> = picked.iter().map(|&i| self.programs[i].clone()).collect();
            let output = output_for(report.generated);
            match assembler
                .assemble(&selected, &output, report.generated, self.settings.language)
                .await
            {
                Ok(()) => {
                    report.generated += 1;
                    unproductive = 0;
                    report.artifacts.push(output);
                }
                Err(e) => {
                    report.failed += 1;
                    unproductive += 1;
                    warn!(assembler = assembler.name(), error = %e, "combination failed");
                    log.append(format!(
                        "Failed to assemble combination {}: {}",
                        describe(&selected),
                        e
                    ));
                }
            }
        }

        if report.generated < target {
            report.stopped_early = true;
            warn!(generated = report.generated, target, "sampler stalled");
            log.append(format!(
                "Stopped after {} consecutive draws without a new combination; generated {}/{}.",
                unproductive, report.generated, target
            ));
        }

        info!(generated = report.generated, failed = report.failed, "assembly finished");
        log.append(format!(
            "Assembly finished: {} generated, {} failed.",
            report.generated, report.failed
        ));
        report
    }
}

fn describe(selected: &[PathBuf]) -> String {
    let names: Vec<String> = selected
        .iter()
        .map(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string())
        })
        .collect();
    format!("[{}]", names.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingAssembler;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn programs(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("/gen/p{}.py", i))).collect()
    }

    fn settings(min_files: usize, max_files: usize, requested: usize) -> SamplerSettings {
        SamplerSettings {
            min_files,
            max_files,
            requested,
            language: Language::Guppy,
        }
    }

    fn out(i: usize) -> PathBuf {
        PathBuf::from(format!("/asm/assembled_circuit_{}.py", i))
    }

    #[test]
    fn permutation_counts() {
        assert_eq!(permutation_count(5, 2), 20);
        assert_eq!(permutation_count(5, 3), 60);
        assert_eq!(permutation_count(3, 4), 0);
        assert_eq!(permutation_count(4, 0), 1);
        assert_eq!(max_unique_combinations(5, 2, 3), 80);
        assert_eq!(permutation_count(200, 200), u128::MAX);
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        assert!(CombinationSampler::new(vec![], settings(1, 2, 1)).is_err());
        assert!(CombinationSampler::new(programs(3), settings(0, 2, 1)).is_err());
        assert!(CombinationSampler::new(programs(3), settings(3, 2, 1)).is_err());
        assert!(CombinationSampler::new(programs(3), settings(4, 5, 1)).is_err());
    }

    #[test]
    fn max_files_is_clamped_to_program_count() {
        let sampler = CombinationSampler::new(programs(3), settings(1, 5, 100)).unwrap();
        assert_eq!(sampler.settings().max_files, 3);
        assert_eq!(sampler.capacity(), 3 + 6 + 6);
        assert_eq!(sampler.target(), 15);
    }

    #[tokio::test]
    async fn target_is_capped_and_reached() {
        let sampler = CombinationSampler::new(programs(5), settings(2, 3, 500)).unwrap();
        let assembler = RecordingAssembler::new();
        let log = RunLog::memory();
        let mut rng = StdRng::seed_from_u64(7);

        let report = sampler.run(&assembler, &mut rng, out, &log).await;

        assert_eq!(report.target, 80);
        assert_eq!(report.generated, 80);
        assert!(!report.stopped_early);
        assert_eq!(report.artifacts.len(), 80);
        assert_eq!(report.artifacts[0], out(0));
        assert!(log.entries()[0].contains("Capping target to 80"));

        let calls = assembler.calls();
        let unique: HashSet<_> = calls.iter().cloned().collect();
        assert_eq!(unique.len(), calls.len());
    }

    #[tokio::test]
    async fn selections_are_distinct_and_within_bounds() {
        let sampler = CombinationSampler::new(programs(6), settings(2, 4, 40)).unwrap();
        let assembler = RecordingAssembler::new();
        let mut rng = StdRng::seed_from_u64(11);

        sampler.run(&assembler, &mut rng, out, &RunLog::disabled()).await;

        for selection in assembler.calls() {
            assert!((2..=4).contains(&selection.len()));
            let members: HashSet<_> = selection.iter().collect();
            assert_eq!(members.len(), selection.len());
        }
    }

    #[tokio::test]
    async fn failures_are_counted_and_skipped() {
        let rejected = PathBuf::from("/gen/p0.py");
        let sampler = CombinationSampler::new(programs(4), settings(1, 2, 8)).unwrap();
        let assembler = RecordingAssembler::new().failing_when(move |s| s.contains(&rejected));
        let log = RunLog::memory();
        let mut rng = StdRng::seed_from_u64(3);

        let report = sampler.run(&assembler, &mut rng, out, &log).await;

        // 9 of the 16 selections avoid p0.
        assert_eq!(report.generated, 8);
        assert!(report.failed > 0);
        assert_eq!(report.generated + report.failed, assembler.calls().len());
        assert!(log
            .entries()
            .iter()
            .any(|e| e.contains("Failed to assemble combination") && e.contains("p0.py")));
    }

    #[tokio::test]
    async fn always_failing_assembler_stops_early() {
        let sampler = CombinationSampler::new(programs(3), settings(1, 2, 5)).unwrap();
        let assembler = RecordingAssembler::new().failing_when(|_| true);
        let mut rng = StdRng::seed_from_u64(1);

        let report = sampler.run(&assembler, &mut rng, out, &RunLog::disabled()).await;

        assert_eq!(report.generated, 0);
        assert!(report.stopped_early);
        // Every distinct selection is attempted at most once.
        assert!(report.failed <= 9);
        assert!(report.artifacts.is_empty());
    }

    #[tokio::test]
    async fn same_seed_same_selections() {
        let sampler = CombinationSampler::new(programs(5), settings(1, 3, 20)).unwrap();
        let first = RecordingAssembler::new();
        let second = RecordingAssembler::new();

        sampler
            .run(&first, &mut StdRng::seed_from_u64(42), out, &RunLog::disabled())
            .await;
        sampler
            .run(&second, &mut StdRng::seed_from_u64(42), out, &RunLog::disabled())
            .await;

        assert_eq!(first.calls(), second.calls());
    }

    #[tokio::test]
    async fn zero_requested_does_nothing() {
        let sampler = CombinationSampler::new(programs(2), settings(1, 2, 0)).unwrap();
        let assembler = RecordingAssembler::new();
        let report = sampler
            .run(&assembler, &mut StdRng::seed_from_u64(0), out, &RunLog::disabled())
            .await;
        assert_eq!(report.generated, 0);
        assert!(!report.stopped_early);
        assert!(assembler.calls().is_empty());
    }
}
