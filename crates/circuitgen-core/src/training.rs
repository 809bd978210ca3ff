//! Training loop — adapt the generation prompt before production.
//!
//! Each round runs a compile-only batch and measures the fraction of
//! candidates that needed repair. A ratio under the threshold accepts the
//! current prompt. Otherwise the prompt is rewritten by the improver model
//! from the errors just observed, and the next round tries the rewrite.
//! When rounds run out, the prompt with the strictly lowest ratio wins.

use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::artifacts::save_text;
use crate::batch::BatchRunner;
use crate::candidate::{CandidateSettings, Collaborators, OutputDirs};
use crate::error::{ForgeError, ForgeResult};
use crate::layout::RunLayout;
use crate::model::ModelRequest;
use crate::runlog::RunLog;
use crate::types::{CheckMode, PromptRef, TrainingRound};

/// Highest round index; rounds run `0..=MAX_ROUNDS`.
pub const MAX_ROUNDS: usize = 3;

/// Distinct error messages handed to the improver.
pub const MAX_IMPROVEMENT_ERRORS: usize = 10;

/// Meta-prompt template, resolved against the common prompt directory.
pub const IMPROVEMENT_TEMPLATE: &str = "prompt_improvement_template.txt";

/// File each rewritten prompt is saved to inside its round directory.
pub const IMPROVED_PROMPT_FILE: &str = "improved_prompt.txt";

const ERROR_SEPARATOR: &str = "\n---\n";

/// Training parameters.
#[derive(Clone, Debug)]
pub struct TrainingSettings {
    /// Batch size per round; zero or negative disables training.
    pub training_n: i64,
    pub threshold: f64,
    pub improve_prompt: bool,
    pub improver_model: String,
    pub common_prompt_dir: std::path::PathBuf,
    pub max_rounds: usize,
}

/// How training ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingOutcome {
    /// `training_n` was not positive; no round ran.
    Skipped,
    /// The prompt of `round` went under the threshold.
    Converged { round: usize },
    /// No round converged. `best_round` is `None` when no round beat the
    /// starting ratio of 1.0, in which case the starting prompt is kept.
    Exhausted { best_round: Option<usize> },
}

/// Result of training one model.
#[derive(Clone, Debug)]
pub struct TrainingReport {
    pub accepted: PromptRef,
    pub rounds: Vec<TrainingRound>,
    pub outcome: TrainingOutcome,
}

struct Best {
    prompt: PromptRef,
    ratio: f64,
    round: Option<usize>,
}

/// Training for one model.
pub struct TrainingLoop<'a> {
    model: &'a str,
    settings: &'a TrainingSettings,
    candidate: Arc<CandidateSettings>,
    collab: &'a Collaborators,
    runner: BatchRunner,
    layout: &'a RunLayout,
}

impl<'a> TrainingLoop<'a> {
    /// Training always validates in compile-only mode, whatever `candidate` says.
    pub fn new(
        model: &'a str,
        settings: &'a TrainingSettings,
        candidate: &CandidateSettings,
        collab: &'a Collaborators,
        runner: BatchRunner,
        layout: &'a RunLayout,
    ) -> Self {
        Self {
            model,
            settings,
            candidate: Arc::new(candidate.with_mode(CheckMode::CompileOnly)),
            collab,
            runner,
            layout,
        }
    }

    /// Run the rounds and choose the prompt for production.
    ///
    /// Only a missing original prompt or a broken round directory is an
    /// error; improver failures are logged and the previous prompt reused.
    pub async fn run(&self, start: PromptRef) -> ForgeResult<TrainingReport> {
        if self.settings.training_n <= 0 {
            info!(model = self.model, "training disabled");
            return Ok(TrainingReport {
                accepted: start,
                rounds: Vec::new(),
                outcome: TrainingOutcome::Skipped,
            });
        }
        let n = self.settings.training_n as usize;

        let mut prompt = start.clone();
        let mut best = Best {
            prompt: start,
            ratio: 1.0,
            round: None,
        };
        let mut rounds = Vec::new();

        for round in 0..=self.settings.max_rounds {
            let round_dir = self.layout.training_round_dir(self.model, round);
            let dirs = Arc::new(OutputDirs::new(
                round_dir.join("generated"),
                round_dir.join("failed"),
            ));
            tokio::fs::create_dir_all(&dirs.generated).await?;
            tokio::fs::create_dir_all(&dirs.failed).await?;

            let log = Arc::new(RunLog::open(self.layout.training_round_log(self.model, round))?);
            log.append(format!(
                "[Training Round {}] Model: {} | Prompt: {}",
                round, self.model, prompt
            ));
            log.append(format!("Reasoning Effort: {}", self.candidate.reasoning_effort));

            let collab = self.collab.with_log(Arc::clone(&log));
            let batch = self
                .runner
                .run_candidates(self.model, n, &prompt, Arc::clone(&self.candidate), dirs, &collab)
                .await;

            let fixed = batch.fixed_count();
            let fix_ratio = fixed as f64 / n as f64;
            info!(model = self.model, round, fixed, fix_ratio, "training round complete");
            log.append(format!(
                "Round {} result: {}/{} programs needed fixing (ratio {:.2}).",
                round, fixed, n, fix_ratio
            ));
            rounds.push(TrainingRound {
                index: round,
                prompt: prompt.clone(),
                fixed,
                fix_ratio,
            });

            if fix_ratio < best.ratio {
                best = Best {
                    prompt: prompt.clone(),
                    ratio: fix_ratio,
                    round: Some(round),
                };
            }

            if fix_ratio < self.settings.threshold {
                log.append(format!(
                    "Training converged. Proceeding with prompt: {}",
                    prompt
                ));
                return Ok(TrainingReport {
                    accepted: prompt,
                    rounds,
                    outcome: TrainingOutcome::Converged { round },
                });
            }

            if !self.settings.improve_prompt || round >= self.settings.max_rounds {
                log.append("Max rounds reached or improvement disabled.");
                break;
            }

            log.append("Threshold not met. Improving prompt...");
            let errors = batch.distinct_errors(MAX_IMPROVEMENT_ERRORS);
            prompt = self.improve(&prompt, &round_dir, &errors, &log).await?;
        }

        log_fallback(self.model, &best);
        Ok(TrainingReport {
            accepted: best.prompt,
            rounds,
            outcome: TrainingOutcome::Exhausted {
                best_round: best.round,
            },
        })
    }

    /// Rewrite `current`, falling back to it when the rewrite fails.
    async fn improve(
        &self,
        current: &PromptRef,
        round_dir: &Path,
        errors: &[String],
        log: &RunLog,
    ) -> ForgeResult<PromptRef> {
        let original_path = current.resolve(&self.candidate.prompt_dir);
        let original = self.collab.templates.load(&original_path).await?;

        match self.request_rewrite(&original, round_dir, errors, log).await {
            Ok(improved) => Ok(improved),
            Err(e) => {
                warn!(model = self.model, error = %e, "keeping previous prompt");
                log.append(format!("Error improving prompt: {}", e));
                Ok(current.clone())
            }
        }
    }

    async fn request_rewrite(
        &self,
        original: &str,
        round_dir: &Path,
        errors: &[String],
        log: &RunLog,
    ) -> ForgeResult<PromptRef> {
        let template = self.settings.common_prompt_dir.join(IMPROVEMENT_TEMPLATE);
        let errors_text = errors.join(ERROR_SEPARATOR);
        let meta_prompt = self
            .collab
            .templates
            .render(
                &template,
                &[
                    ("language", self.candidate.language.as_str()),
                    ("original_content", original),
                    ("errors_text", &errors_text),
                ],
            )
            .await
            .map_err(|e| ForgeError::Improvement(e.to_string()))?;

        info!(improver = %self.settings.improver_model, errors = errors.len(), "requesting prompt rewrite");
        let request = ModelRequest::text(
            &self.settings.improver_model,
            meta_prompt,
            self.candidate.reasoning_effort,
        );
        let completion = self
            .collab
            .model_client
            .ask(&request)
            .await
            .map_err(|e| ForgeError::Improvement(e.to_string()))?;
        if !completion.has_content() {
            return Err(ForgeError::Improvement("improver returned no content".into()));
        }

        let path = std::path::absolute(round_dir.join(IMPROVED_PROMPT_FILE))?;
        save_text(&completion.text, &path)
            .await
            .map_err(|e| ForgeError::Improvement(e.to_string()))?;
        log.append(format!(
            "\n--- Improved Prompt ({}) ---\n{}\n------------------------------",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            completion.text
        ));
        Ok(PromptRef::Path(path))
    }
}

fn log_fallback(model: &str, best: &Best) {
    match best.round {
        Some(round) => info!(model, round, ratio = best.ratio, "using best prompt from training"),
        None => info!(model, "no round beat the starting prompt"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{FsPromptTemplates, PromptTemplates};
    use crate::testing::{completion, write_prompt_templates, ScriptedChecker, ScriptedModelClient};
    use crate::types::{Language, ReasoningEffort, GENERATION_PROMPT};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        dir: tempfile::TempDir,
        candidate: CandidateSettings,
        training: TrainingSettings,
        layout: RunLayout,
    }

    fn fixture(training_n: i64, threshold: f64, improve_prompt: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let prompt_dir = dir.path().join("prompts");
        let common_dir = dir.path().join("common");
        write_prompt_templates(&prompt_dir, &common_dir).unwrap();
        Fixture {
            candidate: CandidateSettings {
                language: Language::Guppy,
                reasoning_effort: ReasoningEffort::High,
                n_fixing_cycles: 1,
                prompt_dir,
                verbose: false,
                mode: CheckMode::CompileAndRun,
            },
            training: TrainingSettings {
                training_n,
                threshold,
                improve_prompt,
                improver_model: "improver/model".into(),
                common_prompt_dir: common_dir,
                max_rounds: MAX_ROUNDS,
            },
            layout: RunLayout::new(dir.path().join("out"), "run"),
            dir,
        }
    }

    /// The bundled prompt yields broken programs that a fix repairs; any
    /// improved prompt yields programs that compile straight away.
    fn learning_model() -> ScriptedModelClient {
        ScriptedModelClient::new(|request, _| {
            let text = if request.prompt.starts_with("IMPROVE") {
                "Better prompt: emit GOOD circuits."
            } else if request.prompt.starts_with("FIX") {
                "fixed GOOD"
            } else if request.prompt.contains("Better prompt") {
                "GOOD from the start"
            } else {
                "broken"
            };
            Ok(completion(text))
        })
    }

    async fn train(
        fx: &Fixture,
        model: Arc<ScriptedModelClient>,
        templates: Arc<dyn PromptTemplates>,
    ) -> ForgeResult<TrainingReport> {
        let collab = Collaborators::new(
            model,
            Arc::new(ScriptedChecker::compiles_when_contains("GOOD", 1.0)),
            templates,
            Arc::new(RunLog::disabled()),
        );
        TrainingLoop::new(
            "vendor/model",
            &fx.training,
            &fx.candidate,
            &collab,
            BatchRunner::new(2),
            &fx.layout,
        )
        .run(PromptRef::default())
        .await
    }

    #[tokio::test]
    async fn non_positive_training_n_skips() {
        let fx = fixture(0, 0.5, true);
        let model = Arc::new(learning_model());
        let report = train(&fx, model.clone(), Arc::new(FsPromptTemplates)).await.unwrap();
        assert_eq!(report.outcome, TrainingOutcome::Skipped);
        assert_eq!(report.accepted, PromptRef::default());
        assert!(report.rounds.is_empty());
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn converges_in_round_zero_without_rewrite() {
        let fx = fixture(4, 0.5, true);
        let model = Arc::new(ScriptedModelClient::always("GOOD"));
        let report = train(&fx, model.clone(), Arc::new(FsPromptTemplates)).await.unwrap();

        assert_eq!(report.outcome, TrainingOutcome::Converged { round: 0 });
        assert_eq!(report.accepted, PromptRef::default());
        assert_eq!(report.rounds.len(), 1);
        assert_eq!(report.rounds[0].fix_ratio, 0.0);
        assert_eq!(model.count_matching("IMPROVE"), 0);
        assert_eq!(model.call_count(), 4);

        let round_dir = fx.layout.training_round_dir("vendor/model", 0);
        assert!(round_dir.join("generated").is_dir());
        assert!(round_dir.join("round_0_execution.log").is_file());
    }

    #[tokio::test]
    async fn rewritten_prompt_converges_next_round() {
        let fx = fixture(3, 0.5, true);
        let model = Arc::new(learning_model());
        let report = train(&fx, model.clone(), Arc::new(FsPromptTemplates)).await.unwrap();

        assert_eq!(report.outcome, TrainingOutcome::Converged { round: 1 });
        assert_eq!(report.rounds.len(), 2);
        assert_eq!(report.rounds[0].fixed, 3);
        assert_eq!(report.rounds[0].fix_ratio, 1.0);
        assert_eq!(report.rounds[1].fix_ratio, 0.0);

        let expected = fx
            .layout
            .training_round_dir("vendor/model", 0)
            .join(IMPROVED_PROMPT_FILE);
        let PromptRef::Path(accepted) = &report.accepted else {
            panic!("expected a rewritten prompt, got {:?}", report.accepted);
        };
        assert!(accepted.is_absolute());
        assert!(accepted.ends_with(expected.strip_prefix(fx.dir.path()).unwrap()));
        assert_eq!(
            std::fs::read_to_string(accepted).unwrap(),
            "Better prompt: emit GOOD circuits."
        );

        let improve = model
            .requests()
            .into_iter()
            .find(|r| r.prompt.starts_with("IMPROVE"))
            .unwrap();
        assert_eq!(improve.model, "improver/model");
        assert!(improve.prompt.contains("IMPROVE this guppy prompt"));
        assert!(improve.prompt.contains("Write a quantum circuit."));
        assert!(improve.prompt.contains("Compilation Error:"));
    }

    #[tokio::test]
    async fn disabled_improvement_falls_back_after_one_round() {
        let fx = fixture(2, 0.5, false);
        let model = Arc::new(learning_model());
        let report = train(&fx, model.clone(), Arc::new(FsPromptTemplates)).await.unwrap();

        assert_eq!(report.outcome, TrainingOutcome::Exhausted { best_round: None });
        assert_eq!(report.rounds.len(), 1);
        assert_eq!(report.accepted, PromptRef::default());
        assert_eq!(model.count_matching("IMPROVE"), 0);
    }

    #[tokio::test]
    async fn round_zero_converges_with_improvement_disabled() {
        let fx = fixture(3, 0.5, false);
        let model = Arc::new(ScriptedModelClient::always("GOOD"));
        let report = train(&fx, model.clone(), Arc::new(FsPromptTemplates)).await.unwrap();

        assert_eq!(report.outcome, TrainingOutcome::Converged { round: 0 });
        assert_eq!(report.accepted, PromptRef::default());
        assert_eq!(report.rounds.len(), 1);
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn disabled_improvement_keeps_partially_fixed_round() {
        // Half the programs need a fix: better than the 1.0 baseline, above the threshold.
        let fx = fixture(4, 0.25, false);
        let generated = AtomicUsize::new(0);
        let model = Arc::new(ScriptedModelClient::new(move |request, _| {
            if request.prompt.starts_with("FIX") {
                Ok(completion("fixed GOOD"))
            } else if generated.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(completion("GOOD"))
            } else {
                Ok(completion("broken"))
            }
        }));
        let report = train(&fx, model.clone(), Arc::new(FsPromptTemplates)).await.unwrap();

        assert_eq!(report.rounds.len(), 1);
        assert_eq!(report.rounds[0].fixed, 2);
        assert_eq!(report.rounds[0].fix_ratio, 0.5);
        assert_eq!(report.outcome, TrainingOutcome::Exhausted { best_round: Some(0) });
        assert_eq!(report.accepted, PromptRef::default());
        assert_eq!(model.count_matching("IMPROVE"), 0);
    }

    #[tokio::test]
    async fn best_prompt_wins_on_strict_improvement_only() {
        // A threshold of zero can never be met, so all rounds run.
        let fx = fixture(2, 0.0, true);
        let model = Arc::new(learning_model());
        let report = train(&fx, model.clone(), Arc::new(FsPromptTemplates)).await.unwrap();

        assert_eq!(report.rounds.len(), MAX_ROUNDS + 1);
        assert_eq!(model.count_matching("IMPROVE"), MAX_ROUNDS);
        // Round 1 reaches 0.0; later rounds tie and do not replace it.
        assert_eq!(report.outcome, TrainingOutcome::Exhausted { best_round: Some(1) });
        assert_eq!(report.accepted, report.rounds[1].prompt);
    }

    #[tokio::test]
    async fn improver_failure_reuses_previous_prompt() {
        let fx = fixture(2, 0.5, true);
        let model = Arc::new(ScriptedModelClient::new(|request, _| {
            if request.prompt.starts_with("IMPROVE") {
                Err(ForgeError::Model("improver offline".into()))
            } else if request.prompt.starts_with("FIX") {
                Ok(completion("fixed GOOD"))
            } else {
                Ok(completion("broken"))
            }
        }));
        let report = train(&fx, model.clone(), Arc::new(FsPromptTemplates)).await.unwrap();

        assert_eq!(report.rounds.len(), MAX_ROUNDS + 1);
        assert!(report.rounds.iter().all(|r| r.prompt == PromptRef::default()));
        assert_eq!(report.outcome, TrainingOutcome::Exhausted { best_round: None });

        let log = std::fs::read_to_string(fx.layout.training_round_log("vendor/model", 0)).unwrap();
        assert!(log.contains("Error improving prompt"));
        assert!(log.contains("improver offline"));
    }

    #[tokio::test]
    async fn missing_improvement_template_is_recoverable() {
        let fx = fixture(1, 0.5, true);
        std::fs::remove_file(fx.training.common_prompt_dir.join(IMPROVEMENT_TEMPLATE)).unwrap();
        let model = Arc::new(learning_model());
        let report = train(&fx, model.clone(), Arc::new(FsPromptTemplates)).await.unwrap();

        assert_eq!(model.count_matching("IMPROVE"), 0);
        assert_eq!(report.accepted, PromptRef::default());
        assert_eq!(report.rounds.len(), MAX_ROUNDS + 1);
    }

    /// Serves the generation prompt a fixed number of times, then reports it missing.
    struct VanishingPrompt {
        loads: AtomicUsize,
        available: usize,
    }

    #[async_trait::async_trait]
    impl PromptTemplates for VanishingPrompt {
        async fn render(&self, path: &Path, substitutions: &[(&str, &str)]) -> ForgeResult<String> {
            if path.ends_with(GENERATION_PROMPT)
                && self.loads.fetch_add(1, Ordering::SeqCst) >= self.available
            {
                return Err(ForgeError::MissingTemplate(PathBuf::from(path)));
            }
            FsPromptTemplates.render(path, substitutions).await
        }
    }

    #[tokio::test]
    async fn missing_original_prompt_is_fatal() {
        let fx = fixture(2, 0.5, true);
        let templates = Arc::new(VanishingPrompt {
            loads: AtomicUsize::new(0),
            available: 2,
        });
        let err = train(&fx, Arc::new(learning_model()), templates)
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::MissingTemplate(p) if p.ends_with(GENERATION_PROMPT)));
    }
}
