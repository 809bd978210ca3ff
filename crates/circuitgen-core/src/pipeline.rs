//! Pipeline — runs every configured model through training, production and
//! assembly.
//!
//! ```text
//! for each model:
//!   Training (compile-only rounds, optional) ──► accepted prompt
//!   Production batch (compile + run)         ──► generated/, failed_programs/
//!   Stats aggregation                        ──► summary in execution.log
//!   Combination sampling                     ──► assembled/
//! after all models:
//!   Report sinks                             ──► plots/
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use rand::Rng;
use tracing::{info, warn};

use crate::batch::{BatchReport, BatchRunner};
use crate::candidate::Collaborators;
use crate::checker::ProgramChecker;
use crate::config::ForgeConfig;
use crate::error::ForgeResult;
use crate::layout::RunLayout;
use crate::model::ModelClient;
use crate::report::ReportSink;
use crate::runlog::RunLog;
use crate::sampler::{Assembler, CombinationSampler, SamplerReport, SamplerSettings};
use crate::stats::{BatchSummary, ComplexityRecord};
use crate::templates::PromptTemplates;
use crate::training::{TrainingLoop, TrainingOutcome, TrainingReport};
use crate::types::{sanitize_model, CheckMode, PromptRef};

/// External services the pipeline depends on.
#[derive(Clone)]
pub struct Services {
    pub model_client: Arc<dyn ModelClient>,
    pub checker: Arc<dyn ProgramChecker>,
    pub templates: Arc<dyn PromptTemplates>,
    pub assembler: Arc<dyn Assembler>,
    pub reports: Arc<dyn ReportSink>,
}

/// What happened to one model.
#[derive(Debug)]
pub struct ModelRun {
    pub model: String,
    pub training: TrainingReport,
    pub summary: BatchSummary,
    pub saved: Vec<PathBuf>,
    /// `None` when assembly was skipped.
    pub assembly: Option<SamplerReport>,
}

/// What happened to the whole run.
#[derive(Debug)]
pub struct RunReport {
    pub run_dir: PathBuf,
    pub models: Vec<ModelRun>,
}

impl RunReport {
    /// True when at least one model saved at least one program.
    pub fn is_productive(&self) -> bool {
        self.models.iter().any(|m| m.summary.is_productive())
    }
}

pub struct Pipeline {
    config: ForgeConfig,
    services: Services,
    layout: RunLayout,
}

impl Pipeline {
    /// `config` must already be validated.
    pub fn new(config: ForgeConfig, services: Services) -> Self {
        let layout = RunLayout::new(&config.output_dir, &config.run_id());
        Self {
            config,
            services,
            layout,
        }
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    /// Run all models in order.
    ///
    /// Returns an error only for failures that make the run meaningless,
    /// such as an unwritable run directory or a missing original prompt
    /// during training.
    pub async fn run<R: Rng + Send>(&self, rng: &mut R) -> ForgeResult<RunReport> {
        self.layout.create().await?;
        let log = Arc::new(RunLog::open(self.layout.execution_log())?);
        self.log_header(&log);

        let collab = Collaborators::new(
            Arc::clone(&self.services.model_client),
            Arc::clone(&self.services.checker),
            Arc::clone(&self.services.templates),
            Arc::clone(&log),
        );
        let runner = BatchRunner::new(self.config.max_workers());

        let mut models = Vec::with_capacity(self.config.models.len());
        let mut complexity = Vec::new();

        for model in &self.config.models {
            info!(model = %model, "processing model");
            log.append(format!("\n=== Model: {} ===", model));

            let training = self.train(model, &collab, runner).await?;
            let batch = self.produce(model, &training.accepted, &collab, runner).await;

            let summary = BatchSummary::from_batch(model, self.config.n_programs(), &batch);
            log.append(summary.render());
            if !summary.is_productive() {
                warn!(model = %model, "no program survived production");
            }
            complexity.extend(ComplexityRecord::collect(model, &batch));

            let saved = batch.saved_paths();
            let assembly = self.assemble(model, &saved, rng, &log).await;

            models.push(ModelRun {
                model: model.clone(),
                training,
                summary,
                saved,
                assembly,
            });
        }

        self.write_reports(&models, &complexity, &log);
        info!(run_dir = %self.layout.root().display(), "run finished");

        Ok(RunReport {
            run_dir: self.layout.root().to_path_buf(),
            models,
        })
    }

    fn log_header(&self, log: &RunLog) {
        let c = &self.config;
        log.append(format!(
            "Run {} | language: {} | models: {} | programs: {} | fixing cycles: {} | workers: {}",
            self.layout.root().display(),
            c.language,
            c.models.join(", "),
            c.n_programs(),
            c.n_fixing_cycles,
            c.max_workers()
        ));
        log.append(format!(
            "Prompt improvement: {} | training n: {} | threshold: {} | improver: {} | reasoning effort: {}",
            c.improve_prompt, c.training_n, c.training_threshold, c.improver_model, c.reasoning_effort
        ));
    }

    /// Training runs only when prompt improvement is enabled.
    async fn train(
        &self,
        model: &str,
        collab: &Collaborators,
        runner: BatchRunner,
    ) -> ForgeResult<TrainingReport> {
        let start = self.config.start_prompt();
        if !self.config.improve_prompt {
            return Ok(TrainingReport {
                accepted: start,
                rounds: Vec::new(),
                outcome: TrainingOutcome::Skipped,
            });
        }

        let settings = self.config.training_settings();
        let candidate = self.config.candidate_settings(CheckMode::CompileOnly);
        let report = TrainingLoop::new(model, &settings, &candidate, collab, runner, &self.layout)
            .run(start)
            .await?;

        collab.log.append(format!(
            "Training for {} finished ({:?}) after {} round(s); using prompt {}",
            model,
            report.outcome,
            report.rounds.len(),
            report.accepted
        ));
        Ok(report)
    }

    async fn produce(
        &self,
        model: &str,
        prompt: &PromptRef,
        collab: &Collaborators,
        runner: BatchRunner,
    ) -> BatchReport {
        let settings = self.config.candidate_settings(CheckMode::CompileAndRun);
        match self.services.templates.load(&prompt.resolve(&settings.prompt_dir)).await {
            Ok(text) => collab.log.append(format!(
                "Production prompt ({}):\n{}\n------------------------------",
                prompt, text
            )),
            Err(e) => collab.log.append(format!("Production prompt unavailable: {}", e)),
        }

        runner
            .run_candidates(
                model,
                self.config.n_programs(),
                prompt,
                Arc::new(settings),
                Arc::new(self.layout.production_dirs()),
                collab,
            )
            .await
    }

    async fn assemble<R: Rng + Send>(
        &self,
        model: &str,
        saved: &[PathBuf],
        rng: &mut R,
        log: &RunLog,
    ) -> Option<SamplerReport> {
        if saved.is_empty() || self.config.n_assemble == 0 {
            log.append(format!("Skipping assembly for {}: nothing to assemble.", model));
            return None;
        }

        let settings = SamplerSettings {
            min_files: 1,
            max_files: self.config.circuits_per_assembly().min(saved.len()),
            requested: self.config.n_assemble,
            language: self.config.language,
        };
        let sampler = match CombinationSampler::new(saved.to_vec(), settings) {
            Ok(sampler) => sampler,
            Err(e) => {
                warn!(model, error = %e, "assembly skipped");
                log.append(format!("Skipping assembly for {}: {}", model, e));
                return None;
            }
        };

        let dir = self.layout.assembled_dir();
        let prefix = sanitize_model(model);
        log.append(format!("\n=== Assembly: {} ===", model));
        let report = sampler
            .run(
                self.services.assembler.as_ref(),
                rng,
                |i| dir.join(format!("{}_{}.py", prefix, i)),
                log,
            )
            .await;
        Some(report)
    }

    fn write_reports(&self, models: &[ModelRun], complexity: &[ComplexityRecord], log: &RunLog) {
        let plots = self.layout.plots_dir();
        let summaries: Vec<BatchSummary> = models.iter().map(|m| m.summary.clone()).collect();

        let results = [
            self.services.reports.summary(&summaries, &plots.join("performance")),
            self.services.reports.complexity(complexity, &plots.join("complexity")),
        ];
        for result in results {
            match result {
                Ok(path) => log.append(format!("Report written to {}", path.display())),
                Err(e) => {
                    warn!(error = %e, "report not written");
                    log.append(format!("Failed to write report: {}", e));
                }
            }
        }
    }
}
