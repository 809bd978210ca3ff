//! Candidate state machine — one program through generation, validation and repair.
//!
//! ```text
//! Generated ──► CompileChecked ──► [RunCheck] ──► Succeeded
//!                     │
//!                     ▼
//!               FixLoop (≤ n_fixing_cycles)
//!                     ├──► fix compiles ──► [RunCheck, result ignored] ──► Succeeded
//!                     └──► exhausted / fixer silent ──► Failed
//! ```
//!
//! Repair targets compilation only. Once a program compiles, an execution
//! failure is recorded and logged but never changes the classification.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::artifacts::save_text;
use crate::checker::ProgramChecker;
use crate::error::{ForgeError, ForgeResult};
use crate::model::{ModelClient, ModelRequest};
use crate::runlog::RunLog;
use crate::templates::PromptTemplates;
use crate::types::{
    CandidateOutcome, CandidateStatus, CheckMode, GenerationStats, GenerationTask, Language,
    PromptRef, ReasoningEffort, Usage, FIXING_PROMPT,
};

// ── Settings ───────────────────────────────────────────────────────────

/// Immutable per-batch candidate settings.
#[derive(Clone, Debug)]
pub struct CandidateSettings {
    pub language: Language,
    pub reasoning_effort: ReasoningEffort,
    pub n_fixing_cycles: usize,
    /// Directory bundled prompt references and the fixing template resolve against.
    pub prompt_dir: PathBuf,
    /// Log annotated code of failing programs.
    pub verbose: bool,
    pub mode: CheckMode,
}

impl CandidateSettings {
    /// Copy of these settings with a different check mode.
    pub fn with_mode(&self, mode: CheckMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }
}

/// Where a batch saves its programs.
#[derive(Clone, Debug)]
pub struct OutputDirs {
    pub generated: PathBuf,
    pub failed: PathBuf,
}

impl OutputDirs {
    pub fn new(generated: impl Into<PathBuf>, failed: impl Into<PathBuf>) -> Self {
        Self {
            generated: generated.into(),
            failed: failed.into(),
        }
    }
}

// ── Collaborators ──────────────────────────────────────────────────────

/// External services a candidate talks to, plus the shared run log.
#[derive(Clone)]
pub struct Collaborators {
    pub model_client: Arc<dyn ModelClient>,
    pub checker: Arc<dyn ProgramChecker>,
    pub templates: Arc<dyn PromptTemplates>,
    pub log: Arc<RunLog>,
}

impl Collaborators {
    pub fn new(
        model_client: Arc<dyn ModelClient>,
        checker: Arc<dyn ProgramChecker>,
        templates: Arc<dyn PromptTemplates>,
        log: Arc<RunLog>,
    ) -> Self {
        Self {
            model_client,
            checker,
            templates,
            log,
        }
    }

    /// Same services writing to a different log.
    pub fn with_log(&self, log: Arc<RunLog>) -> Self {
        Self {
            log,
            ..self.clone()
        }
    }
}

// ── Phases ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
enum Phase {
    Generated,
    CompileChecked,
    FixLoop { cycle: usize },
    Succeeded,
    Failed,
    Ungenerated,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generated => write!(f, "generated"),
            Self::CompileChecked => write!(f, "compile-checked"),
            Self::FixLoop { cycle } => write!(f, "fix-loop[{}]", cycle),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Ungenerated => write!(f, "ungenerated"),
        }
    }
}

enum Verdict {
    Passed,
    Failed(String),
}

// ── Processor ──────────────────────────────────────────────────────────

/// Drives one [`GenerationTask`] to a [`CandidateOutcome`].
///
/// All state is owned by the processor; only the run log is shared.
pub struct CandidateProcessor {
    task: GenerationTask,
    prompt: PromptRef,
    settings: Arc<CandidateSettings>,
    dirs: Arc<OutputDirs>,
    collab: Collaborators,
    started: Instant,
    stats: GenerationStats,
    errors: BTreeSet<String>,
}

impl CandidateProcessor {
    pub fn new(
        task: GenerationTask,
        prompt: PromptRef,
        settings: Arc<CandidateSettings>,
        dirs: Arc<OutputDirs>,
        collab: Collaborators,
    ) -> Self {
        Self {
            task,
            prompt,
            settings,
            dirs,
            collab,
            started: Instant::now(),
            stats: GenerationStats::default(),
            errors: BTreeSet::new(),
        }
    }

    pub fn task(&self) -> &GenerationTask {
        &self.task
    }

    /// Run the state machine to completion.
    ///
    /// Failures of the program itself are part of the outcome. An `Err` means
    /// a collaborator or the filesystem broke underneath the candidate.
    pub async fn process(mut self) -> ForgeResult<CandidateOutcome> {
        self.started = Instant::now();

        let Some(code) = self.generate().await? else {
            self.transition(Phase::Ungenerated, "no program produced");
            return Ok(self.finish(CandidateStatus::Ungenerated, None, false));
        };
        self.transition(Phase::Generated, "program received");

        match self.compile_check(&code).await? {
            Verdict::Passed => {
                self.transition(Phase::CompileChecked, "compiled on first attempt");
                if self.settings.mode.runs_program() {
                    self.run_check(&code).await?;
                }
                let path = self.save_to(&self.dirs.generated, &code).await?;
                self.transition(Phase::Succeeded, &format!("saved to {}", path.display()));
                Ok(self.finish(CandidateStatus::Succeeded, Some(path), false))
            }
            Verdict::Failed(error) => {
                self.transition(Phase::CompileChecked, "compile check failed, entering fix loop");
                match self.fix_loop(&code, error).await? {
                    Some(fixed) => {
                        let path = self.save_to(&self.dirs.generated, &fixed).await?;
                        self.transition(Phase::Succeeded, &format!("repaired, saved to {}", path.display()));
                        Ok(self.finish(CandidateStatus::Succeeded, Some(path), true))
                    }
                    None => {
                        let path = self.save_to(&self.dirs.failed, &code).await?;
                        self.transition(Phase::Failed, &format!("original kept at {}", path.display()));
                        Ok(self.finish(CandidateStatus::Failed, None, true))
                    }
                }
            }
        }
    }

    /// Ask the model for the initial program.
    async fn generate(&mut self) -> ForgeResult<Option<String>> {
        let prompt_path = self.prompt.resolve(&self.settings.prompt_dir);
        let prompt = match self.collab.templates.load(&prompt_path).await {
            Ok(prompt) => prompt,
            Err(e @ ForgeError::MissingTemplate(_)) => {
                self.log(format!("{}: cannot generate, {}", self.task.filename, e));
                self.record(&e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let request = ModelRequest::code(&self.task.model, prompt, self.settings.reasoning_effort);
        match self.collab.model_client.ask(&request).await {
            Ok(completion) if completion.has_content() => {
                self.stats.update(&completion.usage);
                self.log_usage("Generation", &completion.usage);
                Ok(Some(completion.text))
            }
            Ok(_) => {
                self.generation_failed("model returned no code".to_string());
                Ok(None)
            }
            Err(e) => {
                self.generation_failed(e.to_string());
                Ok(None)
            }
        }
    }

    fn generation_failed(&mut self, reason: String) {
        let error = ForgeError::Generation(reason);
        self.log(format!("Failed to generate {}. {}", self.task.filename, error));
        self.record(&error);
    }

    async fn compile_check(&mut self, code: &str) -> ForgeResult<Verdict> {
        self.log(format!("--- {} Testing generated {} ---", self.elapsed(), self.task.filename));
        let report = self.collab.checker.compile(code, self.settings.language).await?;
        self.stats.metrics.compilation = report.metrics.clone();

        if report.passed() {
            self.stats.quality_score = Some(report.quality_score().unwrap_or(0.0));
            return Ok(Verdict::Passed);
        }

        self.stats.quality_score = Some(0.0);
        let error = report.error_text().to_string();
        self.log(format!("{} compilation failed:\n{}", self.task.filename, error));
        self.record(&ForgeError::Compilation(error.clone()));
        if self.settings.verbose {
            self.log_code(&report.annotated_code);
        }
        Ok(Verdict::Failed(error))
    }

    /// Execution check. The returned flag is informational only.
    async fn run_check(&mut self, code: &str) -> ForgeResult<bool> {
        self.log(format!("--- {} Running {} ---", self.elapsed(), self.task.filename));
        let report = self.collab.checker.run(code, self.settings.language).await?;
        self.stats.execution_quality_score = Some(report.quality_score().unwrap_or(0.0));
        self.stats.metrics.execution = report.metrics.clone();
        self.log(format!(
            "{} metrics: {}",
            self.task.filename,
            serde_json::to_string(&self.stats.metrics).unwrap_or_default()
        ));

        if report.passed() {
            self.log(format!("{} ran successfully.", self.task.filename));
            return Ok(true);
        }

        let error = report.error_text().to_string();
        self.log(format!("{} runtime error:\n{}", self.task.filename, error));
        self.record(&ForgeError::Runtime(error));
        if self.settings.verbose {
            self.log_code(&report.annotated_code);
        }
        Ok(false)
    }

    /// Up to `n_fixing_cycles` repair attempts. `None` means no compiling program.
    async fn fix_loop(&mut self, code: &str, error: String) -> ForgeResult<Option<String>> {
        let template = self.settings.prompt_dir.join(FIXING_PROMPT);
        let mut current_code = code.to_string();
        let mut current_error = error;

        for cycle in 1..=self.settings.n_fixing_cycles {
            self.transition(Phase::FixLoop { cycle }, "requesting fix");

            let prompt = match self
                .collab
                .templates
                .render(
                    &template,
                    &[
                        ("faulty_code", current_code.as_str()),
                        ("error_message", current_error.as_str()),
                    ],
                )
                .await
            {
                Ok(prompt) => prompt,
                Err(e @ ForgeError::MissingTemplate(_)) => {
                    self.log(format!("{}: fixing aborted, {}", self.task.filename, e));
                    self.record(&e);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };

            let request = ModelRequest::code(&self.task.model, prompt, self.settings.reasoning_effort);
            let fixed = match self.collab.model_client.ask(&request).await {
                Ok(completion) if completion.has_content() => completion,
                Ok(_) => {
                    self.fixer_failed(cycle, "model returned no code".to_string());
                    return Ok(None);
                }
                Err(e) => {
                    self.fixer_failed(cycle, e.to_string());
                    return Ok(None);
                }
            };

            self.stats.update(&fixed.usage);
            self.log_usage(&format!("Fixing (cycle {})", cycle), &fixed.usage);

            match self.compile_check(&fixed.text).await? {
                Verdict::Failed(next_error) => {
                    self.log(format!(
                        "Fixed {} (cycle {}) still fails to compile.",
                        self.task.filename, cycle
                    ));
                    current_code = fixed.text;
                    current_error = next_error;
                }
                Verdict::Passed => {
                    self.log(format!(
                        "Fixed {} (cycle {}) compiled successfully.",
                        self.task.filename, cycle
                    ));
                    if self.settings.mode.runs_program() && !self.run_check(&fixed.text).await? {
                        self.log(format!(
                            "{} keeps its repaired program despite the runtime error.",
                            self.task.filename
                        ));
                    }
                    return Ok(Some(fixed.text));
                }
            }
        }

        self.log(format!(
            "{}: {} fixing cycle(s) exhausted without a compiling program.",
            self.task.filename, self.settings.n_fixing_cycles
        ));
        Ok(None)
    }

    fn fixer_failed(&mut self, cycle: usize, reason: String) {
        let error = ForgeError::Generation(reason);
        self.log(format!(
            "Fixing cycle {} failed for {}: {}",
            cycle, self.task.filename, error
        ));
        self.record(&error);
    }

    async fn save_to(&self, dir: &Path, code: &str) -> ForgeResult<PathBuf> {
        let path = dir.join(&self.task.filename);
        save_text(code, &path).await?;
        Ok(path)
    }

    fn finish(
        self,
        status: CandidateStatus,
        saved_path: Option<PathBuf>,
        was_fixed: bool,
    ) -> CandidateOutcome {
        CandidateOutcome {
            task: self.task,
            status,
            saved_path,
            stats: self.stats,
            errors: self.errors,
            was_fixed,
        }
    }

    fn record(&mut self, error: &ForgeError) {
        self.errors.insert(error.to_string());
    }

    fn elapsed(&self) -> String {
        format!("[Elapsed: {:.2}s]", self.started.elapsed().as_secs_f64())
    }

    fn transition(&self, phase: Phase, detail: &str) {
        debug!(file = %self.task.filename, %phase, "{}", detail);
        self.log(format!("{} {} -> {}: {}", self.elapsed(), self.task.filename, phase, detail));
    }

    fn log(&self, message: String) {
        self.collab.log.append(message);
    }

    fn log_usage(&self, stage: &str, usage: &Usage) {
        self.log(format!(
            "{} {} Cost: ${:.6} | Tokens (In/Out/Total): {}/{}/{}",
            self.task.filename,
            stage,
            usage.cost,
            usage.prompt_tokens,
            usage.completion_tokens,
            usage.total_tokens
        ));
    }

    fn log_code(&self, code: &str) {
        self.log(format!(
            "--- {} Code ---\n{}\n-----------------------",
            self.task.filename, code
        ));
    }
}
