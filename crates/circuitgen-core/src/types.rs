//! Core types for the generation pipeline.
//!
//! Defines target languages, check modes, generation tasks, per-candidate
//! statistics and outcomes, prompt references and training rounds.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Bundled template used for the first generation request.
pub const GENERATION_PROMPT: &str = "generation_prompt.txt";

/// Bundled template used for fixing requests.
pub const FIXING_PROMPT: &str = "fixing_prompt_template.txt";

// ── Language ───────────────────────────────────────────────────────────

/// Circuit language the generated programs are written in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Guppy,
    Qiskit,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guppy => "guppy",
            Self::Qiskit => "qiskit",
        }
    }

    /// Directory holding this language's bundled prompt templates.
    pub fn default_prompt_dir(&self) -> &'static str {
        match self {
            Self::Guppy => "Guppy_prompt_templates",
            Self::Qiskit => "Qiskit_prompt_templates",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "guppy" => Ok(Self::Guppy),
            "qiskit" => Ok(Self::Qiskit),
            other => Err(format!("unknown language '{}' (expected guppy or qiskit)", other)),
        }
    }
}

// ── Reasoning Effort ───────────────────────────────────────────────────

/// Reasoning effort forwarded to the model provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    #[default]
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasoningEffort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown reasoning effort '{}'", other)),
        }
    }
}

// ── Check Mode ─────────────────────────────────────────────────────────

/// How far a candidate is validated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckMode {
    /// Dry run: compile check only, used by training rounds.
    CompileOnly,
    /// Compile check followed by an execution check.
    CompileAndRun,
}

impl CheckMode {
    pub fn runs_program(&self) -> bool {
        matches!(self, Self::CompileAndRun)
    }
}

// ── Generation Task ────────────────────────────────────────────────────

/// One batch slot: which model generates which output file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationTask {
    pub index: usize,
    pub model: String,
    pub filename: String,
}

impl GenerationTask {
    pub fn new(index: usize, model: impl Into<String>) -> Self {
        let model = model.into();
        let filename = format!("{}output{}.py", sanitize_model(&model), index + 1);
        Self {
            index,
            model,
            filename,
        }
    }
}

/// Model identifiers contain `/`; this makes them usable as path components.
pub fn sanitize_model(model: &str) -> String {
    model.replace('/', "_")
}

// ── Usage and Metrics ──────────────────────────────────────────────────

/// Cost and token usage reported by a collaborator for one request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub cost: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub quality_score: Option<f64>,
}

/// Collaborator-defined metrics for one check.
pub type Metrics = serde_json::Map<String, serde_json::Value>;

/// Extract the `quality_score` field from checker metrics.
pub fn quality_score(metrics: &Metrics) -> Option<f64> {
    metrics.get("quality_score").and_then(|v| v.as_f64())
}

/// Metrics of the latest compile check and the latest execution check.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateMetrics {
    pub compilation: Metrics,
    pub execution: Metrics,
}

// ── Generation Stats ───────────────────────────────────────────────────

/// Per-candidate accumulators.
///
/// Cost and token counters only ever grow. Counters are accumulated
/// independently, so `total_tokens` is not reconciled with the other two.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    pub cost: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Score of the last compile check.
    pub quality_score: Option<f64>,
    /// Score of the last execution check.
    pub execution_quality_score: Option<f64>,
    pub metrics: CandidateMetrics,
}

impl GenerationStats {
    /// Fold one usage report in. A supplied quality score replaces the old one.
    pub fn update(&mut self, usage: &Usage) {
        self.cost += usage.cost;
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total_tokens;
        if let Some(score) = usage.quality_score {
            self.quality_score = Some(score);
        }
    }
}

// ── Candidate Outcome ──────────────────────────────────────────────────

/// Terminal state of a candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateStatus {
    /// A program was saved to the generated directory.
    Succeeded,
    /// Repair was exhausted or aborted; the original code went to the failed directory.
    Failed,
    /// The model never produced a program.
    Ungenerated,
}

impl std::fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Ungenerated => write!(f, "ungenerated"),
        }
    }
}

/// Result of processing one candidate.
#[derive(Clone, Debug)]
pub struct CandidateOutcome {
    pub task: GenerationTask,
    pub status: CandidateStatus,
    /// Where the program was saved, on success.
    pub saved_path: Option<PathBuf>,
    pub stats: GenerationStats,
    /// Distinct error messages seen while processing.
    pub errors: BTreeSet<String>,
    /// True iff at least one compile failure happened before the terminal state.
    pub was_fixed: bool,
}

impl CandidateOutcome {
    pub fn is_success(&self) -> bool {
        self.status == CandidateStatus::Succeeded
    }
}

// ── Prompt Reference ───────────────────────────────────────────────────

/// Where a generation prompt lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptRef {
    /// A template name inside the prompt directory.
    Bundled(String),
    /// An absolute path, e.g. a prompt rewritten during training.
    Path(PathBuf),
}

impl PromptRef {
    /// Classify a user-supplied reference: absolute paths stay paths.
    pub fn parse(reference: &str) -> Self {
        let path = Path::new(reference);
        if path.is_absolute() {
            Self::Path(path.to_path_buf())
        } else {
            Self::Bundled(reference.to_string())
        }
    }

    pub fn resolve(&self, prompt_dir: &Path) -> PathBuf {
        match self {
            Self::Bundled(name) => prompt_dir.join(name),
            Self::Path(path) => path.clone(),
        }
    }
}

impl Default for PromptRef {
    fn default() -> Self {
        Self::Bundled(GENERATION_PROMPT.to_string())
    }
}

impl std::fmt::Display for PromptRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bundled(name) => write!(f, "{}", name),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

// ── Training Round ─────────────────────────────────────────────────────

/// Measurement of one training round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingRound {
    pub index: usize,
    pub prompt: PromptRef,
    /// Candidates that needed at least one repair cycle.
    pub fixed: usize,
    /// Fraction of the configured batch size that needed repair, in [0, 1].
    pub fix_ratio: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_filename_is_derived_from_model_and_index() {
        let task = GenerationTask::new(0, "deepseek/deepseek-chat");
        assert_eq!(task.filename, "deepseek_deepseek-chatoutput1.py");
        assert_eq!(GenerationTask::new(9, "m").filename, "moutput10.py");
    }

    #[test]
    fn stats_update_adds_counters_and_overwrites_quality() {
        let mut stats = GenerationStats::default();
        stats.update(&Usage {
            cost: 0.5,
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            quality_score: Some(0.9),
        });
        stats.update(&Usage {
            cost: 0.25,
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 7,
            quality_score: Some(0.3),
        });
        assert!((stats.cost - 0.75).abs() < 1e-12);
        assert_eq!(stats.prompt_tokens, 11);
        assert_eq!(stats.completion_tokens, 6);
        // Not reconciled with prompt + completion.
        assert_eq!(stats.total_tokens, 22);
        assert_eq!(stats.quality_score, Some(0.3));
    }

    #[test]
    fn stats_update_without_score_keeps_previous() {
        let mut stats = GenerationStats {
            quality_score: Some(0.7),
            ..Default::default()
        };
        stats.update(&Usage::default());
        assert_eq!(stats.quality_score, Some(0.7));
    }

    #[test]
    fn prompt_ref_resolution() {
        let dir = Path::new("/prompts");
        assert_eq!(
            PromptRef::default().resolve(dir),
            PathBuf::from("/prompts/generation_prompt.txt")
        );
        let abs = PromptRef::parse("/runs/r1/improved_prompt.txt");
        assert_eq!(abs.resolve(dir), PathBuf::from("/runs/r1/improved_prompt.txt"));
        assert_eq!(
            PromptRef::parse("custom.txt"),
            PromptRef::Bundled("custom.txt".into())
        );
    }

    #[test]
    fn quality_score_reads_numeric_field() {
        let mut metrics = Metrics::new();
        assert_eq!(quality_score(&metrics), None);
        metrics.insert("quality_score".into(), serde_json::json!(0.42));
        assert_eq!(quality_score(&metrics), Some(0.42));
    }

    #[test]
    fn language_parses_case_insensitively() {
        assert_eq!("Qiskit".parse::<Language>(), Ok(Language::Qiskit));
        assert!("cirq".parse::<Language>().is_err());
        assert_eq!(Language::Guppy.default_prompt_dir(), "Guppy_prompt_templates");
    }
}
