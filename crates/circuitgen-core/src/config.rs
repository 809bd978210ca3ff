//! Run configuration.
//!
//! Loaded from an optional YAML file, overlaid by command-line flags and then
//! validated once. The validated value is never mutated afterwards.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::candidate::CandidateSettings;
use crate::error::{ForgeError, ForgeResult};
use crate::layout::default_run_id;
use crate::training::{TrainingSettings, MAX_ROUNDS};
use crate::types::{CheckMode, Language, PromptRef, ReasoningEffort, GENERATION_PROMPT};

/// Main pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgeConfig {
    /// Run directory name; a timestamp when unset
    #[serde(default)]
    pub run_name: Option<String>,

    /// Circuit language
    #[serde(default)]
    pub language: Language,

    /// Parent directory of all runs
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Language prompt templates; the language's bundled directory when unset
    #[serde(default)]
    pub prompt_dir: Option<PathBuf>,

    /// Templates shared by all languages
    #[serde(default = "default_common_prompt_dir")]
    pub common_prompt_dir: PathBuf,

    /// Starting generation prompt, a template name or an absolute path
    #[serde(default = "default_prompt")]
    pub prompt: String,

    /// Models to run, in order
    #[serde(default = "default_models")]
    pub models: Vec<String>,

    /// Production batch size per model
    #[serde(default = "default_n_programs")]
    pub n_programs: i64,

    /// Repair attempts per candidate
    #[serde(default = "default_n_fixing_cycles")]
    pub n_fixing_cycles: usize,

    /// Candidates in flight at once
    #[serde(default = "default_max_workers")]
    pub max_workers: i64,

    /// Combinations to assemble per model
    #[serde(default = "default_n_assemble")]
    pub n_assemble: usize,

    /// Largest number of programs per combination
    #[serde(default = "default_n_circuits_per_assembly")]
    pub n_circuits_per_assembly: i64,

    /// Log annotated code of failing programs
    #[serde(default)]
    pub verbose: bool,

    /// Training batch size; zero or negative skips training
    #[serde(default = "default_training_n")]
    pub training_n: i64,

    /// Fix ratio a prompt must stay under to be accepted
    #[serde(default = "default_training_threshold")]
    pub training_threshold: f64,

    /// Model that rewrites prompts
    #[serde(default = "default_improver_model")]
    pub improver_model: String,

    #[serde(default)]
    pub reasoning_effort: ReasoningEffort,

    /// Run the training phase and allow prompt rewrites
    #[serde(default)]
    pub improve_prompt: bool,

    /// External checker and assembler commands
    #[serde(default)]
    pub tools: ToolCommands,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            run_name: None,
            language: Language::default(),
            output_dir: default_output_dir(),
            prompt_dir: None,
            common_prompt_dir: default_common_prompt_dir(),
            prompt: default_prompt(),
            models: default_models(),
            n_programs: default_n_programs(),
            n_fixing_cycles: default_n_fixing_cycles(),
            max_workers: default_max_workers(),
            n_assemble: default_n_assemble(),
            n_circuits_per_assembly: default_n_circuits_per_assembly(),
            verbose: false,
            training_n: default_training_n(),
            training_threshold: default_training_threshold(),
            improver_model: default_improver_model(),
            reasoning_effort: ReasoningEffort::default(),
            improve_prompt: false,
            tools: ToolCommands::default(),
        }
    }
}

/// Commands for the external checker and assembler
///
/// Each is a program followed by its fixed arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCommands {
    #[serde(default = "default_checker_command")]
    pub checker: Vec<String>,

    #[serde(default = "default_assembler_command")]
    pub assembler: Vec<String>,

    /// Per-invocation timeout in seconds
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

impl Default for ToolCommands {
    fn default() -> Self {
        Self {
            checker: default_checker_command(),
            assembler: default_assembler_command(),
            timeout_secs: default_tool_timeout(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("local_saved_circuits")
}

fn default_common_prompt_dir() -> PathBuf {
    PathBuf::from("Common_prompt_templates")
}

fn default_prompt() -> String {
    GENERATION_PROMPT.to_string()
}

fn default_models() -> Vec<String> {
    vec!["deepseek/deepseek-chat".to_string()]
}

fn default_n_programs() -> i64 {
    20
}

fn default_n_fixing_cycles() -> usize {
    2
}

fn default_max_workers() -> i64 {
    10
}

fn default_n_assemble() -> usize {
    100
}

fn default_n_circuits_per_assembly() -> i64 {
    2
}

fn default_training_n() -> i64 {
    5
}

fn default_training_threshold() -> f64 {
    0.5
}

fn default_improver_model() -> String {
    "anthropic/claude-sonnet-4-5".to_string()
}

fn default_checker_command() -> Vec<String> {
    vec!["python3".into(), "tools/check_circuit.py".into()]
}

fn default_assembler_command() -> Vec<String> {
    vec!["python3".into(), "tools/assemble_circuits.py".into()]
}

fn default_tool_timeout() -> u64 {
    300
}

impl ForgeConfig {
    pub fn from_yaml_str(text: &str) -> ForgeResult<Self> {
        serde_yaml::from_str(text).map_err(|e| ForgeError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> ForgeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ForgeError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// Clamp out-of-range values with a warning and reject unusable ones.
    pub fn validated(mut self) -> ForgeResult<Self> {
        if self.n_circuits_per_assembly < 1 {
            warn!(value = self.n_circuits_per_assembly, "n_circuits_per_assembly must be at least 1, using 1");
            self.n_circuits_per_assembly = 1;
        }
        if self.max_workers < 1 {
            warn!(value = self.max_workers, "max_workers must be at least 1, using 1");
            self.max_workers = 1;
        }
        if self.n_programs < 0 {
            warn!(value = self.n_programs, "n_programs cannot be negative, using 0");
            self.n_programs = 0;
        }
        if self.models.is_empty() {
            return Err(ForgeError::Config("at least one model is required".into()));
        }
        if !self.training_threshold.is_finite() {
            return Err(ForgeError::Config(format!(
                "training_threshold must be a number, got {}",
                self.training_threshold
            )));
        }
        if self.tools.checker.is_empty() || self.tools.assembler.is_empty() {
            return Err(ForgeError::Config("tool commands must not be empty".into()));
        }
        Ok(self)
    }

    pub fn n_programs(&self) -> usize {
        usize::try_from(self.n_programs).unwrap_or(0)
    }

    pub fn max_workers(&self) -> usize {
        usize::try_from(self.max_workers).unwrap_or(1).max(1)
    }

    pub fn circuits_per_assembly(&self) -> usize {
        usize::try_from(self.n_circuits_per_assembly).unwrap_or(1).max(1)
    }

    pub fn prompt_dir(&self) -> PathBuf {
        self.prompt_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.language.default_prompt_dir()))
    }

    pub fn start_prompt(&self) -> PromptRef {
        PromptRef::parse(&self.prompt)
    }

    pub fn run_id(&self) -> String {
        self.run_name.clone().unwrap_or_else(default_run_id)
    }

    pub fn candidate_settings(&self, mode: CheckMode) -> CandidateSettings {
        CandidateSettings {
            language: self.language,
            reasoning_effort: self.reasoning_effort,
            n_fixing_cycles: self.n_fixing_cycles,
            prompt_dir: self.prompt_dir(),
            verbose: self.verbose,
            mode,
        }
    }

    pub fn training_settings(&self) -> TrainingSettings {
        TrainingSettings {
            training_n: self.training_n,
            threshold: self.training_threshold,
            improve_prompt: self.improve_prompt,
            improver_model: self.improver_model.clone(),
            common_prompt_dir: self.common_prompt_dir.clone(),
            max_rounds: MAX_ROUNDS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ForgeConfig::default();
        assert_eq!(config.language, Language::Guppy);
        assert_eq!(config.models, vec!["deepseek/deepseek-chat"]);
        assert_eq!(config.n_programs(), 20);
        assert_eq!(config.n_fixing_cycles, 2);
        assert_eq!(config.max_workers(), 10);
        assert_eq!(config.n_assemble, 100);
        assert_eq!(config.circuits_per_assembly(), 2);
        assert_eq!(config.training_n, 5);
        assert_eq!(config.training_threshold, 0.5);
        assert_eq!(config.improver_model, "anthropic/claude-sonnet-4-5");
        assert_eq!(config.reasoning_effort, ReasoningEffort::High);
        assert!(!config.improve_prompt);
        assert_eq!(config.prompt_dir(), PathBuf::from("Guppy_prompt_templates"));
        assert_eq!(config.start_prompt(), PromptRef::default());
    }

    #[test]
    fn yaml_overrides_and_defaults_mix() {
        let config = ForgeConfig::from_yaml_str(
            "language: qiskit\nmodels: [a/b, c/d]\nn_programs: 3\nimprove_prompt: true\n",
        )
        .unwrap();
        assert_eq!(config.language, Language::Qiskit);
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.n_programs(), 3);
        assert!(config.improve_prompt);
        assert_eq!(config.max_workers(), 10);
        assert_eq!(config.prompt_dir(), PathBuf::from("Qiskit_prompt_templates"));
    }

    #[test]
    fn validated_clamps_out_of_range_values() {
        let config = ForgeConfig {
            n_circuits_per_assembly: 0,
            max_workers: -3,
            n_programs: -1,
            ..Default::default()
        }
        .validated()
        .unwrap();
        assert_eq!(config.n_circuits_per_assembly, 1);
        assert_eq!(config.max_workers, 1);
        assert_eq!(config.n_programs, 0);
    }

    #[test]
    fn validated_rejects_unusable_values() {
        let no_models = ForgeConfig {
            models: vec![],
            ..Default::default()
        };
        assert!(matches!(no_models.validated(), Err(ForgeError::Config(_))));

        let nan = ForgeConfig {
            training_threshold: f64::NAN,
            ..Default::default()
        };
        assert!(nan.validated().is_err());
    }

    #[test]
    fn bad_yaml_is_a_config_error() {
        let err = ForgeConfig::from_yaml_str("n_programs: [1, 2]").unwrap_err();
        assert!(matches!(err, ForgeError::Config(_)));
    }

    #[test]
    fn derived_settings() {
        let config = ForgeConfig {
            training_n: 7,
            verbose: true,
            ..Default::default()
        };
        let candidate = config.candidate_settings(CheckMode::CompileAndRun);
        assert!(candidate.verbose);
        assert_eq!(candidate.n_fixing_cycles, 2);
        let training = config.training_settings();
        assert_eq!(training.training_n, 7);
        assert_eq!(training.max_rounds, MAX_ROUNDS);
    }
}
