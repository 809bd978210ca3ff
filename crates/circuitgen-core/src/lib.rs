//! # circuitgen-core
//!
//! **Adaptive generate-validate-repair pipeline** for LLM-written quantum
//! circuit programs.
//!
//! Asks a model for many candidate programs, compile-checks (and optionally
//! runs) each one, feeds failures back to the model for a bounded number of
//! repair cycles, tunes the generation prompt in a short training phase
//! before production, and finally assembles random ordered selections of
//! the surviving programs into larger circuits.
//!
//! ## Architecture
//!
//! ```text
//! Pipeline (per model)
//!     │
//!     ├── TrainingLoop ──► BatchRunner ──► CandidateProcessor (compile-only)
//!     │        └── rewrites the prompt via the improver model
//!     │
//!     ├── BatchRunner ──► CandidateProcessor (compile + run)
//!     │        └── BatchSummary / ComplexityRecord
//!     │
//!     └── CombinationSampler ──► Assembler
//! ```
//!
//! ## Traits
//!
//! - [`ModelClient`] — LLM transport for generation, fixing and prompt rewrites
//! - [`ProgramChecker`] — compile and execution checks
//! - [`PromptTemplates`] — prompt template source
//! - [`Assembler`] — combines selected programs into one
//! - [`ReportSink`] — persists run reports
//!
//! Scripted implementations for tests live in [`testing`].

#![deny(unsafe_code)]

pub mod artifacts;
pub mod batch;
pub mod candidate;
pub mod checker;
pub mod config;
pub mod error;
pub mod layout;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod runlog;
pub mod sampler;
pub mod stats;
pub mod templates;
pub mod testing;
pub mod training;
pub mod types;

// Re-exports
pub use artifacts::save_text;
pub use batch::{BatchReport, BatchRunner};
pub use candidate::{CandidateProcessor, CandidateSettings, Collaborators, OutputDirs};
pub use checker::{CheckReport, ProgramChecker};
pub use config::{ForgeConfig, ToolCommands};
pub use error::{ForgeError, ForgeResult};
pub use layout::{default_run_id, RunLayout};
pub use model::{Completion, ModelClient, ModelRequest, ResponseFormat};
pub use pipeline::{ModelRun, Pipeline, RunReport, Services};
pub use report::{JsonReportSink, ReportSink};
pub use runlog::RunLog;
pub use sampler::{
    max_unique_combinations, permutation_count, Assembler, CombinationSampler, SamplerReport,
    SamplerSettings,
};
pub use stats::{BatchSummary, ComplexityRecord};
pub use templates::{FsPromptTemplates, PromptTemplates};
pub use training::{TrainingLoop, TrainingOutcome, TrainingReport, TrainingSettings};
pub use types::{
    CandidateMetrics, CandidateOutcome, CandidateStatus, CheckMode, GenerationStats,
    GenerationTask, Language, Metrics, PromptRef, ReasoningEffort, TrainingRound, Usage,
};
