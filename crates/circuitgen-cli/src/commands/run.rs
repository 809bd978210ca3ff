//! `circuitgen run` - the full training, production and assembly pipeline

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use circuitgen_core::{
    ForgeConfig, FsPromptTemplates, JsonReportSink, Language, Pipeline, ReasoningEffort, Services,
};
use clap::Args;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::adapters::{OpenRouterClient, ProcessAssembler, ProcessChecker};

/// Flags for `run`; each one overrides the configuration file.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Circuit language (guppy, qiskit)
    #[arg(long)]
    pub language: Option<Language>,

    /// Models to generate with, in order
    #[arg(long, num_args = 1..)]
    pub models: Option<Vec<String>>,

    /// Programs per model in production
    #[arg(long)]
    pub n_programs: Option<i64>,

    /// Repair attempts per program
    #[arg(long)]
    pub n_fixing_cycles: Option<usize>,

    /// Programs processed concurrently
    #[arg(long)]
    pub max_workers: Option<i64>,

    /// Combinations to assemble per model
    #[arg(long)]
    pub n_assemble: Option<usize>,

    /// Largest number of programs per combination
    #[arg(long)]
    pub n_circuits_per_assembly: Option<i64>,

    /// Parent directory for run output
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Run directory name (default: timestamp)
    #[arg(long)]
    pub run_name: Option<String>,

    /// Language prompt template directory
    #[arg(long)]
    pub prompt_dir: Option<PathBuf>,

    /// Shared prompt template directory
    #[arg(long)]
    pub common_prompt_dir: Option<PathBuf>,

    /// Starting generation prompt (template name or absolute path)
    #[arg(long)]
    pub prompt: Option<String>,

    /// Train and rewrite the prompt before production
    #[arg(long)]
    pub improve_prompt: bool,

    /// Programs per training round
    #[arg(long)]
    pub training_n: Option<i64>,

    /// Fix ratio a prompt must stay under
    #[arg(long)]
    pub training_threshold: Option<f64>,

    /// Model that rewrites prompts
    #[arg(long)]
    pub improver_model: Option<String>,

    /// Reasoning effort (low, medium, high)
    #[arg(long)]
    pub reasoning_effort: Option<ReasoningEffort>,

    /// Seed for combination sampling
    #[arg(long)]
    pub seed: Option<u64>,
}

impl RunArgs {
    /// Overlay the flags that were given onto `config`.
    pub fn apply(&self, mut config: ForgeConfig, verbose: bool) -> ForgeConfig {
        if let Some(v) = self.language {
            config.language = v;
        }
        if let Some(v) = &self.models {
            config.models = v.clone();
        }
        if let Some(v) = self.n_programs {
            config.n_programs = v;
        }
        if let Some(v) = self.n_fixing_cycles {
            config.n_fixing_cycles = v;
        }
        if let Some(v) = self.max_workers {
            config.max_workers = v;
        }
        if let Some(v) = self.n_assemble {
            config.n_assemble = v;
        }
        if let Some(v) = self.n_circuits_per_assembly {
            config.n_circuits_per_assembly = v;
        }
        if let Some(v) = &self.output_dir {
            config.output_dir = v.clone();
        }
        if let Some(v) = &self.run_name {
            config.run_name = Some(v.clone());
        }
        if let Some(v) = &self.prompt_dir {
            config.prompt_dir = Some(v.clone());
        }
        if let Some(v) = &self.common_prompt_dir {
            config.common_prompt_dir = v.clone();
        }
        if let Some(v) = &self.prompt {
            config.prompt = v.clone();
        }
        if let Some(v) = self.training_n {
            config.training_n = v;
        }
        if let Some(v) = self.training_threshold {
            config.training_threshold = v;
        }
        if let Some(v) = &self.improver_model {
            config.improver_model = v.clone();
        }
        if let Some(v) = self.reasoning_effort {
            config.reasoning_effort = v;
        }
        config.improve_prompt |= self.improve_prompt;
        config.verbose |= verbose;
        config
    }
}

/// Load configuration, run the pipeline and map productivity to the exit status.
pub async fn execute(args: RunArgs, config_path: Option<&Path>, verbose: bool) -> anyhow::Result<ExitCode> {
    let base = match config_path {
        Some(path) => ForgeConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ForgeConfig::default(),
    };
    let config = args
        .apply(base, verbose)
        .validated()
        .context("invalid configuration")?;

    let timeout = Duration::from_secs(config.tools.timeout_secs);
    let services = Services {
        model_client: Arc::new(OpenRouterClient::from_env()?),
        checker: Arc::new(ProcessChecker::new(config.tools.checker.clone(), timeout)),
        templates: Arc::new(FsPromptTemplates),
        assembler: Arc::new(ProcessAssembler::new(config.tools.assembler.clone(), timeout)),
        reports: Arc::new(JsonReportSink),
    };

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let pipeline = Pipeline::new(config, services);
    info!(run_dir = %pipeline.layout().root().display(), "starting run");
    let report = pipeline.run(&mut rng).await.context("run aborted")?;

    println!("Run directory: {}", report.run_dir.display());
    for model in &report.models {
        let assembled = model.assembly.as_ref().map_or(0, |a| a.generated);
        println!(
            "  {}: {}/{} valid, {} assembled, ${:.6}",
            model.model,
            model.summary.valid_programs,
            model.summary.total_programs,
            assembled,
            model.summary.total_cost
        );
    }

    if report.is_productive() {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!("no model produced a valid program");
        Ok(ExitCode::FAILURE)
    }
}
