//! `circuitgen assemble` - combine existing programs without generating new ones

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use circuitgen_core::{
    CombinationSampler, ForgeConfig, Language, RunLog, SamplerSettings, ToolCommands,
};
use clap::Args;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::adapters::ProcessAssembler;

/// Flags for `assemble`
#[derive(Args, Debug)]
pub struct AssembleArgs {
    /// Directory containing the `.py` programs to combine
    pub input_dir: PathBuf,

    /// Directory for assembled programs and `assembler.log`
    #[arg(long)]
    pub output_dir: PathBuf,

    /// Number of combinations to assemble
    #[arg(long, default_value_t = 1)]
    pub n_generations: usize,

    /// Fewest programs per combination
    #[arg(long, default_value_t = 2)]
    pub min_files: usize,

    /// Most programs per combination
    #[arg(long, default_value_t = 5)]
    pub max_files: usize,

    /// Circuit language (guppy, qiskit)
    #[arg(long)]
    pub language: Language,

    /// Seed for combination sampling
    #[arg(long)]
    pub seed: Option<u64>,
}

/// `*.py` files directly inside `dir`, sorted by path.
pub async fn list_programs(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("reading {}", dir.display()))?;
    let mut programs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "py") && entry.file_type().await?.is_file() {
            programs.push(path);
        }
    }
    programs.sort();
    Ok(programs)
}

pub async fn execute(args: AssembleArgs, config_path: Option<&Path>) -> anyhow::Result<ExitCode> {
    if args.n_generations < 1 {
        bail!("--n-generations must be >= 1");
    }
    let tools = match config_path {
        Some(path) => ForgeConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?
            .tools,
        None => ToolCommands::default(),
    };

    tokio::fs::create_dir_all(&args.output_dir)
        .await
        .with_context(|| format!("creating {}", args.output_dir.display()))?;
    let log = RunLog::open(args.output_dir.join("assembler.log"))?;
    log.append(format!(
        "Starting assembler: input={} output={} n={} language={}",
        args.input_dir.display(),
        args.output_dir.display(),
        args.n_generations,
        args.language
    ));

    let programs = list_programs(&args.input_dir).await?;
    if programs.is_empty() {
        let message = format!("No input files found in {}", args.input_dir.display());
        log.append(&message);
        bail!(message);
    }
    log.append(format!("Found {} input files. Starting assembly...", programs.len()));
    info!(programs = programs.len(), "starting assembly");

    let sampler = CombinationSampler::new(
        programs,
        SamplerSettings {
            min_files: args.min_files,
            max_files: args.max_files,
            requested: args.n_generations,
            language: args.language,
        },
    )
    .map_err(|e| {
        log.append(e.to_string());
        e
    })?;

    let assembler = ProcessAssembler::new(tools.assembler, Duration::from_secs(tools.timeout_secs));
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let output_dir = args.output_dir.clone();
    let report = sampler
        .run(
            &assembler,
            &mut rng,
            |i| output_dir.join(format!("assembled_circuit_{}.py", i)),
            &log,
        )
        .await;

    println!(
        "Assembled {}/{} combination(s), {} failed. Output: {}",
        report.generated,
        report.target,
        report.failed,
        args.output_dir.display()
    );
    if report.generated > 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
