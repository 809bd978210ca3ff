//! circuitgen CLI - LLM quantum-circuit generation from the terminal
//!
//! This CLI lets researchers:
//! - Generate, compile-check, repair and run circuit programs with one or more models
//! - Tune the generation prompt in a training phase before production
//! - Assemble surviving programs into larger circuits
//! - Re-assemble an existing directory of programs

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod adapters;
mod commands;

use commands::{assemble, run};

/// circuitgen CLI application
#[derive(Parser)]
#[command(name = "circuitgen")]
#[command(about = "circuitgen - generate, repair and assemble quantum circuit programs", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path (YAML)
    #[arg(short, long, env = "CIRCUITGEN_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Train, generate, repair and assemble circuits
    Run(run::RunArgs),

    /// Assemble existing programs into combinations
    Assemble(assemble::AssembleArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Run(args) => run::execute(args, config, cli.verbose).await,
        Commands::Assemble(args) => assemble::execute(args, config).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}
